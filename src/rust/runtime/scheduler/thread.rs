// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    poll::{
        Interest,
        RawFd,
    },
    scheduler::{
        semaphore::{
            SemInner,
            WaitSlot,
        },
        yielder::ThreadContext,
    },
    timer::Timer,
};
use ::std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        Weak,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Externally visible thread identifier.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct ThreadId(u64);

/// Offset into the slab that holds the thread state.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub(crate) struct InternalId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    Starting,
    Running,
    Waiting,
    Sleeping,
    BlockedIO,
    BlockedSem,
    Suspended,
    SuspendedBlockIO,
    SuspendedBlockSem,
    Terminating,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Lowest = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Highest = 4,
}

/// Whether the scheduler reclaims a thread on its own once it terminates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoDelete {
    AutoDelete,
    NoAutoDelete,
}

/// Creation parameters of a cooperative thread.
#[derive(Clone, Debug)]
pub struct ThreadConfig {
    pub name: String,
    pub priority: Priority,
    pub auto_delete: AutoDelete,
    /// Stack budget. Falls back to the scheduler default when unset.
    pub stack_size: Option<usize>,
    /// Leave the thread suspended until someone resumes it.
    pub start_suspended: bool,
}

/// Saved continuation of a thread.
pub(crate) type Coroutine = Pin<Box<dyn Future<Output = ()>>>;

/// Re-creates the body of a restartable thread.
pub(crate) type BodyFactory = Box<dyn FnMut(ThreadContext) -> Coroutine>;

/// What a blocked thread waits on.
pub(crate) enum Block {
    None,
    Io {
        fd: RawFd,
        interest: Interest,
        timer: Option<Timer>,
    },
    Semaphore {
        semaphore: Weak<SemInner>,
        slot: Arc<WaitSlot>,
        timer: Option<Timer>,
    },
}

pub(crate) struct Thread {
    pub id: ThreadId,
    pub name: String,
    pub status: ThreadStatus,
    pub base_priority: Priority,
    /// Aging countdown. The thread is eligible when it reaches zero.
    pub dynamic_priority: i32,
    /// Scans that skipped this thread while its countdown was negative.
    pub passed_over: usize,
    pub suspend_count: u32,
    pub auto_delete: AutoDelete,
    pub stack_size: usize,
    /// Address of a stack marker taken right before the coroutine was last polled.
    pub stack_base: usize,
    /// Taken out while polled. `None` for the process thread.
    pub coroutine: Option<Coroutine>,
    /// Set for threads that can be restarted once terminated.
    pub factory: Option<BodyFactory>,
    pub block: Block,
    pub sleep_timer: Option<Timer>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ThreadConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn auto_delete(mut self, auto_delete: AutoDelete) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    pub fn start_suspended(mut self, start_suspended: bool) -> Self {
        self.start_suspended = start_suspended;
        self
    }
}

impl Thread {
    pub fn new(id: ThreadId, config: &ThreadConfig, stack_size: usize) -> Self {
        Self {
            id,
            name: config.name.clone(),
            status: ThreadStatus::Starting,
            base_priority: config.priority,
            dynamic_priority: 0,
            passed_over: 0,
            suspend_count: 1,
            auto_delete: config.auto_delete,
            stack_size,
            stack_base: 0,
            coroutine: None,
            factory: None,
            block: Block::None,
            sleep_timer: None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_count > 0
    }

    /// Applies a suspend or resume request to the status, and returns true when a running thread just suspended
    /// itself.
    pub fn apply_suspend(&mut self, suspend: bool) -> bool {
        if suspend {
            self.suspend_count += 1;
        } else {
            self.suspend_count = self.suspend_count.saturating_sub(1);
        }
        let suspended: bool = self.is_suspended();
        if self.status == ThreadStatus::Running && suspended {
            self.status = ThreadStatus::Suspended;
            return true;
        }
        self.status = match (self.status, suspended) {
            (ThreadStatus::Waiting, true) => ThreadStatus::Suspended,
            (ThreadStatus::BlockedIO, true) => ThreadStatus::SuspendedBlockIO,
            (ThreadStatus::BlockedSem, true) => ThreadStatus::SuspendedBlockSem,
            (ThreadStatus::Suspended, false) => ThreadStatus::Waiting,
            (ThreadStatus::SuspendedBlockIO, false) => ThreadStatus::BlockedIO,
            (ThreadStatus::SuspendedBlockSem, false) => ThreadStatus::BlockedSem,
            (status, _) => status,
        };
        false
    }

    pub fn is_terminated(&self) -> bool {
        self.status == ThreadStatus::Terminated
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            priority: Priority::Normal,
            auto_delete: AutoDelete::NoAutoDelete,
            stack_size: None,
            start_suspended: false,
        }
    }
}

impl From<u64> for ThreadId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ThreadId> for u64 {
    fn from(value: ThreadId) -> Self {
        value.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for InternalId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<InternalId> for usize {
    fn from(value: InternalId) -> Self {
        value.0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
