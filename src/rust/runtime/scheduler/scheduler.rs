// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Implementation of our cooperative, single-threaded thread scheduler.
//!
//! Threads are coroutines kept in a slab and linked into a run list (the ring) in scheduling order. The process
//! thread is the OS thread that owns the scheduler. It sits in the ring like any other thread, and whenever it
//! yields or blocks it drives the scheduler: it scans the ring for the next eligible thread, polls it until it yields,
//! and repeats until the scan lands back on the process thread. When no thread is eligible for a few laps, the
//! process thread blocks in the idle wait until a descriptor becomes ready or the next timer is due.
//!
//! The scheduler state is never borrowed across a poll, a timer callback or the drop of a coroutine.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::id_map::IdMap,
    runtime::{
        assert::{
            self,
            fatal,
        },
        config::SchedulerConfig,
        fail::Fail,
        interval::TimeInterval,
        limits,
        poll::{
            self,
            IdleWaker,
            Interest,
            RawFd,
        },
        scheduler::{
            semaphore::{
                SemInner,
                WaitOutcome,
                WaitSlot,
            },
            stack,
            thread::{
                AutoDelete,
                Block,
                BodyFactory,
                Coroutine,
                InternalId,
                Priority,
                Thread,
                ThreadConfig,
                ThreadId,
                ThreadStatus,
            },
            yielder::ThreadContext,
        },
        timer::{
            list::TimerList,
            Timer,
        },
    },
};
use ::futures::task::noop_waker_ref;
use ::slab::{
    Slab,
    VacantEntry,
};
use ::std::{
    cell::{
        Ref,
        RefCell,
        RefMut,
    },
    future::Future,
    mem,
    rc::{
        Rc,
        Weak,
    },
    sync::{
        Arc,
        Weak as SyncWeak,
    },
    task::{
        Context,
        Poll,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Thread Scheduler
pub(crate) struct Scheduler {
    config: SchedulerConfig,
    threads: Slab<Thread>,
    // Mapping between external thread ids and slab offsets.
    ids: IdMap<ThreadId, InternalId>,
    // Run list in scheduling order. Holds every thread that has not terminated yet, the process thread included.
    ring: Vec<InternalId>,
    current: InternalId,
    process: InternalId,
    timers: TimerList,
    waker: Arc<IdleWaker>,
    // Exit code of a requested process termination that has not been finalized yet.
    terminating: Option<i32>,
    exit_code: Option<i32>,
    shutdown_hook: Option<Box<dyn FnOnce(i32)>>,
    // Coroutines of unlinked threads. Dropped once the scheduler is no longer borrowed.
    graveyard: Vec<Coroutine>,
}

/// Shared handle to a scheduler. Owned by the process thread.
#[derive(Clone)]
pub struct SharedScheduler(Rc<RefCell<Scheduler>>);

/// Handle held by thread contexts so that a thread does not keep its own scheduler alive.
#[derive(Clone)]
pub(crate) struct WeakScheduler(Weak<RefCell<Scheduler>>);

/// What the scheduler wants a thread to do at a yield point.
pub(crate) enum YieldPoint {
    Continue,
    Switch,
}

/// Position of an ongoing selection in the ring.
struct Scan {
    start: InternalId,
    prev: InternalId,
    thread: InternalId,
    // Completed laps.
    pass: usize,
    // Cleared as soon as a thread with a positive countdown is seen.
    can_use_lowest: bool,
}

enum Selection {
    Thread(InternalId),
    Idle,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Scheduler {
    fn new(config: SchedulerConfig, timers: TimerList) -> Result<Self, Fail> {
        config.validate()?;
        assert::set_assert_action(config.assert_action);
        assert::load_assert_action_from_env();

        let waker: Arc<IdleWaker> = Arc::new(IdleWaker::new()?);
        let mut threads: Slab<Thread> = Slab::new();
        let mut ids: IdMap<ThreadId, InternalId> = IdMap::default();
        let entry: VacantEntry<Thread> = threads.vacant_entry();
        let process: InternalId = InternalId::from(entry.key());
        let id: ThreadId = ids.insert_with_new_id(process)?;
        let mut thread: Thread = Thread::new(id, &ThreadConfig::new("process"), usize::MAX);
        thread.status = ThreadStatus::Running;
        thread.suspend_count = 0;
        entry.insert(thread);

        let hook_waker: Arc<IdleWaker> = waker.clone();
        timers.set_change_hook(move || hook_waker.notify());

        Ok(Self {
            config,
            threads,
            ids,
            ring: vec![process],
            current: process,
            process,
            timers,
            waker,
            terminating: None,
            exit_code: None,
            shutdown_hook: None,
            graveyard: Vec::new(),
        })
    }

    fn thread(&self, key: InternalId) -> &Thread {
        &self.threads[usize::from(key)]
    }

    fn thread_mut(&mut self, key: InternalId) -> &mut Thread {
        &mut self.threads[usize::from(key)]
    }

    fn key(&self, id: ThreadId) -> Result<InternalId, Fail> {
        match self.ids.get(&id) {
            Some(key) if self.threads.contains(usize::from(key)) => Ok(key),
            _ => {
                let cause: String = format!("unknown thread (id={})", id);
                debug!("key(): {}", cause);
                Err(Fail::new(libc::ESRCH, &cause))
            },
        }
    }

    /// Resolves the thread a context acts for. A context may only act for its own thread, while that thread runs.
    fn calling_thread(&self, id: ThreadId, operation: &str) -> Result<InternalId, Fail> {
        let key: InternalId = self.key(id)?;
        if !crate::sched_assert!(
            key == self.current,
            "{}() called through the context of thread {} while another thread runs",
            operation,
            id
        ) {
            let cause: String = format!("thread context used outside of its thread (id={})", id);
            return Err(Fail::new(libc::EPERM, &cause));
        }
        Ok(key)
    }

    fn next_in_ring(&self, key: InternalId) -> InternalId {
        match self.ring.iter().position(|k| *k == key) {
            Some(position) => self.ring[(position + 1) % self.ring.len()],
            None => self.process,
        }
    }

    fn create_thread(&mut self, config: &ThreadConfig) -> Result<(InternalId, ThreadId), Fail> {
        let stack_size: usize = config.stack_size.unwrap_or(self.config.default_stack_size);
        if stack_size < self.config.min_stack_size {
            let cause: String = format!(
                "stack size is below the minimum (size={:?}, min={:?})",
                stack_size, self.config.min_stack_size
            );
            error!("create_thread(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        let entry: VacantEntry<Thread> = self.threads.vacant_entry();
        let key: InternalId = InternalId::from(entry.key());
        let id: ThreadId = self.ids.insert_with_new_id(key)?;
        entry.insert(Thread::new(id, config, stack_size));
        self.link_after_current(key);
        Ok((key, id))
    }

    /// New and restarted threads run right after the thread that created them.
    fn link_after_current(&mut self, key: InternalId) {
        let position: usize = match self.ring.iter().position(|k| *k == self.current) {
            Some(position) => position + 1,
            None => self.ring.len(),
        };
        self.ring.insert(position, key);
    }

    /// Puts a terminated thread back into the ring with a fresh body.
    fn relink(&mut self, key: InternalId, coroutine: Coroutine, factory: BodyFactory) {
        let thread: &mut Thread = self.thread_mut(key);
        thread.coroutine = Some(coroutine);
        thread.factory = Some(factory);
        thread.block = Block::None;
        thread.sleep_timer = None;
        thread.dynamic_priority = 0;
        thread.passed_over = 0;
        thread.stack_base = 0;
        thread.status = ThreadStatus::Starting;
        self.link_after_current(key);
    }

    fn optional_timer(&self, timeout: TimeInterval) -> Option<Timer> {
        if timeout.is_max() {
            None
        } else {
            Some(Timer::new(&self.timers, timeout))
        }
    }

    fn begin_sleep(&mut self, key: InternalId, interval: TimeInterval) {
        let timer: Timer = Timer::new(&self.timers, interval);
        if interval.is_max() {
            timer.pause();
        }
        let thread: &mut Thread = self.thread_mut(key);
        thread.sleep_timer = Some(timer);
        thread.status = match thread.status {
            ThreadStatus::Running | ThreadStatus::Waiting | ThreadStatus::Suspended => ThreadStatus::Sleeping,
            status => status,
        };
    }

    fn block_on_io(&mut self, key: InternalId, fd: RawFd, interest: Interest, timeout: TimeInterval) {
        let timer: Option<Timer> = self.optional_timer(timeout);
        let thread: &mut Thread = self.thread_mut(key);
        thread.block = Block::Io { fd, interest, timer };
        thread.status = match thread.status {
            ThreadStatus::Running | ThreadStatus::Waiting => ThreadStatus::BlockedIO,
            ThreadStatus::Suspended => ThreadStatus::SuspendedBlockIO,
            status => status,
        };
    }

    fn block_on_semaphore(
        &mut self,
        key: InternalId,
        semaphore: SyncWeak<SemInner>,
        slot: Arc<WaitSlot>,
        timeout: TimeInterval,
    ) {
        let timer: Option<Timer> = self.optional_timer(timeout);
        let thread: &mut Thread = self.thread_mut(key);
        thread.block = Block::Semaphore {
            semaphore,
            slot,
            timer,
        };
        thread.status = match thread.status {
            ThreadStatus::Running | ThreadStatus::Waiting => ThreadStatus::BlockedSem,
            ThreadStatus::Suspended => ThreadStatus::SuspendedBlockSem,
            status => status,
        };
    }

    /// Checks whether the semaphore wait of a blocked thread has ended and unblocks the thread if so.
    fn settle_semaphore(&mut self, key: InternalId) -> bool {
        let thread: &mut Thread = self.thread_mut(key);
        let settled: bool = match &thread.block {
            Block::Semaphore { semaphore, slot, timer } => match slot.outcome() {
                WaitOutcome::Pending => {
                    let expired: bool = timer.as_ref().map_or(false, |t| t.has_expired());
                    if expired && slot.resolve(WaitOutcome::TimedOut) {
                        if let Some(inner) = semaphore.upgrade() {
                            inner.remove_waiter(slot);
                        }
                        true
                    } else {
                        // Lost the race against a signal.
                        slot.outcome() != WaitOutcome::Pending
                    }
                },
                _ => true,
            },
            _ => true,
        };
        if !settled {
            return false;
        }

        thread.block = Block::None;
        thread.status = match thread.status {
            ThreadStatus::BlockedSem => ThreadStatus::Waiting,
            ThreadStatus::SuspendedBlockSem => ThreadStatus::Suspended,
            status => {
                crate::sched_assert!(
                    false,
                    "semaphore unblock of thread that is not blocked (id={}, status={:?})",
                    thread.id,
                    status
                );
                status
            },
        };
        true
    }

    fn io_settled(&self, key: InternalId) -> bool {
        match &self.thread(key).block {
            Block::Io { fd, interest, timer } => match poll::is_ready(*fd, *interest) {
                Ok(true) => true,
                Ok(false) => timer.as_ref().map_or(false, |t| t.has_expired()),
                Err(e) => {
                    // Let the thread observe the failure.
                    warn!("io_settled(): {:?}", e);
                    true
                },
            },
            _ => true,
        }
    }

    /// Withdraws whatever a thread is blocked on. A permit that was already handed to the thread goes back to the
    /// semaphore.
    fn cancel_block(&mut self, key: InternalId) {
        let block: Block = mem::replace(&mut self.thread_mut(key).block, Block::None);
        if let Block::Semaphore { semaphore, slot, .. } = block {
            let Some(inner) = semaphore.upgrade() else {
                return;
            };
            if slot.resolve(WaitOutcome::Cancelled) {
                inner.remove_waiter(&slot);
            } else if slot.outcome() == WaitOutcome::Signalled {
                inner.signal();
            }
        }
    }

    /// Takes a terminating thread out of the ring.
    fn unlink(&mut self, key: InternalId) {
        self.ring.retain(|k| *k != key);
        self.cancel_block(key);
        let thread: &mut Thread = &mut self.threads[usize::from(key)];
        thread.status = ThreadStatus::Terminated;
        thread.sleep_timer = None;
        if let Some(coroutine) = thread.coroutine.take() {
            self.graveyard.push(coroutine);
        }
        debug!("unlink(): thread {} ({:?}) terminated", thread.id, thread.name);
        if thread.auto_delete == AutoDelete::AutoDelete {
            self.remove_from_arena(key);
        }
    }

    fn remove_from_arena(&mut self, key: InternalId) {
        if let Some(thread) = self.threads.try_remove(usize::from(key)) {
            self.ids.remove(&thread.id);
            trace!("remove_from_arena(): thread {} ({:?}) removed", thread.id, thread.name);
        }
    }

    fn blocked_descriptors(&self) -> Vec<(RawFd, Interest)> {
        self.ring
            .iter()
            .map(|key| self.thread(*key))
            .filter(|t| matches!(t.status, ThreadStatus::BlockedIO | ThreadStatus::SuspendedBlockIO))
            .filter_map(|t| match &t.block {
                Block::Io { fd, interest, .. } => Some((*fd, *interest)),
                _ => None,
            })
            .collect()
    }

    /// True when some semaphore wait has ended without its thread having noticed yet.
    fn has_settled_wait(&self) -> bool {
        self.ring.iter().map(|key| self.thread(*key)).any(|t| match (&t.status, &t.block) {
            (ThreadStatus::BlockedSem, Block::Semaphore { slot, .. }) => slot.outcome() != WaitOutcome::Pending,
            _ => false,
        })
    }

    /// Starts selecting the thread to run after the current one.
    fn begin_selection(&mut self) -> Scan {
        let current: InternalId = self.current;
        let aging: [i32; limits::NUM_PRIORITIES] = self.config.priority_aging;
        let thread: &mut Thread = self.thread_mut(current);
        if thread.status == ThreadStatus::Running {
            thread.status = ThreadStatus::Waiting;
        }
        thread.dynamic_priority = aging[thread.base_priority as usize];
        Scan {
            start: current,
            prev: current,
            thread: self.next_in_ring(current),
            pass: 0,
            can_use_lowest: true,
        }
    }

    /// Walks the ring from where `scan` stopped until a thread is eligible, or until enough laps went by without one.
    fn scan(&mut self, scan: &mut Scan) -> Selection {
        loop {
            if self.terminating.is_some() {
                let process: InternalId = self.process;
                self.thread_mut(process).status = ThreadStatus::Running;
                return Selection::Thread(process);
            }

            let key: InternalId = scan.thread;
            let status: ThreadStatus = self.thread(key).status;
            let mut selected: Option<InternalId> = None;
            match status {
                ThreadStatus::Waiting => {
                    let thread: &mut Thread = self.thread_mut(key);
                    if thread.dynamic_priority == 0 {
                        thread.status = ThreadStatus::Running;
                        thread.passed_over = 0;
                        selected = Some(key);
                    } else if thread.dynamic_priority > 0 {
                        thread.dynamic_priority -= 1;
                        scan.can_use_lowest = false;
                    } else if scan.pass > 1 && scan.can_use_lowest {
                        thread.dynamic_priority += 1;
                    } else {
                        thread.passed_over += 1;
                        if thread.passed_over >= limits::STARVATION_LIMIT {
                            thread.passed_over = 0;
                            thread.dynamic_priority += 1;
                        }
                    }
                },
                ThreadStatus::Sleeping => {
                    let thread: &mut Thread = self.thread_mut(key);
                    if thread.sleep_timer.as_ref().map_or(true, |t| t.has_expired()) {
                        thread.sleep_timer = None;
                        if thread.is_suspended() {
                            thread.status = ThreadStatus::Suspended;
                        } else {
                            thread.status = ThreadStatus::Running;
                            selected = Some(key);
                        }
                    }
                },
                ThreadStatus::BlockedIO => {
                    if self.io_settled(key) {
                        let thread: &mut Thread = self.thread_mut(key);
                        thread.block = Block::None;
                        thread.status = ThreadStatus::Running;
                        selected = Some(key);
                    }
                },
                ThreadStatus::BlockedSem | ThreadStatus::SuspendedBlockSem => {
                    if self.settle_semaphore(key) && self.thread(key).status == ThreadStatus::Waiting {
                        self.thread_mut(key).status = ThreadStatus::Running;
                        selected = Some(key);
                    }
                },
                ThreadStatus::Starting => {
                    if !self.thread(key).is_suspended() {
                        selected = Some(key);
                    }
                },
                ThreadStatus::Terminating => {
                    if key == self.current {
                        // A thread cannot clean up after itself.
                        selected = Some(self.process);
                    } else {
                        if key == scan.start {
                            scan.start = scan.prev;
                        }
                        self.unlink(key);
                        scan.thread = scan.prev;
                    }
                },
                ThreadStatus::Running
                | ThreadStatus::Suspended
                | ThreadStatus::SuspendedBlockIO
                | ThreadStatus::Terminated => (),
            }

            if let Some(next) = selected {
                return Selection::Thread(next);
            }

            scan.prev = scan.thread;
            scan.thread = self.next_in_ring(scan.thread);
            if scan.thread == scan.start {
                scan.pass += 1;
                if scan.pass > self.config.idle_passes {
                    return Selection::Idle;
                }
            }
        }
    }

    fn yield_point(&mut self, key: InternalId, here: usize) -> YieldPoint {
        let thread: &Thread = self.thread(key);
        if stack::exceeds(thread.stack_base, here, thread.stack_size) {
            fatal(&format!(
                "Stack overflow!\nthread {} ({:?}) is {} bytes deep into a {} byte stack",
                thread.id,
                thread.name,
                stack::depth(thread.stack_base, here),
                thread.stack_size
            ));
        }
        if thread.status == ThreadStatus::Running && thread.base_priority == Priority::Highest {
            YieldPoint::Continue
        } else {
            YieldPoint::Switch
        }
    }
}

impl SharedScheduler {
    /// Creates a scheduler driven by a timer list on the system clock.
    pub fn new(config: SchedulerConfig) -> Result<Self, Fail> {
        Self::with_timer_list(config, TimerList::default())
    }

    pub fn with_timer_list(config: SchedulerConfig, timers: TimerList) -> Result<Self, Fail> {
        Ok(Self(Rc::new(RefCell::new(Scheduler::new(config, timers)?))))
    }

    fn borrow(&self) -> Ref<'_, Scheduler> {
        self.0.borrow()
    }

    fn borrow_mut(&self) -> RefMut<'_, Scheduler> {
        self.0.borrow_mut()
    }

    pub(crate) fn downgrade(&self) -> WeakScheduler {
        WeakScheduler(Rc::downgrade(&self.0))
    }

    /// Creates a thread running `body`. The thread runs right after the current thread once that one yields.
    pub fn spawn<F, Fut>(&self, config: ThreadConfig, body: F) -> Result<ThreadId, Fail>
    where
        F: FnOnce(ThreadContext) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let (key, id): (InternalId, ThreadId) = self.borrow_mut().create_thread(&config)?;
        let coroutine: Coroutine = Box::pin(body(ThreadContext::new(self.downgrade(), id)));
        self.install(key, id, &config, coroutine, None);
        Ok(id)
    }

    /// Same as [SharedScheduler::spawn], for a body that can be called again. Such a thread can be brought back with
    /// [SharedScheduler::restart] once it terminated.
    pub fn spawn_restartable<F, Fut>(&self, config: ThreadConfig, mut body: F) -> Result<ThreadId, Fail>
    where
        F: FnMut(ThreadContext) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let mut factory: BodyFactory = Box::new(move |ctx: ThreadContext| -> Coroutine { Box::pin(body(ctx)) });
        let (key, id): (InternalId, ThreadId) = self.borrow_mut().create_thread(&config)?;
        let coroutine: Coroutine = factory(ThreadContext::new(self.downgrade(), id));
        self.install(key, id, &config, coroutine, Some(factory));
        Ok(id)
    }

    fn install(
        &self,
        key: InternalId,
        id: ThreadId,
        config: &ThreadConfig,
        coroutine: Coroutine,
        factory: Option<BodyFactory>,
    ) {
        let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
        let thread: &mut Thread = scheduler.thread_mut(key);
        thread.coroutine = Some(coroutine);
        thread.factory = factory;
        if !config.start_suspended {
            thread.apply_suspend(false);
        }
        debug!("spawn(): thread {} ({:?}) created", id, config.name);
    }

    /// Runs a terminated thread again from the start of its body, right after the current thread. Only threads created
    /// with [SharedScheduler::spawn_restartable] can be restarted.
    pub fn restart(&self, id: ThreadId) -> Result<(), Fail> {
        let mut factory: BodyFactory = {
            let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
            let key: InternalId = scheduler.key(id)?;
            let thread: &mut Thread = scheduler.thread_mut(key);
            if !thread.is_terminated() {
                let cause: String = format!("thread has not terminated (id={})", id);
                warn!("restart(): {}", cause);
                return Err(Fail::new(libc::EBUSY, &cause));
            }
            match thread.factory.take() {
                Some(factory) => factory,
                None => {
                    let cause: String = format!("thread body cannot be re-created (id={})", id);
                    warn!("restart(): {}", cause);
                    return Err(Fail::new(libc::EINVAL, &cause));
                },
            }
        };
        let coroutine: Coroutine = factory(ThreadContext::new(self.downgrade(), id));

        let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
        let key: InternalId = scheduler.key(id)?;
        scheduler.relink(key, coroutine, factory);
        debug!("restart(): thread {} restarted", id);
        Ok(())
    }

    pub fn process_id(&self) -> ThreadId {
        let scheduler: Ref<Scheduler> = self.borrow();
        scheduler.thread(scheduler.process).id
    }

    pub fn current_thread(&self) -> ThreadId {
        let scheduler: Ref<Scheduler> = self.borrow();
        scheduler.thread(scheduler.current).id
    }

    /// Number of threads in the run list, the process thread included.
    pub fn num_threads(&self) -> usize {
        self.borrow().ring.len()
    }

    pub fn timer_list(&self) -> TimerList {
        self.borrow().timers.clone()
    }

    pub fn config(&self) -> SchedulerConfig {
        self.borrow().config.clone()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.borrow().exit_code
    }

    pub fn thread_name(&self, id: ThreadId) -> Result<String, Fail> {
        let scheduler: Ref<Scheduler> = self.borrow();
        let key: InternalId = scheduler.key(id)?;
        Ok(scheduler.thread(key).name.clone())
    }

    pub fn set_thread_name(&self, id: ThreadId, name: &str) -> Result<(), Fail> {
        let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
        let key: InternalId = scheduler.key(id)?;
        scheduler.thread_mut(key).name = name.to_string();
        Ok(())
    }

    /// Current status of a thread. A semaphore wait that has ended is accounted for first.
    pub fn status(&self, id: ThreadId) -> Result<ThreadStatus, Fail> {
        let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
        let key: InternalId = scheduler.key(id)?;
        if matches!(
            scheduler.thread(key).status,
            ThreadStatus::BlockedSem | ThreadStatus::SuspendedBlockSem
        ) {
            scheduler.settle_semaphore(key);
        }
        Ok(scheduler.thread(key).status)
    }

    pub fn priority(&self, id: ThreadId) -> Result<Priority, Fail> {
        let scheduler: Ref<Scheduler> = self.borrow();
        let key: InternalId = scheduler.key(id)?;
        Ok(scheduler.thread(key).base_priority)
    }

    pub fn set_priority(&self, id: ThreadId, priority: Priority) -> Result<(), Fail> {
        let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
        let key: InternalId = scheduler.key(id)?;
        scheduler.thread_mut(key).base_priority = priority;
        Ok(())
    }

    /// Chooses whether a thread is reclaimed as soon as it terminates. Turning auto-delete on for a thread that has
    /// already terminated reclaims it right away.
    pub fn set_auto_delete(&self, id: ThreadId, auto_delete: AutoDelete) -> Result<(), Fail> {
        let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
        let key: InternalId = scheduler.key(id)?;
        if !crate::sched_assert!(key != scheduler.process, "cannot auto-delete the process thread") {
            return Err(Fail::new(libc::EPERM, "cannot auto-delete the process thread"));
        }
        let thread: &mut Thread = scheduler.thread_mut(key);
        thread.auto_delete = auto_delete;
        if auto_delete == AutoDelete::AutoDelete && thread.is_terminated() {
            scheduler.remove_from_arena(key);
        }
        Ok(())
    }

    /// Reclaims a terminated thread. Its id becomes unknown afterwards.
    pub fn remove_thread(&self, id: ThreadId) -> Result<(), Fail> {
        let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
        let key: InternalId = scheduler.key(id)?;
        if !scheduler.thread(key).is_terminated() {
            let cause: String = format!("thread has not terminated (id={})", id);
            warn!("remove_thread(): {}", cause);
            return Err(Fail::new(libc::EBUSY, &cause));
        }
        scheduler.remove_from_arena(key);
        Ok(())
    }

    pub fn suspend(&self, id: ThreadId) -> Result<(), Fail> {
        self.apply_suspend(id, true)
    }

    /// Undoes one suspend. A thread runs again once every suspend has been undone.
    pub fn resume(&self, id: ThreadId) -> Result<(), Fail> {
        self.apply_suspend(id, false)
    }

    fn apply_suspend(&self, id: ThreadId, suspend: bool) -> Result<(), Fail> {
        let process_suspended: bool = {
            let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
            let key: InternalId = scheduler.key(id)?;
            let process: InternalId = scheduler.process;
            let thread: &mut Thread = scheduler.thread_mut(key);
            if matches!(thread.status, ThreadStatus::Terminating | ThreadStatus::Terminated) {
                return Ok(());
            }
            thread.apply_suspend(suspend) && key == process
        };
        // A thread suspending itself stops at its next yield point. The process thread stops right here.
        if process_suspended && self.is_process_current() {
            self.block_process();
        }
        Ok(())
    }

    /// Requests termination of a thread. The thread is unlinked the next time the scheduler walks past it.
    pub fn terminate(&self, id: ThreadId) -> Result<(), Fail> {
        let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
        let key: InternalId = scheduler.key(id)?;
        if key == scheduler.process {
            let cause: &str = "the process thread terminates through terminate_process()";
            warn!("terminate(): {}", cause);
            return Err(Fail::new(libc::EPERM, cause));
        }
        if matches!(
            scheduler.thread(key).status,
            ThreadStatus::Terminating | ThreadStatus::Terminated
        ) {
            return Ok(());
        }
        scheduler.cancel_block(key);
        let thread: &mut Thread = scheduler.thread_mut(key);
        thread.sleep_timer = None;
        thread.status = ThreadStatus::Terminating;
        debug!("terminate(): thread {} ({:?}) terminating", id, thread.name);
        Ok(())
    }

    /// True when `id` has terminated or is no longer known.
    pub fn is_terminated(&self, id: ThreadId) -> bool {
        let scheduler: Ref<Scheduler> = self.borrow();
        match scheduler.key(id) {
            Ok(key) => scheduler.thread(key).is_terminated(),
            Err(_) => true,
        }
    }

    /// Lets other threads run. Process thread only.
    pub fn yield_now(&self) {
        if self.in_process_context("yield_now") {
            self.process_yield();
        }
    }

    /// Puts the process thread to sleep for `interval` while other threads run.
    pub fn sleep(&self, interval: TimeInterval) {
        if !self.in_process_context("sleep") {
            return;
        }
        let process: InternalId = self.borrow().process;
        self.borrow_mut().begin_sleep(process, interval);
        self.block_process();
    }

    /// Runs other threads until `id` has terminated or `timeout` elapsed. Returns true on termination.
    pub fn wait_for_termination(&self, id: ThreadId, timeout: TimeInterval) -> bool {
        if !self.in_process_context("wait_for_termination") {
            return false;
        }
        let timer: Option<Timer> = self.optional_timer(timeout);
        loop {
            if self.is_terminated(id) {
                return true;
            }
            if timer.as_ref().map_or(false, |t| t.has_expired()) || self.exit_code().is_some() {
                return false;
            }
            self.process_yield();
        }
    }

    /// Requests termination of the whole process. Every thread stops being scheduled; the shutdown hook runs and,
    /// depending on configuration, the OS process exits with `code`.
    pub fn terminate_process(&self, code: i32) {
        {
            let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
            if scheduler.terminating.is_some() || scheduler.exit_code.is_some() {
                return;
            }
            info!("terminate_process(): termination requested (code={})", code);
            scheduler.terminating = Some(code);
        }
        if self.is_process_current() {
            self.process_yield();
        }
    }

    /// Installs the callback run once when process termination is finalized, with the exit code.
    pub fn set_shutdown_hook<F>(&self, hook: F)
    where
        F: FnOnce(i32) + 'static,
    {
        self.borrow_mut().shutdown_hook = Some(Box::new(hook));
    }

    pub(crate) fn in_process_context(&self, operation: &str) -> bool {
        crate::sched_assert!(
            self.is_process_current(),
            "{}() must be called from the process thread",
            operation
        )
    }

    fn is_process_current(&self) -> bool {
        let scheduler: Ref<Scheduler> = self.borrow();
        scheduler.current == scheduler.process
    }

    pub(crate) fn optional_timer(&self, timeout: TimeInterval) -> Option<Timer> {
        self.borrow().optional_timer(timeout)
    }

    pub(crate) fn begin_sleep(&self, id: ThreadId, interval: TimeInterval) -> Result<(), Fail> {
        let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
        let key: InternalId = scheduler.calling_thread(id, "sleep")?;
        scheduler.begin_sleep(key, interval);
        Ok(())
    }

    pub(crate) fn block_on_io(
        &self,
        id: ThreadId,
        fd: RawFd,
        interest: Interest,
        timeout: TimeInterval,
    ) -> Result<(), Fail> {
        let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
        let key: InternalId = scheduler.calling_thread(id, "wait_io")?;
        scheduler.block_on_io(key, fd, interest, timeout);
        Ok(())
    }

    pub(crate) fn block_on_semaphore(
        &self,
        id: ThreadId,
        semaphore: SyncWeak<SemInner>,
        slot: Arc<WaitSlot>,
        timeout: TimeInterval,
    ) -> Result<(), Fail> {
        let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
        let key: InternalId = scheduler.calling_thread(id, "wait")?;
        scheduler.block_on_semaphore(key, semaphore, slot, timeout);
        Ok(())
    }

    pub(crate) fn block_process_on_semaphore(
        &self,
        semaphore: SyncWeak<SemInner>,
        slot: Arc<WaitSlot>,
        timeout: TimeInterval,
    ) {
        let process: InternalId = self.borrow().process;
        self.borrow_mut().block_on_semaphore(process, semaphore, slot, timeout);
        self.block_process();
    }

    /// Yield point of thread `id`. A context that does not belong to the running thread never switches.
    pub(crate) fn yield_point(&self, id: ThreadId, here: usize) -> YieldPoint {
        let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
        match scheduler.calling_thread(id, "yield_now") {
            Ok(key) => scheduler.yield_point(key, here),
            Err(e) => {
                warn!("yield_point(): {:?}", e);
                YieldPoint::Continue
            },
        }
    }

    /// Runs other threads until the process thread, which has just blocked, is running again.
    fn block_process(&self) {
        loop {
            self.process_yield();
            let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
            let process: InternalId = scheduler.process;
            if scheduler.exit_code.is_some() {
                scheduler.cancel_block(process);
                let thread: &mut Thread = scheduler.thread_mut(process);
                thread.sleep_timer = None;
                thread.status = ThreadStatus::Running;
                return;
            }
            if scheduler.thread(process).status == ThreadStatus::Running {
                return;
            }
        }
    }

    /// Yield of the process thread.
    fn process_yield(&self) {
        let timers: TimerList = self.borrow().timers.clone();
        timers.process();

        let must_switch: bool = {
            let scheduler: Ref<Scheduler> = self.borrow();
            if scheduler.exit_code.is_some() {
                return;
            }
            let process: &Thread = scheduler.thread(scheduler.process);
            let keeps_running: bool = process.status == ThreadStatus::Running
                && (scheduler.ring.len() == 1 || process.base_priority == Priority::Highest);
            scheduler.terminating.is_none() && !keeps_running
        };
        if must_switch {
            self.reschedule();
        }
        self.finish_process_termination();
    }

    /// Runs threads until the selection lands on a running process thread.
    fn reschedule(&self) {
        let mut scan: Scan = self.borrow_mut().begin_selection();
        loop {
            let selection: Selection = self.borrow_mut().scan(&mut scan);
            self.bury();
            match selection {
                Selection::Idle => self.idle(),
                Selection::Thread(next) => {
                    let is_process: bool = {
                        let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
                        scheduler.current = next;
                        next == scheduler.process
                    };
                    if is_process {
                        if self.borrow().thread(next).status == ThreadStatus::Running {
                            return;
                        }
                    } else {
                        self.run_thread(next);
                        self.bury();
                        let timers: TimerList = self.borrow().timers.clone();
                        timers.process();
                    }
                    scan = self.borrow_mut().begin_selection();
                },
            }
        }
    }

    /// Polls a selected thread until it yields or completes.
    fn run_thread(&self, key: InternalId) {
        let coroutine: Option<Coroutine> = {
            let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
            let thread: &mut Thread = scheduler.thread_mut(key);
            if thread.status == ThreadStatus::Starting {
                thread.status = ThreadStatus::Running;
            }
            thread.stack_base = stack::marker();
            thread.coroutine.take()
        };
        let Some(mut coroutine) = coroutine else {
            let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
            let thread: &mut Thread = scheduler.thread_mut(key);
            warn!("run_thread(): thread {} has no body", thread.id);
            thread.status = ThreadStatus::Terminating;
            return;
        };

        let mut context: Context = Context::from_waker(noop_waker_ref());
        let finished: bool = match coroutine.as_mut().poll(&mut context) {
            Poll::Ready(()) => true,
            Poll::Pending => false,
        };

        let leftover: Option<Coroutine> = {
            let mut scheduler: RefMut<Scheduler> = self.borrow_mut();
            match scheduler.threads.get_mut(usize::from(key)) {
                Some(thread) if !finished => {
                    thread.coroutine = Some(coroutine);
                    None
                },
                Some(thread) => {
                    trace!("run_thread(): thread {} ({:?}) returned", thread.id, thread.name);
                    thread.block = Block::None;
                    thread.sleep_timer = None;
                    thread.status = ThreadStatus::Terminating;
                    Some(coroutine)
                },
                None => Some(coroutine),
            }
        };
        drop(leftover);
    }

    /// Drops the coroutines of unlinked threads.
    fn bury(&self) {
        let dead: Vec<Coroutine> = mem::take(&mut self.borrow_mut().graveyard);
        drop(dead);
    }

    /// Blocks until a descriptor some thread waits on becomes ready or the next timer is due.
    fn idle(&self) {
        let (blocked, timers, fallback, waker): (Vec<(RawFd, Interest)>, TimerList, TimeInterval, Arc<IdleWaker>) = {
            let scheduler: Ref<Scheduler> = self.borrow();
            (
                scheduler.blocked_descriptors(),
                scheduler.timers.clone(),
                scheduler.config.idle_fallback,
                scheduler.waker.clone(),
            )
        };
        let delay: TimeInterval = timers.process();
        if self.borrow().has_settled_wait() {
            return;
        }
        trace!("idle(): {} blocked descriptors, next timer in {}", blocked.len(), delay);
        if let Err(e) = poll::idle_wait(&blocked, delay, fallback, Some(&waker)) {
            warn!("idle(): {:?}", e);
        }
        timers.process();
    }

    /// Finalizes a pending process termination.
    fn finish_process_termination(&self) {
        let Some(code) = self.borrow_mut().terminating.take() else {
            return;
        };
        let hook: Option<Box<dyn FnOnce(i32)>> = self.borrow_mut().shutdown_hook.take();
        info!("finish_process_termination(): process terminating (code={})", code);
        if let Some(hook) = hook {
            hook(code);
        }
        if self.borrow().config.exit_on_terminate {
            ::std::process::exit(code);
        }
        self.borrow_mut().exit_code = Some(code);
    }
}

impl WeakScheduler {
    pub fn upgrade(&self) -> Option<SharedScheduler> {
        self.0.upgrade().map(SharedScheduler)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.timers.clear_change_hook();
        let keys: Vec<InternalId> = self.threads.iter().map(|(key, _)| InternalId::from(key)).collect();
        for key in keys {
            self.cancel_block(key);
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
