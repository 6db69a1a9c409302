// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Counting semaphore for cooperative threads.
//!
//! A thread that cannot take a permit is queued with a [WaitSlot]. [Semaphore::signal] resolves the oldest pending
//! slot and the scheduler notices the resolution the next time it looks at the blocked thread. Timeouts resolve the
//! slot from the scheduler side, and a compare-exchange on the slot decides which of the two wins.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    interval::TimeInterval,
    lock,
    scheduler::{
        scheduler::SharedScheduler,
        thread::ThreadId,
        yielder::ThreadContext,
    },
};
use ::std::{
    collections::VecDeque,
    fmt,
    future::Future,
    sync::{
        atomic::{
            AtomicU8,
            Ordering,
        },
        Arc,
        Mutex,
        MutexGuard,
        Weak,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// How a queued wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Pending = 0,
    Signalled = 1,
    TimedOut = 2,
    /// The semaphore went away or the waiting thread was terminated.
    Cancelled = 3,
}

/// Resolution cell shared between a queued waiter and whoever ends its wait.
pub(crate) struct WaitSlot(AtomicU8);

struct Waiter {
    thread: ThreadId,
    slot: Arc<WaitSlot>,
}

struct SemState {
    count: u32,
    max: u32,
    /// Oldest first.
    waiters: VecDeque<Waiter>,
}

pub(crate) struct SemInner {
    state: Mutex<SemState>,
}

/// Counting semaphore with a bounded number of permits. Clones share the same permits.
#[derive(Clone)]
pub struct Semaphore(Arc<SemInner>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl WaitSlot {
    pub fn new() -> Self {
        Self(AtomicU8::new(WaitOutcome::Pending as u8))
    }

    pub fn outcome(&self) -> WaitOutcome {
        match self.0.load(Ordering::Acquire) {
            1 => WaitOutcome::Signalled,
            2 => WaitOutcome::TimedOut,
            3 => WaitOutcome::Cancelled,
            _ => WaitOutcome::Pending,
        }
    }

    /// Ends a pending wait with `outcome`. Returns false if the wait had already ended.
    pub fn resolve(&self, outcome: WaitOutcome) -> bool {
        self.0
            .compare_exchange(
                WaitOutcome::Pending as u8,
                outcome as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl SemInner {
    fn state(&self) -> MutexGuard<'_, SemState> {
        lock(&self.state)
    }

    /// Takes a permit, or queues `thread` and returns the slot that will report the end of its wait.
    pub fn acquire_or_enqueue(&self, thread: ThreadId) -> Option<Arc<WaitSlot>> {
        let mut state: MutexGuard<SemState> = self.state();
        if state.count > 0 {
            state.count -= 1;
            return None;
        }
        let slot: Arc<WaitSlot> = Arc::new(WaitSlot::new());
        state.waiters.push_back(Waiter {
            thread,
            slot: slot.clone(),
        });
        trace!("acquire_or_enqueue(): thread {} queued ({} waiting)", thread, state.waiters.len());
        Some(slot)
    }

    pub fn remove_waiter(&self, slot: &Arc<WaitSlot>) {
        self.state().waiters.retain(|w| !Arc::ptr_eq(&w.slot, slot));
    }

    pub fn signal(&self) {
        let mut state: MutexGuard<SemState> = self.state();
        while let Some(waiter) = state.waiters.pop_front() {
            // Waits that already timed out are skipped.
            if waiter.slot.resolve(WaitOutcome::Signalled) {
                trace!("signal(): waking thread {}", waiter.thread);
                return;
            }
        }
        if state.count < state.max {
            state.count += 1;
        }
    }
}

impl Semaphore {
    /// Creates a semaphore with `initial` permits out of `max`. A zero maximum is a programming error and is raised to
    /// one, and `initial` is clamped to the maximum.
    pub fn new(initial: u32, max: u32) -> Self {
        crate::sched_assert!(max > 0, "invalid semaphore maximum");
        let max: u32 = max.max(1);
        Self(Arc::new(SemInner {
            state: Mutex::new(SemState {
                count: initial.min(max),
                max,
                waiters: VecDeque::new(),
            }),
        }))
    }

    pub fn count(&self) -> u32 {
        self.0.state().count
    }

    pub fn maximum(&self) -> u32 {
        self.0.state().max
    }

    /// Number of threads queued on this semaphore.
    pub fn num_waiters(&self) -> usize {
        self.0.state().waiters.len()
    }

    /// True when a wait would block.
    pub fn will_block(&self) -> bool {
        self.count() == 0
    }

    /// Takes a permit if one is available, without blocking.
    pub fn try_wait(&self) -> bool {
        let mut state: MutexGuard<SemState> = self.0.state();
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    /// Hands a permit to the oldest waiter, or banks it if nobody waits and the maximum allows it.
    pub fn signal(&self) {
        self.0.signal()
    }

    /// Waits for a permit from a cooperative thread. Resolves to false when `timeout` expired (or the semaphore was
    /// destroyed) before a signal came in. The returned future does not keep the semaphore alive.
    pub fn wait(&self, ctx: &ThreadContext, timeout: TimeInterval) -> impl Future<Output = bool> + 'static {
        let semaphore: Weak<SemInner> = Arc::downgrade(&self.0);
        let ctx: ThreadContext = ctx.clone();
        async move {
            let slot: Arc<WaitSlot> = {
                let Some(inner) = semaphore.upgrade() else {
                    return false;
                };
                match inner.acquire_or_enqueue(ctx.id()) {
                    None => return true,
                    Some(slot) => slot,
                }
            };
            // A wait that could not block is withdrawn by finish_wait().
            if let Err(e) = ctx.block_on_semaphore(semaphore.clone(), slot.clone(), timeout).await {
                warn!("wait(): {:?}", e);
            }
            finish_wait(&semaphore, &slot)
        }
    }

    /// Waits for a permit on behalf of the process thread, running other threads in the meantime.
    pub fn wait_from_process(&self, scheduler: &SharedScheduler, timeout: TimeInterval) -> bool {
        if !scheduler.in_process_context("wait_from_process") {
            return false;
        }
        let slot: Arc<WaitSlot> = match self.0.acquire_or_enqueue(scheduler.process_id()) {
            None => return true,
            Some(slot) => slot,
        };
        let semaphore: Weak<SemInner> = Arc::downgrade(&self.0);
        scheduler.block_process_on_semaphore(semaphore.clone(), slot.clone(), timeout);
        finish_wait(&semaphore, &slot)
    }
}

/// Reports whether a wait got its permit. A wait that is somehow still pending is withdrawn.
fn finish_wait(semaphore: &Weak<SemInner>, slot: &Arc<WaitSlot>) -> bool {
    if slot.resolve(WaitOutcome::Cancelled) {
        if let Some(inner) = semaphore.upgrade() {
            inner.remove_waiter(slot);
        }
        return false;
    }
    slot.outcome() == WaitOutcome::Signalled
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for SemInner {
    fn drop(&mut self) {
        let state: &mut SemState = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if crate::sched_assert!(
            state.waiters.is_empty(),
            "semaphore destroyed while still has blocked threads ({} waiting)",
            state.waiters.len()
        ) {
            return;
        }
        for waiter in state.waiters.drain(..) {
            waiter.slot.resolve(WaitOutcome::Cancelled);
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state: MutexGuard<SemState> = self.0.state();
        f.debug_struct("Semaphore")
            .field("count", &state.count)
            .field("max", &state.max)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
