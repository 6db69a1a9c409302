// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use super::{
    clock::{
        Clock,
        SystemClock,
    },
    TimerCore,
    TimerId,
};
use crate::runtime::{
    interval::{
        TimeInterval,
        MAX_TIME_INTERVAL,
    },
    lock,
};
use ::std::{
    sync::{
        Arc,
        Condvar,
        Mutex,
        MutexGuard,
        PoisonError,
        Weak,
    },
    thread,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Hook invoked whenever a timer is (re)armed.
pub type ChangeHook = Arc<dyn Fn() + Send + Sync>;

struct Registration {
    id: TimerId,
    core: Weak<TimerCore>,
}

struct ListState {
    /// Sorted by id, which is also registration order.
    timers: Vec<Registration>,
    last_sample: Option<TimeInterval>,
    next_id: u64,
}

/// Callbacks currently running. Only one OS thread may run callbacks at a time, but that thread may nest.
struct InTimeout {
    owner: Option<thread::ThreadId>,
    in_flight: Vec<TimerId>,
}

pub(crate) struct ListShared {
    clock: Box<dyn Clock>,
    state: Mutex<ListState>,
    in_timeout: Mutex<InTimeout>,
    in_timeout_done: Condvar,
    change_hook: Mutex<Option<ChangeHook>>,
}

/// Process-wide set of live timers.
#[derive(Clone)]
pub struct TimerList(Arc<ListShared>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ListShared {
    pub(crate) fn signal_change(&self) {
        let hook: Option<ChangeHook> = lock(&self.change_hook).clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Marks `id` as in flight on the calling OS thread. Fails when another OS thread is running callbacks.
    fn try_enter(&self, id: TimerId) -> bool {
        let me: thread::ThreadId = thread::current().id();
        let mut in_timeout: MutexGuard<InTimeout> = lock(&self.in_timeout);
        match in_timeout.owner {
            Some(owner) if owner != me => false,
            _ => {
                in_timeout.owner = Some(me);
                in_timeout.in_flight.push(id);
                true
            },
        }
    }

    fn leave(&self) {
        let mut in_timeout: MutexGuard<InTimeout> = lock(&self.in_timeout);
        in_timeout.in_flight.pop();
        if in_timeout.in_flight.is_empty() {
            in_timeout.owner = None;
        }
        self.in_timeout_done.notify_all();
    }

    /// Blocks until no other OS thread is running callbacks.
    fn wait_for_other_threads(&self) {
        let me: thread::ThreadId = thread::current().id();
        let in_timeout: MutexGuard<InTimeout> = lock(&self.in_timeout);
        let _in_timeout: MutexGuard<InTimeout> = self
            .in_timeout_done
            .wait_while(in_timeout, |t| t.owner.is_some() && t.owner != Some(me))
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Blocks until the callback of `id` is no longer running on another OS thread.
    fn wait_for_timer(&self, id: TimerId) {
        let me: thread::ThreadId = thread::current().id();
        let in_timeout: MutexGuard<InTimeout> = lock(&self.in_timeout);
        let _in_timeout: MutexGuard<InTimeout> = self
            .in_timeout_done
            .wait_while(in_timeout, |t| t.owner != Some(me) && t.in_flight.contains(&id))
            .unwrap_or_else(PoisonError::into_inner);
    }
}

impl TimerList {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self(Arc::new(ListShared {
            clock,
            state: Mutex::new(ListState {
                timers: Vec::new(),
                last_sample: None,
                next_id: 0,
            }),
            in_timeout: Mutex::new(InTimeout {
                owner: None,
                in_flight: Vec::new(),
            }),
            in_timeout_done: Condvar::new(),
            change_hook: Mutex::new(None),
        }))
    }

    /// Current reading of the list's clock.
    pub fn now(&self) -> TimeInterval {
        self.0.clock.now()
    }

    /// Number of registered timers.
    pub fn len(&self) -> usize {
        lock(&self.0.state)
            .timers
            .iter()
            .filter(|r| r.core.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Installs the hook invoked when a timer is armed, replacing any previous one.
    pub fn set_change_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.0.change_hook) = Some(Arc::new(hook));
    }

    pub fn clear_change_hook(&self) {
        *lock(&self.0.change_hook) = None;
    }

    /// Tells whoever waits on the minimum time left that it may be stale.
    pub fn signal_change(&self) {
        self.0.signal_change();
    }

    /// Advances every timer by the time elapsed since the previous call, firing expired callbacks in registration
    /// order. Returns the time until the next expiry, or [MAX_TIME_INTERVAL] when nothing is running.
    pub fn process(&self) -> TimeInterval {
        let mut min_left: TimeInterval = MAX_TIME_INTERVAL;
        let mut state: MutexGuard<ListState> = lock(&self.0.state);

        let now: TimeInterval = self.0.clock.now();
        let delta: TimeInterval = match state.last_sample {
            None => TimeInterval::ZERO,
            Some(last) if now < last => (now - last) + MAX_TIME_INTERVAL,
            Some(last) => now - last,
        };
        state.last_sample = Some(now);

        // Timers may come and go while the list is unlocked, so the walk resumes after the last visited id.
        let mut cursor: Option<TimerId> = None;
        loop {
            let next: usize = match cursor {
                Some(cursor) => state.timers.partition_point(|r| r.id <= cursor),
                None => 0,
            };
            let (id, core): (TimerId, Option<Arc<TimerCore>>) = match state.timers.get(next) {
                Some(registration) => (registration.id, registration.core.upgrade()),
                None => break,
            };
            let core: Arc<TimerCore> = match core {
                Some(core) => core,
                None => {
                    cursor = Some(id);
                    continue;
                },
            };

            if !self.0.try_enter(id) {
                drop(state);
                self.0.wait_for_other_threads();
                state = lock(&self.0.state);
                continue;
            }
            cursor = Some(id);
            drop(state);
            core.process(delta, &mut min_left);
            drop(core);
            state = lock(&self.0.state);
            self.0.leave();
        }

        min_left
    }

    pub(crate) fn register(&self) -> Arc<TimerCore> {
        let mut state: MutexGuard<ListState> = lock(&self.0.state);
        let id: TimerId = TimerId::new(state.next_id);
        state.next_id += 1;
        let core: Arc<TimerCore> = Arc::new(TimerCore::new(id, Arc::downgrade(&self.0)));
        state.timers.push(Registration {
            id,
            core: Arc::downgrade(&core),
        });
        trace!("register(): timer {:?}", id);
        core
    }

    /// Removes `id` from the list, then waits until no other OS thread is running its callback.
    pub(crate) fn unregister(&self, id: TimerId) {
        {
            let mut state: MutexGuard<ListState> = lock(&self.0.state);
            if let Ok(index) = state.timers.binary_search_by_key(&id, |r| r.id) {
                state.timers.remove(index);
            }
            state.timers.retain(|r| r.core.strong_count() > 0);
        }
        self.0.wait_for_timer(id);
        trace!("unregister(): timer {:?}", id);
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for TimerList {
    fn default() -> Self {
        Self::new(Box::new(SystemClock::new()))
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
