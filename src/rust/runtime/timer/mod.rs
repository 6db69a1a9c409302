// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Countdown timers driven by a [list::TimerList].
//!
//! A [Timer] is owned by whoever created it. The list only holds weak back-references, so dropping the [Timer]
//! unregisters it. Callbacks receive a [TimerRef], which exposes the same control surface as the owning [Timer].

pub mod clock;
pub mod list;

//======================================================================================================================
// Imports
//======================================================================================================================

use self::list::{
    ListShared,
    TimerList,
};
use crate::runtime::{
    interval::TimeInterval,
    lock,
};
use ::std::{
    fmt,
    ops::Deref,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        Weak,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Registration order of a timer within its list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    /// Armed but not yet aligned with a list sample. The next pass promotes it to [TimerState::Running].
    Starting,
    Running,
    Paused,
}

/// Callback invoked when a timer expires.
pub type Notifier = Box<dyn FnMut(&TimerRef) + Send>;

struct Countdown {
    state: TimerState,
    remaining: TimeInterval,
    reset: TimeInterval,
    one_shot: bool,
}

/// The notifier is moved out while it runs, so the generation tells whether it was replaced in the meantime.
struct NotifierSlot {
    notifier: Option<Notifier>,
    generation: u64,
}

pub(crate) struct TimerCore {
    id: TimerId,
    /// Processing lock. Guards every change to the countdown.
    countdown: Mutex<Countdown>,
    notifier: Mutex<NotifierSlot>,
    list: Weak<ListShared>,
}

/// Shared handle to a timer. Does not keep the timer registered.
#[derive(Clone)]
pub struct TimerRef(Arc<TimerCore>);

/// Owning handle to a registered timer. Dropping it unregisters the timer and waits out any callback in flight on
/// another OS thread.
pub struct Timer {
    handle: TimerRef,
    list: TimerList,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TimerId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl TimerCore {
    pub(crate) fn new(id: TimerId, list: Weak<ListShared>) -> Self {
        Self {
            id,
            countdown: Mutex::new(Countdown {
                state: TimerState::Stopped,
                remaining: TimeInterval::ZERO,
                reset: TimeInterval::ZERO,
                one_shot: true,
            }),
            notifier: Mutex::new(NotifierSlot {
                notifier: None,
                generation: 0,
            }),
            list,
        }
    }

    pub(crate) fn id(&self) -> TimerId {
        self.id
    }

    fn countdown(&self) -> MutexGuard<'_, Countdown> {
        lock(&self.countdown)
    }

    /// Advances the countdown by `delta` and lowers `min_left` to this timer's time to next expiry.
    pub(crate) fn process(self: &Arc<Self>, delta: TimeInterval, min_left: &mut TimeInterval) {
        let mut countdown: MutexGuard<Countdown> = self.countdown();
        match countdown.state {
            TimerState::Starting => {
                countdown.state = TimerState::Running;
                *min_left = (*min_left).min(countdown.reset);
            },
            TimerState::Running => {
                countdown.remaining -= delta;
                if countdown.remaining.is_running() {
                    *min_left = (*min_left).min(countdown.remaining);
                    return;
                }
                if countdown.one_shot {
                    countdown.state = TimerState::Stopped;
                    countdown.remaining = TimeInterval::ZERO;
                } else {
                    countdown.remaining = countdown.reset;
                    *min_left = (*min_left).min(countdown.reset);
                }
                // Callbacks may touch this timer, so the processing lock must be released first.
                drop(countdown);
                self.fire();
            },
            TimerState::Stopped | TimerState::Paused => (),
        }
    }

    fn fire(self: &Arc<Self>) {
        let (notifier, generation): (Option<Notifier>, u64) = {
            let mut slot: MutexGuard<NotifierSlot> = lock(&self.notifier);
            (slot.notifier.take(), slot.generation)
        };
        let mut notifier: Notifier = match notifier {
            Some(notifier) => notifier,
            None => {
                trace!("fire(): timer {:?} expired without a notifier", self.id);
                return;
            },
        };

        let handle: TimerRef = TimerRef(self.clone());
        notifier(&handle);

        let mut slot: MutexGuard<NotifierSlot> = lock(&self.notifier);
        if slot.generation == generation && slot.notifier.is_none() {
            slot.notifier = Some(notifier);
        }
    }

    fn start_running(&self, interval: TimeInterval, one_shot: bool) {
        {
            let mut countdown: MutexGuard<Countdown> = self.countdown();
            countdown.one_shot = one_shot;
            countdown.reset = interval;
            countdown.remaining = interval;
            countdown.state = if interval.is_zero() {
                TimerState::Stopped
            } else {
                TimerState::Starting
            };
        }
        self.signal_change();
    }

    fn signal_change(&self) {
        if let Some(list) = self.list.upgrade() {
            list.signal_change();
        }
    }
}

impl TimerRef {
    pub fn id(&self) -> TimerId {
        self.0.id
    }

    pub fn state(&self) -> TimerState {
        self.0.countdown().state
    }

    /// Time left before the next expiry.
    pub fn remaining(&self) -> TimeInterval {
        self.0.countdown().remaining
    }

    /// Value reloaded on every (re)start.
    pub fn reset_value(&self) -> TimeInterval {
        self.0.countdown().reset
    }

    pub fn is_one_shot(&self) -> bool {
        self.0.countdown().one_shot
    }

    /// True while the timer is counting down (or about to).
    pub fn is_running(&self) -> bool {
        matches!(self.state(), TimerState::Starting | TimerState::Running)
    }

    pub fn has_expired(&self) -> bool {
        self.remaining().is_expired()
    }

    /// Re-arms the timer as one-shot with a new interval. A zero interval leaves it stopped.
    pub fn set_interval(&self, interval: TimeInterval) {
        self.0.start_running(interval, true);
    }

    pub fn set_millis(&self, millis: i64) {
        self.set_interval(TimeInterval::from_millis(millis));
    }

    /// Re-arms the timer as repeating.
    pub fn run_continuous(&self, interval: TimeInterval) {
        self.0.start_running(interval, false);
    }

    pub fn stop(&self) {
        let mut countdown: MutexGuard<Countdown> = self.0.countdown();
        countdown.state = TimerState::Stopped;
        countdown.remaining = TimeInterval::ZERO;
    }

    pub fn pause(&self) {
        let mut countdown: MutexGuard<Countdown> = self.0.countdown();
        if matches!(countdown.state, TimerState::Starting | TimerState::Running) {
            countdown.state = TimerState::Paused;
        }
    }

    pub fn resume(&self) {
        let mut countdown: MutexGuard<Countdown> = self.0.countdown();
        if countdown.state == TimerState::Paused {
            countdown.state = TimerState::Starting;
        }
    }

    pub fn set_notifier<F>(&self, notifier: F)
    where
        F: FnMut(&TimerRef) + Send + 'static,
    {
        let mut slot: MutexGuard<NotifierSlot> = lock(&self.0.notifier);
        slot.generation += 1;
        slot.notifier = Some(Box::new(notifier));
    }

    pub fn clear_notifier(&self) {
        let mut slot: MutexGuard<NotifierSlot> = lock(&self.0.notifier);
        slot.generation += 1;
        slot.notifier = None;
    }
}

impl Timer {
    /// Registers a one-shot timer on `list` and starts it.
    pub fn new(list: &TimerList, interval: TimeInterval) -> Self {
        let core: Arc<TimerCore> = list.register();
        core.start_running(interval, true);
        Self {
            handle: TimerRef(core),
            list: list.clone(),
        }
    }

    pub fn with_components(list: &TimerList, millis: i64, secs: i64, mins: i64, hours: i64, days: i64) -> Self {
        Self::new(list, TimeInterval::new(millis, secs, mins, hours, days))
    }

    /// Registers a one-shot timer that invokes `notifier` on expiry.
    pub fn with_notifier<F>(list: &TimerList, interval: TimeInterval, notifier: F) -> Self
    where
        F: FnMut(&TimerRef) + Send + 'static,
    {
        let timer: Timer = Self::new(list, TimeInterval::ZERO);
        timer.set_notifier(notifier);
        timer.set_interval(interval);
        timer
    }

    /// Returns a shared handle that can be moved into callbacks.
    pub fn handle(&self) -> TimerRef {
        self.handle.clone()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for Timer {
    type Target = TimerRef;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.list.unregister(self.handle.id());
    }
}

impl fmt::Debug for TimerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let countdown: MutexGuard<Countdown> = self.0.countdown();
        f.debug_struct("Timer")
            .field("id", &self.0.id)
            .field("state", &countdown.state)
            .field("remaining", &countdown.remaining)
            .field("reset", &countdown.reset)
            .field("one_shot", &countdown.one_shot)
            .finish()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.handle.fmt(f)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
