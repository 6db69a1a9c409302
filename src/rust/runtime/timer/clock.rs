// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::interval::TimeInterval;
use ::std::{
    sync::{
        atomic::{
            AtomicI64,
            Ordering,
        },
        Arc,
    },
    time::Instant,
};

//======================================================================================================================
// Traits
//======================================================================================================================

/// Tick source sampled by the timer list. Readings are allowed to wrap around at the saturation sentinel.
pub trait Clock: Send + Sync {
    /// Returns the current tick reading.
    fn now(&self) -> TimeInterval;
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Monotonic wall clock, counting milliseconds since its creation.
pub struct SystemClock {
    origin: Instant,
}

/// Clock that only moves when told to. Used to drive timers deterministically.
#[derive(Clone, Default)]
pub struct ManualClock(Arc<AtomicI64>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl ManualClock {
    pub fn new(now: TimeInterval) -> Self {
        Self(Arc::new(AtomicI64::new(now.milliseconds())))
    }

    /// Moves time forward (or backwards, for a negative `delta`).
    pub fn advance(&self, delta: TimeInterval) {
        let now: TimeInterval = self.now() + delta;
        self.set(now);
    }

    /// Jumps to an absolute reading. Setting a value below the previous one models a wrapping tick source.
    pub fn set(&self, now: TimeInterval) {
        self.0.store(now.milliseconds(), Ordering::SeqCst);
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> TimeInterval {
        TimeInterval::from(self.origin.elapsed())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeInterval {
        TimeInterval::from_millis(self.0.load(Ordering::SeqCst))
    }
}
