// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    fmt,
    ops::{
        Add,
        AddAssign,
        Neg,
        Sub,
        SubAssign,
    },
    time::Duration,
};

//======================================================================================================================
// Constants
//======================================================================================================================

const MILLIS_PER_SECOND: i64 = 1000;
const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

/// Saturation sentinel. Also used as "wait forever" by every timeout in the scheduler.
pub const MAX_TIME_INTERVAL: TimeInterval = TimeInterval(i64::MAX);

//======================================================================================================================
// Structures
//======================================================================================================================

/// Signed millisecond duration with saturating arithmetic. Zero or negative means expired.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeInterval(i64);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TimeInterval {
    pub const ZERO: TimeInterval = TimeInterval(0);

    /// Builds an interval from a component tuple. Components may be negative and are summed with saturation.
    pub fn new(millis: i64, secs: i64, mins: i64, hours: i64, days: i64) -> Self {
        let total: i64 = millis
            .saturating_add(secs.saturating_mul(MILLIS_PER_SECOND))
            .saturating_add(mins.saturating_mul(MILLIS_PER_MINUTE))
            .saturating_add(hours.saturating_mul(MILLIS_PER_HOUR))
            .saturating_add(days.saturating_mul(MILLIS_PER_DAY));
        Self::from_millis(total)
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(Self::clamp(millis))
    }

    pub fn from_secs(secs: i64) -> Self {
        Self::new(0, secs, 0, 0, 0)
    }

    pub fn from_mins(mins: i64) -> Self {
        Self::new(0, 0, mins, 0, 0)
    }

    pub fn milliseconds(&self) -> i64 {
        self.0
    }

    /// Whole seconds, truncated towards zero.
    pub fn seconds(&self) -> i64 {
        self.0 / MILLIS_PER_SECOND
    }

    pub fn minutes(&self) -> i64 {
        self.0 / MILLIS_PER_MINUTE
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// True when the interval has run out.
    pub fn is_expired(&self) -> bool {
        self.0 <= 0
    }

    /// True when there is time left.
    pub fn is_running(&self) -> bool {
        self.0 > 0
    }

    pub fn is_max(&self) -> bool {
        *self == MAX_TIME_INTERVAL
    }

    /// Converts to a [Duration] for OS calls. The sentinel maps to `None` (block forever) and expired intervals map to
    /// a zero duration.
    pub fn as_duration(&self) -> Option<Duration> {
        if self.is_max() {
            None
        } else {
            Some(Duration::from_millis(self.0.max(0) as u64))
        }
    }

    /// Keeps values inside the symmetric range `[-MAX, MAX]` so that negation never overflows.
    fn clamp(millis: i64) -> i64 {
        millis.max(-i64::MAX)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Add for TimeInterval {
    type Output = TimeInterval;

    fn add(self, rhs: TimeInterval) -> Self::Output {
        TimeInterval::from_millis(self.0.saturating_add(rhs.0))
    }
}

impl Sub for TimeInterval {
    type Output = TimeInterval;

    fn sub(self, rhs: TimeInterval) -> Self::Output {
        TimeInterval::from_millis(self.0.saturating_sub(rhs.0))
    }
}

impl AddAssign for TimeInterval {
    fn add_assign(&mut self, rhs: TimeInterval) {
        *self = *self + rhs;
    }
}

impl SubAssign for TimeInterval {
    fn sub_assign(&mut self, rhs: TimeInterval) {
        *self = *self - rhs;
    }
}

impl Neg for TimeInterval {
    type Output = TimeInterval;

    fn neg(self) -> Self::Output {
        TimeInterval(-self.0)
    }
}

impl From<Duration> for TimeInterval {
    fn from(duration: Duration) -> Self {
        match i64::try_from(duration.as_millis()) {
            Ok(millis) => TimeInterval::from_millis(millis),
            Err(_) => MAX_TIME_INTERVAL,
        }
    }
}

impl From<i64> for TimeInterval {
    fn from(millis: i64) -> Self {
        TimeInterval::from_millis(millis)
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            return write!(f, "infinite");
        }
        let sign: &str = if self.0 < 0 { "-" } else { "" };
        let millis: i64 = self.0.abs();
        write!(
            f,
            "{}{}:{:02}:{:02}:{:02}.{:03}",
            sign,
            millis / MILLIS_PER_DAY,
            (millis % MILLIS_PER_DAY) / MILLIS_PER_HOUR,
            (millis % MILLIS_PER_HOUR) / MILLIS_PER_MINUTE,
            (millis % MILLIS_PER_MINUTE) / MILLIS_PER_SECOND,
            millis % MILLIS_PER_SECOND
        )
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
