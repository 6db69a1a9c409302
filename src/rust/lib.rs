// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod collections;
pub mod runtime;

pub use self::runtime::{
    config::{
        Config,
        SchedulerConfig,
    },
    fail::Fail,
    interval::{
        TimeInterval,
        MAX_TIME_INTERVAL,
    },
    scheduler::{
        AutoDelete,
        Mutex,
        Priority,
        Semaphore,
        SharedScheduler,
        SyncPoint,
        ThreadConfig,
        ThreadContext,
        ThreadId,
        ThreadStatus,
    },
    timer::{
        list::TimerList,
        Timer,
        TimerRef,
        TimerState,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of the enclosing function with an [anyhow::Error] otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    anyhow::bail!(
                        r#"ensure failed: `(left == right)`
  left: `{:?}`,
 right: `{:?}`"#,
                        &*left_val,
                        &*right_val
                    )
                }
            },
        }
    });
    ($left:expr, $right:expr, $($arg:tt)+) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    anyhow::bail!(
                        r#"ensure failed: `(left == right)`
  left: `{:?}`,
 right: `{:?}`: {}"#,
                        &*left_val,
                        &*right_val,
                        format_args!($($arg)+)
                    )
                }
            },
        }
    });
}

/// Ensures that two expressions are not equal, bailing out of the enclosing function with an [anyhow::Error]
/// otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    anyhow::bail!(
                        r#"ensure failed: `(left != right)`
  left: `{:?}`,
 right: `{:?}`"#,
                        &*left_val,
                        &*right_val
                    )
                }
            },
        }
    });
}

/// Checks a scheduler invariant. On failure the message is routed through the configurable assertion handler in
/// [runtime::assert] instead of panicking, so a long-lived process keeps running by default. Evaluates to `true` when
/// the invariant holds.
#[macro_export]
macro_rules! sched_assert {
    ($cond:expr, $($arg:tt)+) => {{
        let ok: bool = $cond;
        if !ok {
            $crate::runtime::assert::assertion_failed(&format!($($arg)+), file!(), line!());
        }
        ok
    }};
}
