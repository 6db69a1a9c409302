// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod assert;
pub mod config;
pub mod fail;
pub mod interval;
pub mod limits;
pub mod logging;
pub mod poll;
pub mod scheduler;
pub mod timer;

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::sync::{
    Mutex,
    MutexGuard,
    PoisonError,
};

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Locks `mutex`, recovering the guard if a panicking callback poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
