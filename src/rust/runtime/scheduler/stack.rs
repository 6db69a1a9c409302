// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Stack depth accounting for cooperative threads.
//!
//! Threads share the OS stack of the process, so a thread's stack budget is checked by comparing the address of a
//! marker taken when the scheduler polls the thread against one taken at each yield point.

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Address of a local in a fresh frame. Stacks grow downwards on every supported target.
#[inline(never)]
pub(crate) fn marker() -> usize {
    let spot: u8 = 0;
    ::std::hint::black_box(&spot) as *const u8 as usize
}

/// Bytes between the frame that took `base` and the frame that took `here`.
pub(crate) fn depth(base: usize, here: usize) -> usize {
    base.saturating_sub(here)
}

/// True when a thread polled at `base` is currently deeper than `budget` bytes. An unset base never overflows.
pub(crate) fn exceeds(base: usize, here: usize, budget: usize) -> bool {
    base != 0 && depth(base, here) > budget
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
