// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Default stack budget for a cooperative thread.
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Smallest stack budget accepted when creating a thread.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Number of user-visible priority levels.
pub const NUM_PRIORITIES: usize = 5;

/// Dynamic priority countdown assigned to a yielding thread, indexed by base priority (Lowest to Highest).
pub const DEFAULT_PRIORITY_AGING: [i32; NUM_PRIORITIES] = [-1, 3, 1, 0, 0];

/// Number of complete laps over the run list without a runnable thread before the scheduler blocks in the idle wait.
pub const DEFAULT_IDLE_PASSES: usize = 3;

/// How long the idle wait sleeps when nothing (no descriptor, no timer) could ever wake it.
pub const DEFAULT_IDLE_FALLBACK_MS: i64 = 1000;

/// Scans that may pass over a thread whose countdown went negative before its countdown is nudged up by one.
pub const STARVATION_LIMIT: usize = 10;
