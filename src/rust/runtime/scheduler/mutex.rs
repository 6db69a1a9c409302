// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::scheduler::semaphore::Semaphore;
use ::std::ops::Deref;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Mutual exclusion between cooperative threads: a semaphore with a single permit that starts out available. A
/// thread takes it with `wait` and gives it back with `signal`.
#[derive(Clone, Debug)]
pub struct Mutex(Semaphore);

/// One-shot rendezvous: a semaphore with a single permit that starts out taken. `signal` releases at most one waiter
/// and does not accumulate.
#[derive(Clone, Debug)]
pub struct SyncPoint(Semaphore);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Mutex {
    pub fn new() -> Self {
        Self(Semaphore::new(1, 1))
    }
}

impl SyncPoint {
    pub fn new() -> Self {
        Self(Semaphore::new(0, 1))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Mutex {
    type Target = Semaphore;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for SyncPoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for SyncPoint {
    type Target = Semaphore;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
