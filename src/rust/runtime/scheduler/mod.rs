// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod stack;

//==============================================================================
// Exports
//==============================================================================

pub mod mutex;
pub mod scheduler;
pub mod semaphore;
pub mod thread;
pub mod yielder;

pub use self::{
    mutex::{
        Mutex,
        SyncPoint,
    },
    scheduler::SharedScheduler,
    semaphore::Semaphore,
    thread::{
        AutoDelete,
        Priority,
        ThreadConfig,
        ThreadId,
        ThreadStatus,
    },
    yielder::ThreadContext,
};
