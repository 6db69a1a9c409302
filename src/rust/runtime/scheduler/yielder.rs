// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    assert::fatal,
    fail::Fail,
    interval::TimeInterval,
    poll::{
        self,
        Interest,
        RawFd,
    },
    scheduler::{
        scheduler::{
            SharedScheduler,
            WeakScheduler,
            YieldPoint,
        },
        semaphore::{
            SemInner,
            WaitSlot,
        },
        stack,
        thread::ThreadId,
    },
    timer::Timer,
};
use ::std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        Weak,
    },
    task::{
        Context,
        Poll,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Yield is a future that hands control back to the scheduler. It completes the next time the scheduler selects the
/// thread, unless the scheduler lets the thread carry on right away.
struct Yield {
    ctx: ThreadContext,
    yielded: bool,
}

/// Handle given to the body of a cooperative thread. All blocking operations of a thread go through it.
#[derive(Clone)]
pub struct ThreadContext {
    scheduler: WeakScheduler,
    id: ThreadId,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ThreadContext {
    pub(crate) fn new(scheduler: WeakScheduler, id: ThreadId) -> Self {
        Self { scheduler, id }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Scheduler running this thread. A thread only ever runs from inside its scheduler, so the scheduler is alive.
    pub fn scheduler(&self) -> SharedScheduler {
        match self.scheduler.upgrade() {
            Some(scheduler) => scheduler,
            None => fatal("thread context outlived its scheduler"),
        }
    }

    pub fn name(&self) -> String {
        self.scheduler().thread_name(self.id).unwrap_or_default()
    }

    /// Lets other threads run.
    pub async fn yield_now(&self) {
        Yield::new(self.clone()).await
    }

    /// Sleeps for `interval`. [crate::MAX_TIME_INTERVAL] sleeps until the thread is terminated.
    pub async fn sleep(&self, interval: TimeInterval) {
        if let Err(e) = self.scheduler().begin_sleep(self.id, interval) {
            warn!("sleep(): {:?}", e);
            return;
        }
        self.yield_now().await
    }

    /// Suspends the calling thread until another thread resumes it.
    pub async fn suspend(&self) {
        if let Err(e) = self.scheduler().suspend(self.id) {
            warn!("suspend(): {:?}", e);
            return;
        }
        self.yield_now().await
    }

    /// Terminates the calling thread. The returned future never completes.
    pub async fn terminate(&self) {
        if let Err(e) = self.scheduler().terminate(self.id) {
            warn!("terminate(): {:?}", e);
            return;
        }
        self.yield_now().await
    }

    /// Waits until thread `id` has terminated or `timeout` elapsed. Returns true on termination.
    pub async fn wait_for_termination(&self, id: ThreadId, timeout: TimeInterval) -> bool {
        let timer: Option<Timer> = self.scheduler().optional_timer(timeout);
        loop {
            if self.scheduler().is_terminated(id) {
                return true;
            }
            if timer.as_ref().map_or(false, |t| t.has_expired()) {
                return false;
            }
            self.yield_now().await;
        }
    }

    /// Blocks until `fd` is readable or `timeout` elapsed. Returns whether the descriptor is readable.
    pub async fn wait_readable(&self, fd: RawFd, timeout: TimeInterval) -> Result<bool, Fail> {
        self.wait_io(fd, Interest::Readable, timeout).await
    }

    /// Blocks until `fd` is writable or `timeout` elapsed. Returns whether the descriptor is writable.
    pub async fn wait_writable(&self, fd: RawFd, timeout: TimeInterval) -> Result<bool, Fail> {
        self.wait_io(fd, Interest::Writable, timeout).await
    }

    async fn wait_io(&self, fd: RawFd, interest: Interest, timeout: TimeInterval) -> Result<bool, Fail> {
        self.scheduler().block_on_io(self.id, fd, interest, timeout)?;
        self.yield_now().await;
        poll::is_ready(fd, interest)
    }

    /// Parks the thread on a semaphore wait that has already been queued.
    pub(crate) async fn block_on_semaphore(
        &self,
        semaphore: Weak<SemInner>,
        slot: Arc<WaitSlot>,
        timeout: TimeInterval,
    ) -> Result<(), Fail> {
        self.scheduler().block_on_semaphore(self.id, semaphore, slot, timeout)?;
        self.yield_now().await;
        Ok(())
    }
}

impl Yield {
    fn new(ctx: ThreadContext) -> Self {
        Self { ctx, yielded: false }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Future for Yield {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _context: &mut Context) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();

        // Polled again means the scheduler picked this thread.
        if self_.yielded {
            return Poll::Ready(());
        }

        let here: usize = stack::marker();
        match self_.ctx.scheduler().yield_point(self_.ctx.id, here) {
            YieldPoint::Continue => Poll::Ready(()),
            YieldPoint::Switch => {
                self_.yielded = true;
                Poll::Pending
            },
        }
    }
}
