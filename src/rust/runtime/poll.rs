// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT license.

//! Readiness polling used by the scheduler when threads block on descriptors or when nothing is runnable.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    interval::TimeInterval,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Raw OS descriptor a thread may block on.
#[cfg(unix)]
pub type RawFd = ::std::os::unix::prelude::RawFd;
#[cfg(not(unix))]
pub type RawFd = ::libc::c_int;

/// Direction of the I/O a blocked thread waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Interest {
    #[cfg(unix)]
    fn events(&self) -> ::libc::c_short {
        match self {
            Interest::Readable => ::libc::POLLIN,
            Interest::Writable => ::libc::POLLOUT,
        }
    }
}

//======================================================================================================================
// Platform
//======================================================================================================================

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use ::std::io;

        /// Self-pipe that cuts an idle wait short, for instance when a sooner timer gets armed.
        pub struct IdleWaker {
            read_fd: RawFd,
            write_fd: RawFd,
        }

        impl IdleWaker {
            pub fn new() -> Result<Self, Fail> {
                let mut fds: [RawFd; 2] = [-1, -1];
                if unsafe { ::libc::pipe(fds.as_mut_ptr()) } != 0 {
                    let e: io::Error = io::Error::last_os_error();
                    error!("new(): failed to create wake pipe ({:?})", e);
                    return Err(Fail::from(e));
                }
                let waker: IdleWaker = IdleWaker {
                    read_fd: fds[0],
                    write_fd: fds[1],
                };
                for fd in fds {
                    set_nonblocking_cloexec(fd)?;
                }
                Ok(waker)
            }

            /// Wakes the idle wait, now or at its next call.
            pub fn notify(&self) {
                let byte: u8 = 1;
                let n: isize = unsafe { ::libc::write(self.write_fd, &byte as *const u8 as *const ::libc::c_void, 1) };
                // A full pipe already guarantees a wake up.
                if n < 0 {
                    let e: io::Error = io::Error::last_os_error();
                    if e.raw_os_error() != Some(::libc::EAGAIN) {
                        warn!("notify(): {:?}", e);
                    }
                }
            }

            fn drain(&self) {
                let mut buf: [u8; 64] = [0; 64];
                loop {
                    let n: isize =
                        unsafe { ::libc::read(self.read_fd, buf.as_mut_ptr() as *mut ::libc::c_void, buf.len()) };
                    if n <= 0 {
                        break;
                    }
                }
            }
        }

        impl Drop for IdleWaker {
            fn drop(&mut self) {
                unsafe {
                    ::libc::close(self.read_fd);
                    ::libc::close(self.write_fd);
                }
            }
        }

        fn set_nonblocking_cloexec(fd: RawFd) -> Result<(), Fail> {
            unsafe {
                let flags: ::libc::c_int = ::libc::fcntl(fd, ::libc::F_GETFL);
                if flags < 0 || ::libc::fcntl(fd, ::libc::F_SETFL, flags | ::libc::O_NONBLOCK) < 0 {
                    return Err(Fail::from(io::Error::last_os_error()));
                }
                if ::libc::fcntl(fd, ::libc::F_SETFD, ::libc::FD_CLOEXEC) < 0 {
                    return Err(Fail::from(io::Error::last_os_error()));
                }
            }
            Ok(())
        }

        fn poll_fds(fds: &mut [::libc::pollfd], timeout: Option<TimeInterval>) -> Result<usize, Fail> {
            let timeout_ms: ::libc::c_int = match timeout.and_then(|t| t.as_duration()) {
                None => -1,
                Some(d) => d.as_millis().min(::libc::c_int::MAX as u128) as ::libc::c_int,
            };
            let n: ::libc::c_int = unsafe { ::libc::poll(fds.as_mut_ptr(), fds.len() as ::libc::nfds_t, timeout_ms) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let e: io::Error = io::Error::last_os_error();
            match e.raw_os_error() {
                // Interrupted by a signal, the caller re-evaluates anyway.
                Some(::libc::EINTR) => Ok(0),
                _ => {
                    error!("poll_fds(): {:?}", e);
                    Err(Fail::from(e))
                },
            }
        }

        /// Zero-timeout check of whether I/O on `fd` would no longer block. Errors and hang-ups count as ready so that
        /// the blocked thread gets to observe them.
        pub fn is_ready(fd: RawFd, interest: Interest) -> Result<bool, Fail> {
            let mut pollfd: [::libc::pollfd; 1] = [::libc::pollfd {
                fd,
                events: interest.events(),
                revents: 0,
            }];
            poll_fds(&mut pollfd, Some(TimeInterval::ZERO))?;
            Ok(pollfd[0].revents != 0)
        }

        /// Blocks until one of `blocked` becomes ready, `waker` fires or `delay` elapses. With nothing that could ever
        /// end the wait, sleeps for `fallback` instead. Returns the number of ready descriptors.
        pub fn idle_wait(
            blocked: &[(RawFd, Interest)],
            delay: TimeInterval,
            fallback: TimeInterval,
            waker: Option<&IdleWaker>,
        ) -> Result<usize, Fail> {
            let mut fds: Vec<::libc::pollfd> = blocked
                .iter()
                .map(|(fd, interest)| ::libc::pollfd {
                    fd: *fd,
                    events: interest.events(),
                    revents: 0,
                })
                .collect();
            let timeout: TimeInterval = if blocked.is_empty() && delay.is_max() {
                warn!("idle_wait(): no blocked descriptors and no timers, sleeping for {}", fallback);
                fallback
            } else {
                delay
            };
            if let Some(waker) = waker {
                fds.push(::libc::pollfd {
                    fd: waker.read_fd,
                    events: ::libc::POLLIN,
                    revents: 0,
                });
            }

            poll_fds(&mut fds, Some(timeout))?;

            if let Some(waker) = waker {
                if fds.last().map_or(false, |p| p.revents != 0) {
                    trace!("idle_wait(): woken early");
                    waker.drain();
                }
                fds.pop();
            }
            Ok(fds.iter().filter(|p| p.revents != 0).count())
        }
    } else {
        use ::std::sync::{
            Condvar,
            Mutex,
            MutexGuard,
        };
        use crate::runtime::lock;

        /// Event that cuts an idle wait short, for instance when a sooner timer gets armed.
        pub struct IdleWaker {
            woken: Mutex<bool>,
            cond: Condvar,
        }

        impl IdleWaker {
            pub fn new() -> Result<Self, Fail> {
                Ok(Self {
                    woken: Mutex::new(false),
                    cond: Condvar::new(),
                })
            }

            pub fn notify(&self) {
                *lock(&self.woken) = true;
                self.cond.notify_all();
            }
        }

        pub fn is_ready(_fd: RawFd, _interest: Interest) -> Result<bool, Fail> {
            let cause: &str = "descriptor readiness is not supported on this platform";
            error!("is_ready(): {}", cause);
            Err(Fail::new(::libc::ENOTSUP, cause))
        }

        pub fn idle_wait(
            blocked: &[(RawFd, Interest)],
            delay: TimeInterval,
            fallback: TimeInterval,
            waker: Option<&IdleWaker>,
        ) -> Result<usize, Fail> {
            let timeout: TimeInterval = if blocked.is_empty() && delay.is_max() {
                warn!("idle_wait(): no blocked descriptors and no timers, sleeping for {}", fallback);
                fallback
            } else {
                delay.min(fallback)
            };
            let duration: ::std::time::Duration = timeout.as_duration().unwrap_or_default();
            match waker {
                Some(waker) => {
                    let woken: MutexGuard<bool> = lock(&waker.woken);
                    let (mut woken, _) = waker
                        .cond
                        .wait_timeout_while(woken, duration, |woken| !*woken)
                        .unwrap_or_else(::std::sync::PoisonError::into_inner);
                    *woken = false;
                },
                None => ::std::thread::sleep(duration),
            }
            Ok(0)
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
