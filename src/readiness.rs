//! Deadline-bounded, cancellable waits on a socket.
//!
//! Accept, connect, send and receive are the points where an exchange
//! suspends. Rather than blocking inside the syscall, the listener and
//! connector first wait for readiness through a mio `Poll`, which lets the
//! wait end early on:
//! - the socket becoming ready (the normal case)
//! - the caller's deadline passing
//! - a [`CancelHandle`] being triggered from another thread
//!
//! Accepted and connected sockets stay in blocking mode; only the wait goes
//! through the poller. Uses epoll on Linux, kqueue on macOS.

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

const WAKER_TOKEN: Token = Token(0);
const SOCKET_TOKEN: Token = Token(1);

/// Why a wait ended without the socket becoming ready.
#[derive(Debug)]
pub enum WaitError {
    TimedOut,
    Cancelled,
    Io(io::Error),
}

/// Cloneable handle that aborts the current and all future waits of one
/// [`Waiter`].
#[derive(Clone)]
pub struct CancelHandle {
    waker: Arc<Waker>,
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            // The flag is still set, so the next wait observes it.
            trace!(error = %e, "Failed to wake poller");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Owns the poller used to wait on one socket at a time.
pub struct Waiter {
    poll: Poll,
    events: Events,
    cancel: CancelHandle,
}

impl Waiter {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(4),
            cancel: CancelHandle {
                waker: Arc::new(waker),
                cancelled: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Block until `fd` is readable, `deadline` passes, or the wait is
    /// cancelled. `None` waits indefinitely.
    ///
    /// For a listening socket, readable means a connection is pending. For a
    /// stream, it means data or end-of-stream is available.
    pub fn wait_readable(&mut self, fd: RawFd, deadline: Option<Instant>) -> Result<(), WaitError> {
        self.wait(fd, Interest::READABLE, deadline)
    }

    /// Block until `fd` is writable, `deadline` passes, or the wait is
    /// cancelled.
    ///
    /// For a socket with a connect in progress, writable means the connect
    /// finished, successfully or not.
    pub fn wait_writable(&mut self, fd: RawFd, deadline: Option<Instant>) -> Result<(), WaitError> {
        self.wait(fd, Interest::WRITABLE, deadline)
    }

    fn wait(
        &mut self,
        fd: RawFd,
        interest: Interest,
        deadline: Option<Instant>,
    ) -> Result<(), WaitError> {
        if self.cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }

        let mut source = SourceFd(&fd);
        self.poll
            .registry()
            .register(&mut source, SOCKET_TOKEN, interest)
            .map_err(WaitError::Io)?;

        let result = self.poll_until(deadline);

        if let Err(e) = self.poll.registry().deregister(&mut source) {
            trace!(error = %e, fd, "Failed to deregister socket");
        }

        result
    }

    fn poll_until(&mut self, deadline: Option<Instant>) -> Result<(), WaitError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }

            let timeout = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(WaitError::TimedOut);
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WaitError::Io(e)),
            }

            // Cancellation wins over a simultaneous readiness event.
            if self.cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }

            if self.events.iter().any(|event| event.token() == SOCKET_TOKEN) {
                return Ok(());
            }
        }
    }
}
