//! Portable poller using std::sync::Condvar
//!
//! Used on platforms without epoll. Supports wake-ups and timeouts only;
//! fd registration reports `Unsupported`.

use super::{Event, Interest, Poller, RawFd, Token, Waker};
use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Condvar-based waker.
pub struct CondvarWaker {
    /// true = wake pending
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl CondvarWaker {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            pending: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }
}

impl Waker for CondvarWaker {
    fn wake(&self) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.condvar.notify_one();
    }
}

/// Poller that can only sleep and be woken.
pub struct FallbackPoller {
    waker: Arc<CondvarWaker>,
}

impl FallbackPoller {
    pub fn new(waker: Arc<CondvarWaker>, _max_events: usize) -> io::Result<Self> {
        Ok(Self { waker })
    }
}

fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "fd readiness is not supported on this platform",
    )
}

impl Poller for FallbackPoller {
    fn register(&self, _fd: RawFd, _token: Token, _interest: Interest) -> io::Result<()> {
        Err(unsupported())
    }

    fn reregister(&self, _fd: RawFd, _token: Token, _interest: Interest) -> io::Result<()> {
        Err(unsupported())
    }

    fn deregister(&self, _fd: RawFd) -> io::Result<()> {
        Err(unsupported())
    }

    fn poll(&self, _events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let mut pending = self
            .waker
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !*pending {
            pending = match timeout {
                Some(t) => {
                    self.waker
                        .condvar
                        .wait_timeout_while(pending, t, |p| !*p)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .waker
                    .condvar
                    .wait_while(pending, |p| !*p)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }

        // Consume the wake
        *pending = false;
        Ok(())
    }
}
