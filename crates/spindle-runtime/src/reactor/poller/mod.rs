//! I/O readiness demultiplexer
//!
//! Each reactor owns one poller and one waker. The waker is shared with every
//! `ReactorHandle` so other threads can interrupt a blocking `poll`.
//! Platform-specific implementations use the most efficient primitive
//! available.

use std::io;
use std::time::Duration;

#[cfg(unix)]
pub use std::os::unix::io::RawFd;
#[cfg(not(unix))]
pub type RawFd = i32;

/// Identifies one registered I/O source within a reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

/// Readiness a source wants to be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        readable: false,
        writable: false,
    };
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
    };
    pub const BOTH: Interest = Interest {
        readable: true,
        writable: true,
    };

    pub fn with_readable(mut self, on: bool) -> Self {
        self.readable = on;
        self
    }

    pub fn with_writable(mut self, on: bool) -> Self {
        self.writable = on;
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}

/// Readiness reported for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    /// Error or hang-up. Both read and write attempts will now report it.
    pub error: bool,
}

/// One readiness event.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub token: Token,
    pub readiness: Readiness,
}

/// Cross-thread wake-up of a blocked `poll`.
pub trait Waker: Send + Sync {
    /// Make the next (or current) `poll` return promptly.
    ///
    /// Multiple wakes before the poller observes them coalesce into one.
    fn wake(&self);
}

/// Platform readiness demultiplexer. Used only on the reactor thread.
pub trait Poller {
    /// Start watching `fd`.
    fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;

    /// Change the interest set of a registered `fd`.
    fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;

    /// Stop watching `fd`.
    fn deregister(&self, fd: RawFd) -> io::Result<()>;

    /// Wait for readiness or a wake, at most `timeout` (`None` = forever).
    ///
    /// Wake-ups are consumed internally and never appear in `events`.
    /// An interrupted wait returns `Ok` with no events.
    fn poll(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()>;
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod epoll_linux;
        pub use epoll_linux::{EpollPoller as PlatformPoller, EventFdWaker as PlatformWaker};
    } else {
        mod fallback;
        pub use fallback::{FallbackPoller as PlatformPoller, CondvarWaker as PlatformWaker};
    }
}
