//! Runtime setup errors

use std::io;

/// Errors returned while constructing or looking up runtime entities.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A reactor is already registered on this thread.
    #[error("a reactor already exists on this thread")]
    ReactorExists,

    /// No reactor is registered on this thread.
    #[error("no reactor on the current thread")]
    NoReactor,

    /// The owning reactor has been destroyed.
    #[error("the owning reactor is gone")]
    ReactorGone,

    /// The I/O demultiplexer failed.
    #[error("poller error: {0}")]
    Poller(#[from] io::Error),

    /// Operation not available on this platform.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// The loop thread could not be spawned.
    #[error("failed to spawn loop thread: {0}")]
    Spawn(#[source] io::Error),

    /// The loop thread exited before its reactor came up.
    #[error("loop thread exited during startup")]
    ThreadExited,

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
