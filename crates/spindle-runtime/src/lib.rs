//! # spindle-runtime
//!
//! Single-threaded reactors and the thread-affine building blocks on top of
//! them.
//!
//! This crate provides:
//! - `Reactor`: per-thread event loop (task queues, deadlines, fd readiness)
//! - `Object` / `Affine`: thread ownership and cross-thread hand-off
//! - `Signal`: typed notifications delivered on the receiver's thread
//! - `Timer`: single-shot and repeating timers
//! - `AsyncOperationQueue`: serialized asynchronous operations
//! - `Stream` / `Transport`: buffered byte-stream pump
//! - `LoopThread`: a reactor on its own OS thread

pub mod async_queue;
pub mod config;
pub mod error;
pub mod object;
pub mod pump;
pub mod reactor;
pub mod signal;
pub mod spy;
pub mod thread;
pub mod timer;
pub mod wait_group;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

// Re-exports
pub use async_queue::{AsyncOperation, AsyncOperationQueue, Completion, OperationState};
pub use config::{ConfigError, ReactorConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use object::{Affine, Object, ObjectHandle, ThreadAffine};
pub use pump::{
    OpenCompletion, PumpState, ReadCompletion, Stream, StreamEvents, Transport, WriteCompletion,
};
pub use reactor::{DeadlineId, LocalReactor, Reactor, ReactorHandle};
pub use signal::{Connection, Signal};
pub use spy::SignalSpy;
pub use thread::LoopThread;
pub use timer::Timer;
pub use wait_group::{AsyncWaitGroup, WaitGroupNotifier};

#[cfg(target_os = "linux")]
pub use pump::fd::FdTransport;
