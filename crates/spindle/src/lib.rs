//! # spindle - thread-affine reactors
//!
//! Every thread that owns objects runs a `Reactor`. Objects, timers and
//! streams belong to the thread they were created on; other threads reach
//! them only by queueing tasks or emitting signals, which are marshaled to
//! the owner's loop.
//!
//! ## Quick Start
//!
//! ```ignore
//! use spindle::{Reactor, Timer};
//! use std::time::Duration;
//!
//! fn main() -> spindle::RuntimeResult<()> {
//!     let reactor = Reactor::new()?;
//!     let timer = Timer::new()?;
//!     let handle = reactor.handle();
//!
//!     timer.set_single_shot(true);
//!     timer.timeout().connect(&timer, move |()| handle.exit(0));
//!     timer.reset(Duration::from_millis(100));
//!
//!     std::process::exit(reactor.exec());
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   other threads                      owner thread
//! ┌────────────────┐   post / emit   ┌──────────────────────────────┐
//! │ ReactorHandle  │ ──────────────▶ │ Reactor                      │
//! │ ObjectHandle   │                 │  tasks ▸ deadlines ▸ poll    │
//! │ Signal::emit   │                 │     │        │        │      │
//! └────────────────┘                 │     ▼        ▼        ▼      │
//!                                    │  slots    Timer    Stream<T> │
//!                                    └──────────────────────────────┘
//! ```

// Re-export core types
pub use spindle_core::{
    env_get, env_get_bool, env_get_millis, env_get_opt, Category, Errc, ErrorCode, OwnerThread,
    SharedBuffer, StreamBuffer, WaitGroup, Waiter,
};

// Re-export runtime types
pub use spindle_runtime::{
    config, AsyncOperation, AsyncOperationQueue, AsyncWaitGroup, Affine, Completion, ConfigError,
    Connection, DeadlineId, LocalReactor, LoopThread, Object, ObjectHandle, OpenCompletion,
    OperationState, PumpState, ReactorConfig, ReactorHandle, ReadCompletion, RuntimeError,
    RuntimeResult, Signal, SignalSpy, Stream, StreamEvents, ThreadAffine, Timer, Transport,
    WaitGroupNotifier, WriteCompletion,
};
pub use spindle_runtime::reactor::{Interest, IoHandler, RawFd, Readiness, Token};
pub use spindle_runtime::signal::{connect, emit};
pub use spindle_runtime::Reactor;

#[cfg(target_os = "linux")]
pub use spindle_runtime::FdTransport;

/// Create a reactor on this thread, run `setup` on it, then loop until
/// `quit`/`exit`. Returns the exit code.
///
/// ```ignore
/// let code = spindle::run(|reactor| {
///     let h = reactor.handle();
///     h.post(move || h.exit(3));
///     Ok(())
/// })?;
/// assert_eq!(code, 3);
/// ```
pub fn run<F>(setup: F) -> RuntimeResult<i32>
where
    F: FnOnce(&Reactor) -> RuntimeResult<()>,
{
    let reactor = Reactor::new()?;
    reactor.config().log();
    setup(&reactor)?;
    log::debug!("entering event loop");
    Ok(reactor.exec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_returns_exit_code() {
        let code = run(|reactor| {
            let h = reactor.handle();
            h.post({
                let h = h.clone();
                move || h.exit(3)
            });
            Ok(())
        })
        .unwrap();
        assert_eq!(code, 3);
        assert!(Reactor::current().is_none());
    }

    #[test]
    fn test_run_propagates_setup_error() {
        let err = run(|_| Err(RuntimeError::NoReactor)).unwrap_err();
        assert!(matches!(err, RuntimeError::NoReactor));
    }
}
