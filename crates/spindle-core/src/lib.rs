//! # spindle-core
//!
//! Platform-agnostic building blocks for the spindle runtime.
//!
//! This crate has no reactor and no OS event handling; everything that needs
//! a run loop lives in `spindle-runtime`.
//!
//! ## Modules
//!
//! - `buffer` - `StreamBuffer` byte accumulator and its shared handle
//! - `error` - Opaque `ErrorCode` passed through stream layers
//! - `affinity` - `OwnerThread` token for thread-affinity checks
//! - `waiter` - Blocking one-shot and countdown notification
//! - `env` - Environment variable utilities

pub mod affinity;
pub mod buffer;
pub mod env;
pub mod error;
pub mod waiter;

pub use affinity::OwnerThread;
pub use buffer::{SharedBuffer, StreamBuffer};
pub use env::{env_get, env_get_bool, env_get_millis, env_get_opt, parse_or};
pub use error::{Category, Errc, ErrorCode};
pub use waiter::{WaitGroup, Waiter};
