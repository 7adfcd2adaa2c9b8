//! Compile-time defaults for `ReactorConfig`
//!
//! Each value can be overridden at runtime through the matching
//! `SPINDLE_*` environment variable.

/// Readiness events fetched per poll call.
pub const MAX_EVENTS: usize = 256;

/// Maximum cross-thread tasks drained per loop iteration before
/// deadlines and I/O get a turn.
pub const TASK_BATCH: usize = 1024;

/// Spare receive capacity a stream pump ensures before each read.
pub const RECV_CHUNK: usize = 8192;

/// Initial capacity of pump send/receive buffers.
pub const BUFFER_CAPACITY: usize = spindle_core::buffer::DEFAULT_CAPACITY;

/// Default `Timer` interval in milliseconds.
pub const TIMER_INTERVAL_MS: u64 = 3000;
