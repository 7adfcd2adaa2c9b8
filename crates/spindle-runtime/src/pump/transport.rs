//! Transport interface driven by the stream pump

use super::{OpenCompletion, ReadCompletion, WriteCompletion};

/// A byte-stream endpoint (socket, pipe, serial port, CAN channel, ...).
///
/// All methods are called on the reactor thread that owns the pump. Each
/// request hands over a completion the transport must finish later (or
/// immediately) by calling its `complete` method on the same thread. At most
/// one read and one write are outstanding at a time.
pub trait Transport: 'static {
    /// Whatever `open` needs: an address, a device path, an fd.
    type OpenArgs: 'static;

    /// Begin opening.
    fn open(&mut self, args: Self::OpenArgs, done: OpenCompletion);

    /// Read once into the receive buffer: lend it with
    /// `ReadCompletion::fill`, then `complete` with the byte count.
    /// A zero-byte read is end of stream and must complete with an error.
    fn read(&mut self, done: ReadCompletion);

    /// Write once from the send buffer: lend it with
    /// `WriteCompletion::drain`, then `complete` with the bytes accepted.
    fn write(&mut self, done: WriteCompletion);

    /// Release the endpoint. Any completions still held must be dropped
    /// without completing.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Human-readable name for logs.
    fn description(&self) -> &str;
}
