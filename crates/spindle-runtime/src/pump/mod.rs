//! Buffered stream pump
//!
//! Drives any `Transport` with one continuous read loop and one serialized
//! write loop:
//!
//! - Reads land directly in the receive `SharedBuffer`; every completed read
//!   immediately issues the next one, then emits `bytes_read` with a handle
//!   to that buffer.
//! - Writes append to the send buffer. Only a write into an empty buffer
//!   starts the transport; later ones queue behind it, so data goes out in
//!   the order it was written.
//! - The first error stops the pump and closes the transport once.
//!
//! The pump state is shared with every pending completion, so a transport
//! may complete after the public `Stream` is gone. Dropping the stream stops
//! the pump, so such completions are discarded, as are completions from an
//! earlier open (older session) or arriving after a stop.
//!
//! Calls into the transport run in the order they were issued. A call made
//! while the transport is on the stack is deferred to a later turn, and
//! every call after it queues behind it.

mod transport;

#[cfg(target_os = "linux")]
pub mod fd;

pub use transport::Transport;

use crate::error::RuntimeResult;
use crate::object::{Object, ThreadAffine};
use crate::reactor::LocalReactor;
use crate::signal::Signal;
use spindle_core::{ErrorCode, SharedBuffer, StreamBuffer};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Connection state of a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Closed,
    Opening,
    Open,
}

/// Notifications emitted by a stream, on its owning thread.
#[derive(Default)]
pub struct StreamEvents {
    pub open_success: Signal<()>,
    /// Open failed. Followed by `error` with the same code.
    pub open_error: Signal<ErrorCode>,
    pub error: Signal<ErrorCode>,
    /// New bytes are in the receive buffer. Consume what you need; the rest
    /// stays for the next emission.
    pub bytes_read: Signal<SharedBuffer>,
    pub bytes_written: Signal<usize>,
}

// ============================================================================
// Completions
// ============================================================================

trait PumpSink {
    fn session(&self) -> u64;
    fn is_stopped(&self) -> bool;
    fn recv_buffer(&self) -> &SharedBuffer;
    fn recv_chunk(&self) -> usize;
    fn send_buffer(&self) -> &RefCell<StreamBuffer>;
    fn on_open(self: Rc<Self>, session: u64, result: Result<(), ErrorCode>);
    fn on_read(self: Rc<Self>, session: u64, result: Result<usize, ErrorCode>, committed: bool);
    fn on_write(self: Rc<Self>, session: u64, result: Result<usize, ErrorCode>);
}

fn stale(pump: &Rc<dyn PumpSink>, session: u64) -> bool {
    pump.is_stopped() || pump.session() != session
}

/// Finishes a `Transport::open` request.
pub struct OpenCompletion {
    pump: Rc<dyn PumpSink>,
    session: u64,
}

impl OpenCompletion {
    pub fn complete(self, result: Result<(), ErrorCode>) {
        let Self { pump, session } = self;
        pump.on_open(session, result);
    }
}

/// Finishes a `Transport::read` request.
pub struct ReadCompletion {
    pump: Rc<dyn PumpSink>,
    session: u64,
}

impl ReadCompletion {
    /// Lend the receive buffer's spare region to `f`. Whatever `f` writes
    /// there becomes visible only after `complete(Ok(n))`.
    pub fn fill<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut buf = self.pump.recv_buffer().lock();
        let chunk = self.pump.recv_chunk();
        if buf.left_space() < chunk {
            buf.prepare_write(chunk);
        }
        f(buf.spare_mut())
    }

    /// Report how many bytes `fill` produced, or the failure.
    pub fn complete(self, result: Result<usize, ErrorCode>) {
        let Self { pump, session } = self;
        pump.on_read(session, result, false);
    }

    /// Append `data` and complete. For transports that receive whole
    /// messages into their own storage.
    pub fn complete_with(self, data: &[u8]) {
        let Self { pump, session } = self;
        if stale(&pump, session) {
            return;
        }
        let n = pump.recv_buffer().lock().write(data);
        pump.on_read(session, Ok(n), true);
    }

    fn is_stale(&self) -> bool {
        stale(&self.pump, self.session)
    }
}

/// Finishes a `Transport::write` request.
pub struct WriteCompletion {
    pump: Rc<dyn PumpSink>,
    session: u64,
}

impl WriteCompletion {
    /// Lend the unsent bytes to `f`.
    pub fn drain<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        let buf = self.pump.send_buffer().borrow();
        f(buf.as_slice())
    }

    /// Report how many bytes the transport accepted, or the failure.
    pub fn complete(self, result: Result<usize, ErrorCode>) {
        let Self { pump, session } = self;
        pump.on_write(session, result);
    }

    fn is_stale(&self) -> bool {
        stale(&self.pump, self.session)
    }
}

macro_rules! completion_debug {
    ($($ty:ident),*) => {$(
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("session", &self.session)
                    .finish()
            }
        }
    )*};
}

completion_debug!(OpenCompletion, ReadCompletion, WriteCompletion);

// ============================================================================
// Pump
// ============================================================================

struct PumpInner<T: Transport> {
    transport: RefCell<T>,
    reactor: LocalReactor,
    description: String,
    events: RefCell<Weak<StreamEvents>>,
    state: Cell<PumpState>,
    stopped: Cell<bool>,
    close_called: Cell<bool>,
    session: Cell<u64>,
    /// Transport calls waiting for a later turn.
    deferred: Cell<usize>,
    recv: SharedBuffer,
    send: RefCell<StreamBuffer>,
    recv_chunk: usize,
}

impl<T: Transport> PumpInner<T> {
    fn sink(self: &Rc<Self>) -> Rc<dyn PumpSink> {
        Rc::clone(self) as Rc<dyn PumpSink>
    }

    /// Call into the transport now, or on a later turn if it is already on
    /// the stack (a transport completing synchronously) or earlier calls are
    /// still deferred.
    fn with_transport<F>(self: &Rc<Self>, f: F)
    where
        F: FnOnce(&mut T) + 'static,
    {
        if self.deferred.get() == 0 {
            if let Ok(mut t) = self.transport.try_borrow_mut() {
                f(&mut t);
                return;
            }
        }
        self.deferred.set(self.deferred.get() + 1);
        let this = Rc::clone(self);
        self.reactor.post_local(move || this.run_deferred(f));
    }

    fn run_deferred<F>(self: Rc<Self>, f: F)
    where
        F: FnOnce(&mut T) + 'static,
    {
        match self.transport.try_borrow_mut() {
            Ok(mut t) => {
                self.deferred.set(self.deferred.get() - 1);
                f(&mut t);
            }
            Err(_) => {
                let this = Rc::clone(&self);
                self.reactor.post_local(move || this.run_deferred(f));
            }
        }
    }

    fn emit<F: FnOnce(&StreamEvents)>(&self, f: F) {
        let events = self.events.borrow().upgrade();
        if let Some(events) = events {
            f(&events);
        }
    }

    fn open(self: &Rc<Self>, args: T::OpenArgs) {
        if self.state.get() != PumpState::Closed {
            log::warn!("{}: already open or opening", self.description);
            return;
        }
        let session = self.session.get() + 1;
        self.session.set(session);
        self.stopped.set(false);
        self.close_called.set(false);
        self.state.set(PumpState::Opening);
        self.recv.lock().reset();
        self.send.borrow_mut().reset();

        log::debug!("{}: opening (session {})", self.description, session);
        let done = OpenCompletion {
            pump: self.sink(),
            session,
        };
        self.with_transport(move |t| t.open(args, done));
    }

    fn start_read(self: &Rc<Self>) {
        if self.stopped.get() {
            return;
        }
        let done = ReadCompletion {
            pump: self.sink(),
            session: self.session.get(),
        };
        self.with_transport(move |t| {
            if !done.is_stale() {
                t.read(done);
            }
        });
    }

    fn start_write(self: &Rc<Self>) {
        if self.stopped.get() || self.state.get() != PumpState::Open {
            return;
        }
        if self.send.borrow().is_empty() {
            return;
        }
        let done = WriteCompletion {
            pump: self.sink(),
            session: self.session.get(),
        };
        self.with_transport(move |t| {
            if !done.is_stale() {
                t.write(done);
            }
        });
    }

    fn write(self: &Rc<Self>, data: &[u8]) {
        if self.stopped.get() {
            log::warn!("{}: write on a stopped stream dropped", self.description);
            return;
        }
        let was_empty = {
            let mut send = self.send.borrow_mut();
            let was_empty = send.is_empty();
            send.write(data);
            was_empty
        };
        if was_empty {
            self.start_write();
        }
    }

    /// Latch stopped and close the transport once.
    fn stop(self: &Rc<Self>) {
        self.stopped.set(true);
        self.state.set(PumpState::Closed);
        if self.close_called.replace(true) {
            return;
        }
        log::debug!("{}: closing", self.description);
        // a deferred close still runs before any later open
        self.with_transport(|t| t.close());
    }

    fn fail(self: &Rc<Self>, err: ErrorCode) {
        log::debug!("{}: {}", self.description, err);
        self.stop();
        self.emit(|ev| ev.error.emit(err));
    }
}

impl<T: Transport> PumpSink for PumpInner<T> {
    fn session(&self) -> u64 {
        self.session.get()
    }

    fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    fn recv_buffer(&self) -> &SharedBuffer {
        &self.recv
    }

    fn recv_chunk(&self) -> usize {
        self.recv_chunk
    }

    fn send_buffer(&self) -> &RefCell<StreamBuffer> {
        &self.send
    }

    fn on_open(self: Rc<Self>, session: u64, result: Result<(), ErrorCode>) {
        if self.stopped.get() || self.session.get() != session {
            return;
        }
        match result {
            Err(err) => {
                log::debug!("{}: open failed: {}", self.description, err);
                self.stop();
                self.emit(|ev| {
                    ev.open_error.emit(err.clone());
                    ev.error.emit(err);
                });
            }
            Ok(()) => {
                self.state.set(PumpState::Open);
                log::debug!("{}: open", self.description);
                self.start_read();
                self.start_write();
                self.emit(|ev| ev.open_success.emit(()));
            }
        }
    }

    fn on_read(self: Rc<Self>, session: u64, result: Result<usize, ErrorCode>, committed: bool) {
        if self.stopped.get() || self.session.get() != session {
            return;
        }
        match result {
            Err(err) => self.fail(err),
            Ok(n) => {
                if !committed {
                    let mut buf = self.recv.lock();
                    let space = buf.left_space();
                    if n > space {
                        log::warn!(
                            "{}: transport reported {} bytes read into {} bytes of space",
                            self.description,
                            n,
                            space
                        );
                    }
                    buf.commit_write(n.min(space));
                }
                log::trace!("{}: read {} bytes", self.description, n);
                self.start_read();
                let recv = self.recv.clone();
                self.emit(|ev| ev.bytes_read.emit(recv));
            }
        }
    }

    fn on_write(self: Rc<Self>, session: u64, result: Result<usize, ErrorCode>) {
        if self.stopped.get() || self.session.get() != session {
            return;
        }
        match result {
            Err(err) => self.fail(err),
            Ok(n) => {
                let n = self.send.borrow_mut().skip(n);
                log::trace!("{}: wrote {} bytes", self.description, n);
                self.start_write();
                self.emit(|ev| ev.bytes_written.emit(n));
            }
        }
    }
}

// ============================================================================
// Stream
// ============================================================================

/// A buffered byte stream over transport `T`, bound to one reactor thread.
///
/// # Example
///
/// ```rust,ignore
/// let stream = Stream::new(FdTransport::new()?)?;
/// stream.bytes_read().connect_local(&stream, |buf| {
///     println!("got {:?}", buf.take_all());
/// });
/// stream.open(fd);
/// stream.write(b"hello");
/// ```
pub struct Stream<T: Transport> {
    object: Object,
    pump: Rc<PumpInner<T>>,
    events: Rc<StreamEvents>,
}

impl<T: Transport> Stream<T> {
    pub fn new(transport: T) -> RuntimeResult<Self> {
        Self::build(None, transport)
    }

    pub fn with_parent(parent: &Object, transport: T) -> RuntimeResult<Self> {
        Self::build(Some(parent), transport)
    }

    fn build(parent: Option<&Object>, transport: T) -> RuntimeResult<Self> {
        let object = Object::new(parent)?;
        let reactor = LocalReactor::require_current()?;
        let events = Rc::new(StreamEvents::default());
        let capacity = reactor.config().buffer_capacity;
        let recv_chunk = reactor.config().recv_chunk;
        let pump = Rc::new(PumpInner {
            description: transport.description().to_string(),
            recv: SharedBuffer::new(capacity),
            send: RefCell::new(StreamBuffer::with_capacity(capacity)),
            recv_chunk,
            transport: RefCell::new(transport),
            reactor,
            events: RefCell::new(Rc::downgrade(&events)),
            state: Cell::new(PumpState::Closed),
            stopped: Cell::new(true),
            close_called: Cell::new(false),
            session: Cell::new(0),
            deferred: Cell::new(0),
        });
        Ok(Self {
            object,
            pump,
            events,
        })
    }

    /// Open the transport. Ignored (with a warning) unless closed.
    pub fn open(&self, args: T::OpenArgs) {
        self.pump.open(args);
    }

    /// Queue `data` for sending. Dropped with a warning if the stream is
    /// stopped; buffered while opening.
    pub fn write(&self, data: impl AsRef<[u8]>) {
        self.pump.write(data.as_ref());
    }

    /// Stop the pump and close the transport. Idempotent.
    pub fn close(&self) {
        self.pump.stop();
    }

    pub fn state(&self) -> PumpState {
        self.pump.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.pump.state.get() == PumpState::Open
    }

    pub fn is_stopped(&self) -> bool {
        self.pump.stopped.get()
    }

    pub fn description(&self) -> &str {
        &self.pump.description
    }

    /// The receive buffer. Same handle `bytes_read` delivers.
    pub fn recv_buffer(&self) -> &SharedBuffer {
        &self.pump.recv
    }

    /// Bytes queued and not yet accepted by the transport.
    pub fn pending_write(&self) -> usize {
        self.pump.send.borrow().len()
    }

    /// Run `f` on the transport, unless it is busy in a call of its own.
    pub fn with_transport<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.pump.transport.try_borrow().ok().map(|t| f(&*t))
    }

    pub fn events(&self) -> &StreamEvents {
        &self.events
    }

    pub fn open_success(&self) -> &Signal<()> {
        &self.events.open_success
    }

    pub fn open_error(&self) -> &Signal<ErrorCode> {
        &self.events.open_error
    }

    pub fn error(&self) -> &Signal<ErrorCode> {
        &self.events.error
    }

    pub fn bytes_read(&self) -> &Signal<SharedBuffer> {
        &self.events.bytes_read
    }

    pub fn bytes_written(&self) -> &Signal<usize> {
        &self.events.bytes_written
    }
}

impl<T: Transport> ThreadAffine for Stream<T> {
    fn object(&self) -> &Object {
        &self.object
    }
}

impl<T: Transport> Drop for Stream<T> {
    fn drop(&mut self) {
        *self.pump.events.borrow_mut() = Weak::new();
        self.pump.stop();
    }
}

impl<T: Transport> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("transport", &self.pump.description)
            .field("state", &self.pump.state.get())
            .field("stopped", &self.pump.stopped.get())
            .finish()
    }
}
