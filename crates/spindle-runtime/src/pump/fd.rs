//! Non-blocking file descriptor transport
//!
//! Works with anything epoll accepts: connected sockets, pipes, ttys. The
//! transport takes ownership of the fd passed to `open` and closes it on
//! `close` or drop.
//!
//! Reads and writes are attempted immediately. Only on `EAGAIN` is the
//! completion parked and the fd armed for readiness; the reactor's io
//! handler retries it.

use super::{OpenCompletion, ReadCompletion, Transport, WriteCompletion};
use crate::error::RuntimeResult;
use crate::reactor::{Interest, IoHandler, LocalReactor, RawFd, Readiness, Token};
use nix::errno::Errno;
use spindle_core::ErrorCode;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

struct FdShared {
    fd: Cell<RawFd>,
    token: Cell<Option<Token>>,
    interest: Cell<Interest>,
    reactor: LocalReactor,
    read: RefCell<Option<ReadCompletion>>,
    write: RefCell<Option<WriteCompletion>>,
}

/// Stream transport over a raw, owned fd.
pub struct FdTransport {
    shared: Rc<FdShared>,
    description: String,
}

impl FdTransport {
    pub fn new() -> RuntimeResult<Self> {
        Self::with_description("fd")
    }

    pub fn with_description(description: impl Into<String>) -> RuntimeResult<Self> {
        let reactor = LocalReactor::require_current()?;
        Ok(Self {
            shared: Rc::new(FdShared {
                fd: Cell::new(-1),
                token: Cell::new(None),
                interest: Cell::new(Interest::NONE),
                reactor,
                read: RefCell::new(None),
                write: RefCell::new(None),
            }),
            description: description.into(),
        })
    }

    /// The fd, while open.
    pub fn fd(&self) -> Option<RawFd> {
        let fd = self.shared.fd.get();
        (fd >= 0).then_some(fd)
    }
}

impl Transport for FdTransport {
    type OpenArgs = RawFd;

    fn open(&mut self, fd: RawFd, done: OpenCompletion) {
        if self.shared.fd.get() >= 0 {
            self.close();
        }
        if let Err(err) = set_nonblocking(fd) {
            close_fd(fd);
            done.complete(Err(err));
            return;
        }
        self.shared.fd.set(fd);
        if let Err(err) = self.shared.arm(Interest::NONE) {
            self.close();
            done.complete(Err(err));
            return;
        }
        done.complete(Ok(()));
    }

    fn read(&mut self, mut done: ReadCompletion) {
        let fd = self.shared.fd.get();
        if fd < 0 {
            return;
        }
        match read_once(fd, &mut done) {
            Some(result) => done.complete(result),
            None => {
                *self.shared.read.borrow_mut() = Some(done);
                self.shared.update_interest();
            }
        }
    }

    fn write(&mut self, mut done: WriteCompletion) {
        let fd = self.shared.fd.get();
        if fd < 0 {
            return;
        }
        match write_once(fd, &mut done) {
            Some(result) => done.complete(result),
            None => {
                *self.shared.write.borrow_mut() = Some(done);
                self.shared.update_interest();
            }
        }
    }

    fn close(&mut self) {
        self.shared.disarm();
        let fd = self.shared.fd.replace(-1);
        if fd >= 0 {
            log::trace!("{}: closing fd {}", self.description, fd);
            close_fd(fd);
        }
        let pending = (
            self.shared.read.borrow_mut().take(),
            self.shared.write.borrow_mut().take(),
        );
        drop(pending);
    }

    fn is_open(&self) -> bool {
        self.shared.fd.get() >= 0
    }

    fn description(&self) -> &str {
        &self.description
    }
}

impl Drop for FdTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl FdShared {
    fn wanted(&self) -> Interest {
        Interest::NONE
            .with_readable(self.read.borrow().is_some())
            .with_writable(self.write.borrow().is_some())
    }

    /// Register with the reactor, or update the registered interest.
    fn arm(self: &Rc<Self>, interest: Interest) -> Result<(), ErrorCode> {
        let result = match self.token.get() {
            Some(_) if self.interest.get() == interest => return Ok(()),
            Some(token) => self.reactor.set_interest(token, interest),
            None => {
                let weak: Weak<FdShared> = Rc::downgrade(self);
                let handler: IoHandler = Rc::new(RefCell::new(move |ready: Readiness| {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_ready(ready);
                    }
                }));
                self.reactor
                    .register_io(self.fd.get(), interest, handler)
                    .map(|token| self.token.set(Some(token)))
            }
        };
        result.map_err(|e| ErrorCode::resource(e.to_string()))?;
        self.interest.set(interest);
        Ok(())
    }

    fn disarm(&self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.reactor.deregister_io(token) {
                log::debug!("fd {}: deregister failed: {}", self.fd.get(), e);
            }
        }
        self.interest.set(Interest::NONE);
    }

    fn update_interest(self: &Rc<Self>) {
        if self.fd.get() < 0 {
            return;
        }
        if let Err(err) = self.arm(self.wanted()) {
            log::warn!("fd {}: {}", self.fd.get(), err);
            self.fail_pending(err);
        }
    }

    fn fail_pending(&self, err: ErrorCode) {
        let read = self.read.borrow_mut().take();
        let write = self.write.borrow_mut().take();
        if let Some(done) = read {
            done.complete(Err(err.clone()));
        }
        if let Some(done) = write {
            done.complete(Err(err));
        }
    }

    fn on_ready(self: &Rc<Self>, ready: Readiness) {
        if ready.readable || ready.error {
            let pending = self.read.borrow_mut().take();
            if let Some(mut done) = pending {
                match read_once(self.fd.get(), &mut done) {
                    Some(result) => done.complete(result),
                    None => *self.read.borrow_mut() = Some(done),
                }
            }
        }
        // the read completion may have closed us
        if self.fd.get() < 0 {
            return;
        }
        if ready.writable || ready.error {
            let pending = self.write.borrow_mut().take();
            if let Some(mut done) = pending {
                match write_once(self.fd.get(), &mut done) {
                    Some(result) => done.complete(result),
                    None => *self.write.borrow_mut() = Some(done),
                }
            }
        }
        if self.fd.get() < 0 {
            return;
        }
        // hangup with nothing pending would report on every poll
        if ready.error && self.read.borrow().is_none() && self.write.borrow().is_none() {
            self.disarm();
            return;
        }
        self.update_interest();
    }
}

/// One read attempt. `None` means would block.
fn read_once(fd: RawFd, done: &mut ReadCompletion) -> Option<Result<usize, ErrorCode>> {
    loop {
        let res = done.fill(|buf| {
            let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n < 0 {
                Err(Errno::last())
            } else {
                Ok(n as usize)
            }
        });
        return match res {
            Ok(0) => Some(Err(ErrorCode::eof())),
            Ok(n) => Some(Ok(n)),
            Err(Errno::EINTR) => continue,
            Err(Errno::EAGAIN) => None,
            Err(e) => Some(Err(e.into())),
        };
    }
}

/// One write attempt. `None` means would block.
fn write_once(fd: RawFd, done: &mut WriteCompletion) -> Option<Result<usize, ErrorCode>> {
    loop {
        let res = done.drain(|buf| {
            let ptr = buf.as_ptr().cast();
            // MSG_NOSIGNAL keeps a closed peer from raising SIGPIPE
            let mut n = unsafe { libc::send(fd, ptr, buf.len(), libc::MSG_NOSIGNAL) };
            if n < 0 && Errno::last() == Errno::ENOTSOCK {
                n = unsafe { libc::write(fd, ptr, buf.len()) };
            }
            if n < 0 {
                Err(Errno::last())
            } else {
                Ok(n as usize)
            }
        });
        return match res {
            Ok(n) => Some(Ok(n)),
            Err(Errno::EINTR) => continue,
            Err(Errno::EAGAIN) => None,
            Err(e) => Some(Err(e.into())),
        };
    }
}

fn set_nonblocking(fd: RawFd) -> Result<(), ErrorCode> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(Errno::last().into());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(Errno::last().into());
    }
    Ok(())
}

fn close_fd(fd: RawFd) {
    if unsafe { libc::close(fd) } < 0 {
        log::debug!("close({}) failed: {}", fd, Errno::last());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::Stream;
    use crate::reactor::Reactor;
    use crate::object::ThreadAffine;
    use spindle_core::SharedBuffer;
    use std::time::Duration;

    fn socketpair() -> (RawFd, RawFd) {
        crate::test_util::init_test_logging();
        let mut fds = [0 as libc::c_int; 2];
        let rc = unsafe {
            libc::socketpair(
                libc::AF_UNIX,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                0,
                fds.as_mut_ptr(),
            )
        };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn test_socketpair_exchange() {
        let reactor = Reactor::new().unwrap();
        let (a, b) = socketpair();

        let left = Stream::new(FdTransport::with_description("left").unwrap()).unwrap();
        let right = Stream::new(FdTransport::with_description("right").unwrap()).unwrap();

        let received = Rc::new(RefCell::new(Vec::new()));
        let r = Rc::clone(&received);
        let handle = reactor.handle();
        right
            .bytes_read()
            .connect_local(&right, move |buf: SharedBuffer| {
                r.borrow_mut().extend(buf.take_all());
                if r.borrow().len() >= 11 {
                    handle.quit();
                }
            });

        left.open(a);
        right.open(b);
        left.write(b"hello ");
        left.write(b"world");

        let guard = reactor.handle();
        reactor
            .local()
            .add_deadline(std::time::Instant::now() + Duration::from_secs(5), move || {
                guard.quit()
            });
        reactor.exec();

        assert_eq!(received.borrow().as_slice(), b"hello world");
        assert!(left.is_open());
        assert_eq!(left.pending_write(), 0);
        assert_eq!(left.thread_id(), std::thread::current().id());
    }

    #[test]
    fn test_peer_close_reports_eof() {
        let reactor = Reactor::new().unwrap();
        let (a, b) = socketpair();
        let stream = Stream::new(FdTransport::new().unwrap()).unwrap();

        let errors = Rc::new(RefCell::new(Vec::new()));
        let e = Rc::clone(&errors);
        let handle = reactor.handle();
        stream.error().connect_local(&stream, move |err: ErrorCode| {
            e.borrow_mut().push(err);
            handle.quit();
        });

        stream.open(a);
        close_fd(b);

        let guard = reactor.handle();
        reactor
            .local()
            .add_deadline(std::time::Instant::now() + Duration::from_secs(5), move || {
                guard.quit()
            });
        reactor.exec();
        // the close is deferred past the error emission
        reactor.run_once(Duration::ZERO).unwrap();

        assert_eq!(errors.borrow().len(), 1);
        assert!(errors.borrow()[0].is_eof());
        assert!(stream.is_stopped());
        assert_eq!(stream.with_transport(|t| t.is_open()), Some(false));
    }

    #[test]
    fn test_open_bad_fd_fails() {
        let reactor = Reactor::new().unwrap();
        let stream = Stream::new(FdTransport::new().unwrap()).unwrap();
        let failed = Rc::new(Cell::new(false));
        let f = Rc::clone(&failed);
        stream
            .open_error()
            .connect_local(&stream, move |_| f.set(true));

        stream.open(-5);
        reactor.run_once(Duration::ZERO).unwrap();
        assert!(failed.get());
        assert!(stream.is_stopped());
    }
}
