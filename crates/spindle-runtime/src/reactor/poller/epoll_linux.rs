//! Linux epoll poller with an eventfd waker
//!
//! Level-triggered: a source that is still ready is reported again on the
//! next poll, so a handler that could not run this turn loses nothing.

use super::{Event, Interest, Poller, RawFd, Readiness, Token, Waker};
use std::cell::RefCell;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Reserved epoll user data for the waker fd.
const WAKE_TOKEN: u64 = u64::MAX;

/// Waker backed by an eventfd.
///
/// Coalescing: multiple calls to `wake()` before the poller drains the
/// eventfd result in a single wakeup (eventfd counter semantics).
pub struct EventFdWaker {
    fd: RawFd,
}

impl EventFdWaker {
    /// Create a new eventfd. The waker owns the fd and closes it on drop.
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Reset the counter so the fd stops reporting readable.
    fn drain(&self) {
        let mut val: u64 = 0;
        unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }
}

impl Waker for EventFdWaker {
    fn wake(&self) {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // EAGAIN means the counter is saturated, so a wake is already pending.
            if err.raw_os_error() != Some(libc::EAGAIN) {
                log::warn!("eventfd wake failed: {}", err);
            }
        }
    }
}

impl Drop for EventFdWaker {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}

/// epoll-based poller.
pub struct EpollPoller {
    epfd: RawFd,
    waker: Arc<EventFdWaker>,
    buf: RefCell<Vec<libc::epoll_event>>,
}

impl EpollPoller {
    pub fn new(waker: Arc<EventFdWaker>, max_events: usize) -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        let poller = Self {
            epfd,
            waker,
            buf: RefCell::new(vec![
                libc::epoll_event { events: 0, u64: 0 };
                max_events.max(1)
            ]),
        };
        poller.ctl(
            libc::EPOLL_CTL_ADD,
            poller.waker.fd(),
            libc::EPOLLIN as u32,
            WAKE_TOKEN,
        )?;
        Ok(poller)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, data: u64) -> io::Result<()> {
        let mut ev = libc::epoll_event { events, u64: data };
        let ret = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

fn interest_bits(interest: Interest) -> u32 {
    let mut bits = 0u32;
    if interest.readable {
        bits |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
    }
    if interest.writable {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}

fn readiness_of(bits: u32) -> Readiness {
    Readiness {
        readable: bits & (libc::EPOLLIN | libc::EPOLLRDHUP) as u32 != 0,
        writable: bits & libc::EPOLLOUT as u32 != 0,
        error: bits & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0,
    }
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        // Round up so a deadline is never reported early.
        Some(d) => d.as_nanos().div_ceil(1_000_000).min(libc::c_int::MAX as u128) as libc::c_int,
    }
}

impl Poller for EpollPoller {
    fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.ctl(
            libc::EPOLL_CTL_ADD,
            fd,
            interest_bits(interest),
            token.0 as u64,
        )
    }

    fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.ctl(
            libc::EPOLL_CTL_MOD,
            fd,
            interest_bits(interest),
            token.0 as u64,
        )
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, 0)
    }

    fn poll(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let mut buf = self.buf.borrow_mut();
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                buf.as_mut_ptr(),
                buf.len() as libc::c_int,
                timeout_ms(timeout),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for ev in buf.iter().take(n as usize) {
            let data = ev.u64;
            let bits = ev.events;
            if data == WAKE_TOKEN {
                self.waker.drain();
                continue;
            }
            events.push(Event {
                token: Token(data as usize),
                readiness: readiness_of(bits),
            });
        }
        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as libc::c_int; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        assert_eq!(ret, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn test_pipe_readiness() {
        let waker = Arc::new(EventFdWaker::new().unwrap());
        let poller = EpollPoller::new(waker, 8).unwrap();
        let (r, w) = pipe();

        poller.register(r, Token(3), Interest::READABLE).unwrap();

        let mut events = Vec::new();
        poller.poll(&mut events, Some(Duration::ZERO)).unwrap();
        assert!(events.is_empty());

        let byte = 1u8;
        unsafe { libc::write(w, &byte as *const u8 as *const libc::c_void, 1) };

        poller
            .poll(&mut events, Some(Duration::from_millis(100)))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, Token(3));
        assert!(events[0].readiness.readable);

        poller.deregister(r).unwrap();
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(5))), 5);
    }
}
