//! Signal recorder for tests

use crate::error::RuntimeResult;
use crate::object::{Object, ThreadAffine};
use crate::reactor::Reactor;
use crate::signal::{Connection, Signal};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Records every emission of one signal.
///
/// The spy is its own receiver, so emissions from other threads are
/// recorded once the spy's reactor runs them.
///
/// # Example
///
/// ```rust,ignore
/// let spy = SignalSpy::new(timer.timeout())?;
/// timer.start();
/// assert!(spy.wait(&reactor, Duration::from_millis(200), 1));
/// ```
pub struct SignalSpy<A: Clone + Send + 'static> {
    object: Object,
    seen: Arc<Mutex<Vec<A>>>,
    connection: Connection,
}

impl<A: Clone + Send + 'static> SignalSpy<A> {
    pub fn new(signal: &Signal<A>) -> RuntimeResult<Self> {
        let object = Object::new(None)?;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let connection = signal.connect(&object, move |args| {
            s.lock().unwrap_or_else(PoisonError::into_inner).push(args);
        });
        Ok(Self {
            object,
            seen,
            connection,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<A>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn last(&self) -> Option<A> {
        self.lock().last().cloned()
    }

    pub fn all(&self) -> Vec<A> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drive `reactor` until at least `count` emissions are recorded or
    /// `timeout` elapses. Returns whether the count was reached.
    pub fn wait(&self, reactor: &Reactor, timeout: Duration, count: usize) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.count() >= count {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if let Err(e) = reactor.run_once(deadline - now) {
                log::warn!("SignalSpy::wait: {}", e);
                return self.count() >= count;
            }
        }
    }
}

impl<A: Clone + Send + 'static> ThreadAffine for SignalSpy<A> {
    fn object(&self) -> &Object {
        &self.object
    }
}

impl<A: Clone + Send + 'static> Drop for SignalSpy<A> {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_records_in_order() {
        let _reactor = Reactor::new().unwrap();
        let signal: Signal<u8> = Signal::new();
        let spy = SignalSpy::new(&signal).unwrap();
        signal.emit(1);
        signal.emit(2);
        assert_eq!(spy.count(), 2);
        assert_eq!(spy.last(), Some(2));
        assert_eq!(spy.all(), vec![1, 2]);
        spy.clear();
        assert_eq!(spy.count(), 0);
    }

    #[test]
    fn test_wait_drives_reactor() {
        let reactor = Reactor::new().unwrap();
        let signal = Arc::new(Signal::<&'static str>::new());
        let spy = SignalSpy::new(&signal).unwrap();

        let sig = Arc::clone(&signal);
        thread::spawn(move || sig.emit("remote")).join().unwrap();
        assert_eq!(spy.count(), 0);

        assert!(spy.wait(&reactor, Duration::from_secs(5), 1));
        assert_eq!(spy.last(), Some("remote"));
        assert!(!spy.wait(&reactor, Duration::from_millis(20), 2));
    }
}
