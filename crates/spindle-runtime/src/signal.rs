//! Typed signals with thread-affine delivery
//!
//! A `Signal<A>` holds an ordered list of subscribers. Each subscriber is
//! bound to a receiver object; emitting on the receiver's thread calls the
//! handler inline, emitting anywhere else moves a copy of the arguments into
//! one task queued on the receiver's thread. Handlers of receivers that have
//! since been dropped are skipped.
//!
//! Emission never blocks on handlers and never buffers for subscribers that
//! connect later.

use crate::object::{Affine, ObjectHandle, ThreadAffine};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Handler<A> = Box<dyn Fn(A) + 'static>;

struct Slot<A: 'static> {
    receiver: ObjectHandle,
    handler: Affine<Handler<A>>,
    connected: Arc<AtomicBool>,
}

impl<A: Clone + Send + 'static> Slot<A> {
    fn is_live(&self) -> bool {
        self.connected.load(Ordering::Acquire) && self.receiver.is_alive()
    }

    fn dispatch(self: &Arc<Self>, args: A) {
        if self.receiver.owner().is_current() {
            if self.is_live() {
                (self.handler.get())(args);
            }
            return;
        }
        let slot = Arc::clone(self);
        self.receiver.queue_task(move || {
            if slot.is_live() {
                (slot.handler.get())(args);
            }
        });
    }
}

/// Handle to one subscription.
///
/// Dropping it leaves the subscription in place; call `disconnect`.
#[derive(Debug, Clone)]
pub struct Connection {
    connected: Arc<AtomicBool>,
}

impl Connection {
    /// Stop delivery. Emissions already queued to the receiver are skipped.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// A typed signal.
pub struct Signal<A: Clone + Send + 'static> {
    slots: Mutex<Vec<Arc<Slot<A>>>>,
}

impl<A: Clone + Send + 'static> Signal<A> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Slot<A>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, receiver: &ObjectHandle, handler: Affine<Handler<A>>) -> Connection {
        let connected = Arc::new(AtomicBool::new(true));
        let slot = Arc::new(Slot {
            receiver: receiver.clone(),
            handler,
            connected: Arc::clone(&connected),
        });
        let _dead = self.prune();
        self.lock().push(slot);
        Connection { connected }
    }

    /// Drop dead subscribers. They are returned so their handlers are
    /// released after the lock.
    fn prune(&self) -> Vec<Arc<Slot<A>>> {
        let mut guard = self.lock();
        let (live, dead): (Vec<_>, Vec<_>) =
            std::mem::take(&mut *guard).into_iter().partition(|s| s.is_live());
        *guard = live;
        dead
    }

    /// Subscribe `handler`, to be run on `receiver`'s thread.
    ///
    /// May be called from any thread.
    pub fn connect<R, F>(&self, receiver: &R, handler: F) -> Connection
    where
        R: ThreadAffine + ?Sized,
        F: Fn(A) + Send + 'static,
    {
        let receiver = receiver.object().handle();
        let boxed: Handler<A> = Box::new(handler);
        // `F: Send`, so the erased handler may move to the receiver's thread
        self.push(receiver, Affine::pinned(boxed, receiver.reactor().clone()))
    }

    /// Subscribe a non-`Send` handler.
    ///
    /// # Panics
    ///
    /// Unless called on `receiver`'s thread.
    pub fn connect_local<R, F>(&self, receiver: &R, handler: F) -> Connection
    where
        R: ThreadAffine + ?Sized,
        F: Fn(A) + 'static,
    {
        let receiver = receiver.object().handle();
        let boxed: Handler<A> = Box::new(handler);
        self.push(receiver, Affine::with_owner(receiver, boxed))
    }

    /// Deliver `args` to every live subscriber, in connection order.
    pub fn emit(&self, args: A) {
        drop(self.prune());
        let slots: Vec<Arc<Slot<A>>> = self.lock().clone();

        let last = slots.len().saturating_sub(1);
        let mut args = Some(args);
        for (i, slot) in slots.iter().enumerate() {
            let a = if i == last { args.take() } else { args.clone() };
            if let Some(a) = a {
                slot.dispatch(a);
            }
        }
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.lock().iter().filter(|s| s.is_live()).count()
    }

    pub fn disconnect_all(&self) {
        let slots = std::mem::take(&mut *self.lock());
        for s in slots.iter() {
            s.connected.store(false, Ordering::Release);
        }
    }
}

impl<A: Clone + Send + 'static> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Clone + Send + 'static> fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("receivers", &self.receiver_count())
            .finish()
    }
}

/// Connect `signal_of(sender)` to `handler` on `receiver`'s thread.
pub fn connect<S, R, A, G, F>(sender: &S, signal_of: G, receiver: &R, handler: F) -> Connection
where
    S: ThreadAffine + ?Sized,
    R: ThreadAffine + ?Sized,
    A: Clone + Send + 'static,
    G: for<'a> FnOnce(&'a S) -> &'a Signal<A>,
    F: Fn(A) + Send + 'static,
{
    signal_of(sender).connect(receiver, handler)
}

/// Emit `signal_of(sender)` if the sender still exists.
pub fn emit<S, A, G>(sender: Option<&S>, signal_of: G, args: A)
where
    S: ?Sized,
    A: Clone + Send + 'static,
    G: for<'a> FnOnce(&'a S) -> &'a Signal<A>,
{
    if let Some(sender) = sender {
        signal_of(sender).emit(args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::reactor::Reactor;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::thread;
    use std::time::Duration;

    struct Sender {
        object: Object,
        value_changed: Signal<u32>,
    }

    impl ThreadAffine for Sender {
        fn object(&self) -> &Object {
            &self.object
        }
    }

    #[test]
    fn test_same_thread_emit_is_synchronous() {
        let _reactor = Reactor::new().unwrap();
        let sender = Sender {
            object: Object::new(None).unwrap(),
            value_changed: Signal::new(),
        };
        let receiver = Object::new(None).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = Rc::clone(&seen);
        sender
            .value_changed
            .connect_local(&receiver, move |v| s.borrow_mut().push(v));

        sender.value_changed.emit(1);
        emit(Some(&sender), |s| &s.value_changed, 2);
        emit(None::<&Sender>, |s| &s.value_changed, 3);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_fan_out_in_connection_order() {
        let _reactor = Reactor::new().unwrap();
        let signal: Signal<String> = Signal::new();
        let receiver = Object::new(None).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let s = Rc::clone(&seen);
            signal.connect_local(&receiver, move |v: String| {
                s.borrow_mut().push(format!("{tag}:{v}"))
            });
        }
        signal.emit("x".to_string());
        assert_eq!(*seen.borrow(), vec!["a:x", "b:x", "c:x"]);
    }

    #[test]
    fn test_disconnect_and_dead_receiver() {
        let _reactor = Reactor::new().unwrap();
        let signal: Signal<u32> = Signal::new();
        let a = Object::new(None).unwrap();
        let b = Object::new(None).unwrap();
        let hits = Rc::new(RefCell::new(Vec::new()));

        let h = Rc::clone(&hits);
        let conn = signal.connect_local(&a, move |v| h.borrow_mut().push(("a", v)));
        let h = Rc::clone(&hits);
        signal.connect_local(&b, move |v| h.borrow_mut().push(("b", v)));
        assert_eq!(signal.receiver_count(), 2);

        signal.emit(1);
        conn.disconnect();
        signal.emit(2);
        drop(b);
        signal.emit(3);

        assert_eq!(*hits.borrow(), vec![("a", 1), ("b", 1), ("b", 2)]);
        assert_eq!(signal.receiver_count(), 0);
    }

    #[test]
    fn test_cross_thread_emit_runs_on_receiver_thread() {
        let reactor = Reactor::new().unwrap();
        let receiver = Object::new(None).unwrap();
        let receiver_thread = receiver.thread_id();
        let signal = Arc::new(Signal::<(u32, String)>::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        let r = reactor.handle();
        signal.connect(&receiver, move |(n, text)| {
            assert_eq!(thread::current().id(), receiver_thread);
            let mut s = s.lock().unwrap();
            s.push((n, text));
            if s.len() == 3 {
                r.quit();
            }
        });

        let sig = Arc::clone(&signal);
        let t = thread::spawn(move || {
            for n in 0..3 {
                sig.emit((n, format!("msg{n}")));
            }
        });

        reactor.exec();
        t.join().unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], (2, "msg2".to_string()));
    }

    #[test]
    fn test_connect_from_other_thread() {
        let reactor = Reactor::new().unwrap();
        let receiver = Object::new(None).unwrap();
        let owner = receiver.thread_id();
        let signal: Signal<u32> = Signal::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let h = Arc::clone(&hits);
        thread::scope(|s| {
            s.spawn(|| {
                signal.connect(&receiver, move |v| {
                    assert_eq!(thread::current().id(), owner);
                    h.lock().unwrap().push(v);
                });
                signal.emit(7);
            });
        });

        assert!(hits.lock().unwrap().is_empty());
        reactor.run_once(Duration::ZERO).unwrap();
        signal.emit(8);
        assert_eq!(*hits.lock().unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_queued_delivery_skipped_after_receiver_drop() {
        let reactor = Reactor::new().unwrap();
        let receiver = Object::new(None).unwrap();
        let signal = Arc::new(Signal::<u32>::new());
        let hits = Arc::new(Mutex::new(0u32));

        let h = Arc::clone(&hits);
        signal.connect(&receiver, move |_| *h.lock().unwrap() += 1);

        let sig = Arc::clone(&signal);
        thread::spawn(move || sig.emit(1)).join().unwrap();
        drop(receiver);

        reactor.run_once(Duration::ZERO).unwrap();
        assert_eq!(*hits.lock().unwrap(), 0);
    }
}
