//! Thread-affine objects
//!
//! An `Object` is bound at construction to one reactor and therefore one
//! thread. Everything that must happen "on the object's thread" is routed
//! through it: queued tasks, delayed tasks, deferred destruction and signal
//! delivery.
//!
//! - `Object`: the owner. Dropping it marks the object dead.
//! - `ObjectHandle`: cloneable, `Send + Sync` view used by other threads.
//! - `Affine<T>`: box for a value that may only be touched on its owner
//!   thread, even though the box itself can travel.

use crate::error::{RuntimeError, RuntimeResult};
use crate::reactor::{LocalReactor, Reactor, ReactorHandle};
use spindle_core::OwnerThread;
use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

// ============================================================================
// ObjectHandle
// ============================================================================

/// Sendable view of an `Object`.
#[derive(Clone)]
pub struct ObjectHandle {
    reactor: ReactorHandle,
    owner: OwnerThread,
    alive: Arc<AtomicBool>,
}

impl ObjectHandle {
    pub fn thread_id(&self) -> ThreadId {
        self.owner.id()
    }

    pub fn owner(&self) -> OwnerThread {
        self.owner
    }

    pub fn reactor(&self) -> &ReactorHandle {
        &self.reactor
    }

    /// `false` once the `Object` is dropped or its reactor is destroyed.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.reactor.is_alive()
    }

    /// Run `f` on the owner thread, FIFO with every other queued task.
    pub fn queue_task<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.reactor.post(f)
    }

    /// Run `f` on the owner thread once `delay` has elapsed.
    ///
    /// Dropped silently if the reactor is gone by then.
    pub fn run_after<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let at = Instant::now() + delay;
        if self.owner.is_current() {
            if let Some(local) = LocalReactor::current() {
                local.add_deadline(at, f);
                return;
            }
        }
        self.reactor.post(move || {
            if let Some(local) = LocalReactor::current() {
                local.add_deadline(at, f);
            }
        });
    }

    /// Drop `value` on the owner thread after all previously queued tasks.
    pub fn delete_later<T>(&self, value: T)
    where
        T: Send + 'static,
    {
        self.reactor.post(move || drop(value));
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("thread", &self.owner.id())
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ============================================================================
// Object
// ============================================================================

/// An entity bound to one reactor thread.
pub struct Object {
    handle: ObjectHandle,
    parent: Option<ObjectHandle>,
}

impl Object {
    /// Bind to `parent`'s reactor, or to the calling thread's reactor.
    ///
    /// Must be called on the thread of the resolved reactor.
    pub fn new(parent: Option<&Object>) -> RuntimeResult<Self> {
        let reactor = match parent {
            Some(p) => p.handle.reactor.clone(),
            None => Reactor::current().ok_or(RuntimeError::NoReactor)?,
        };
        if !reactor.is_alive() {
            return Err(RuntimeError::ReactorGone);
        }
        let owner = OwnerThread::from_id(reactor.thread_id());
        owner.check("Object::new");

        Ok(Self {
            handle: ObjectHandle {
                reactor,
                owner,
                alive: Arc::new(AtomicBool::new(true)),
            },
            parent: parent.map(|p| p.handle.clone()),
        })
    }

    pub fn handle(&self) -> &ObjectHandle {
        &self.handle
    }

    pub fn parent(&self) -> Option<&ObjectHandle> {
        self.parent.as_ref()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.handle.thread_id()
    }

    pub fn owner(&self) -> OwnerThread {
        self.handle.owner
    }

    pub fn reactor(&self) -> &ReactorHandle {
        &self.handle.reactor
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    pub fn queue_task<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.queue_task(f)
    }

    pub fn run_after<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.run_after(delay, f)
    }

    pub fn delete_later<T>(&self, value: T)
    where
        T: Send + 'static,
    {
        self.handle.delete_later(value)
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        self.handle.alive.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("thread", &self.thread_id())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Types built on top of an `Object`.
pub trait ThreadAffine {
    fn object(&self) -> &Object;

    fn thread_id(&self) -> ThreadId {
        self.object().thread_id()
    }
}

impl ThreadAffine for Object {
    fn object(&self) -> &Object {
        self
    }
}

// ============================================================================
// Affine<T>
// ============================================================================

/// A value pinned to its owner thread.
///
/// The box may be moved or shared across threads, but the value inside is
/// only reachable through `get`, which panics off the owner thread. Dropping
/// the box elsewhere sends the value home to be dropped; if the owner
/// reactor is gone the value is leaked.
pub struct Affine<T: 'static> {
    value: ManuallyDrop<T>,
    owner: OwnerThread,
    reactor: ReactorHandle,
}

// SAFETY: `value` is only accessed (including dropped) on `owner`'s thread.
unsafe impl<T: 'static> Send for Affine<T> {}
unsafe impl<T: 'static> Sync for Affine<T> {}

impl<T: 'static> Affine<T> {
    /// Pin `value` to the calling thread's reactor.
    pub fn new(value: T) -> RuntimeResult<Self> {
        let reactor = Reactor::current().ok_or(RuntimeError::NoReactor)?;
        Ok(Self::pinned(value, reactor))
    }

    /// Pin `value` to `object`'s thread. Must be called on that thread.
    pub fn with_owner(object: &ObjectHandle, value: T) -> Self {
        object.owner.verify("Affine::with_owner");
        Self::pinned(value, object.reactor.clone())
    }

    /// Pin without checking the calling thread. Callers guarantee `value`
    /// is safe to move to the owner thread.
    pub(crate) fn pinned(value: T, reactor: ReactorHandle) -> Self {
        Self {
            value: ManuallyDrop::new(value),
            owner: OwnerThread::from_id(reactor.thread_id()),
            reactor,
        }
    }

    /// Borrow the value. Panics unless called on the owner thread.
    #[track_caller]
    pub fn get(&self) -> &T {
        self.owner.verify("Affine value");
        &self.value
    }

    /// The value, if the calling thread is the owner.
    pub fn try_get(&self) -> Option<&T> {
        if self.owner.is_current() {
            Some(&self.value)
        } else {
            None
        }
    }

    pub fn owner(&self) -> OwnerThread {
        self.owner
    }

    /// Drop the value on the owner thread after all previously queued tasks,
    /// even when called on the owner thread itself.
    pub fn delete_later(self) {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never used again and its Drop never runs, so the
        // value and the handle are each moved out exactly once.
        let (value, reactor) = unsafe {
            (
                ManuallyDrop::take(&mut this.value),
                std::ptr::read(&this.reactor),
            )
        };
        Stranded::new(value, this.owner).send_home(&reactor);
    }
}

impl<T: Send + 'static> Affine<T> {
    /// Pin a `Send` value to `object`'s thread from any thread.
    pub fn from_send(object: &ObjectHandle, value: T) -> Self {
        Self::pinned(value, object.reactor.clone())
    }
}

impl<T: 'static> Drop for Affine<T> {
    fn drop(&mut self) {
        if self.owner.is_current() {
            // SAFETY: dropped exactly once, on the owner thread.
            unsafe { ManuallyDrop::drop(&mut self.value) };
            return;
        }
        // SAFETY: `self.value` is not touched again after this.
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        Stranded::new(value, self.owner).send_home(&self.reactor);
    }
}

impl<T: 'static> fmt::Debug for Affine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Affine")
            .field("owner", &self.owner.id())
            .finish_non_exhaustive()
    }
}

/// A value in transit back to its owner thread.
struct Stranded<T: 'static> {
    value: ManuallyDrop<T>,
    owner: OwnerThread,
}

// SAFETY: the value is only dropped on `owner`'s thread; elsewhere it leaks.
unsafe impl<T: 'static> Send for Stranded<T> {}

impl<T: 'static> Stranded<T> {
    fn new(value: T, owner: OwnerThread) -> Self {
        Self {
            value: ManuallyDrop::new(value),
            owner,
        }
    }

    fn send_home(self, reactor: &ReactorHandle) {
        // A failed post drops the closure here; Drop below then leaks.
        reactor.post(move || drop(self));
    }
}

impl<T: 'static> Drop for Stranded<T> {
    fn drop(&mut self) {
        if self.owner.is_current() {
            // SAFETY: dropped exactly once, on the owner thread.
            unsafe { ManuallyDrop::drop(&mut self.value) };
        } else {
            log::warn!(
                "owner thread {:?} is gone; leaking a {}",
                self.owner.id(),
                std::any::type_name::<T>()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Mutex;
    use std::thread;

    #[test]
    fn test_object_needs_reactor() {
        assert!(matches!(Object::new(None), Err(RuntimeError::NoReactor)));
        let _reactor = Reactor::new().unwrap();
        let parent = Object::new(None).unwrap();
        let child = Object::new(Some(&parent)).unwrap();
        assert_eq!(child.thread_id(), thread::current().id());
        assert!(child.parent().is_some());
    }

    #[test]
    fn test_handle_sees_drop() {
        let _reactor = Reactor::new().unwrap();
        let object = Object::new(None).unwrap();
        let handle = object.handle().clone();
        assert!(handle.is_alive());
        drop(object);
        assert!(!handle.is_alive());
    }

    #[test]
    fn test_queue_task_from_other_thread() {
        let reactor = Reactor::new().unwrap();
        let object = Object::new(None).unwrap();
        let handle = object.handle().clone();
        let owner_thread = object.thread_id();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        let t = thread::spawn(move || {
            for i in 0..10 {
                let s = Arc::clone(&s);
                handle.queue_task(move || {
                    assert_eq!(thread::current().id(), owner_thread);
                    s.lock().unwrap().push(i);
                });
            }
            let r = handle.reactor().clone();
            handle.queue_task(move || r.quit());
        });

        reactor.exec();
        t.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_run_after() {
        let reactor = Reactor::new().unwrap();
        let object = Object::new(None).unwrap();
        let start = Instant::now();
        let r = reactor.handle();
        object.run_after(Duration::from_millis(30), move || r.quit());
        reactor.exec();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_delete_later_runs_after_queued_tasks() {
        struct Probe(Arc<Mutex<Vec<&'static str>>>);
        impl Drop for Probe {
            fn drop(&mut self) {
                self.0.lock().unwrap().push("dropped");
            }
        }

        let reactor = Reactor::new().unwrap();
        let object = Object::new(None).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = Arc::clone(&log);
        object.queue_task(move || l.lock().unwrap().push("task"));
        object.delete_later(Probe(Arc::clone(&log)));
        let r = reactor.handle();
        object.queue_task(move || r.quit());

        assert!(log.lock().unwrap().is_empty());
        reactor.exec();
        assert_eq!(*log.lock().unwrap(), vec!["task", "dropped"]);
    }

    #[test]
    fn test_affine_drop_is_sent_home() {
        let reactor = Reactor::new().unwrap();
        let owner = thread::current().id();
        let dropped_on = Rc::new(Cell::new(None));

        struct Tracker(Rc<Cell<Option<ThreadId>>>);
        impl Drop for Tracker {
            fn drop(&mut self) {
                self.0.set(Some(thread::current().id()));
            }
        }

        let boxed = Affine::new(Tracker(Rc::clone(&dropped_on))).unwrap();
        let r = reactor.handle();
        thread::spawn(move || {
            assert!(boxed.try_get().is_none());
            drop(boxed);
            r.post(move || {
                Reactor::current().unwrap().quit();
            });
        })
        .join()
        .unwrap();

        assert!(dropped_on.get().is_none());
        reactor.exec();
        assert_eq!(dropped_on.get(), Some(owner));
    }

    #[test]
    fn test_affine_get_off_thread_panics() {
        let _reactor = Reactor::new().unwrap();
        let boxed = Arc::new(Affine::new(5u32).unwrap());
        assert_eq!(*boxed.get(), 5);

        let b = Arc::clone(&boxed);
        let result = thread::spawn(move || {
            let _ = *b.get();
        })
        .join();
        assert!(result.is_err());
    }
}
