//! Non-blocking countdown on a reactor thread

use crate::error::RuntimeResult;
use crate::object::{Affine, Object, ObjectHandle, ThreadAffine};
use crate::signal::Signal;
use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

struct Inner {
    remaining: Cell<u32>,
    finished: Signal<()>,
}

impl Inner {
    fn done(&self) {
        let n = self.remaining.get();
        if n == 0 {
            log::warn!("AsyncWaitGroup::done called with nothing outstanding");
            return;
        }
        self.remaining.set(n - 1);
        if n == 1 {
            self.finished.emit(());
        }
    }
}

/// Emits `finished` on its owning thread when the last participant calls
/// `done`. Unlike `spindle_core::WaitGroup`, nothing blocks.
pub struct AsyncWaitGroup {
    object: Object,
    inner: Rc<Inner>,
}

impl AsyncWaitGroup {
    pub fn new() -> RuntimeResult<Self> {
        Self::build(None)
    }

    pub fn with_parent(parent: &Object) -> RuntimeResult<Self> {
        Self::build(Some(parent))
    }

    fn build(parent: Option<&Object>) -> RuntimeResult<Self> {
        Ok(Self {
            object: Object::new(parent)?,
            inner: Rc::new(Inner {
                remaining: Cell::new(0),
                finished: Signal::new(),
            }),
        })
    }

    /// Set the number of outstanding participants.
    pub fn add(&self, total: u32) {
        self.inner.remaining.set(total);
    }

    pub fn clear(&self) {
        self.inner.remaining.set(0);
    }

    /// One participant finished. The last one emits `finished`.
    pub fn done(&self) {
        self.inner.done();
    }

    pub fn remaining(&self) -> u32 {
        self.inner.remaining.get()
    }

    pub fn finished(&self) -> &Signal<()> {
        &self.inner.finished
    }

    /// A `Send` handle for participants on other threads.
    pub fn notifier(&self) -> WaitGroupNotifier {
        WaitGroupNotifier {
            owner: self.object.handle().clone(),
            inner: Arc::new(Affine::with_owner(
                self.object.handle(),
                Rc::downgrade(&self.inner),
            )),
        }
    }
}

impl ThreadAffine for AsyncWaitGroup {
    fn object(&self) -> &Object {
        &self.object
    }
}

impl std::fmt::Debug for AsyncWaitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncWaitGroup")
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Cross-thread `done` for an `AsyncWaitGroup`.
#[derive(Clone)]
pub struct WaitGroupNotifier {
    owner: ObjectHandle,
    inner: Arc<Affine<Weak<Inner>>>,
}

impl WaitGroupNotifier {
    /// Count one participant down on the group's thread. Dropped if the
    /// group is gone.
    pub fn done(&self) {
        let inner = Arc::clone(&self.inner);
        self.owner.queue_task(move || {
            if let Some(group) = inner.get().upgrade() {
                group.done();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_finished_once_at_zero() {
        let _reactor = Reactor::new().unwrap();
        let group = AsyncWaitGroup::new().unwrap();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        group
            .finished()
            .connect_local(&group, move |()| h.set(h.get() + 1));

        group.add(3);
        group.done();
        group.done();
        assert_eq!(hits.get(), 0);
        assert_eq!(group.remaining(), 1);
        group.done();
        assert_eq!(hits.get(), 1);

        // extra done is ignored
        group.done();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_clear_and_reuse() {
        let _reactor = Reactor::new().unwrap();
        let group = AsyncWaitGroup::new().unwrap();
        group.add(5);
        group.clear();
        assert_eq!(group.remaining(), 0);
        group.add(1);
        group.done();
        assert_eq!(group.remaining(), 0);
    }

    #[test]
    fn test_notifier_from_workers() {
        let reactor = Reactor::new().unwrap();
        let group = AsyncWaitGroup::new().unwrap();
        let handle = reactor.handle();
        group.finished().connect(&group, move |()| handle.quit());

        group.add(4);
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let n = group.notifier();
                thread::spawn(move || n.done())
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let guard = reactor.handle();
        reactor.local().add_deadline(
            std::time::Instant::now() + Duration::from_secs(5),
            move || guard.quit(),
        );
        reactor.exec();
        assert_eq!(group.remaining(), 0);
    }
}
