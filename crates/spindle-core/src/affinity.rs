//! Owner-thread token
//!
//! Captured once at construction time and carried by every thread-affine
//! entity. All "must run on the owning thread" checks go through it.

use std::thread::{self, ThreadId};

/// The thread that owns an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerThread {
    id: ThreadId,
}

impl OwnerThread {
    /// Token for the calling thread.
    #[inline]
    pub fn current() -> Self {
        Self {
            id: thread::current().id(),
        }
    }

    /// Token for an explicit thread.
    #[inline]
    pub fn from_id(id: ThreadId) -> Self {
        Self { id }
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Whether the calling thread is the owner.
    #[inline]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }

    /// Panic unless called on the owner thread.
    ///
    /// Used where touching the entity from another thread would be unsound.
    #[inline]
    #[track_caller]
    pub fn verify(&self, what: &str) {
        if !self.is_current() {
            affinity_violation(what, self.id);
        }
    }

    /// Debug-build variant of `verify`. Compiles to nothing in release.
    #[inline]
    #[track_caller]
    pub fn check(&self, what: &str) {
        if cfg!(debug_assertions) {
            self.verify(what);
        }
    }
}

#[cold]
#[track_caller]
fn affinity_violation(what: &str, owner: ThreadId) -> ! {
    panic!(
        "{} used from {:?}, but it belongs to {:?}",
        what,
        thread::current().id(),
        owner
    )
}
