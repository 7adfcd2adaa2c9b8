//! Thread-local reactor slot
//!
//! At most one reactor per OS thread. The slot holds a weak reference so a
//! dropped reactor is never resurrected by a lookup.

use super::ReactorCore;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

thread_local! {
    static CURRENT: RefCell<Option<Weak<ReactorCore>>> = const { RefCell::new(None) };
}

/// Install `core` as this thread's reactor.
///
/// Returns `false` if a live reactor already occupies the slot.
pub(crate) fn install(core: &Rc<ReactorCore>) -> bool {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.as_ref().is_some_and(|w| w.strong_count() > 0) {
            return false;
        }
        *slot = Some(Rc::downgrade(core));
        true
    })
}

/// Clear the slot if it still refers to `core`.
pub(crate) fn uninstall(core: &Rc<ReactorCore>) {
    // try_with: may run during thread-local destruction
    let _ = CURRENT.try_with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.as_ref().is_some_and(|w| std::ptr::eq(w.as_ptr(), Rc::as_ptr(core))) {
            *slot = None;
        }
    });
}

/// This thread's live reactor, if any.
pub(crate) fn current() -> Option<Rc<ReactorCore>> {
    CURRENT
        .try_with(|slot| slot.borrow().as_ref().and_then(Weak::upgrade))
        .ok()
        .flatten()
}
