//! Deadline queue for reactor-local delayed callbacks
//!
//! BinaryHeap ordered by deadline with lazy cancellation: cancelling only
//! removes the callback, and the orphaned heap entry is skipped when it
//! reaches the top.
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel: O(1)
//! - Pop expired: O(log n) per entry
//! - Next deadline: O(1) amortized

use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

/// Handle for cancelling a scheduled deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeadlineId(u64);

impl DeadlineId {
    /// Raw value (for logging)
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

pub(crate) type DeadlineFn = Box<dyn FnOnce()>;

/// Wrapper for heap ordering (min-heap by deadline)
struct HeapEntry {
    deadline: Instant,
    id: DeadlineId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        // Tie-break by id so equal deadlines fire in insertion order.
        match other.deadline.cmp(&self.deadline) {
            std::cmp::Ordering::Equal => other.id.0.cmp(&self.id.0),
            ord => ord,
        }
    }
}

#[derive(Default)]
pub(crate) struct DeadlineQueue {
    heap: BinaryHeap<HeapEntry>,
    callbacks: HashMap<DeadlineId, DeadlineFn>,
    next_id: u64,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, deadline: Instant, f: DeadlineFn) -> DeadlineId {
        self.next_id += 1;
        let id = DeadlineId(self.next_id);
        self.heap.push(HeapEntry { deadline, id });
        self.callbacks.insert(id, f);
        id
    }

    /// Remove a pending deadline and hand back its callback so the caller
    /// can drop it outside any borrow.
    pub fn cancel(&mut self, id: DeadlineId) -> Option<DeadlineFn> {
        let removed = self.callbacks.remove(&id);
        if self.callbacks.is_empty() {
            self.heap.clear();
        }
        removed
    }

    /// Pop one expired callback, if any.
    ///
    /// Callbacks are handed out one at a time so the caller can release its
    /// borrow before running them.
    pub fn pop_expired(&mut self, now: Instant) -> Option<DeadlineFn> {
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                return None;
            }
            let id = top.id;
            self.heap.pop();
            if let Some(f) = self.callbacks.remove(&id) {
                return Some(f);
            }
            // cancelled
        }
        None
    }

    /// Earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(top) = self.heap.peek() {
            if self.callbacks.contains_key(&top.id) {
                return Some(top.deadline);
            }
            self.heap.pop();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn test_expiry_order() {
        let mut q = DeadlineQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let now = Instant::now();

        for (i, ms) in [30u64, 10, 20, 10].iter().enumerate() {
            let log = Rc::clone(&log);
            q.insert(now + Duration::from_millis(*ms), Box::new(move || log.borrow_mut().push(i)));
        }

        assert_eq!(q.next_deadline(), Some(now + Duration::from_millis(10)));
        while let Some(f) = q.pop_expired(now + Duration::from_millis(100)) {
            f();
        }
        assert_eq!(*log.borrow(), vec![1, 3, 2, 0]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_not_expired() {
        let mut q = DeadlineQueue::new();
        let now = Instant::now();
        q.insert(now + Duration::from_secs(1), Box::new(|| {}));
        assert!(q.pop_expired(now).is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_cancel() {
        let mut q = DeadlineQueue::new();
        let now = Instant::now();
        let a = q.insert(now, Box::new(|| panic!("cancelled deadline ran")));
        let _b = q.insert(now + Duration::from_millis(5), Box::new(|| {}));

        assert!(q.cancel(a).is_some());
        assert!(q.cancel(a).is_none());
        assert_eq!(q.next_deadline(), Some(now + Duration::from_millis(5)));
        assert!(q.pop_expired(now).is_none());
    }
}
