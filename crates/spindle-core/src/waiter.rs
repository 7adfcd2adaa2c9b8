//! Blocking cross-thread notification helpers
//!
//! - `Waiter<T>`: one value, delivered once, waited on by one thread.
//! - `WaitGroup`: countdown that blocks until every participant is done.
//!
//! Both use `Mutex` + `Condvar`, same as the portable parking fallback.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One-shot value hand-off between threads.
pub struct Waiter<T> {
    slot: Mutex<Option<T>>,
    cond: Condvar,
}

impl<T> Waiter<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Deliver the value. A second notify replaces an unconsumed value.
    pub fn notify(&self, value: T) {
        *lock(&self.slot) = Some(value);
        self.cond.notify_all();
    }

    /// Block until a value is delivered, then take it.
    pub fn wait(&self) -> T {
        let mut guard = lock(&self.slot);
        loop {
            if let Some(v) = guard.take() {
                return v;
            }
            guard = self
                .cond
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like `wait`, but give up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut guard = lock(&self.slot);
        loop {
            if let Some(v) = guard.take() {
                return Some(v);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            guard = self
                .cond
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl<T> Default for Waiter<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocking countdown latch.
pub struct WaitGroup {
    remaining: Mutex<u32>,
    cond: Condvar,
}

impl WaitGroup {
    pub fn new(count: u32) -> Self {
        Self {
            remaining: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    /// Count one participant as finished. Extra calls saturate at zero.
    pub fn done(&self) {
        let mut remaining = lock(&self.remaining);
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.cond.notify_all();
        }
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let mut remaining = lock(&self.remaining);
        while *remaining > 0 {
            remaining = self
                .cond
                .wait(remaining)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the count reaches zero or `timeout` elapses.
    /// Returns `true` if the count reached zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let remaining = lock(&self.remaining);
        let (guard, _) = self
            .cond
            .wait_timeout_while(remaining, timeout, |n| *n > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == 0
    }

    pub fn remaining(&self) -> u32 {
        *lock(&self.remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_waiter_cross_thread() {
        let waiter = Arc::new(Waiter::new());
        let w = Arc::clone(&waiter);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            w.notify(7u32);
        });
        assert_eq!(waiter.wait(), 7);
        handle.join().unwrap();
    }

    #[test]
    fn test_waiter_timeout() {
        let waiter: Waiter<()> = Waiter::new();
        let start = Instant::now();
        assert!(waiter.wait_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_wait_group() {
        let group = Arc::new(WaitGroup::new(3));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let g = Arc::clone(&group);
                thread::spawn(move || g.done())
            })
            .collect();
        group.wait();
        assert_eq!(group.remaining(), 0);
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_wait_group_timeout() {
        let group = WaitGroup::new(1);
        assert!(!group.wait_timeout(Duration::from_millis(10)));
        group.done();
        group.done();
        assert!(group.wait_timeout(Duration::from_millis(10)));
    }
}
