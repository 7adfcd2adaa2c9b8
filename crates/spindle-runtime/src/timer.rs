//! Reactor-bound timer
//!
//! Repeating by default with a 3 s interval (`SPINDLE_TIMER_INTERVAL_MS`).
//! Every operation runs on the owning thread; the type is not `Send`.
//!
//! Each arm carries a generation number. `stop`, `start` and `reset` bump
//! it, so a firing that was already due when the timer was stopped or
//! restarted is discarded, and a `timeout` handler that stops or restarts
//! the timer is never overridden by the automatic re-arm.

use crate::error::RuntimeResult;
use crate::object::{Object, ThreadAffine};
use crate::reactor::{DeadlineId, LocalReactor};
use crate::signal::Signal;
use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

struct TimerInner {
    reactor: LocalReactor,
    interval: Cell<Duration>,
    /// Period of the current run (`interval`, or the value given to `reset`).
    period: Cell<Duration>,
    single_shot: Cell<bool>,
    running: Cell<bool>,
    generation: Cell<u64>,
    pending: Cell<Option<DeadlineId>>,
    timeout: Signal<()>,
}

impl TimerInner {
    fn cancel_pending(&self) {
        if let Some(id) = self.pending.take() {
            self.reactor.cancel_deadline(id);
        }
    }

    fn arm(self: &Rc<Self>, delay: Duration) {
        let weak: Weak<Self> = Rc::downgrade(self);
        let generation = self.generation.get();
        let id = self
            .reactor
            .add_deadline(Instant::now() + delay, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.fire(generation);
                }
            });
        self.pending.set(Some(id));
    }

    fn fire(self: &Rc<Self>, generation: u64) {
        if !self.running.get() || self.generation.get() != generation {
            return;
        }
        self.pending.set(None);
        if self.single_shot.get() {
            self.running.set(false);
        }

        self.timeout.emit(());

        if self.running.get() && self.generation.get() == generation && !self.single_shot.get() {
            self.arm(self.period.get());
        }
    }
}

/// Repeating or one-shot timer emitting `timeout` on its owning thread.
pub struct Timer {
    object: Object,
    inner: Rc<TimerInner>,
}

impl Timer {
    /// Create a timer on the calling thread's reactor.
    pub fn new() -> RuntimeResult<Self> {
        Self::build(None)
    }

    /// Create a timer bound to `parent`'s reactor.
    pub fn with_parent(parent: &Object) -> RuntimeResult<Self> {
        Self::build(Some(parent))
    }

    fn build(parent: Option<&Object>) -> RuntimeResult<Self> {
        let object = Object::new(parent)?;
        let reactor = LocalReactor::require_current()?;
        let interval = reactor.config().timer_interval;
        Ok(Self {
            object,
            inner: Rc::new(TimerInner {
                reactor,
                interval: Cell::new(interval),
                period: Cell::new(interval),
                single_shot: Cell::new(false),
                running: Cell::new(false),
                generation: Cell::new(0),
                pending: Cell::new(None),
                timeout: Signal::new(),
            }),
        })
    }

    /// Arm with the configured interval.
    pub fn start(&self) {
        self.reset(self.inner.interval.get());
    }

    /// Arm with `period`, replacing any pending expiry. Repeats use `period`.
    pub fn reset(&self, period: Duration) {
        let inner = &self.inner;
        inner.cancel_pending();
        inner.generation.set(inner.generation.get() + 1);
        inner.running.set(true);
        inner.period.set(period);
        inner.arm(period);
    }

    /// Arm with a period in milliseconds.
    pub fn reset_ms(&self, ms: u64) {
        self.reset(Duration::from_millis(ms));
    }

    /// Cancel the pending expiry. Safe when not running.
    pub fn stop(&self) {
        let inner = &self.inner;
        inner.running.set(false);
        inner.generation.set(inner.generation.get() + 1);
        inner.cancel_pending();
    }

    /// Takes effect on the next `start`.
    pub fn set_interval(&self, interval: Duration) {
        self.inner.interval.set(interval);
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval.get()
    }

    pub fn set_single_shot(&self, single_shot: bool) {
        self.inner.single_shot.set(single_shot);
    }

    pub fn is_single_shot(&self) -> bool {
        self.inner.single_shot.get()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Emitted on every expiry.
    pub fn timeout(&self) -> &Signal<()> {
        &self.inner.timeout
    }
}

impl ThreadAffine for Timer {
    fn object(&self) -> &Object {
        &self.object
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
