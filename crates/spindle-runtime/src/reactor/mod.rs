//! Per-thread reactor event loop
//!
//! A `Reactor` owns one I/O demultiplexer, a cross-thread task queue, a
//! same-thread task queue, and a deadline queue. Exactly one reactor may
//! exist per OS thread.
//!
//! # Handles
//!
//! - `Reactor`: the owner. Not `Send`; dropping it tears the loop down.
//! - `ReactorHandle`: `Send + Sync` view for posting tasks and stopping the
//!   loop from any thread.
//! - `LocalReactor`: same-thread view for deadlines, fd readiness and
//!   non-`Send` continuations.
//!
//! # Loop iteration
//!
//! 1. Drain up to `task_batch` cross-thread tasks (FIFO).
//! 2. Run the same-thread tasks queued before this iteration.
//! 3. Run expired deadlines, one at a time.
//! 4. Poll for readiness: no wait if work is pending, otherwise until the
//!    next deadline (or forever), then dispatch readiness handlers.

pub mod deadline;
pub mod poller;
mod tls;

pub use deadline::DeadlineId;
pub use poller::{Interest, RawFd, Readiness, Token};

use crate::config::ReactorConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crossbeam_queue::SegQueue;
use deadline::DeadlineQueue;
use poller::{Event, PlatformPoller, PlatformWaker, Poller, Waker};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Cross-thread task.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

type LocalTask = Box<dyn FnOnce() + 'static>;

/// Readiness callback for a registered fd.
pub type IoHandler = Rc<RefCell<dyn FnMut(Readiness)>>;

// ============================================================================
// Shared (cross-thread) state
// ============================================================================

struct Shared {
    tasks: SegQueue<Task>,
    waker: Arc<PlatformWaker>,
    thread: ThreadId,
    stop: AtomicBool,
    exit_code: AtomicI32,
    alive: AtomicBool,
}

/// Thread-safe handle to a reactor.
///
/// Cheap to clone. Outlives the reactor safely: once the reactor is gone,
/// posts are dropped and `is_alive` reports `false`.
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Arc<Shared>,
}

impl ReactorHandle {
    /// Queue `f` to run on the reactor thread.
    ///
    /// Tasks run in post order. Returns `false` (and drops `f`) if the
    /// reactor has been destroyed.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_boxed(Box::new(f))
    }

    pub fn post_boxed(&self, task: Task) -> bool {
        if !self.is_alive() {
            log::warn!(
                "task posted to destroyed reactor on {:?} dropped",
                self.shared.thread
            );
            return false;
        }
        self.shared.tasks.push(task);
        self.shared.waker.wake();
        log::trace!("task posted to reactor on {:?}", self.shared.thread);
        true
    }

    /// Stop `exec` with exit code 0.
    pub fn quit(&self) {
        self.exit(0);
    }

    /// Stop `exec`, which will return `code`.
    pub fn exit(&self, code: i32) {
        self.shared.exit_code.store(code, Ordering::Release);
        self.shared.stop.store(true, Ordering::Release);
        self.shared.waker.wake();
    }

    /// The thread the reactor runs on.
    pub fn thread_id(&self) -> ThreadId {
        self.shared.thread
    }

    /// Whether the calling thread is the reactor thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.shared.thread
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same reactor.
    pub fn ptr_eq(&self, other: &ReactorHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("thread", &self.shared.thread)
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ============================================================================
// Thread-local core
// ============================================================================

struct IoSource {
    fd: RawFd,
    handler: IoHandler,
}

pub(crate) struct ReactorCore {
    shared: Arc<Shared>,
    config: ReactorConfig,
    poller: PlatformPoller,
    deadlines: RefCell<DeadlineQueue>,
    local_tasks: RefCell<VecDeque<LocalTask>>,
    io: RefCell<HashMap<Token, IoSource>>,
    next_token: Cell<usize>,
    events: RefCell<Vec<Event>>,
}

impl ReactorCore {
    fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn has_pending_tasks(&self) -> bool {
        !self.shared.tasks.is_empty() || !self.local_tasks.borrow().is_empty()
    }

    /// One loop iteration. `max_wait` caps the poll wait.
    fn turn(&self, max_wait: Option<Duration>) -> io::Result<()> {
        // 1. cross-thread tasks
        for _ in 0..self.config.task_batch {
            match self.shared.tasks.pop() {
                Some(task) => task(),
                None => break,
            }
        }

        // 2. same-thread tasks queued before this point
        let queued = self.local_tasks.borrow().len();
        for _ in 0..queued {
            let task = self.local_tasks.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }

        // 3. deadlines
        let now = Instant::now();
        loop {
            let expired = self.deadlines.borrow_mut().pop_expired(now);
            match expired {
                Some(f) => f(),
                None => break,
            }
        }

        if self.shared.stop.load(Ordering::Acquire) {
            return Ok(());
        }

        // 4. readiness
        let timeout = if self.has_pending_tasks() {
            Some(Duration::ZERO)
        } else {
            let until_deadline = self
                .deadlines
                .borrow_mut()
                .next_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()));
            match (until_deadline, max_wait) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        };

        let mut events = self.events.take();
        events.clear();
        let polled = self.poller.poll(&mut events, timeout);
        if polled.is_ok() {
            for ev in events.iter() {
                self.dispatch_io(ev);
            }
        }
        events.clear();
        *self.events.borrow_mut() = events;
        polled
    }

    fn dispatch_io(&self, ev: &Event) {
        let handler = self
            .io
            .borrow()
            .get(&ev.token)
            .map(|src| Rc::clone(&src.handler));
        let Some(handler) = handler else {
            return;
        };
        // Level-triggered: a handler already on the stack sees this again next turn.
        let Ok(mut h) = handler.try_borrow_mut() else {
            return;
        };
        (&mut *h)(ev.readiness);
    }
}

// ============================================================================
// Reactor (owner)
// ============================================================================

/// Per-thread event loop.
///
/// # Example
///
/// ```rust,ignore
/// let reactor = Reactor::new()?;
/// let handle = reactor.handle();
/// std::thread::spawn(move || handle.post(|| println!("hello from a worker")));
/// reactor.handle().post(|| Reactor::current().unwrap().quit());
/// assert_eq!(reactor.exec(), 0);
/// ```
pub struct Reactor {
    core: Rc<ReactorCore>,
}

impl Reactor {
    /// Create a reactor for the calling thread with environment config.
    pub fn new() -> RuntimeResult<Self> {
        Self::with_config(ReactorConfig::from_env())
    }

    /// Create a reactor for the calling thread.
    ///
    /// Fails with `ReactorExists` if this thread already has one.
    pub fn with_config(config: ReactorConfig) -> RuntimeResult<Self> {
        config.validate()?;
        if tls::current().is_some() {
            return Err(RuntimeError::ReactorExists);
        }

        let waker = Arc::new(PlatformWaker::new()?);
        let poller = PlatformPoller::new(Arc::clone(&waker), config.max_events)?;
        let shared = Arc::new(Shared {
            tasks: SegQueue::new(),
            waker,
            thread: thread::current().id(),
            stop: AtomicBool::new(false),
            exit_code: AtomicI32::new(0),
            alive: AtomicBool::new(true),
        });
        let core = Rc::new(ReactorCore {
            shared,
            events: RefCell::new(Vec::with_capacity(config.max_events)),
            config,
            poller,
            deadlines: RefCell::new(DeadlineQueue::new()),
            local_tasks: RefCell::new(VecDeque::new()),
            io: RefCell::new(HashMap::new()),
            next_token: Cell::new(0),
        });

        if !tls::install(&core) {
            return Err(RuntimeError::ReactorExists);
        }
        log::debug!("reactor created on {:?}", core.shared.thread);
        core.config.log();
        Ok(Self { core })
    }

    /// Run until `quit`/`exit`. Returns the exit code.
    ///
    /// With nothing to do the loop blocks; it never returns just because it
    /// ran out of work. The stop request is cleared on return, so `exec` may
    /// be entered again. A stop requested before `exec` makes it return
    /// immediately.
    pub fn exec(&self) -> i32 {
        let shared = &self.core.shared;
        log::debug!("reactor exec on {:?}", shared.thread);

        while !shared.stop.load(Ordering::Acquire) {
            if let Err(e) = self.core.turn(None) {
                log::error!("reactor poll failed: {}", e);
                shared.exit_code.store(-1, Ordering::Release);
                break;
            }
        }

        shared.stop.store(false, Ordering::Release);
        let code = shared.exit_code.swap(0, Ordering::AcqRel);
        log::debug!("reactor on {:?} exited with {}", shared.thread, code);
        code
    }

    /// Process one iteration, waiting at most `max_wait` for readiness.
    pub fn run_once(&self, max_wait: Duration) -> RuntimeResult<()> {
        self.core.turn(Some(max_wait))?;
        Ok(())
    }

    pub fn quit(&self) {
        self.handle().quit();
    }

    pub fn exit(&self, code: i32) {
        self.handle().exit(code);
    }

    pub fn handle(&self) -> ReactorHandle {
        self.core.handle()
    }

    pub fn local(&self) -> LocalReactor {
        LocalReactor {
            core: Rc::clone(&self.core),
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.core.shared.thread
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.core.config
    }

    /// Handle to the calling thread's reactor, if any.
    pub fn current() -> Option<ReactorHandle> {
        tls::current().map(|core| core.handle())
    }

    /// Like `current`, but fails with `NoReactor`.
    pub fn require_current() -> RuntimeResult<ReactorHandle> {
        Self::current().ok_or(RuntimeError::NoReactor)
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let core = &self.core;
        core.shared.alive.store(false, Ordering::Release);
        tls::uninstall(core);

        // Pending work is dropped, never run. Destructors may queue more,
        // so repeat until everything is empty.
        loop {
            let mut dropped = 0usize;
            while let Some(task) = core.shared.tasks.pop() {
                drop(task);
                dropped += 1;
            }
            let locals = core.local_tasks.take();
            let deadlines = std::mem::take(&mut *core.deadlines.borrow_mut());
            let io = core.io.take();
            dropped += locals.len() + deadlines.len() + io.len();
            for src in io.values() {
                let _ = core.poller.deregister(src.fd);
            }
            drop(locals);
            drop(deadlines);
            drop(io);
            if dropped == 0 {
                break;
            }
        }
        log::debug!("reactor on {:?} destroyed", core.shared.thread);
    }
}

// ============================================================================
// LocalReactor (same-thread services)
// ============================================================================

/// Same-thread view of a reactor. Not `Send`.
#[derive(Clone)]
pub struct LocalReactor {
    core: Rc<ReactorCore>,
}

impl LocalReactor {
    /// The calling thread's reactor, if any.
    pub fn current() -> Option<Self> {
        tls::current().map(|core| Self { core })
    }

    pub fn require_current() -> RuntimeResult<Self> {
        Self::current().ok_or(RuntimeError::NoReactor)
    }

    pub fn handle(&self) -> ReactorHandle {
        self.core.handle()
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.core.config
    }

    pub fn is_alive(&self) -> bool {
        self.core.shared.alive.load(Ordering::Acquire)
    }

    /// Queue a non-`Send` continuation. Runs on a later iteration, after
    /// the same-thread tasks already queued.
    pub fn post_local<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.core.local_tasks.borrow_mut().push_back(Box::new(f));
    }

    /// Run `f` once `at` has passed.
    pub fn add_deadline<F>(&self, at: Instant, f: F) -> DeadlineId
    where
        F: FnOnce() + 'static,
    {
        self.core.deadlines.borrow_mut().insert(at, Box::new(f))
    }

    /// Cancel a pending deadline. Returns `false` if it already ran or was
    /// cancelled.
    pub fn cancel_deadline(&self, id: DeadlineId) -> bool {
        let removed = self.core.deadlines.borrow_mut().cancel(id);
        removed.is_some()
    }

    /// Watch `fd` for readiness. `handler` runs on this thread.
    pub fn register_io(
        &self,
        fd: RawFd,
        interest: Interest,
        handler: IoHandler,
    ) -> RuntimeResult<Token> {
        let token = Token(self.core.next_token.get());
        self.core.next_token.set(token.0 + 1);
        self.core.poller.register(fd, token, interest).map_err(map_poller_err)?;
        self.core
            .io
            .borrow_mut()
            .insert(token, IoSource { fd, handler });
        log::trace!("fd {} registered as {:?} ({:?})", fd, token, interest);
        Ok(token)
    }

    pub fn set_interest(&self, token: Token, interest: Interest) -> RuntimeResult<()> {
        let fd = match self.core.io.borrow().get(&token) {
            Some(src) => src.fd,
            None => return Err(RuntimeError::Poller(io::ErrorKind::NotFound.into())),
        };
        self.core
            .poller
            .reregister(fd, token, interest)
            .map_err(map_poller_err)
    }

    pub fn deregister_io(&self, token: Token) -> RuntimeResult<()> {
        let removed = self.core.io.borrow_mut().remove(&token);
        match removed {
            Some(src) => {
                let res = self.core.poller.deregister(src.fd).map_err(map_poller_err);
                drop(src);
                res
            }
            None => Ok(()),
        }
    }

    pub fn ptr_eq(&self, other: &LocalReactor) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

fn map_poller_err(e: io::Error) -> RuntimeError {
    if e.kind() == io::ErrorKind::Unsupported {
        RuntimeError::Unsupported("fd readiness")
    } else {
        RuntimeError::Poller(e)
    }
}
