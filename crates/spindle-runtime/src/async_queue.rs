//! Ordered async operation pipeline
//!
//! Operations are committed with a completion callback and started one at a
//! time in commit order. An operation finishes by consuming its
//! `Completion`; the callback then runs and the next operation starts.
//!
//! A queue starts shut down and must be `open`ed. While shut down, new
//! commits complete immediately with `ShutDown`, and queued operations that
//! have not started are drained with `ShutDown` as soon as the running one
//! finishes. A started operation is never interrupted.
//!
//! The queue list and the shutdown flag share one lock. The context is
//! reference counted so an operation that completes after the queue is
//! dropped still finds it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lifecycle of a committed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    Pending,
    Started,
    Done,
    Canceled,
    ShutDown,
}

impl OperationState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            OperationState::Done | OperationState::Canceled | OperationState::ShutDown
        )
    }
}

/// Work run by an `AsyncOperationQueue`.
pub trait AsyncOperation: Send + 'static {
    /// Begin the work. Consume `completion` exactly once, now or later and
    /// from any thread.
    fn start(&mut self, completion: Completion);
}

type Callback<O> = Box<dyn FnOnce(Box<O>, OperationState) + Send + 'static>;

// ============================================================================
// Completion token
// ============================================================================

trait QueueCore: Send + Sync {
    fn finish(self: Arc<Self>, id: u64, result: OperationState);
}

/// Ends the running operation.
///
/// Dropping it without calling `done` or `canceled` completes the operation
/// with `Canceled`.
pub struct Completion {
    ctx: Option<Arc<dyn QueueCore>>,
    id: u64,
}

impl Completion {
    pub fn done(mut self) {
        self.finish(OperationState::Done);
    }

    pub fn canceled(mut self) {
        self.finish(OperationState::Canceled);
    }

    fn finish(&mut self, result: OperationState) {
        if let Some(ctx) = self.ctx.take() {
            ctx.finish(self.id, result);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.ctx.is_some() {
            log::warn!("operation {} dropped its completion; treating as canceled", self.id);
            self.finish(OperationState::Canceled);
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("id", &self.id)
            .field("pending", &self.ctx.is_some())
            .finish()
    }
}

// ============================================================================
// Shared context
// ============================================================================

struct Entry<O: ?Sized> {
    id: u64,
    /// `None` while `start` is on the stack.
    op: Option<Box<O>>,
    state: OperationState,
    /// Set when the completion fires before `start` has returned.
    finished: Option<OperationState>,
    on_complete: Callback<O>,
}

struct QueueState<O: ?Sized> {
    entries: VecDeque<Entry<O>>,
    shutdown: bool,
    next_id: u64,
}

struct QueueContext<O: ?Sized> {
    state: Mutex<QueueState<O>>,
}

impl<O: AsyncOperation + ?Sized> QueueContext<O> {
    fn lock(&self) -> MutexGuard<'_, QueueState<O>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the head if it is pending. Iterates while operations complete
    /// synchronously or are drained by shutdown.
    fn dispatch(self: &Arc<Self>) {
        loop {
            let mut st = self.lock();
            let shutdown = st.shutdown;
            let Some(head) = st.entries.front_mut() else {
                return;
            };
            if head.state != OperationState::Pending {
                return;
            }

            if shutdown {
                let Some(entry) = st.entries.pop_front() else {
                    return;
                };
                drop(st);
                Self::complete(entry, OperationState::ShutDown);
                continue;
            }

            head.state = OperationState::Started;
            let id = head.id;
            let Some(mut op) = head.op.take() else {
                return;
            };
            drop(st);

            log::trace!("starting operation {}", id);
            let ctx: Arc<dyn QueueCore> = Arc::clone(self) as Arc<dyn QueueCore>;
            op.start(Completion { ctx: Some(ctx), id });

            let mut st = self.lock();
            let Some(head) = st.entries.front_mut() else {
                return;
            };
            debug_assert_eq!(head.id, id);
            match head.finished.take() {
                Some(result) => {
                    head.op = Some(op);
                    let Some(entry) = st.entries.pop_front() else {
                        return;
                    };
                    drop(st);
                    Self::complete(entry, result);
                }
                None => {
                    head.op = Some(op);
                    return;
                }
            }
        }
    }

    fn complete(entry: Entry<O>, result: OperationState) {
        log::trace!("operation {} finished: {:?}", entry.id, result);
        if let Some(op) = entry.op {
            (entry.on_complete)(op, result);
        }
    }
}

impl<O: AsyncOperation + ?Sized> QueueCore for QueueContext<O> {
    fn finish(self: Arc<Self>, id: u64, result: OperationState) {
        let mut st = self.lock();
        let Some(head) = st.entries.front_mut() else {
            log::error!("completion {} fired on an empty queue", id);
            return;
        };
        if head.id != id {
            log::error!("completion {} fired but operation {} is running", id, head.id);
            return;
        }
        if head.op.is_none() {
            // still inside start(); dispatch picks this up when it returns
            head.finished = Some(result);
            return;
        }
        let Some(entry) = st.entries.pop_front() else {
            return;
        };
        drop(st);
        Self::complete(entry, result);
        self.dispatch();
    }
}

// ============================================================================
// Public queue
// ============================================================================

/// Runs committed operations one at a time, in commit order.
///
/// # Example
///
/// ```rust,ignore
/// let queue: AsyncOperationQueue = AsyncOperationQueue::new();
/// queue.open();
/// queue.commit(Box::new(MyOp::new()), |op, state| {
///     assert_eq!(state, OperationState::Done);
/// });
/// ```
pub struct AsyncOperationQueue<O: AsyncOperation + ?Sized = dyn AsyncOperation> {
    ctx: Arc<QueueContext<O>>,
}

impl<O: AsyncOperation + ?Sized> AsyncOperationQueue<O> {
    /// A new queue, shut down until `open` is called.
    pub fn new() -> Self {
        Self {
            ctx: Arc::new(QueueContext {
                state: Mutex::new(QueueState {
                    entries: VecDeque::new(),
                    shutdown: true,
                    next_id: 0,
                }),
            }),
        }
    }

    /// Queue `op`. `on_complete` receives the operation back with its final
    /// state. When the queue is shut down it is called right away with
    /// `ShutDown` and `op` is never started.
    pub fn commit<F>(&self, op: Box<O>, on_complete: F)
    where
        F: FnOnce(Box<O>, OperationState) + Send + 'static,
    {
        {
            let mut st = self.ctx.lock();
            if st.shutdown {
                drop(st);
                on_complete(op, OperationState::ShutDown);
                return;
            }
            st.next_id += 1;
            let id = st.next_id;
            st.entries.push_back(Entry {
                id,
                op: Some(op),
                state: OperationState::Pending,
                finished: None,
                on_complete: Box::new(on_complete),
            });
        }
        self.ctx.dispatch();
    }

    /// Accept new operations.
    pub fn open(&self) {
        self.ctx.lock().shutdown = false;
    }

    /// Refuse new operations and drain the pending ones once the running
    /// operation finishes.
    pub fn shutdown(&self) {
        self.ctx.lock().shutdown = true;
        // drain now if nothing is running
        self.ctx.dispatch();
    }

    pub fn is_shutdown(&self) -> bool {
        self.ctx.lock().shutdown
    }

    /// Operations committed and not yet completed, including the running one.
    pub fn len(&self) -> usize {
        self.ctx.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ctx.lock().entries.is_empty()
    }
}

impl<O: AsyncOperation + ?Sized> Default for AsyncOperationQueue<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: AsyncOperation + ?Sized> Drop for AsyncOperationQueue<O> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<O: AsyncOperation + ?Sized> fmt::Debug for AsyncOperationQueue<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.ctx.lock();
        f.debug_struct("AsyncOperationQueue")
            .field("len", &st.entries.len())
            .field("shutdown", &st.shutdown)
            .finish()
    }
}
