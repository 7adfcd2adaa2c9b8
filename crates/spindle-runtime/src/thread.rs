//! Reactor on a dedicated OS thread

use crate::config::ReactorConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::reactor::{Reactor, ReactorHandle};
use spindle_core::Waiter;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

const STARTUP_POLL: Duration = Duration::from_millis(10);

/// Owns a thread running a `Reactor` until `quit`.
///
/// # Example
///
/// ```rust,ignore
/// let mut worker = LoopThread::new("io");
/// worker.start()?;
/// worker.queue_task(|| println!("on the io thread"));
/// worker.quit();
/// ```
pub struct LoopThread {
    name: String,
    config: ReactorConfig,
    handle: Option<ReactorHandle>,
    join: Option<JoinHandle<i32>>,
}

impl LoopThread {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, ReactorConfig::from_env())
    }

    pub fn with_config(name: impl Into<String>, config: ReactorConfig) -> Self {
        Self {
            name: name.into(),
            config,
            handle: None,
            join: None,
        }
    }

    /// Spawn the thread and block until its reactor accepts tasks.
    ///
    /// Starting a running thread is a no-op.
    pub fn start(&mut self) -> RuntimeResult<()> {
        if self.join.is_some() {
            log::warn!("loop thread {:?} already started", self.name);
            return Ok(());
        }
        self.config.validate()?;

        let ready: Arc<Waiter<RuntimeResult<ReactorHandle>>> = Arc::new(Waiter::new());
        let notify = Arc::clone(&ready);
        let config = self.config.clone();
        let name = self.name.clone();

        let join = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let reactor = match Reactor::with_config(config) {
                    Ok(reactor) => reactor,
                    Err(e) => {
                        notify.notify(Err(e));
                        return -1;
                    }
                };
                notify.notify(Ok(reactor.handle()));
                drop(notify);

                log::debug!("loop thread {:?} running", name);
                let code = reactor.exec();
                log::debug!("loop thread {:?} exiting with {}", name, code);
                code
            })
            .map_err(RuntimeError::Spawn)?;

        let handle = loop {
            if let Some(result) = ready.wait_timeout(STARTUP_POLL) {
                break result;
            }
            if join.is_finished() {
                let _ = join.join();
                return Err(RuntimeError::ThreadExited);
            }
        };
        match handle {
            Ok(handle) => {
                self.handle = Some(handle);
                self.join = Some(join);
                Ok(())
            }
            Err(e) => {
                let _ = join.join();
                Err(e)
            }
        }
    }

    /// Queue `f` on the loop thread. `false` if not running.
    pub fn queue_task<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.handle {
            Some(handle) => handle.post(f),
            None => false,
        }
    }

    /// Stop the loop and join the thread. Returns the loop's exit code, or
    /// `None` if it was not running.
    ///
    /// # Panics
    ///
    /// If called from the loop thread itself.
    pub fn quit(&mut self) -> Option<i32> {
        let handle = self.handle.take()?;
        assert!(
            !handle.is_current(),
            "LoopThread::quit called from its own loop thread"
        );
        handle.quit();
        let join = self.join.take()?;
        match join.join() {
            Ok(code) => Some(code),
            Err(_) => {
                log::warn!("loop thread {:?} panicked", self.name);
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.handle.as_ref().map(ReactorHandle::thread_id)
    }

    pub fn handle(&self) -> Option<&ReactorHandle> {
        self.handle.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        let Some(handle) = &self.handle else {
            return;
        };
        if handle.is_current() {
            // can't join ourselves; let the loop wind down on its own
            handle.quit();
        } else {
            self.quit();
        }
    }
}

impl std::fmt::Debug for LoopThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopThread")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use spindle_core::WaitGroup;
    use std::sync::Mutex;

    #[test]
    fn test_tasks_run_on_loop_thread_in_order() {
        let mut worker = LoopThread::new("test-loop");
        assert!(!worker.queue_task(|| {}));
        worker.start().unwrap();
        assert!(worker.is_running());

        let loop_id = worker.thread_id().unwrap();
        assert_ne!(loop_id, thread::current().id());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(WaitGroup::new(1));
        for i in 0..50 {
            let s = Arc::clone(&seen);
            assert!(worker.queue_task(move || {
                assert_eq!(thread::current().id(), loop_id);
                s.lock().unwrap().push(i);
            }));
        }
        let d = Arc::clone(&done);
        worker.queue_task(move || d.done());
        assert!(done.wait_timeout(Duration::from_secs(5)));

        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
        assert_eq!(worker.quit(), Some(0));
        assert!(!worker.is_running());
        assert_eq!(worker.quit(), None);
    }

    #[test]
    fn test_exit_code_propagates() {
        let mut worker = LoopThread::new("test-exit");
        worker.start().unwrap();
        let handle = worker.handle().unwrap().clone();
        worker.queue_task(move || handle.exit(3));
        while worker.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(worker.quit(), Some(3));
    }

    #[test]
    fn test_start_twice_is_noop() {
        let mut worker = LoopThread::new("test-twice");
        worker.start().unwrap();
        let first = worker.thread_id();
        worker.start().unwrap();
        assert_eq!(worker.thread_id(), first);
    }

    #[test]
    fn test_objects_live_on_loop_thread() {
        let mut worker = LoopThread::new("test-objects");
        worker.start().unwrap();
        let loop_id = worker.thread_id().unwrap();

        let ready = Arc::new(Waiter::new());
        let r = Arc::clone(&ready);
        worker.queue_task(move || {
            let object = Object::new(None).unwrap();
            r.notify(object.thread_id());
        });
        assert_eq!(ready.wait_timeout(Duration::from_secs(5)), Some(loop_id));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut worker =
            LoopThread::with_config("test-bad", ReactorConfig::new().max_events(0));
        assert!(matches!(worker.start(), Err(RuntimeError::Config(_))));
        assert!(!worker.is_running());
    }
}
