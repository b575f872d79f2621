//! Explicit task primitives: single-slot promises and cooperative
//! cancellation tokens.
//!
//! The scheduler chains work through stored `TaskHandle`s ("await the last
//! task, then replace it") rather than through an async runtime, so the
//! states a task can be in are spelled out here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Completion states observable through a `TaskHandle`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskState<T> {
    Pending,
    Done(T),
    /// Superseded or cleared. Never an error by contract.
    Cancelled,
    /// A background failure surfaced to the awaiter.
    Failed(String),
}

impl<T> TaskState<T> {
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, TaskState::Pending)
    }
}

struct Shared<T> {
    state: Mutex<TaskState<T>>,
    cond: Condvar,
}

/// Write side of a task. Dropping a pending promise marks it failed so an
/// awaiter can never hang on a job that died.
pub struct Promise<T>(Arc<Shared<T>>);

/// Read side of a task. Cheap to clone and store as "the last task".
pub struct TaskHandle<T>(Arc<Shared<T>>);

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Promise<T> {
    #[must_use]
    pub fn pair() -> (Promise<T>, TaskHandle<T>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(TaskState::Pending),
            cond: Condvar::new(),
        });
        (Promise(shared.clone()), TaskHandle(shared))
    }

    pub fn complete(self, value: T) {
        self.settle(TaskState::Done(value));
    }

    pub fn cancel(self) {
        self.settle(TaskState::Cancelled);
    }

    pub fn fail(self, message: impl Into<String>) {
        self.settle(TaskState::Failed(message.into()));
    }

    fn settle(&self, next: TaskState<T>) {
        let mut state = self.0.state.lock().expect("task state poisoned");
        if state.is_pending() {
            *state = next;
            self.0.cond.notify_all();
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        self.settle(TaskState::Failed("promise dropped without completion".into()));
    }
}

impl<T> TaskHandle<T> {
    /// Completed sentinel, for "no task is running" initial states.
    #[must_use]
    pub fn done(value: T) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(TaskState::Done(value)),
            cond: Condvar::new(),
        });
        TaskHandle(shared)
    }

    /// True for any settled state: done, cancelled, or failed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        !self.0.state.lock().expect("task state poisoned").is_pending()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            *self.0.state.lock().expect("task state poisoned"),
            TaskState::Cancelled
        )
    }

    #[must_use]
    pub fn poll(&self) -> TaskState<T>
    where
        T: Clone,
    {
        self.0.state.lock().expect("task state poisoned").clone()
    }

    /// Block until settled or the timeout elapses. Returns the settled
    /// state, or `Pending` on timeout.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> TaskState<T>
    where
        T: Clone,
    {
        let state = self.0.state.lock().expect("task state poisoned");
        let (state, _timed_out) = self
            .0
            .cond
            .wait_timeout_while(state, timeout, |s| s.is_pending())
            .expect("task state poisoned");
        state.clone()
    }
}

/// Cooperative cancellation flag shared between the scheduler and a
/// background job. Observed at suspension points; never preemptive.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
