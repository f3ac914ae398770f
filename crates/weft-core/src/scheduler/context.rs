//! Per-Task handle to the scheduler

use crate::blocking::ops::{AwaitSignal, JoinTask, Offload, Sleep};
use crate::blocking::{Blocking, BlockingKind, Intercept};
use crate::scheduler::scheduler::Shared;
use crate::scheduler::task::{JoinHandle, Task, TaskId};
use crate::scheduler::waitset::{Notifier, WaitKey};
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Context passed to every work unit
///
/// All blocking operations go through the context, which decides whether
/// the Task unmounts from its carrier or pins it.
pub struct TaskContext {
    id: TaskId,
    task: Weak<Task>,
    shared: Arc<Shared>,
}

impl TaskContext {
    pub(crate) fn new(id: TaskId, task: Weak<Task>, shared: Arc<Shared>) -> Self {
        Self { id, task, shared }
    }

    /// Id of the running Task
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Diagnostic name of the running Task
    pub fn name(&self) -> Option<String> {
        self.task().name().map(str::to_string)
    }

    /// Whether cancellation has been requested for this Task
    pub fn is_cancelled(&self) -> bool {
        self.task().is_cancel_requested()
    }

    /// Whether the Task holds an unmount-hostile lock (blocking calls will pin)
    pub fn is_pinned(&self) -> bool {
        self.task().pin_depth() > 0
    }

    /// Completion handle for handing wait keys to external notifiers
    pub fn notifier(&self) -> Notifier {
        Notifier::new(self.shared.wait_set().clone())
    }

    /// Suspend for `duration`
    #[track_caller]
    pub fn sleep(&self, duration: Duration) -> Intercept<'_, Sleep> {
        self.intercept(Sleep::new(duration))
    }

    /// Run a blocking file operation on the offload pool
    #[track_caller]
    pub fn file_io<F, T>(&self, op: F) -> Intercept<'_, Offload<F, T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.intercept(Offload::new(BlockingKind::File, op))
    }

    /// Run a blocking network operation on the offload pool
    #[track_caller]
    pub fn network_io<F, T>(&self, op: F) -> Intercept<'_, Offload<F, T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.intercept(Offload::new(BlockingKind::Network, op))
    }

    /// Wait until some collaborator calls `Notifier::notify(&key)`
    #[track_caller]
    pub fn wait_for(&self, key: WaitKey) -> Intercept<'_, AwaitSignal> {
        self.intercept(AwaitSignal::new(key))
    }

    /// Wait for another Task to terminate
    #[track_caller]
    pub fn join<T: Send + 'static>(&self, handle: JoinHandle<T>) -> Intercept<'_, JoinTask<T>> {
        self.intercept(JoinTask::new(handle))
    }

    /// Route a user-defined blocking operation through the interceptor
    #[track_caller]
    pub fn intercept<B: Blocking>(&self, op: B) -> Intercept<'_, B> {
        Intercept::new(self, op, Location::caller())
    }

    /// The Task this context belongs to
    pub(crate) fn task(&self) -> Arc<Task> {
        match self.task.upgrade() {
            Some(task) => task,
            None => self
                .shared
                .fatal(&format!("context of {} outlived its task", self.id)),
        }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext").field("id", &self.id).finish()
    }
}
