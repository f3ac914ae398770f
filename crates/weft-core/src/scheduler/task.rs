//! Task structure and execution state

use crate::error::{JoinError, TaskFailure};
use crate::scheduler::carrier::CarrierId;
use crate::scheduler::scheduler::Shared;
use crate::scheduler::waitset::WaitKey;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::Wake;
use std::time::Duration;

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle status of a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// In the run queue, waiting for a carrier
    Ready,
    /// Mounted on a carrier
    Running,
    /// Unmounted, registered in the wait set under a condition key
    UnmountedWaiting,
    /// Blocked in place on its carrier (pinned path)
    PinnedBlocked,
    /// Completed, failed, or cancelled
    Terminated,
}

/// How a terminated Task ended
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Completed,
    Failed(TaskFailure),
    Cancelled,
}

/// Resumable state of a Task
pub(crate) type Continuation = Pin<Box<dyn Future<Output = Result<(), TaskFailure>> + Send>>;

/// Mutable scheduling state, guarded by the Task's state lock
#[derive(Debug)]
pub(crate) struct TaskCell {
    pub(crate) status: TaskStatus,
    /// Carrier the Task is mounted on
    pub(crate) carrier: Option<CarrierId>,
    /// A wake arrived while the Task was still mounted
    pub(crate) notified: bool,
    /// Condition key the Task is registered under while unmounted
    pub(crate) waiting_on: Option<WaitKey>,
    pub(crate) outcome: Option<Outcome>,
}

/// A lightweight task multiplexed over the carrier pool
pub(crate) struct Task {
    id: TaskId,

    /// Optional diagnostic label
    name: Option<String>,

    /// Scheduling state
    cell: Mutex<TaskCell>,

    /// Continuation, present while the Task is not mounted
    continuation: Mutex<Option<Continuation>>,

    /// Cooperative cancellation flag
    cancel_requested: AtomicBool,

    /// Number of unmount-hostile locks currently held
    pin_depth: AtomicUsize,

    /// Completion tracking for blocking join
    completion_lock: Mutex<bool>,

    /// Condvar for blocking until the Task terminates
    completion_condvar: Condvar,
}

impl Task {
    /// Create a new Ready Task owning `continuation`
    #[cfg(test)]
    pub(crate) fn new(name: Option<String>, continuation: Continuation) -> Self {
        Self::with_id(TaskId::next(), name, continuation)
    }

    pub(crate) fn with_id(id: TaskId, name: Option<String>, continuation: Continuation) -> Self {
        Self {
            id,
            name,
            cell: Mutex::new(TaskCell {
                status: TaskStatus::Ready,
                carrier: None,
                notified: false,
                waiting_on: None,
                outcome: None,
            }),
            continuation: Mutex::new(Some(continuation)),
            cancel_requested: AtomicBool::new(false),
            pin_depth: AtomicUsize::new(0),
            completion_lock: Mutex::new(false),
            completion_condvar: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Label for log lines
    pub(crate) fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", self.id, name),
            None => self.id.to_string(),
        }
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.cell.lock().status
    }

    pub(crate) fn cell(&self) -> MutexGuard<'_, TaskCell> {
        self.cell.lock()
    }

    /// Move the continuation out of the Task (mount)
    pub(crate) fn take_continuation(&self) -> Option<Continuation> {
        self.continuation.lock().take()
    }

    /// Move the continuation back into the Task (unmount)
    pub(crate) fn restore_continuation(&self, continuation: Continuation) {
        *self.continuation.lock() = Some(continuation);
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    pub(crate) fn pin_depth(&self) -> usize {
        self.pin_depth.load(Ordering::Acquire)
    }

    pub(crate) fn enter_hostile(&self) {
        self.pin_depth.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn exit_hostile(&self) {
        self.pin_depth.fetch_sub(1, Ordering::AcqRel);
    }

    /// Wake threads blocked in `wait_completion`
    pub(crate) fn signal_completion(&self) {
        let mut done = self.completion_lock.lock();
        *done = true;
        self.completion_condvar.notify_all();
    }

    pub(crate) fn is_finished(&self) -> bool {
        *self.completion_lock.lock()
    }

    /// Block until the Task terminates
    pub(crate) fn wait_completion(&self) {
        let mut done = self.completion_lock.lock();
        while !*done {
            self.completion_condvar.wait(&mut done);
        }
    }

    /// Block until the Task terminates or `timeout` elapses; returns whether it terminated
    pub(crate) fn wait_completion_timeout(&self, timeout: Duration) -> bool {
        let mut done = self.completion_lock.lock();
        if !*done {
            self.completion_condvar.wait_for(&mut done, timeout);
        }
        *done
    }

    pub(crate) fn outcome(&self) -> Option<Outcome> {
        self.cell.lock().outcome.clone()
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        let cell = self.cell.lock();
        TaskSnapshot {
            id: self.id,
            name: self.name.clone(),
            status: cell.status,
            carrier: cell.carrier,
            waiting_on: cell.waiting_on.clone(),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

/// Point-in-time view of a live Task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier: Option<CarrierId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_on: Option<WaitKey>,
}

/// Waker that puts an unmounted Task back into the run queue
pub(crate) struct TaskWaker {
    task: Arc<Task>,
    shared: Weak<Shared>,
}

impl TaskWaker {
    pub(crate) fn new(task: Arc<Task>, shared: Weak<Shared>) -> Arc<Self> {
        Arc::new(Self { task, shared })
    }
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.reschedule(&self.task);
        }
    }
}

/// Handle to a submitted Task
///
/// Joining consumes the handle. Dropping it detaches the Task, which keeps
/// running to completion.
pub struct JoinHandle<T> {
    task: Arc<Task>,
    slot: Arc<Mutex<Option<T>>>,
    shared: Weak<Shared>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(task: Arc<Task>, slot: Arc<Mutex<Option<T>>>, shared: Weak<Shared>) -> Self {
        Self { task, slot, shared }
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.task.name()
    }

    pub fn status(&self) -> TaskStatus {
        self.task.status()
    }

    /// Whether the Task has terminated
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the Task (see `Scheduler::cancel`)
    pub fn cancel(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.cancel(&self.task),
            None => false,
        }
    }

    /// Block the calling thread until the Task terminates
    ///
    /// Call this from outside the scheduler; from inside a Task use
    /// `TaskContext::join`, which unmounts instead of blocking the carrier.
    pub fn join(self) -> Result<T, JoinError> {
        self.task.wait_completion();
        take_result(&self.task, &self.slot)
    }

    /// Like `join`, but gives the handle back if the Task has not terminated in time
    pub fn join_timeout(self, timeout: Duration) -> Result<Result<T, JoinError>, Self> {
        if self.task.wait_completion_timeout(timeout) {
            Ok(take_result(&self.task, &self.slot))
        } else {
            Err(self)
        }
    }

    pub(crate) fn into_parts(self) -> (Arc<Task>, Arc<Mutex<Option<T>>>) {
        (self.task, self.slot)
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("task", &self.task)
            .finish()
    }
}

/// Read the outcome of a terminated Task
pub(crate) fn take_result<T>(task: &Task, slot: &Mutex<Option<T>>) -> Result<T, JoinError> {
    match task.outcome() {
        Some(Outcome::Completed) => slot
            .lock()
            .take()
            .ok_or_else(|| JoinError::Failed(TaskFailure::error("task result already taken"))),
        Some(Outcome::Failed(failure)) => Err(JoinError::Failed(failure)),
        Some(Outcome::Cancelled) => Err(JoinError::Cancelled),
        None => Err(JoinError::Failed(TaskFailure::error(
            "task finished without an outcome",
        ))),
    }
}
