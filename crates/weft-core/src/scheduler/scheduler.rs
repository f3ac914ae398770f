//! Main task scheduler coordinating carrier threads

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, TaskFailure};
use crate::scheduler::carrier::{CarrierPool, CarrierSnapshot};
use crate::scheduler::context::TaskContext;
use crate::scheduler::io::IoPool;
use crate::scheduler::pinning::{HealthCheck, PinningEvent, PinningMonitor};
use crate::scheduler::queue::RunQueue;
use crate::scheduler::stats::{SchedulerStats, StatsCounters};
use crate::scheduler::task::{Continuation, JoinHandle, Outcome, Task, TaskCell, TaskId, TaskSnapshot, TaskStatus};
use crate::scheduler::timer::TimerThread;
use crate::scheduler::waitset::{Notifier, WaitKey, WaitSet};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// State shared by the scheduler, its carriers, and every TaskContext
pub(crate) struct Shared {
    config: SchedulerConfig,

    /// Live Tasks, from submission until termination
    tasks: RwLock<FxHashMap<TaskId, Arc<Task>>>,

    run_queue: RunQueue,

    wait_set: Arc<WaitSet>,

    carriers: CarrierPool,

    pinning: PinningMonitor,

    timer: Arc<TimerThread>,

    io: IoPool,

    stats: StatsCounters,

    /// Carrier threads are running
    started: AtomicBool,

    /// Shutdown has begun; submissions are refused
    draining: AtomicBool,
}

impl Shared {
    pub(crate) fn carriers(&self) -> &CarrierPool {
        &self.carriers
    }

    pub(crate) fn pinning(&self) -> &PinningMonitor {
        &self.pinning
    }

    pub(crate) fn stats(&self) -> &StatsCounters {
        &self.stats
    }

    pub(crate) fn wait_set(&self) -> &Arc<WaitSet> {
        &self.wait_set
    }

    pub(crate) fn timer(&self) -> &Arc<TimerThread> {
        &self.timer
    }

    pub(crate) fn io(&self) -> &IoPool {
        &self.io
    }

    pub(crate) fn queued(&self) -> usize {
        self.run_queue.len()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Assign queued Tasks to Idle carriers; returns how many were handed off
    pub(crate) fn dispatch(&self) -> usize {
        if !self.is_started() {
            return 0;
        }

        let mut assigned = 0;
        loop {
            let Some(carrier) = self.carriers.acquire_idle_carrier() else {
                break;
            };
            let Some(task) = self.run_queue.pop() else {
                carrier.release();
                // A push may have raced with the release
                if self.run_queue.is_empty() {
                    break;
                }
                continue;
            };
            if let Err(task) = carrier.assign(task) {
                // Carrier threads are stopping
                carrier.release();
                self.run_queue.push_front(task);
                break;
            }
            assigned += 1;
        }
        assigned
    }

    /// Move a woken Task back to the run queue
    pub(crate) fn reschedule(&self, task: &Arc<Task>) {
        let mut cell = task.cell();
        match cell.status {
            TaskStatus::UnmountedWaiting => {
                cell.status = TaskStatus::Ready;
                cell.waiting_on = None;
                self.stats.stopped_waiting();
                self.run_queue.push(task.clone());
                drop(cell);
                tracing::trace!(task = %task.id(), "rescheduled");
                self.dispatch();
            }
            // Woken before the carrier finished unmounting it
            TaskStatus::Running | TaskStatus::PinnedBlocked => cell.notified = true,
            TaskStatus::Ready | TaskStatus::Terminated => {}
        }
    }

    /// Hand a Task that returned Pending back to the scheduler
    pub(crate) fn unmount(&self, task: &Arc<Task>, continuation: Continuation) {
        let mut cell = task.cell();
        cell.carrier = None;

        if task.is_cancel_requested() {
            let key = cell.waiting_on.take();
            mark_terminated(&mut cell, Outcome::Cancelled);
            drop(cell);
            if let Some(key) = key {
                self.wait_set.remove(&key, task.id());
            }
            self.finalize(task, Some(continuation));
            return;
        }

        task.restore_continuation(continuation);
        if cell.notified {
            cell.notified = false;
            cell.status = TaskStatus::Ready;
            cell.waiting_on = None;
            self.run_queue.push(task.clone());
            drop(cell);
            self.dispatch();
        } else {
            cell.status = TaskStatus::UnmountedWaiting;
            self.stats.unmounted();
        }
    }

    /// Terminate a Task that is not queued or waiting (its carrier just finished it)
    pub(crate) fn terminate(&self, task: &Arc<Task>, outcome: Outcome, continuation: Option<Continuation>) {
        {
            let mut cell = task.cell();
            mark_terminated(&mut cell, outcome);
        }
        self.finalize(task, continuation);
    }

    /// Cancel a Task; returns false if it had already terminated
    pub(crate) fn cancel(&self, task: &Arc<Task>) -> bool {
        let mut cell = task.cell();
        match cell.status {
            TaskStatus::Ready => {
                self.run_queue.remove(task.id());
                mark_terminated(&mut cell, Outcome::Cancelled);
                drop(cell);
                self.finalize(task, task.take_continuation());
            }
            TaskStatus::UnmountedWaiting => {
                let key = cell.waiting_on.take();
                mark_terminated(&mut cell, Outcome::Cancelled);
                drop(cell);
                self.stats.stopped_waiting();
                if let Some(key) = key {
                    self.wait_set.remove(&key, task.id());
                }
                self.finalize(task, task.take_continuation());
            }
            TaskStatus::Running | TaskStatus::PinnedBlocked => {
                // Honoured at the next interceptor entry
                task.request_cancel();
                tracing::debug!(task = %task.label(), "cancellation requested");
            }
            TaskStatus::Terminated => return false,
        }
        true
    }

    /// Release everything a terminated Task holds and wake its joiners
    fn finalize(&self, task: &Arc<Task>, continuation: Option<Continuation>) {
        // Dropping the continuation runs task-side destructors (lock guards)
        if panic::catch_unwind(AssertUnwindSafe(move || drop(continuation))).is_err() {
            tracing::warn!(task = %task.label(), "task destructor panicked");
        }
        self.tasks.write().remove(&task.id());

        match task.outcome() {
            Some(Outcome::Completed) => self.stats.completed(),
            Some(Outcome::Failed(_)) => self.stats.failed(),
            Some(Outcome::Cancelled) => {
                self.stats.cancelled();
                tracing::debug!(task = %task.label(), "task cancelled");
            }
            None => self.fatal(&format!("terminated task {} has no outcome", task.id())),
        }

        task.signal_completion();
        self.wait_set.signal(&WaitKey::Join(task.id()));
    }

    /// Report a broken scheduler invariant and abort the process
    pub(crate) fn fatal(&self, message: &str) -> ! {
        tracing::error!(message, "scheduler invariant violated, aborting");
        std::process::abort()
    }
}

fn mark_terminated(cell: &mut TaskCell, outcome: Outcome) {
    cell.status = TaskStatus::Terminated;
    cell.carrier = None;
    cell.notified = false;
    cell.waiting_on = None;
    cell.outcome = Some(outcome);
}

/// M:N scheduler multiplexing Tasks over a fixed pool of carrier threads
///
/// The scheduler is an explicit instance: Tasks receive a `TaskContext`
/// bound to it instead of reaching for global state.
///
/// ```no_run
/// use std::time::Duration;
/// use weft_core::{Scheduler, SchedulerConfig, TaskFailure};
///
/// let scheduler = Scheduler::new(SchedulerConfig::with_carriers(2));
/// scheduler.start()?;
/// let handle = scheduler.submit(|cx| async move {
///     cx.sleep(Duration::from_millis(10)).await;
///     Ok::<_, TaskFailure>(42)
/// })?;
/// assert_eq!(handle.join()?, 42);
/// scheduler.shutdown();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Scheduler {
    shared: Arc<Shared>,

    /// Pinned-carrier health check (like Go's sysmon)
    health: HealthCheck,

    /// Serializes start and shutdown
    lifecycle: Mutex<()>,

    /// Held shared while a submission is admitted, exclusively while
    /// shutdown flips `draining`
    admission: RwLock<()>,
}

impl Scheduler {
    /// Create a scheduler; no threads run until `start`
    pub fn new(config: SchedulerConfig) -> Self {
        let pinning = PinningMonitor::new(
            config.pinning_log_threshold_duration(),
            config.pinning_event_capacity,
        );
        let shared = Arc::new(Shared {
            carriers: CarrierPool::new(config.carrier_pool_size),
            io: IoPool::new(config.io_pool_size),
            pinning,
            tasks: RwLock::new(FxHashMap::default()),
            run_queue: RunQueue::new(),
            wait_set: Arc::new(WaitSet::new()),
            timer: TimerThread::new(),
            stats: StatsCounters::default(),
            started: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            config,
        });

        Self {
            shared,
            health: HealthCheck::new(),
            lifecycle: Mutex::new(()),
            admission: RwLock::new(()),
        }
    }

    /// Start the carrier, timer, offload, and monitor threads
    ///
    /// Tasks submitted before `start` stay queued until it is called.
    /// Fails with `InvalidInput` if the configuration does not validate.
    pub fn start(&self) -> std::io::Result<()> {
        let _lifecycle = self.lifecycle.lock();
        if self.shared.is_started() || self.shared.draining.load(Ordering::Acquire) {
            return Ok(());
        }

        let config = &self.shared.config;
        config
            .validate()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        self.shared.timer.start(self.shared.wait_set.clone())?;
        self.shared.io.start()?;
        self.shared
            .carriers
            .start(&self.shared, &config.thread_name_prefix)?;
        self.health.start(
            Arc::downgrade(&self.shared),
            config.pinned_check_interval(),
            config.pinned_stall_threshold_duration(),
        )?;
        self.shared.started.store(true, Ordering::Release);

        tracing::info!(
            carriers = self.shared.carriers.size(),
            io_threads = self.shared.io.size(),
            max_run_queue_depth = ?config.max_run_queue_depth,
            "scheduler started"
        );

        self.shared.dispatch();
        Ok(())
    }

    /// Submit a work unit as a new Ready Task
    ///
    /// `work` receives the Task's context and returns the future the Task
    /// runs. An `Err` from that future, or a panic, terminates the Task with
    /// a `TaskFailure` that `join` reports.
    pub fn submit<F, Fut, T, E>(&self, work: F) -> Result<JoinHandle<T>, SchedulerError>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<TaskFailure>,
    {
        self.spawn(None, work)
    }

    /// Submit a work unit with a diagnostic name
    pub fn submit_named<F, Fut, T, E>(
        &self,
        name: impl Into<String>,
        work: F,
    ) -> Result<JoinHandle<T>, SchedulerError>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<TaskFailure>,
    {
        self.spawn(Some(name.into()), work)
    }

    fn spawn<F, Fut, T, E>(&self, name: Option<String>, work: F) -> Result<JoinHandle<T>, SchedulerError>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<TaskFailure>,
    {
        if self.shared.draining.load(Ordering::Acquire) {
            return Err(SchedulerError::PoolShutdownInProgress);
        }

        let slot = Arc::new(Mutex::new(None));
        let id = TaskId::next();
        let task = Arc::new_cyclic(|me| {
            let cx = TaskContext::new(id, me.clone(), self.shared.clone());
            let future = work(cx);
            let result = slot.clone();
            let continuation: Continuation = Box::pin(async move {
                match future.await {
                    Ok(value) => {
                        *result.lock() = Some(value);
                        Ok(())
                    }
                    Err(err) => Err(err.into()),
                }
            });
            Task::with_id(id, name, continuation)
        });

        {
            // Shutdown cannot begin until this Task is registered and queued
            let _admission = self.admission.read();
            if self.shared.draining.load(Ordering::Acquire) {
                return Err(SchedulerError::PoolShutdownInProgress);
            }

            // Registered before it is queued so a fast carrier cannot finish it first
            self.shared.tasks.write().insert(task.id(), task.clone());

            let limit = self.shared.config.max_run_queue_depth;
            if let Err(task) = self.shared.run_queue.push_bounded(task.clone(), limit) {
                self.shared.tasks.write().remove(&task.id());
                self.shared.stats.rejected();
                let depth = limit.unwrap_or_default();
                tracing::debug!(task = %task.label(), depth, "run queue full, submission rejected");
                return Err(SchedulerError::CapacityExceeded { depth });
            }
        }

        self.shared.stats.submitted();
        tracing::debug!(task = %task.label(), "task submitted");
        self.shared.dispatch();

        Ok(JoinHandle::new(task, slot, Arc::downgrade(&self.shared)))
    }

    /// Cancel a Task by id
    ///
    /// Ready and waiting Tasks terminate immediately; a running or pinned
    /// Task stops at its next blocking call. Returns false if no live Task
    /// has this id.
    pub fn cancel(&self, id: TaskId) -> bool {
        let task = self.shared.tasks.read().get(&id).cloned();
        match task {
            Some(task) => self.shared.cancel(&task),
            None => false,
        }
    }

    /// Run one dispatch pass; returns the number of Tasks handed to carriers
    pub fn tick(&self) -> usize {
        self.shared.dispatch()
    }

    /// Snapshot of every live Task, ordered by id
    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        let tasks: Vec<Arc<Task>> = self.shared.tasks.read().values().cloned().collect();
        let mut snapshots: Vec<_> = tasks.iter().map(|task| task.snapshot()).collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    /// Pinning events whose block started at or after `since`
    pub fn list_pinning_events(&self, since: SystemTime) -> Vec<PinningEvent> {
        self.shared.pinning.since(since)
    }

    pub fn carriers(&self) -> Vec<CarrierSnapshot> {
        self.shared.carriers.iter().map(|carrier| carrier.snapshot()).collect()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats.snapshot(self.shared.run_queue.len())
    }

    /// Completion handle for external I/O notifiers
    pub fn notifier(&self) -> Notifier {
        Notifier::new(self.shared.wait_set.clone())
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Number of live (non-terminated) Tasks
    pub fn task_count(&self) -> usize {
        self.shared.tasks.read().len()
    }

    pub fn is_started(&self) -> bool {
        self.shared.is_started()
    }

    /// Shut down, giving running Tasks the configured grace period
    pub fn shutdown(&self) -> bool {
        self.shutdown_timeout(self.shared.config.shutdown_grace())
    }

    /// Stop accepting Tasks, wait up to `grace` for live Tasks to finish,
    /// cancel the rest, and stop every thread
    ///
    /// Returns true if every Task finished on its own within `grace`.
    pub fn shutdown_timeout(&self, grace: Duration) -> bool {
        let _lifecycle = self.lifecycle.lock();
        let already_draining = {
            let _admission = self.admission.write();
            self.shared.draining.swap(true, Ordering::AcqRel)
        };
        if already_draining {
            return self.task_count() == 0;
        }
        tracing::info!(live_tasks = self.task_count(), "scheduler shutting down");

        let drained = if self.shared.is_started() {
            self.wait_all(grace)
        } else {
            self.task_count() == 0
        };

        let remaining: Vec<Arc<Task>> = self.shared.tasks.read().values().cloned().collect();
        if !remaining.is_empty() {
            tracing::warn!(count = remaining.len(), "cancelling tasks still live at shutdown");
        }
        for task in &remaining {
            self.shared.cancel(task);
        }
        // Releases pinned carriers parked on a condition that will never fire
        self.shared.wait_set.signal_all();

        self.health.stop();
        self.shared.carriers.stop(Duration::from_secs(2));
        self.shared.timer.stop();
        self.shared.io.stop();
        self.shared.started.store(false, Ordering::Release);

        for task in self.shared.run_queue.drain() {
            self.shared.cancel(&task);
        }

        let stats = self.stats();
        tracing::info!(
            completed = stats.completed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            pinned_blocks = stats.pinned_blocks,
            "scheduler stopped"
        );
        drained
    }

    /// Wait for all Tasks to terminate (with timeout)
    pub fn wait_all(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.task_count() == 0 {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for Scheduler {
    /// Dropping without `shutdown` cancels every remaining Task
    fn drop(&mut self) {
        self.shutdown_timeout(Duration::ZERO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JoinError;

    fn scheduler(carriers: usize) -> Scheduler {
        let scheduler = Scheduler::new(SchedulerConfig::with_carriers(carriers));
        scheduler.start().unwrap();
        scheduler
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler = Scheduler::new(SchedulerConfig::with_carriers(4));
        assert!(!scheduler.is_started());
        assert_eq!(scheduler.carriers().len(), 4);
        assert_eq!(scheduler.task_count(), 0);
    }

    #[test]
    fn test_submit_and_join() {
        let scheduler = scheduler(2);
        let handle = scheduler
            .submit(|_cx| async { Ok::<_, TaskFailure>(21 * 2) })
            .unwrap();
        assert_eq!(handle.join(), Ok(42));
        assert!(scheduler.wait_all(Duration::from_secs(1)));
        assert_eq!(scheduler.stats().completed, 1);
    }

    #[test]
    fn test_submit_before_start_is_queued() {
        let scheduler = Scheduler::new(SchedulerConfig::with_carriers(1));
        let handle = scheduler
            .submit_named("early", |_cx| async { Ok::<_, TaskFailure>("done") })
            .unwrap();

        let tasks = scheduler.list_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Ready);
        assert_eq!(tasks[0].name.as_deref(), Some("early"));
        assert_eq!(scheduler.tick(), 0);

        scheduler.start().unwrap();
        assert_eq!(handle.join(), Ok("done"));
    }

    #[test]
    fn test_error_value_becomes_failure() {
        let scheduler = scheduler(1);
        let handle = scheduler
            .submit(|_cx| async { Err::<(), _>(TaskFailure::error("bad input")) })
            .unwrap();

        let err = handle.join().unwrap_err();
        assert_eq!(err.failure().map(|f| f.message()), Some("bad input"));
        assert!(scheduler.wait_all(Duration::from_secs(1)));
        assert_eq!(scheduler.stats().failed, 1);
    }

    #[test]
    fn test_panic_is_contained() {
        let scheduler = scheduler(1);
        let handle = scheduler
            .submit(|_cx| async {
                if true {
                    panic!("worker exploded");
                }
                Ok::<(), TaskFailure>(())
            })
            .unwrap();

        let err = handle.join().unwrap_err();
        assert!(err.failure().unwrap().is_panic());

        // The carrier survives and keeps running Tasks
        let next = scheduler.submit(|_cx| async { Ok::<_, TaskFailure>(1) }).unwrap();
        assert_eq!(next.join(), Ok(1));
    }

    #[test]
    fn test_cancel_ready_task_before_start() {
        let scheduler = Scheduler::new(SchedulerConfig::with_carriers(1));
        let handle = scheduler
            .submit(|_cx| async { Ok::<_, TaskFailure>(()) })
            .unwrap();

        assert!(scheduler.cancel(handle.id()));
        assert!(!scheduler.cancel(handle.id()));
        assert_eq!(scheduler.stats().queued, 0);
        assert_eq!(handle.join(), Err(JoinError::Cancelled));
    }

    #[test]
    fn test_capacity_exceeded() {
        let scheduler = Scheduler::new(SchedulerConfig::with_carriers(1).max_run_queue_depth(2));
        assert!(scheduler.submit(|_cx| async { Ok::<_, TaskFailure>(()) }).is_ok());
        assert!(scheduler.submit(|_cx| async { Ok::<_, TaskFailure>(()) }).is_ok());

        let err = scheduler
            .submit(|_cx| async { Ok::<_, TaskFailure>(()) })
            .unwrap_err();
        assert_eq!(err, SchedulerError::CapacityExceeded { depth: 2 });
        assert_eq!(scheduler.stats().rejected, 1);
        assert_eq!(scheduler.task_count(), 2);
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let scheduler = scheduler(1);
        assert!(scheduler.shutdown());

        let err = scheduler
            .submit(|_cx| async { Ok::<_, TaskFailure>(()) })
            .unwrap_err();
        assert_eq!(err, SchedulerError::PoolShutdownInProgress);
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let scheduler = Scheduler::new(SchedulerConfig::with_carriers(1).max_run_queue_depth(0));
        let err = scheduler.start().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(err.to_string().contains("max_run_queue_depth"));
        assert!(!scheduler.is_started());

        let scheduler = Scheduler::new(SchedulerConfig::with_carriers(0));
        assert!(scheduler.start().is_err());
        assert!(scheduler.carriers().is_empty());
    }

    #[test]
    fn test_submissions_racing_shutdown_all_terminate() {
        for _ in 0..20 {
            let scheduler = scheduler(2);
            let accepted = std::thread::scope(|scope| {
                let submitters: Vec<_> = (0..4)
                    .map(|_| {
                        scope.spawn(|| {
                            let mut handles = Vec::new();
                            loop {
                                match scheduler.submit(|_cx| async { Ok::<_, TaskFailure>(()) }) {
                                    Ok(handle) => handles.push(handle),
                                    Err(err) => {
                                        assert_eq!(err, SchedulerError::PoolShutdownInProgress);
                                        return handles;
                                    }
                                }
                            }
                        })
                    })
                    .collect();
                std::thread::sleep(Duration::from_millis(2));
                scheduler.shutdown_timeout(Duration::ZERO);
                submitters
                    .into_iter()
                    .flat_map(|submitter| submitter.join().unwrap())
                    .collect::<Vec<_>>()
            });

            // Every accepted Task either ran or was cancelled by shutdown
            for handle in accepted {
                assert!(handle.join_timeout(Duration::from_secs(2)).is_ok());
            }
            assert_eq!(scheduler.task_count(), 0);
        }
    }

    #[test]
    fn test_cancelled_sleep_disarms_timer() {
        let scheduler = scheduler(1);
        let handle = scheduler
            .submit(|cx| async move {
                cx.sleep(Duration::from_secs(60)).await;
                Ok::<_, TaskFailure>(())
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        while handle.status() != TaskStatus::UnmountedWaiting && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(handle.status(), TaskStatus::UnmountedWaiting);
        assert_eq!(scheduler.shared.timer().pending_count(), 1);

        assert!(handle.cancel());
        assert_eq!(scheduler.shared.timer().pending_count(), 0);
        assert_eq!(handle.join(), Err(JoinError::Cancelled));
    }

    #[test]
    fn test_shutdown_cancels_waiting_tasks() {
        let scheduler = scheduler(1);
        let handle = scheduler
            .submit(|cx| async move {
                cx.wait_for(WaitKey::resource("never")).await;
                Ok::<_, TaskFailure>(())
            })
            .unwrap();

        assert!(!scheduler.shutdown_timeout(Duration::from_millis(20)));
        assert_eq!(handle.join(), Err(JoinError::Cancelled));
        assert_eq!(scheduler.task_count(), 0);
    }
}
