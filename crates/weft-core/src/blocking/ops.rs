//! Built-in blocking operations

use super::{Blocking, BlockingContext, BlockingKind};
use crate::error::JoinError;
use crate::scheduler::io::next_io_id;
use crate::scheduler::task::{take_result, JoinHandle, Task};
use crate::scheduler::timer::{next_timer_id, TimerThread};
use crate::scheduler::waitset::WaitKey;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Timed wait served by the timer thread
pub struct Sleep {
    timer_id: u64,
    deadline: Instant,
    /// Set while the timer thread holds an entry for this sleep
    armed: Option<Arc<TimerThread>>,
}

impl Sleep {
    pub(crate) fn new(duration: Duration) -> Self {
        Self {
            timer_id: next_timer_id(),
            deadline: Instant::now() + duration,
            armed: None,
        }
    }
}

impl Drop for Sleep {
    /// An abandoned sleep (cancelled Task) gives its heap entry back
    fn drop(&mut self) {
        if let Some(timer) = self.armed.take() {
            timer.cancel(self.timer_id);
        }
    }
}

impl Blocking for Sleep {
    type Output = ();

    fn kind(&self) -> BlockingKind {
        BlockingKind::Timed
    }

    fn key(&self) -> WaitKey {
        WaitKey::Timer(self.timer_id)
    }

    fn start(&mut self, cx: &BlockingContext<'_>) {
        self.armed = Some(cx.arm_timer(self.timer_id, self.deadline));
    }

    fn is_ready(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn run_in_place(&mut self) -> bool {
        thread::sleep(self.deadline.saturating_duration_since(Instant::now()));
        true
    }

    fn finish(&mut self) {
        self.armed = None;
    }
}

type OffloadSlot<T> = Arc<Mutex<Option<thread::Result<T>>>>;

/// Blocking closure run on the offload pool
///
/// A panic inside the closure is carried back and resumed in the Task, so it
/// fails the Task rather than the I/O thread.
pub struct Offload<F, T> {
    kind: BlockingKind,
    io_id: u64,
    op: Option<F>,
    result: OffloadSlot<T>,
}

impl<F, T> Offload<F, T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    pub(crate) fn new(kind: BlockingKind, op: F) -> Self {
        Self {
            kind,
            io_id: next_io_id(),
            op: Some(op),
            result: Arc::new(Mutex::new(None)),
        }
    }
}

impl<F, T> Blocking for Offload<F, T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn kind(&self) -> BlockingKind {
        self.kind
    }

    fn key(&self) -> WaitKey {
        WaitKey::Io(self.io_id)
    }

    fn start(&mut self, cx: &BlockingContext<'_>) {
        let Some(op) = self.op.take() else {
            return;
        };
        let result = self.result.clone();
        let notifier = cx.notifier();
        let key = self.key();
        cx.offload(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(op));
            *result.lock() = Some(outcome);
            notifier.notify(&key);
        }));
    }

    fn is_ready(&self) -> bool {
        self.result.lock().is_some()
    }

    fn run_in_place(&mut self) -> bool {
        if let Some(op) = self.op.take() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(op));
            *self.result.lock() = Some(outcome);
        }
        true
    }

    fn finish(&mut self) -> T {
        match self.result.lock().take() {
            Some(Ok(value)) => value,
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => panic!("offloaded operation {} finished without a result", self.io_id),
        }
    }
}

/// Wait for an externally signalled condition
pub struct AwaitSignal {
    key: WaitKey,
}

impl AwaitSignal {
    pub(crate) fn new(key: WaitKey) -> Self {
        Self { key }
    }
}

impl Blocking for AwaitSignal {
    type Output = ();

    fn kind(&self) -> BlockingKind {
        BlockingKind::External
    }

    fn key(&self) -> WaitKey {
        self.key.clone()
    }

    fn start(&mut self, _cx: &BlockingContext<'_>) {}

    fn finish(&mut self) {}
}

/// Wait for another Task to terminate
pub struct JoinTask<T> {
    task: Arc<Task>,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T: Send + 'static> JoinTask<T> {
    pub(crate) fn new(handle: JoinHandle<T>) -> Self {
        let (task, slot) = handle.into_parts();
        Self { task, slot }
    }
}

impl<T: Send + 'static> Blocking for JoinTask<T> {
    type Output = Result<T, JoinError>;

    fn kind(&self) -> BlockingKind {
        BlockingKind::Join
    }

    fn key(&self) -> WaitKey {
        WaitKey::Join(self.task.id())
    }

    fn start(&mut self, _cx: &BlockingContext<'_>) {}

    fn is_ready(&self) -> bool {
        self.task.is_finished()
    }

    fn finish(&mut self) -> Result<T, JoinError> {
        take_result(&self.task, &self.slot)
    }
}
