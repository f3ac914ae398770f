//! Blocking-call interceptor
//!
//! Every operation that may block implements [`Blocking`]. A Task reaches it
//! through [`TaskContext`](crate::TaskContext), which wraps it in an
//! [`Intercept`] future. On first poll the interceptor picks one of two paths:
//!
//! - **Unmount**: the Task registers in the wait set under the operation's
//!   key, the operation starts, and the future returns `Pending`. The carrier
//!   stores the continuation back into the Task and goes Idle. A signal on
//!   the key puts the Task back in the run queue.
//! - **Pinned**: the Task holds an unmount-hostile lock, so the carrier blocks
//!   in place for the whole call and a `PinningEvent` is recorded.
//!
//! The interceptor is the only place a Task future returns `Pending`.

pub mod ops;

use crate::scheduler::context::TaskContext;
use crate::scheduler::pinning::{PinReason, PinScope};
use crate::scheduler::scheduler::Shared;
use crate::scheduler::task::Task;
use crate::scheduler::timer::TimerThread;
use crate::scheduler::waitset::{Notifier, Parker, WaitKey, WakeTarget, Waiter};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

/// Category of a blocking operation
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingKind {
    /// Sleep or timed wait
    Timed,
    /// Network read or write
    Network,
    /// File read or write
    File,
    /// Contended unmount-friendly lock
    Lock,
    /// Waiting for another Task
    Join,
    /// A condition signalled by an external collaborator
    External,
}

impl fmt::Display for BlockingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockingKind::Timed => "timed",
            BlockingKind::Network => "network",
            BlockingKind::File => "file",
            BlockingKind::Lock => "lock",
            BlockingKind::Join => "join",
            BlockingKind::External => "external",
        };
        f.write_str(name)
    }
}

/// An operation that may block, and therefore goes through the interceptor
///
/// The interceptor calls, in order: `key`, then `start` once a waiter is
/// registered under that key, then `is_ready`, and finally `finish` after
/// the key has been signalled (or `is_ready` returned true). On the pinned
/// path it first offers the operation `run_in_place`.
pub trait Blocking: Send {
    type Output;

    fn kind(&self) -> BlockingKind;

    /// Condition key signalled when the operation can complete
    fn key(&self) -> WaitKey;

    /// Begin the operation (arm a timer, queue an offload job)
    fn start(&mut self, cx: &BlockingContext<'_>);

    /// Whether the operation can complete without waiting
    fn is_ready(&self) -> bool {
        false
    }

    /// Complete the operation synchronously on the current thread
    ///
    /// Returns false to wait for the key signal instead. Only used on the
    /// pinned path.
    fn run_in_place(&mut self) -> bool {
        false
    }

    /// Produce the result; called once the operation is complete
    fn finish(&mut self) -> Self::Output;
}

/// What a blocking operation may use while starting
pub struct BlockingContext<'a> {
    shared: &'a Shared,
}

impl<'a> BlockingContext<'a> {
    pub(crate) fn new(shared: &'a Shared) -> Self {
        Self { shared }
    }

    /// Completion handle for signalling the operation's key
    pub fn notifier(&self) -> Notifier {
        Notifier::new(self.shared.wait_set().clone())
    }

    /// Arm timer `id` on the timer thread
    pub(crate) fn arm_timer(&self, id: u64, wake_at: Instant) -> Arc<TimerThread> {
        let timer = self.shared.timer();
        timer.register(id, wake_at);
        Arc::clone(timer)
    }

    /// Queue a job on the offload pool
    pub(crate) fn offload(&self, job: crate::scheduler::io::IoJob) {
        self.shared.io().submit(job);
    }
}

enum Phase {
    Start,
    Waiting {
        key: WaitKey,
        fired: Arc<AtomicBool>,
    },
    Done,
}

/// Future returned by `TaskContext` blocking methods
#[must_use = "blocking operations do nothing unless awaited"]
pub struct Intercept<'a, B: Blocking> {
    cx: &'a TaskContext,
    op: B,
    location: &'static Location<'static>,
    phase: Phase,
}

// The operation is never structurally pinned
impl<B: Blocking> Unpin for Intercept<'_, B> {}

impl<'a, B: Blocking> Intercept<'a, B> {
    pub(crate) fn new(cx: &'a TaskContext, op: B, location: &'static Location<'static>) -> Self {
        Self {
            cx,
            op,
            location,
            phase: Phase::Start,
        }
    }

    /// Block the carrier in place; None if the Task was cancelled meanwhile
    fn block_pinned(&mut self, task: &Arc<Task>) -> Option<B::Output> {
        if self.op.is_ready() {
            return Some(self.op.finish());
        }

        let context = self.cx;
        let shared = context.shared();
        let reason = PinReason::BlockingCall(self.op.kind());
        let scope = PinScope::enter(shared, task, self.location, reason);

        if !self.op.run_in_place() {
            let key = self.op.key();
            let parker = Parker::new();
            let fired = Arc::new(AtomicBool::new(false));
            shared.wait_set().register(
                key.clone(),
                Waiter {
                    task: Some(task.id()),
                    fired: fired.clone(),
                    target: WakeTarget::Unpark(parker.clone()),
                },
            );
            self.op.start(&BlockingContext::new(shared));
            if !fired.load(Ordering::Acquire) && !self.op.is_ready() {
                parker.park();
            }
            shared.wait_set().remove(&key, task.id());
        }
        drop(scope);

        if task.is_cancel_requested() {
            return None;
        }
        Some(self.op.finish())
    }
}

impl<B: Blocking> Future for Intercept<'_, B> {
    type Output = B::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let task = this.cx.task();

        // A pending cancellation is honoured here: the carrier sees the flag
        // when this poll returns and terminates the Task.
        if task.is_cancel_requested() {
            return Poll::Pending;
        }

        match &this.phase {
            Phase::Start => {
                if task.pin_depth() > 0 {
                    return match this.block_pinned(&task) {
                        Some(output) => {
                            this.phase = Phase::Done;
                            Poll::Ready(output)
                        }
                        None => Poll::Pending,
                    };
                }

                let context = this.cx;
                let shared = context.shared();
                let key = this.op.key();
                let fired = Arc::new(AtomicBool::new(false));
                shared.wait_set().register(
                    key.clone(),
                    Waiter {
                        task: Some(task.id()),
                        fired: fired.clone(),
                        target: WakeTarget::Reschedule(cx.waker().clone()),
                    },
                );
                task.cell().waiting_on = Some(key.clone());
                this.op.start(&BlockingContext::new(shared));

                if fired.load(Ordering::Acquire) || this.op.is_ready() {
                    shared.wait_set().remove(&key, task.id());
                    {
                        let mut cell = task.cell();
                        cell.waiting_on = None;
                        cell.notified = false;
                    }
                    this.phase = Phase::Done;
                    return Poll::Ready(this.op.finish());
                }

                tracing::trace!(task = %task.id(), %key, location = %this.location, "unmounting at blocking call");
                this.phase = Phase::Waiting { key, fired };
                Poll::Pending
            }
            Phase::Waiting { key, fired } => {
                if !fired.load(Ordering::Acquire) {
                    // Spurious wake; still registered under the key
                    task.cell().waiting_on = Some(key.clone());
                    return Poll::Pending;
                }
                this.phase = Phase::Done;
                Poll::Ready(this.op.finish())
            }
            Phase::Done => panic!("Intercept polled after completion"),
        }
    }
}

impl<B: Blocking> Drop for Intercept<'_, B> {
    fn drop(&mut self) {
        if let Phase::Waiting { key, fired } = &self.phase {
            if !fired.load(Ordering::Acquire) {
                self.cx.shared().wait_set().remove(key, self.cx.id());
            }
        }
    }
}
