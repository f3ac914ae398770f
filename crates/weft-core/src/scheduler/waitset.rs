//! Wait set: blocking-condition key → Tasks waiting on it
//!
//! The interceptor registers a waiter before it starts a blocking operation,
//! so a signal can never arrive between "operation started" and "Task is
//! waiting". Signals are edge-triggered: a key with no waiters is dropped.

use crate::scheduler::task::TaskId;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Waker;

/// Key of a blocking condition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKey {
    /// A timed wait armed on the timer thread
    Timer(u64),
    /// An offloaded file or network operation
    Io(u64),
    /// Hand-off of an unmount-friendly lock to one waiter
    Lock { lock: u64, ticket: u64 },
    /// Termination of another Task
    Join(TaskId),
    /// An external condition such as "socket 7 readable"
    Resource(String),
}

impl WaitKey {
    /// Key for an external condition
    pub fn resource(name: impl Into<String>) -> Self {
        WaitKey::Resource(name.into())
    }
}

impl fmt::Display for WaitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitKey::Timer(id) => write!(f, "timer:{}", id),
            WaitKey::Io(id) => write!(f, "io:{}", id),
            WaitKey::Lock { lock, ticket } => write!(f, "lock:{}#{}", lock, ticket),
            WaitKey::Join(task) => write!(f, "join:{}", task),
            WaitKey::Resource(name) => write!(f, "resource:{}", name),
        }
    }
}

/// One-shot thread parker used on the pinned path
#[derive(Default)]
pub(crate) struct Parker {
    unparked: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block the calling thread until `unpark` has been called
    pub(crate) fn park(&self) {
        let mut unparked = self.unparked.lock();
        while !*unparked {
            self.condvar.wait(&mut unparked);
        }
    }

    pub(crate) fn unpark(&self) {
        let mut unparked = self.unparked.lock();
        *unparked = true;
        self.condvar.notify_all();
    }
}

/// How a signalled waiter is resumed
pub(crate) enum WakeTarget {
    /// Unmounted Task: wake it back into the run queue
    Reschedule(Waker),
    /// Pinned carrier (or plain thread): unpark it
    Unpark(Arc<Parker>),
}

/// A Task registered under a key
pub(crate) struct Waiter {
    pub(crate) task: Option<TaskId>,
    /// Set before the wake target fires
    pub(crate) fired: Arc<AtomicBool>,
    pub(crate) target: WakeTarget,
}

impl Waiter {
    fn fire(self) {
        self.fired.store(true, Ordering::Release);
        match self.target {
            WakeTarget::Reschedule(waker) => waker.wake(),
            WakeTarget::Unpark(parker) => parker.unpark(),
        }
    }
}

/// Mapping from condition key to waiting Tasks
#[derive(Default)]
pub(crate) struct WaitSet {
    waiters: DashMap<WaitKey, Vec<Waiter>>,
}

impl WaitSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, key: WaitKey, waiter: Waiter) {
        self.waiters.entry(key).or_default().push(waiter);
    }

    /// Resume every waiter registered under `key`; returns how many were resumed
    pub(crate) fn signal(&self, key: &WaitKey) -> usize {
        // Fire outside the map shard lock: waking re-enters the scheduler.
        let waiters = match self.waiters.remove(key) {
            Some((_, waiters)) => waiters,
            None => return 0,
        };
        let count = waiters.len();
        for waiter in waiters {
            waiter.fire();
        }
        count
    }

    /// Remove one Task's registration without firing it
    pub(crate) fn remove(&self, key: &WaitKey, task: TaskId) -> bool {
        let mut removed = false;
        if let Some(mut entry) = self.waiters.get_mut(key) {
            let before = entry.len();
            entry.retain(|w| w.task != Some(task));
            removed = entry.len() != before;
        }
        self.waiters.remove_if(key, |_, waiters| waiters.is_empty());
        removed
    }

    #[cfg(test)]
    pub(crate) fn is_waiting(&self, key: &WaitKey, task: TaskId) -> bool {
        self.waiters
            .get(key)
            .map(|waiters| waiters.iter().any(|w| w.task == Some(task)))
            .unwrap_or(false)
    }

    /// Total registered waiters
    pub(crate) fn len(&self) -> usize {
        self.waiters.iter().map(|entry| entry.value().len()).sum()
    }

    /// Resume everything (shutdown)
    pub(crate) fn signal_all(&self) -> usize {
        let keys: Vec<WaitKey> = self.waiters.iter().map(|entry| entry.key().clone()).collect();
        keys.iter().map(|key| self.signal(key)).sum()
    }
}

/// Completion side of the wait set, handed to I/O notifiers and other collaborators
///
/// Cloning is cheap; all clones signal the same scheduler.
#[derive(Clone)]
pub struct Notifier {
    wait_set: Arc<WaitSet>,
}

impl Notifier {
    pub(crate) fn new(wait_set: Arc<WaitSet>) -> Self {
        Self { wait_set }
    }

    /// Signal that the condition `key` is ready
    ///
    /// Every Task waiting on `key` becomes Ready. Returns the number of Tasks
    /// (or pinned carriers) resumed; a key nobody waits on is ignored.
    pub fn notify(&self, key: &WaitKey) -> usize {
        let resumed = self.wait_set.signal(key);
        tracing::trace!(%key, resumed, "condition signalled");
        resumed
    }

    /// Whether any Task is currently waiting on `key`
    pub fn has_waiters(&self, key: &WaitKey) -> bool {
        self.wait_set
            .waiters
            .get(key)
            .map(|waiters| !waiters.is_empty())
            .unwrap_or(false)
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("waiters", &self.wait_set.len())
            .finish()
    }
}
