//! Unmount-hostile lock
//!
//! A carrier-level mutex. While a Task holds the guard it cannot unmount:
//! any blocking call it makes pins the carrier. Waiting for the lock itself
//! also blocks the carrier and is recorded as a pinning event.

use crate::scheduler::context::TaskContext;
use crate::scheduler::pinning::{PinReason, PinScope};
use crate::scheduler::task::Task;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::panic::Location;
use std::sync::Arc;

/// Mutex that pins the holding Task to its carrier
///
/// Prefer [`FriendlyLock`](crate::FriendlyLock) for sections that may block.
pub struct HostileLock<T> {
    inner: Mutex<T>,
}

impl<T> HostileLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquire from inside a Task
    ///
    /// Blocks the carrier (not just the Task) while the lock is contended.
    #[track_caller]
    pub fn lock<'a>(&'a self, cx: &TaskContext) -> HostileGuard<'a, T> {
        let task = cx.task();
        let guard = match self.inner.try_lock() {
            Some(guard) => guard,
            None => {
                let _scope = PinScope::enter(
                    cx.shared(),
                    &task,
                    Location::caller(),
                    PinReason::LockContention,
                );
                self.inner.lock()
            }
        };
        task.enter_hostile();
        HostileGuard {
            guard,
            task: Some(task),
        }
    }

    /// Acquire from a plain thread
    pub fn lock_blocking(&self) -> HostileGuard<'_, T> {
        HostileGuard {
            guard: self.inner.lock(),
            task: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for HostileLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for HostileLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostileLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Guard of a [`HostileLock`]; the holding Task stays pinned until it drops
pub struct HostileGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    task: Option<Arc<Task>>,
}

impl<T> Deref for HostileGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for HostileGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for HostileGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.exit_hostile();
        }
    }
}
