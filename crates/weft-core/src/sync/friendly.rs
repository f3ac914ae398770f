//! Task-aware FIFO lock with ownership hand-off
//!
//! Unlike an OS mutex that blocks threads, a contended `FriendlyLock` blocks
//! only the Task: acquisition is a blocking operation of kind `Lock`, so the
//! Task unmounts and its carrier runs other work. On unlock, ownership is
//! transferred directly to the first waiter, which then cannot be overtaken.

use crate::blocking::{Blocking, BlockingContext, BlockingKind, Intercept};
use crate::scheduler::context::TaskContext;
use crate::scheduler::waitset::{Notifier, Parker, WaitKey};
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// How a queued waiter is told it now owns the lock
enum Wake {
    /// A Task registered in the wait set under the ticket's key
    Task(Notifier),
    /// A plain thread parked in `lock_blocking`
    Thread(Arc<Parker>),
}

struct Queued {
    ticket: u64,
    wake: Wake,
}

struct LockState {
    /// Ticket currently owning the lock
    owner: Option<u64>,
    /// FIFO wait queue
    waiters: VecDeque<Queued>,
}

/// Mutex that lets a waiting Task unmount
///
/// Not reentrant: a Task locking it twice waits on itself forever.
pub struct FriendlyLock<T> {
    id: u64,
    next_ticket: AtomicU64,
    state: Mutex<LockState>,
    value: UnsafeCell<T>,
}

// Access to `value` is serialized by ticket ownership
unsafe impl<T: Send> Send for FriendlyLock<T> {}
unsafe impl<T: Send> Sync for FriendlyLock<T> {}

impl<T> FriendlyLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            next_ticket: AtomicU64::new(1),
            state: Mutex::new(LockState {
                owner: None,
                waiters: VecDeque::new(),
            }),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire from inside a Task, unmounting while contended
    #[track_caller]
    pub fn lock<'a>(&'a self, cx: &'a TaskContext) -> Intercept<'a, Acquire<'a, T>>
    where
        T: Send,
    {
        cx.intercept(Acquire::new(self))
    }

    /// Acquire from a plain thread, parking it while contended
    pub fn lock_blocking(&self) -> FriendlyGuard<'_, T> {
        let ticket = self.next_ticket();
        let parker = {
            let mut state = self.state.lock();
            if state.owner.is_none() && state.waiters.is_empty() {
                state.owner = Some(ticket);
                return FriendlyGuard { lock: self };
            }
            let parker = Parker::new();
            state.waiters.push_back(Queued {
                ticket,
                wake: Wake::Thread(parker.clone()),
            });
            parker
        };
        parker.park();
        FriendlyGuard { lock: self }
    }

    /// Acquire only if free and nobody is queued
    pub fn try_lock(&self) -> Option<FriendlyGuard<'_, T>> {
        let ticket = self.next_ticket();
        let mut state = self.state.lock();
        if state.owner.is_none() && state.waiters.is_empty() {
            state.owner = Some(ticket);
            Some(FriendlyGuard { lock: self })
        } else {
            None
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// Number of queued waiters
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    fn next_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    fn key(&self, ticket: u64) -> WaitKey {
        WaitKey::Lock {
            lock: self.id,
            ticket,
        }
    }

    /// Release ownership, handing it to the first waiter
    fn unlock(&self) {
        let next = {
            let mut state = self.state.lock();
            match state.waiters.pop_front() {
                Some(next) => {
                    state.owner = Some(next.ticket);
                    Some(next)
                }
                None => {
                    state.owner = None;
                    None
                }
            }
        };

        if let Some(next) = next {
            match next.wake {
                Wake::Task(notifier) => {
                    notifier.notify(&self.key(next.ticket));
                }
                Wake::Thread(parker) => parker.unpark(),
            }
        }
    }
}

impl<T: Default> Default for FriendlyLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for FriendlyLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FriendlyLock")
            .field("id", &self.id)
            .field("owner", &state.owner)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

/// Pending acquisition of a [`FriendlyLock`]
pub struct Acquire<'a, T> {
    lock: &'a FriendlyLock<T>,
    ticket: u64,
    /// Ownership moved into a guard
    taken: bool,
}

impl<'a, T> Acquire<'a, T> {
    fn new(lock: &'a FriendlyLock<T>) -> Self {
        Self {
            lock,
            ticket: lock.next_ticket(),
            taken: false,
        }
    }
}

impl<'a, T: Send> Blocking for Acquire<'a, T> {
    type Output = FriendlyGuard<'a, T>;

    fn kind(&self) -> BlockingKind {
        BlockingKind::Lock
    }

    fn key(&self) -> WaitKey {
        self.lock.key(self.ticket)
    }

    fn start(&mut self, cx: &BlockingContext<'_>) {
        let mut state = self.lock.state.lock();
        if state.owner.is_none() && state.waiters.is_empty() {
            state.owner = Some(self.ticket);
            return;
        }
        if state.owner != Some(self.ticket) {
            state.waiters.push_back(Queued {
                ticket: self.ticket,
                wake: Wake::Task(cx.notifier()),
            });
        }
    }

    /// Owned by this ticket, or free with nobody queued (then taken now)
    fn is_ready(&self) -> bool {
        let mut state = self.lock.state.lock();
        if state.owner == Some(self.ticket) {
            return true;
        }
        if state.owner.is_none() && state.waiters.is_empty() {
            state.owner = Some(self.ticket);
            return true;
        }
        false
    }

    fn finish(&mut self) -> FriendlyGuard<'a, T> {
        self.taken = true;
        FriendlyGuard { lock: self.lock }
    }
}

impl<T> Drop for Acquire<'_, T> {
    /// An abandoned acquisition (cancelled Task) gives up its place or its ownership
    fn drop(&mut self) {
        if self.taken {
            return;
        }
        let owned = {
            let mut state = self.lock.state.lock();
            state.waiters.retain(|queued| queued.ticket != self.ticket);
            state.owner == Some(self.ticket)
        };
        if owned {
            self.lock.unlock();
        }
    }
}

/// Guard of a [`FriendlyLock`]; may be held across blocking calls
pub struct FriendlyGuard<'a, T> {
    lock: &'a FriendlyLock<T>,
}

impl<T> Deref for FriendlyGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard exists only while its ticket owns the lock
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for FriendlyGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard exists only while its ticket owns the lock
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for FriendlyGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
