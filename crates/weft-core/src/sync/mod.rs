//! Exclusive sections
//!
//! Two kinds of lock with different effects on scheduling:
//!
//! - [`HostileLock`]: unmount-hostile. Blocking while holding it pins the
//!   carrier.
//! - [`FriendlyLock`]: unmount-friendly. Waiting for it, and blocking while
//!   holding it, release the carrier.
//!
//! Exclusive sections that may block should use `FriendlyLock`.

mod friendly;
mod hostile;

pub use friendly::{Acquire, FriendlyGuard, FriendlyLock};
pub use hostile::{HostileGuard, HostileLock};
