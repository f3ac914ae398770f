//! Weft: M:N lightweight-task scheduler
//!
//! This crate multiplexes many lightweight Tasks over a small pool of
//! carrier threads:
//! - **Scheduler**: run queue, dispatch, lifecycle (`scheduler` module)
//! - **Interceptor**: blocking operations that unmount or pin (`blocking` module)
//! - **Exclusive sections**: unmount-hostile and unmount-friendly locks (`sync` module)
//! - **Pinning monitor**: log of carriers blocked in place by a Task
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use weft_core::{FriendlyLock, Scheduler, SchedulerConfig, TaskFailure};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::with_carriers(2));
//! scheduler.start()?;
//!
//! let handle = scheduler.submit_named("request-1", |cx| async move {
//!     let body = cx.network_io(|| fetch_body()).await;
//!     cx.sleep(Duration::from_millis(5)).await;
//!     Ok::<_, TaskFailure>(body.len())
//! })?;
//! let len = handle.join()?;
//! ```

#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]

pub mod blocking;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod sync;

pub use blocking::{Blocking, BlockingContext, BlockingKind, Intercept};
pub use config::SchedulerConfig;
pub use error::{ConfigError, FailureKind, JoinError, SchedulerError, TaskFailure};
pub use scheduler::{
    CarrierId, CarrierSnapshot, CarrierState, JoinHandle, Notifier, PinReason, PinningEvent,
    Scheduler, SchedulerStats, TaskContext, TaskId, TaskSnapshot, TaskStatus, WaitKey,
};
pub use sync::{FriendlyGuard, FriendlyLock, HostileGuard, HostileLock};
