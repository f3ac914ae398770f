//! Task scheduler
//!
//! M:N scheduling of Tasks over a fixed pool of carrier threads.
//! A Task unmounts at blocking calls so its carrier can run other Tasks,
//! unless it holds an unmount-hostile lock, in which case the carrier is
//! pinned and the pinning monitor records the event.

pub(crate) mod carrier;
pub(crate) mod context;
pub(crate) mod io;
pub(crate) mod pinning;
pub(crate) mod queue;
#[allow(clippy::module_inception)]
pub(crate) mod scheduler;
pub(crate) mod stats;
pub(crate) mod task;
pub(crate) mod timer;
pub(crate) mod waitset;

pub use carrier::{CarrierId, CarrierSnapshot, CarrierState};
pub use context::TaskContext;
pub use pinning::{PinReason, PinningEvent};
pub use scheduler::Scheduler;
pub use stats::SchedulerStats;
pub use task::{JoinHandle, TaskId, TaskSnapshot, TaskStatus};
pub use waitset::{Notifier, WaitKey};
