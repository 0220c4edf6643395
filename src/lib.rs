//! Deterministic deferred-task scheduler with virtual time and result
//! chaining.
//!
//! The scheduler accepts callable units of work with immediate or delayed
//! execution semantics, executes them strictly sequentially in
//! `(due time, submission order)` order, and chains one task's result
//! into the next with `then`-style continuations. Time is a pluggable
//! seam: the default [`VirtualClock`] stands still until advanced
//! (explicitly, or by the dispatch loop jumping to the next deadline),
//! which makes every run reproducible; [`MonotonicClock`] anchors the
//! same scheduler on wall time.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use deferq::Scheduler;
//!
//! let mut scheduler: Scheduler<i32> = Scheduler::new();
//! let fetch = scheduler.schedule(Duration::from_millis(10), || Ok(5))?;
//! let doubled = scheduler.then(fetch, |x| Ok(x * 2))?;
//!
//! let report = scheduler.run_until_idle();
//! assert!(report.is_clean());
//! assert_eq!(scheduler.state(doubled)?, deferq::TaskState::Completed);
//! # Ok::<(), deferq::Error>(())
//! ```
//!
//! # Modules
//!
//! - [`scheduler`]: the dispatch loop, task handles, run reports
//! - [`record`]: task records and the forward-only lifecycle
//! - [`time`]: the clock seam ([`VirtualClock`], [`MonotonicClock`])
//! - [`trace`]: bounded capture of every scheduling decision
//! - [`error`]: typed structural errors and action failure payloads
//! - [`config`]: scheduler configuration
//! - [`types`]: `TaskId` and logical `Time`
//!
//! # Failure semantics
//!
//! A failing task marks itself `Failed`, its continuation chain is
//! cancelled, and the failure lands in the [`RunReport`] returned by
//! [`Scheduler::run_until_idle`] — unrelated pending work keeps running.
//! Panics inside task bodies are caught and reported as failures by
//! default.

pub mod config;
pub mod error;
pub mod record;
pub mod scheduler;
pub mod time;
pub mod trace;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::SchedulerConfig;
pub use error::{ActionError, Error, ErrorKind};
pub use record::TaskState;
pub use scheduler::{RunReport, Scheduler, TaskFailure, TaskHandle};
pub use time::{Clock, MonotonicClock, VirtualClock};
pub use trace::{TraceEvent, TraceHandle};
pub use types::{TaskId, Time};
