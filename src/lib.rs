//! # tasktree
//!
//! An in-process task-supervision runtime: units of work with an explicit
//! lifecycle, organized into parent/child hierarchies and driven by one
//! single-threaded reactor per parent. The in-process analogue of a
//! supervision tree: parents own children, child failures are observed and
//! optionally retried, and stopping a parent deterministically tears down
//! its entire subtree, bottom-up.
//!
//! ## Features
//!
//! - **Lifecycle state machine**: `Init → Starting → Started → {Running |
//!   Going} → Disposing → Disposed`, with optional Start / blocking-Run /
//!   async-Go / Dispose / Tick hooks declared on a [`TaskSpec`]
//! - **Typed stop causes**: every stop carries a [`TaskError`] readable
//!   after the fact from handles, settlements, and snapshots
//! - **Retry policy**: max attempts, minimum interval between attempts,
//!   preserved counters across in-place restarts
//! - **Dynamic reactors**: each [`Job`] multiplexes an arbitrary, changing
//!   set of child signal sources plus a bounded control queue, on one lazily
//!   activated tokio task
//! - **Observability**: [`TaskInfo`] materializes a serializable tree of the
//!   whole hierarchy for dashboards and persistence
//!
//! ## Quick Start
//!
//! ```rust
//! use tasktree::{Manager, TaskError, TaskSpec};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager: Manager<()> = Manager::new();
//!
//!     let task = manager.job().add_task(TaskSpec::new("Greeter").run(|_| {
//!         println!("hello from the reactor");
//!         Ok(())
//!     }));
//!
//!     // A successful blocking run stops with the completion sentinel.
//!     assert_eq!(task.wait_stopped().await, TaskError::Complete);
//! }
//! ```
//!
//! ## Supervision with retries
//!
//! ```rust
//! use std::time::Duration;
//! use tasktree::{Manager, TaskError, TaskSpec};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager: Manager<()> = Manager::new();
//!
//!     // A job that owns one flaky child, restarted up to 2 times with at
//!     // least 10ms between attempt starts.
//!     let job = manager
//!         .job()
//!         .add_task(TaskSpec::job("Pipeline"))
//!         .as_job()
//!         .expect("job spec");
//!
//!     let flaky = job.add_task(
//!         TaskSpec::new("Flaky")
//!             .retry(2, Duration::from_millis(10))
//!             .run(|_| Err(TaskError::custom("boom"))),
//!     );
//!
//!     // 1 attempt + 2 retries, then the last failure is the stop reason.
//!     let reason = flaky.wait_stopped().await;
//!     assert_eq!(reason, TaskError::custom("boom"));
//! }
//! ```
//!
//! ## Process-wide tree
//!
//! [`Root`] bootstraps a keepalive tree wired to OS termination signals; see
//! its module docs. The reactor internals — activation, capacity limits,
//! fault containment — are documented on the individual types.

pub mod tasks;

pub use tasks::channel::{TickPayload, async_tick};
pub use tasks::config::{RetryConfig, TaskKey, TaskSpec};
pub use tasks::error::TaskError;
pub use tasks::info::{TaskInfo, TaskStats};
pub use tasks::job::Job;
pub use tasks::promise::{Settlement, StopToken};
pub use tasks::root::Root;
pub use tasks::state::{TaskKind, TaskState};
pub use tasks::task::{OWNER_TYPE_KEY, Task, propagate_panics};
pub use tasks::work::Manager;
