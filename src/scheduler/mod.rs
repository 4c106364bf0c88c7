//! Scheduler module for bounded-concurrency task execution.
//!
//! This module provides:
//! - **Task**: one unit of work with an invoke function, a completion
//!   registration function, and its arguments.
//! - **Group**: a fixed set of tasks whose callback fires once, with results
//!   in construction order, when every member has settled.
//! - **Scheduler**: a FIFO of pending tasks admitted up to a concurrency
//!   limit, with pause/resume, best-effort cancellation, and an idle
//!   callback per run.
//!
//! # Example
//!
//! ```ignore
//! use resload::scheduler::{Group, Scheduler, Task};
//!
//! let scheduler = Scheduler::new(4);
//! let group = Group::new(tasks, |items| println!("{} done", items.len()))?;
//! let id = scheduler.enqueue(group);
//! scheduler.run(|| println!("all settled"));
//! ```

mod group;
mod queue;
mod task;

pub use group::{Group, OnComplete};
pub use queue::{AllSettled, Scheduler};
pub use task::{GroupId, Invoke, RegisterCompletion, SettleHook, Task, TaskKey, TaskState};
