// src/exec/mod.rs

pub mod backend;
pub mod local;
pub mod task_runner;

pub use backend::{PlanPrinter, SchedulerBackend, SubmitFuture};
pub use local::LocalScheduler;
pub use task_runner::{CommandTaskRunner, HandoffPrinter, TaskFuture, TaskOutcome, TaskRunner};
