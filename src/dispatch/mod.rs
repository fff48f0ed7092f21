// src/dispatch/mod.rs

//! Build dispatch.
//!
//! A dispatch job receives one [`DispatchCommand`] and turns it into
//! scheduler operations:
//! - the pure core in [`dispatcher`] decides *what* to enqueue;
//! - the async shell in [`runtime`] submits the result to a
//!   [`crate::exec::SchedulerBackend`] and reports rejected requests;
//! - [`request`] decodes commands and resolves operator build requests.

use std::fmt;

pub mod dispatcher;
pub mod request;
pub mod runtime;

pub use dispatcher::BuildDispatcher;
pub use request::{
    match_repository, normalize_build_target, DispatchCommand, OperatorRequest,
    DEFAULT_CASCADE_DEPTH, MAX_CASCADE_DEPTH,
};
pub use runtime::{DispatchOutcome, DispatchRuntime};

/// Repository and branch whose change caused a dependent build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub repository: String,
    pub branch: String,
}

/// A build task for a build-type handler.
///
/// `task_type` is the repository's configured `type`; the handler uses
/// `repository`/`branch` to choose its exclusivity tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub task_type: String,
    pub repository: String,
    pub branch: String,
    pub triggered_by: Option<Provenance>,
    /// Custom pipeline to run instead of the default build.
    pub pipeline: Option<String>,
    pub extra_args: Vec<String>,
}

impl TaskSpec {
    pub fn primary(
        task_type: impl Into<String>,
        repository: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            repository: repository.into(),
            branch: branch.into(),
            triggered_by: None,
            pipeline: None,
            extra_args: Vec::new(),
        }
    }

    pub fn is_dependent_build(&self) -> bool {
        self.triggered_by.is_some()
    }

    /// Positional arguments handed to the build-type handler.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.repository.clone(), self.branch.clone()];
        if let Some(trigger) = &self.triggered_by {
            args.extend([trigger.repository.clone(), trigger.branch.clone()]);
        }
        if let Some(pipeline) = &self.pipeline {
            args.push(pipeline.clone());
            args.extend(self.extra_args.iter().cloned());
        }
        args
    }
}

/// A job to run on the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub job_type: String,
    pub command: DispatchCommand,
}

impl JobSpec {
    pub fn new(job_type: impl Into<String>, command: DispatchCommand) -> Self {
        Self {
            job_type: job_type.into(),
            command,
        }
    }

    pub fn args(&self) -> Vec<String> {
        self.command.encode()
    }
}

/// One operation for the external scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOp {
    /// Append a task to the current job's pipeline.
    EnqueueTask(TaskSpec),
    /// Append a sub-job to the current job's pipeline.
    EnqueueJob(JobSpec),
    /// Start an independent job. Fire-and-forget: no result comes back.
    SpawnJob(JobSpec),
    /// Status message for the requester.
    Report(String),
}

impl fmt::Display for ScheduleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleOp::EnqueueTask(task) => {
                write!(f, "enqueue-task {} {}", task.task_type, task.args().join(" "))
            }
            ScheduleOp::EnqueueJob(job) => {
                write!(f, "enqueue-job {} {}", job.job_type, job.args().join(" "))
            }
            ScheduleOp::SpawnJob(job) => {
                write!(f, "spawn-job {} {}", job.job_type, job.args().join(" "))
            }
            ScheduleOp::Report(message) => write!(f, "report {message}"),
        }
    }
}

/// Operations produced by one dispatcher step, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStep {
    pub ops: Vec<ScheduleOp>,
}

impl DispatchStep {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.ops.iter().filter_map(|op| match op {
            ScheduleOp::EnqueueTask(task) => Some(task),
            _ => None,
        })
    }

    pub fn enqueued_jobs(&self) -> impl Iterator<Item = &JobSpec> {
        self.ops.iter().filter_map(|op| match op {
            ScheduleOp::EnqueueJob(job) => Some(job),
            _ => None,
        })
    }

    pub fn spawned_jobs(&self) -> impl Iterator<Item = &JobSpec> {
        self.ops.iter().filter_map(|op| match op {
            ScheduleOp::SpawnJob(job) => Some(job),
            _ => None,
        })
    }
}
