// src/dispatch/runtime.rs

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::model::Registry;
use crate::dispatch::dispatcher::BuildDispatcher;
use crate::dispatch::request::{DispatchCommand, OperatorRequest};
use crate::dispatch::ScheduleOp;
use crate::errors::{CiError, Result};
use crate::exec::SchedulerBackend;

/// What happened to one dispatch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// This many operations were submitted.
    Submitted(usize),
    /// The command applied to nothing (unlisted repository, type `none`).
    NothingToDo,
    /// The request was refused; the reason was reported to the requester.
    Rejected(String),
}

/// Submits dispatcher output to a [`SchedulerBackend`].
///
/// This is the IO shell around [`BuildDispatcher`]. Dispatch errors are
/// reported through the backend and logged; they never escalate past a
/// single request.
pub struct DispatchRuntime<B: SchedulerBackend> {
    registry: Arc<Registry>,
    backend: B,
}

impl<B: SchedulerBackend> fmt::Debug for DispatchRuntime<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRuntime")
            .field("repositories", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl<B: SchedulerBackend> DispatchRuntime<B> {
    pub fn new(registry: Arc<Registry>, backend: B) -> Self {
        Self { registry, backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Run one dispatch command.
    pub async fn dispatch(&mut self, command: &DispatchCommand) -> Result<DispatchOutcome> {
        let step = BuildDispatcher::new(&self.registry).step(command);
        match step {
            Ok(step) if step.is_empty() => {
                debug!(command = %command, "nothing to dispatch");
                Ok(DispatchOutcome::NothingToDo)
            }
            Ok(step) => self.submit_all(step.ops).await,
            Err(err) => self.reject(&format!("dispatch of '{command}'"), err).await,
        }
    }

    /// Run an operator build request.
    pub async fn request(&mut self, request: &OperatorRequest) -> Result<DispatchOutcome> {
        match request.plan(&self.registry) {
            Ok(ops) => self.submit_all(ops).await,
            Err(err) => {
                let what = format!("build request for '{}'", request.repo_spec);
                self.reject(&what, err).await
            }
        }
    }

    async fn submit_all(&mut self, ops: Vec<ScheduleOp>) -> Result<DispatchOutcome> {
        let count = ops.len();
        for op in ops {
            debug!(op = %op, "submitting");
            self.backend.submit(op).await?;
        }
        info!(count, "operations submitted");
        Ok(DispatchOutcome::Submitted(count))
    }

    async fn reject(&mut self, what: &str, err: CiError) -> Result<DispatchOutcome> {
        let message = match &err {
            CiError::AmbiguousRepository { candidates, .. } => format!(
                "More than one repository matches; qualify the name further: {}",
                candidates.join(", ")
            ),
            CiError::RepositoryNotFound(msg) => msg.clone(),
            other => format!("{what} failed: {other}"),
        };
        warn!(error = %err, "{what} rejected");
        self.backend.submit(ScheduleOp::Report(message.clone())).await?;
        Ok(DispatchOutcome::Rejected(message))
    }
}
