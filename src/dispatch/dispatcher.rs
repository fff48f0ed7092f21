// src/dispatch/dispatcher.rs

//! Pure dispatch core.
//!
//! [`BuildDispatcher::step`] maps one [`DispatchCommand`] to the scheduler
//! operations it requires, without performing any IO. All dependency
//! resolution happens before the first operation is produced, so an error
//! (cycle, bad configuration) yields no operations at all.

use tracing::debug;

use crate::config::model::{Registry, RepoConfig, TYPE_NONE};
use crate::dag::{DependencyGraph, Visited};
use crate::dispatch::request::{DispatchCommand, DEFAULT_CASCADE_DEPTH, MAX_CASCADE_DEPTH};
use crate::dispatch::{DispatchStep, JobSpec, Provenance, ScheduleOp, TaskSpec};
use crate::errors::{CiError, Result};

/// Dispatch state machine over the registry of the current cycle.
#[derive(Debug, Clone, Copy)]
pub struct BuildDispatcher<'a> {
    registry: &'a Registry,
    graph: DependencyGraph<'a>,
}

impl<'a> BuildDispatcher<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            graph: DependencyGraph::new(registry),
        }
    }

    fn dispatch_job(&self) -> &str {
        &self.registry.config.dispatch_job
    }

    /// Handle one command.
    ///
    /// Returns an empty step when nothing applies (unregistered repository,
    /// type `"none"`, no dependents). Returns `Err` for configuration errors
    /// and dependency cycles; the caller reports those.
    pub fn step(&self, command: &DispatchCommand) -> Result<DispatchStep> {
        debug!(command = %command, "dispatching");
        match command {
            DispatchCommand::Build { repository, branch } => self.build(repository, branch),
            DispatchCommand::BuildDeps {
                repository,
                branch,
                depth,
            } => Ok(self.build_deps(repository, branch, *depth)),
            DispatchCommand::DepBuild {
                repository,
                branch,
                triggering_repository,
                triggering_branch,
                depth,
            } => self.dep_build(
                repository,
                branch,
                Provenance {
                    repository: triggering_repository.clone(),
                    branch: triggering_branch.clone(),
                },
                *depth,
            ),
            DispatchCommand::Job {
                repository,
                branch,
                pipeline,
                extra_args,
            } => self.job(repository, branch, pipeline, extra_args),
        }
    }

    /// Primary build plus, when anything depends on the repository, one
    /// sequential `builddeps` follow-on.
    fn build(&self, repository: &str, branch: &str) -> Result<DispatchStep> {
        let Some(repo) = self.registry.get(repository) else {
            debug!(
                repository = %repository,
                "ignoring update, not a listed repository"
            );
            return Ok(DispatchStep::default());
        };
        let Some(task_type) = build_type(repository, repo)? else {
            return Ok(DispatchStep::default());
        };

        // Walk the full dependent tree up front so a cycle aborts the whole
        // dispatch before anything is enqueued.
        let resolution = self.graph.resolve(repository, true, Visited::new())?;

        let mut ops = vec![ScheduleOp::EnqueueTask(TaskSpec::primary(
            task_type, repository, branch,
        ))];

        if resolution.dependents.is_empty() {
            debug!(repository = %repository, "no dependent repositories");
        } else {
            ops.push(ScheduleOp::EnqueueJob(JobSpec::new(
                self.dispatch_job(),
                DispatchCommand::BuildDeps {
                    repository: repository.to_string(),
                    branch: branch.to_string(),
                    depth: DEFAULT_CASCADE_DEPTH,
                },
            )));
        }

        Ok(DispatchStep { ops })
    }

    /// One independent `depbuild` job per direct dependent, with no join.
    fn build_deps(&self, repository: &str, branch: &str, depth: u8) -> DispatchStep {
        let dependents = self.graph.direct_dependents(repository);
        if dependents.is_empty() {
            debug!(repository = %repository, "no dependent repositories to build");
            return DispatchStep::default();
        }

        let ops = dependents
            .into_iter()
            .filter_map(|dependent| {
                let repo = self.registry.get(&dependent)?;
                debug!(
                    dependent = %dependent,
                    repository = %repository,
                    branch = %branch,
                    "spawning dependent build"
                );
                Some(ScheduleOp::SpawnJob(JobSpec::new(
                    self.dispatch_job(),
                    DispatchCommand::DepBuild {
                        branch: repo.effective_default_branch().to_string(),
                        repository: dependent,
                        triggering_repository: repository.to_string(),
                        triggering_branch: branch.to_string(),
                        depth,
                    },
                )))
            })
            .collect();

        DispatchStep { ops }
    }

    /// Build a dependent repository, then cascade at most one more level.
    fn dep_build(
        &self,
        repository: &str,
        branch: &str,
        provenance: Provenance,
        depth: u8,
    ) -> Result<DispatchStep> {
        let Some(repo) = self.registry.get(repository) else {
            debug!(
                repository = %repository,
                "ignoring dependent build, not a listed repository"
            );
            return Ok(DispatchStep::default());
        };
        let Some(task_type) = build_type(repository, repo)? else {
            return Ok(DispatchStep::default());
        };

        let mut ops = vec![ScheduleOp::EnqueueTask(TaskSpec {
            triggered_by: Some(provenance),
            ..TaskSpec::primary(task_type, repository, branch)
        })];

        if depth >= MAX_CASCADE_DEPTH {
            debug!(
                repository = %repository,
                depth,
                "cascade limit reached; not building dependents of a dependent"
            );
        } else if !self.graph.direct_dependents(repository).is_empty() {
            ops.push(ScheduleOp::EnqueueJob(JobSpec::new(
                self.dispatch_job(),
                DispatchCommand::BuildDeps {
                    repository: repository.to_string(),
                    branch: branch.to_string(),
                    depth: depth + 1,
                },
            )));
        }

        Ok(DispatchStep { ops })
    }

    /// Run a named pipeline instead of the default build.
    fn job(
        &self,
        repository: &str,
        branch: &str,
        pipeline: &str,
        extra_args: &[String],
    ) -> Result<DispatchStep> {
        let repo = self.registry.get(repository).ok_or_else(|| {
            CiError::ConfigError(format!(
                "repository '{repository}' is not in the registry"
            ))
        })?;
        let Some(task_type) = build_type(repository, repo)? else {
            return Ok(DispatchStep::default());
        };

        Ok(DispatchStep {
            ops: vec![ScheduleOp::EnqueueTask(TaskSpec {
                pipeline: Some(pipeline.to_string()),
                extra_args: extra_args.to_vec(),
                ..TaskSpec::primary(task_type, repository, branch)
            })],
        })
    }
}

/// The repository's build type; `Ok(None)` for type `"none"`.
fn build_type<'r>(repository: &str, repo: &'r RepoConfig) -> Result<Option<&'r str>> {
    match repo.repo_type.as_deref() {
        None | Some("") => Err(CiError::ConfigError(format!(
            "no 'type' specified for repository '{repository}'"
        ))),
        Some(TYPE_NONE) => {
            debug!(
                repository = %repository,
                "ignoring update, repository type is 'none'"
            );
            Ok(None)
        }
        Some(t) => Ok(Some(t)),
    }
}
