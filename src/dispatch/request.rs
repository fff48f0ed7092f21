// src/dispatch/request.rs

//! Decoding of dispatch commands and operator build requests.

use std::collections::BTreeSet;
use std::fmt;

use tracing::debug;

use crate::config::model::{Registry, FALLBACK_DEFAULT_BRANCH};
use crate::dispatch::{JobSpec, ScheduleOp};
use crate::errors::{CiError, Result};
use crate::refs::ChangeEvent;

/// Cascade depth of the `builddeps` job that follows a primary build.
pub const DEFAULT_CASCADE_DEPTH: u8 = 1;

/// A `depbuild` at this depth does not enqueue any further `builddeps`.
///
/// With the default of 2, a change to A builds A's dependents (depth 1) and
/// their dependents (depth 2), and stops there.
pub const MAX_CASCADE_DEPTH: u8 = 2;

/// A dispatch job command, decoded once from its argument list.
///
/// Each variant only carries the fields it needs. The wire form is the
/// command name followed by positional arguments:
///
/// ```text
/// build     <repository> <branch>
/// builddeps <repository> <branch> [depth]
/// depbuild  <repository> <branch> <triggering-repository> <triggering-branch> [depth]
/// job       <repository> <branch> <pipeline> [extra-args...]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchCommand {
    Build {
        repository: String,
        branch: String,
    },
    BuildDeps {
        repository: String,
        branch: String,
        depth: u8,
    },
    DepBuild {
        repository: String,
        branch: String,
        triggering_repository: String,
        triggering_branch: String,
        depth: u8,
    },
    Job {
        repository: String,
        branch: String,
        pipeline: String,
        extra_args: Vec<String>,
    },
}

impl DispatchCommand {
    pub fn name(&self) -> &'static str {
        match self {
            DispatchCommand::Build { .. } => "build",
            DispatchCommand::BuildDeps { .. } => "builddeps",
            DispatchCommand::DepBuild { .. } => "depbuild",
            DispatchCommand::Job { .. } => "job",
        }
    }

    pub fn repository(&self) -> &str {
        match self {
            DispatchCommand::Build { repository, .. }
            | DispatchCommand::BuildDeps { repository, .. }
            | DispatchCommand::DepBuild { repository, .. }
            | DispatchCommand::Job { repository, .. } => repository,
        }
    }

    pub fn branch(&self) -> &str {
        match self {
            DispatchCommand::Build { branch, .. }
            | DispatchCommand::BuildDeps { branch, .. }
            | DispatchCommand::DepBuild { branch, .. }
            | DispatchCommand::Job { branch, .. } => branch,
        }
    }

    /// Decode a command from its wire arguments (command name first).
    pub fn decode<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        let Some((command, rest)) = args.split_first() else {
            return Err(CiError::InvalidRequest("missing dispatch command".to_string()));
        };

        match (*command, rest) {
            ("build", [first, second]) => {
                let (repository, branch) = normalize_build_target(first, second);
                Ok(DispatchCommand::Build { repository, branch })
            }
            ("builddeps", [repository, branch, depth @ ..]) if depth.len() <= 1 => {
                Ok(DispatchCommand::BuildDeps {
                    repository: repository.to_string(),
                    branch: branch.to_string(),
                    depth: decode_depth(depth.first().copied())?,
                })
            }
            (
                "depbuild",
                [repository, branch, triggering_repository, triggering_branch, depth @ ..],
            ) if depth.len() <= 1 => Ok(DispatchCommand::DepBuild {
                repository: repository.to_string(),
                branch: branch.to_string(),
                triggering_repository: triggering_repository.to_string(),
                triggering_branch: triggering_branch.to_string(),
                depth: decode_depth(depth.first().copied())?,
            }),
            ("job", [repository, branch, pipeline, extra @ ..]) => Ok(DispatchCommand::Job {
                repository: repository.to_string(),
                branch: branch.to_string(),
                pipeline: pipeline.to_string(),
                extra_args: extra.iter().map(|s| s.to_string()).collect(),
            }),
            ("build" | "builddeps" | "depbuild" | "job", _) => Err(CiError::InvalidRequest(
                format!("wrong number of arguments for '{command}': {:?}", rest),
            )),
            (other, _) => Err(CiError::InvalidRequest(format!(
                "unknown dispatch command '{other}' (expected build, builddeps, depbuild or job)"
            ))),
        }
    }

    /// Wire arguments for this command, the inverse of [`DispatchCommand::decode`].
    pub fn encode(&self) -> Vec<String> {
        let mut args = vec![self.name().to_string()];
        match self {
            DispatchCommand::Build { repository, branch } => {
                args.extend([repository.clone(), branch.clone()]);
            }
            DispatchCommand::BuildDeps {
                repository,
                branch,
                depth,
            } => {
                args.extend([repository.clone(), branch.clone(), depth.to_string()]);
            }
            DispatchCommand::DepBuild {
                repository,
                branch,
                triggering_repository,
                triggering_branch,
                depth,
            } => {
                args.extend([
                    repository.clone(),
                    branch.clone(),
                    triggering_repository.clone(),
                    triggering_branch.clone(),
                    depth.to_string(),
                ]);
            }
            DispatchCommand::Job {
                repository,
                branch,
                pipeline,
                extra_args,
            } => {
                args.extend([repository.clone(), branch.clone(), pipeline.clone()]);
                args.extend(extra_args.iter().cloned());
            }
        }
        args
    }
}

impl fmt::Display for DispatchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode().join(" "))
    }
}

impl From<&ChangeEvent> for DispatchCommand {
    fn from(event: &ChangeEvent) -> Self {
        DispatchCommand::Build {
            repository: event.repository.clone(),
            branch: event.ref_name.clone(),
        }
    }
}

fn decode_depth(raw: Option<&str>) -> Result<u8> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_CASCADE_DEPTH);
    };
    match raw.parse::<u8>() {
        Ok(depth) if depth >= 1 => Ok(depth),
        _ => Err(CiError::InvalidRequest(format!(
            "invalid cascade depth '{raw}' (expected a number >= 1)"
        ))),
    }
}

/// Normalise the (repository, branch) pair of a `build` request.
///
/// Branch names never end in `/`, so a trailing separator on the second
/// argument means the caller swapped the arguments: the pair is swapped back.
/// Trailing separators are then stripped from the repository name.
pub fn normalize_build_target(first: &str, second: &str) -> (String, String) {
    let (repository, branch) = if second.ends_with('/') {
        debug!(
            first = %first,
            second = %second,
            "second argument ends with '/'; treating arguments as swapped"
        );
        (second, first)
    } else {
        (first, second)
    };

    (
        repository.trim_end_matches('/').to_string(),
        branch.to_string(),
    )
}

/// A human-issued build request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorRequest {
    /// `name`, `org/name` or `host/org/name`, matched case-insensitively.
    pub repo_spec: String,
    /// Empty or absent means the repository's default branch.
    pub branch: Option<String>,
    /// Run this custom pipeline instead of the default build.
    pub pipeline: Option<String>,
    pub extra_args: Vec<String>,
}

impl OperatorRequest {
    pub fn build(repo_spec: impl Into<String>, branch: Option<String>) -> Self {
        Self {
            repo_spec: repo_spec.into(),
            branch,
            pipeline: None,
            extra_args: Vec::new(),
        }
    }

    /// Resolve the request against the registry and produce the operations
    /// that start it: an acknowledgement plus one sequential dispatch job.
    pub fn plan(&self, registry: &Registry) -> Result<Vec<ScheduleOp>> {
        let repository = match_repository(registry, &self.repo_spec)?;

        let branch = match self.branch.as_deref() {
            Some(b) if !b.is_empty() => b.to_string(),
            _ => registry
                .get(&repository)
                .map(|r| r.effective_default_branch().to_string())
                .unwrap_or_else(|| FALLBACK_DEFAULT_BRANCH.to_string()),
        };

        let command = match &self.pipeline {
            Some(pipeline) => DispatchCommand::Job {
                repository: repository.clone(),
                branch: branch.clone(),
                pipeline: pipeline.clone(),
                extra_args: self.extra_args.clone(),
            },
            None => DispatchCommand::Build {
                repository: repository.clone(),
                branch: branch.clone(),
            },
        };

        let dispatch_job = registry.config.dispatch_job.clone();
        Ok(vec![
            ScheduleOp::Report(format!(
                "Ok, I'll start the {dispatch_job} job for {repository}, {branch} branch..."
            )),
            ScheduleOp::EnqueueJob(JobSpec::new(dispatch_job, command)),
        ])
    }
}

/// Match a short or qualified repository spec against registry names and
/// declared dependency names.
///
/// A spec with `n` components matches the last `n` components of a name.
/// More than one match is rejected rather than guessed.
pub fn match_repository(registry: &Registry, spec: &str) -> Result<String> {
    let spec = spec.trim().trim_end_matches('/').to_lowercase();
    if spec.is_empty() {
        return Err(CiError::InvalidRequest(
            "a repository name is required".to_string(),
        ));
    }
    let components = spec.split('/').count();

    let mut known: BTreeSet<&str> = registry.names().collect();
    for (_, repo) in registry.iter() {
        known.extend(repo.dependencies.iter().map(|d| d.as_str()));
    }

    let candidates: Vec<String> = known
        .into_iter()
        .filter(|name| suffix(&name.to_lowercase(), components) == spec)
        .map(|name| name.to_string())
        .collect();

    match candidates.len() {
        0 => Err(CiError::RepositoryNotFound(format!(
            "I don't have any repositories matching {spec}"
        ))),
        1 => Ok(candidates.into_iter().next().unwrap_or_default()),
        _ => Err(CiError::AmbiguousRepository { spec, candidates }),
    }
}

fn suffix(name: &str, components: usize) -> String {
    let parts: Vec<&str> = name.split('/').collect();
    let start = parts.len().saturating_sub(components);
    parts[start..].join("/")
}
