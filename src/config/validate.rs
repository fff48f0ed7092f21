// src/config/validate.rs

use std::fmt;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;

use crate::config::model::{RawRegistryFile, Registry};
use crate::dag::{DependencyGraph, Visited};
use crate::errors::{CiError, Result};
use crate::types::parse_duration;

/// Repository names are always `host/organization/name`.
const REPO_NAME_PATTERN: &str = r"^[^/\s]+/[^/\s]+/[^/\s]+$";

impl TryFrom<RawRegistryFile> for Registry {
    type Error = CiError;

    fn try_from(raw: RawRegistryFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_registry(&raw)?;
        Ok(Registry::new_unchecked(raw.config, raw.repository))
    }
}

fn validate_raw_registry(raw: &RawRegistryFile) -> Result<()> {
    validate_global_config(raw)?;
    validate_repository_names(raw)?;
    Ok(())
}

fn validate_global_config(raw: &RawRegistryFile) -> Result<()> {
    if raw.config.dispatch_job.trim().is_empty() {
        return Err(CiError::ConfigError(
            "[config].dispatch_job must not be empty".to_string(),
        ));
    }

    if raw.config.state_key.trim().is_empty() {
        return Err(CiError::ConfigError(
            "[config].state_key must not be empty".to_string(),
        ));
    }

    let interval = parse_duration(&raw.config.poll_interval).map_err(|e| {
        CiError::ConfigError(format!("[config].poll_interval is invalid: {e}"))
    })?;
    if interval.is_zero() {
        return Err(CiError::ConfigError(
            "[config].poll_interval must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_repository_names(raw: &RawRegistryFile) -> Result<()> {
    let re = Regex::new(REPO_NAME_PATTERN)
        .map_err(|e| CiError::Other(anyhow::Error::from(e)))?;

    for name in raw.repository.keys() {
        if !re.is_match(name) {
            return Err(CiError::ConfigError(format!(
                "repository '{}' must be named 'host/organization/name'",
                name
            )));
        }
    }
    Ok(())
}

/// Non-fatal problem found in a registry.
///
/// These are reported (logged, shown by `check`) but never stop a pass; the
/// affected repository is skipped wherever the problem matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    MissingType { repository: String },
    SelfDependency { repository: String },
    UnknownDependency { repository: String, dependency: String },
    DependencyCycle { repository: String },
    /// `dependent` is reached along two paths from `repository`, so a
    /// `build` of `repository` aborts its dependency walk.
    SharedDependent { repository: String, dependent: String },
}

impl ConfigIssue {
    /// Unknown dependencies are legal (external repositories); everything
    /// else deserves a warning.
    pub fn is_warning(&self) -> bool {
        !matches!(self, ConfigIssue::UnknownDependency { .. })
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIssue::MissingType { repository } => {
                write!(f, "no 'type' specified for repository '{repository}'")
            }
            ConfigIssue::SelfDependency { repository } => {
                write!(f, "repository '{repository}' lists itself as a dependency")
            }
            ConfigIssue::UnknownDependency {
                repository,
                dependency,
            } => write!(
                f,
                "repository '{repository}' depends on '{dependency}', which is not in the registry"
            ),
            ConfigIssue::DependencyCycle { repository } => write!(
                f,
                "dependency cycle in registry involving repository '{repository}'"
            ),
            ConfigIssue::SharedDependent {
                repository,
                dependent,
            } => write!(
                f,
                "repository '{dependent}' is reached twice from '{repository}'; builds of '{repository}' will abort"
            ),
        }
    }
}

/// Collect the soft issues of a validated registry.
pub fn lint_registry(registry: &Registry) -> Vec<ConfigIssue> {
    let mut issues = Vec::new();

    for (name, repo) in registry.iter() {
        if repo.repo_type.is_none() {
            issues.push(ConfigIssue::MissingType {
                repository: name.to_string(),
            });
        }
        for dep in repo.dependencies.iter() {
            if dep == name {
                issues.push(ConfigIssue::SelfDependency {
                    repository: name.to_string(),
                });
            } else if !registry.contains(dep) {
                issues.push(ConfigIssue::UnknownDependency {
                    repository: name.to_string(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let self_dependent = issues
        .iter()
        .any(|i| matches!(i, ConfigIssue::SelfDependency { .. }));
    match find_cycle(registry) {
        Some(issue) => issues.push(issue),
        None if !self_dependent => issues.extend(find_shared_dependents(registry)),
        None => {}
    }

    issues
}

/// Walk every buildable repository's dependents the way dispatch does.
/// Without cycles or self-dependencies a failed walk means a shared dependent.
fn find_shared_dependents(registry: &Registry) -> Vec<ConfigIssue> {
    let graph = DependencyGraph::new(registry);
    registry
        .iter()
        .filter(|(_, repo)| repo.is_buildable())
        .filter_map(|(name, _)| match graph.resolve(name, true, Visited::new()) {
            Err(CiError::DependencyCycle(dependent)) => Some(ConfigIssue::SharedDependent {
                repository: name.to_string(),
                dependent,
            }),
            _ => None,
        })
        .collect()
}

fn find_cycle(registry: &Registry) -> Option<ConfigIssue> {
    // Edge direction: base -> dependent. For
    //   [repository."h/o/b"]
    //   dependencies = ["h/o/a"]
    // we add edge h/o/a -> h/o/b.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in registry.names() {
        graph.add_node(name);
    }

    for (name, repo) in registry.iter() {
        for dep in repo.dependencies.iter() {
            if dep != name && registry.contains(dep) {
                graph.add_edge(dep.as_str(), name, ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => None,
        Err(cycle) => Some(ConfigIssue::DependencyCycle {
            repository: cycle.node_id().to_string(),
        }),
    }
}
