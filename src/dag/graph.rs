// src/dag/graph.rs

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::config::model::Registry;
use crate::errors::{CiError, Result};

/// Repositories already reached during one resolution.
///
/// Always passed in and handed back explicitly; a fresh resolution starts from
/// [`Visited::default`], so no state leaks between calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Visited {
    repositories: BTreeSet<String>,
}

impl Visited {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, repository: &str) -> bool {
        self.repositories.contains(repository)
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.repositories.iter().map(|s| s.as_str())
    }

    pub fn insert(&mut self, repository: &str) -> bool {
        self.repositories.insert(repository.to_string())
    }
}

/// Result of a single [`DependencyGraph::resolve`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Dependents in discovery order (depth-first for recursive walks).
    pub dependents: Vec<String>,
    pub visited: Visited,
}

/// Dependency edges read live from the registry.
///
/// Nothing is cached: each resolution scans the registry, so the edges always
/// reflect the registry the caller holds for the current dispatch cycle.
#[derive(Debug, Clone, Copy)]
pub struct DependencyGraph<'a> {
    registry: &'a Registry,
}

impl<'a> DependencyGraph<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Buildable repositories that list `repository` as a dependency.
    pub fn direct_dependents(&self, repository: &str) -> Vec<String> {
        self.registry
            .iter()
            .filter(|(_, repo)| repo.depends_on(repository) && repo.is_buildable())
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Resolve which repositories must rebuild because `repository` changed.
    ///
    /// With `recursive = false` only direct dependents are returned and
    /// `visited` is handed back untouched. With `recursive = true` the walk
    /// descends into each dependent; reaching a repository that is already in
    /// `visited` fails the whole resolution with
    /// [`CiError::DependencyCycle`].
    pub fn resolve(
        &self,
        repository: &str,
        recursive: bool,
        visited: Visited,
    ) -> Result<Resolution> {
        let direct = self.direct_dependents(repository);

        if !recursive {
            debug!(
                repository = %repository,
                dependents = ?direct,
                "resolved direct dependents"
            );
            return Ok(Resolution {
                dependents: direct,
                visited,
            });
        }

        let mut visited = visited;
        visited.insert(repository);

        let mut dependents = Vec::new();
        for dependent in direct {
            if visited.contains(&dependent) {
                warn!(
                    repository = %repository,
                    dependent = %dependent,
                    "repository reached twice while walking dependents; aborting resolution"
                );
                return Err(CiError::DependencyCycle(dependent));
            }

            visited.insert(&dependent);
            dependents.push(dependent.clone());

            let nested = self.resolve(&dependent, true, visited)?;
            visited = nested.visited;
            dependents.extend(nested.dependents);
        }

        debug!(
            repository = %repository,
            dependents = ?dependents,
            "resolved transitive dependents"
        );

        Ok(Resolution {
            dependents,
            visited,
        })
    }
}
