#![allow(dead_code)]

use std::collections::BTreeMap;

use ci_dispatch::config::{ConfigSection, RawRegistryFile, Registry, RepoConfig};
use ci_dispatch::types::{LockGranularity, StateStorageMode};

/// Builder for `Registry` to simplify test setup.
pub struct RegistryBuilder {
    raw: RawRegistryFile,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawRegistryFile {
                config: ConfigSection {
                    state_storage: StateStorageMode::Memory,
                    ..ConfigSection::default()
                },
                repository: BTreeMap::new(),
            },
        }
    }

    pub fn with_repo(mut self, name: &str, repo: RepoConfig) -> Self {
        self.raw.repository.insert(name.to_string(), repo);
        self
    }

    pub fn with_dispatch_job(mut self, job: &str) -> Self {
        self.raw.config.dispatch_job = job.to_string();
        self
    }

    pub fn with_lock_granularity(mut self, granularity: LockGranularity) -> Self {
        self.raw.config.lock_granularity = granularity;
        self
    }

    pub fn with_state_key(mut self, key: &str) -> Self {
        self.raw.config.state_key = key.to_string();
        self
    }

    pub fn raw(self) -> RawRegistryFile {
        self.raw
    }

    pub fn build(self) -> Registry {
        Registry::try_from(self.raw).expect("Failed to build valid registry from builder")
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `RepoConfig`.
pub struct RepoConfigBuilder {
    repo: RepoConfig,
}

impl RepoConfigBuilder {
    /// A repository of the given build type.
    pub fn new(repo_type: &str) -> Self {
        Self {
            repo: RepoConfig {
                repo_type: Some(repo_type.to_string()),
                ..RepoConfig::default()
            },
        }
    }

    /// A repository without a `type`.
    pub fn untyped() -> Self {
        Self {
            repo: RepoConfig::default(),
        }
    }

    pub fn depends_on(mut self, dep: &str) -> Self {
        self.repo.dependencies.insert(dep.to_string());
        self
    }

    pub fn default_branch(mut self, branch: &str) -> Self {
        self.repo.default_branch = Some(branch.to_string());
        self
    }

    pub fn clone_url(mut self, url: &str) -> Self {
        self.repo.clone_url = Some(url.to_string());
        self
    }

    pub fn keep_history(mut self, count: u32) -> Self {
        self.repo.keep_history = Some(count);
        self
    }

    pub fn build(self) -> RepoConfig {
        self.repo
    }
}

/// The two-repository registry used throughout the dispatch tests:
/// `gh/o/b` depends on `gh/o/a`.
pub fn two_repo_registry() -> Registry {
    RegistryBuilder::new()
        .with_repo("gh/o/a", RepoConfigBuilder::new("ci").build())
        .with_repo(
            "gh/o/b",
            RepoConfigBuilder::new("ci")
                .depends_on("gh/o/a")
                .default_branch("develop")
                .build(),
        )
        .build()
}
