// src/config/model.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::types::{LockGranularity, StateStorageMode};

/// Value of `type` that disables builds for a repository.
pub const TYPE_NONE: &str = "none";

/// Branch used when a repository does not declare `default_branch`.
pub const FALLBACK_DEFAULT_BRANCH: &str = "master";

/// Retention used when a repository does not declare `keep_history`.
pub const DEFAULT_KEEP_HISTORY: u32 = 7;

/// Registry file as read from TOML, before validation.
///
/// ```toml
/// [config]
/// dispatch_job = "ci-dispatch"
/// lock_granularity = "branch"
///
/// [repository."github.com/org/website"]
/// type = "localbuild"
/// clone_url = "https://github.com/org/website.git"
/// dependencies = ["github.com/org/theme"]
/// default_branch = "main"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawRegistryFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Keys are full repository names (`host/org/name`).
    #[serde(default)]
    pub repository: BTreeMap<String, RepoConfig>,
}

/// Validated registry file.
///
/// Only constructible through `TryFrom<RawRegistryFile>`, so the rest of the
/// crate can rely on well-formed repository names and global settings.
#[derive(Debug, Clone)]
pub struct Registry {
    pub config: ConfigSection,
    repositories: BTreeMap<String, RepoConfig>,
}

impl Registry {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        repositories: BTreeMap<String, RepoConfig>,
    ) -> Self {
        Self {
            config,
            repositories,
        }
    }

    pub fn get(&self, name: &str) -> Option<&RepoConfig> {
        self.repositories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.repositories.contains_key(name)
    }

    /// All entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RepoConfig)> {
        self.repositories.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.repositories.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Job type the dispatcher uses for its own `builddeps`/`depbuild` jobs.
    #[serde(default = "default_dispatch_job")]
    pub dispatch_job: String,

    #[serde(default)]
    pub state_storage: StateStorageMode,

    /// Directory for file-backed state, relative to the config file.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Key under which the ref snapshot is checked out and committed.
    #[serde(default = "default_state_key")]
    pub state_key: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default)]
    pub lock_granularity: LockGranularity,

    /// Passed as `queueIfBusy` when a build handler acquires its tag.
    #[serde(default)]
    pub queue_if_busy: bool,

    /// Command that receives build tasks. Without one, tasks are printed.
    #[serde(default)]
    pub task_command: Option<String>,
}

fn default_dispatch_job() -> String {
    "ci-dispatch".to_string()
}

fn default_state_dir() -> String {
    ".ci-dispatch".to_string()
}

fn default_state_key() -> String {
    "repostats".to_string()
}

fn default_poll_interval() -> String {
    "5m".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            dispatch_job: default_dispatch_job(),
            state_storage: StateStorageMode::default(),
            state_dir: default_state_dir(),
            state_key: default_state_key(),
            poll_interval: default_poll_interval(),
            lock_granularity: LockGranularity::default(),
            queue_if_busy: false,
            task_command: None,
        }
    }
}

/// `[repository."host/org/name"]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RepoConfig {
    /// Build type (task type of the primary build). `"none"` disables builds;
    /// absence is a configuration error reported when the repository is used.
    #[serde(default, rename = "type")]
    pub repo_type: Option<String>,

    #[serde(default)]
    pub clone_url: Option<String>,

    /// Repositories this one is built against.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    #[serde(default)]
    pub default_branch: Option<String>,

    /// Number of builds to keep in history.
    #[serde(default)]
    pub keep_history: Option<u32>,
}

impl RepoConfig {
    /// The build type, if present and not `"none"`.
    pub fn build_type(&self) -> Option<&str> {
        match self.repo_type.as_deref() {
            Some(t) if !t.is_empty() && t != TYPE_NONE => Some(t),
            _ => None,
        }
    }

    pub fn is_buildable(&self) -> bool {
        self.build_type().is_some()
    }

    pub fn depends_on(&self, repository: &str) -> bool {
        self.dependencies.contains(repository)
    }

    pub fn effective_default_branch(&self) -> &str {
        self.default_branch
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(FALLBACK_DEFAULT_BRANCH)
    }

    pub fn effective_keep_history(&self) -> u32 {
        self.keep_history.unwrap_or(DEFAULT_KEEP_HISTORY)
    }
}
