// src/refs/tracker.rs

//! Pure ref reconciliation.
//!
//! No IO happens here: the poller fetches refs and checks out the snapshot,
//! then hands both to [`reconcile`] one repository at a time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::Result;
use crate::refs::source::RemoteRef;

/// Ref name -> commit identifier for one repository.
pub type RefMap = BTreeMap<String, String>;

/// Last-known refs of every tracked repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefSnapshot {
    repositories: BTreeMap<String, RefMap>,
}

impl RefSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a committed snapshot. An empty value is an empty snapshot.
    pub fn decode(value: &str) -> Result<Self> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(toml::from_str(value)?)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn get(&self, repository: &str) -> Option<&RefMap> {
        self.repositories.get(repository)
    }

    pub fn contains(&self, repository: &str) -> bool {
        self.repositories.contains_key(repository)
    }

    pub fn insert(&mut self, repository: impl Into<String>, refs: RefMap) {
        self.repositories.insert(repository.into(), refs);
    }

    pub fn repositories(&self) -> impl Iterator<Item = (&str, &RefMap)> {
        self.repositories.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

/// A ref whose commit differs from the stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub repository: String,
    pub ref_name: String,
    /// Empty when the ref is new.
    pub previous_commit: String,
    pub current_commit: String,
    /// The repository had no snapshot entry at all before this reconciliation.
    pub is_first_seen_repo: bool,
}

impl ChangeEvent {
    /// Whether the dispatcher should build for this event.
    ///
    /// Events of a first-seen repository only populate the snapshot.
    pub fn is_actionable(&self) -> bool {
        !self.is_first_seen_repo
    }
}

/// Output of reconciling one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// The repository's new snapshot entry.
    pub snapshot: RefMap,
    pub events: Vec<ChangeEvent>,
    /// Refs removed from the snapshot because they no longer exist remotely.
    pub pruned: Vec<String>,
}

/// Merge tags and branches into one namespace.
///
/// Branches are applied after tags, so on a name collision the branch wins;
/// within a list, the last entry for a name wins.
pub fn merge_refs(tags: &[RemoteRef], branches: &[RemoteRef]) -> RefMap {
    let mut refs = RefMap::new();
    for r in tags.iter().chain(branches.iter()) {
        refs.insert(r.name.clone(), r.commit.clone());
    }
    refs
}

/// Reconcile freshly fetched refs against the stored entry for `repository`.
///
/// Must only be called when *both* ref listings succeeded; on a fetch failure
/// the caller skips the repository so nothing is updated or pruned.
pub fn reconcile(
    repository: &str,
    tags: &[RemoteRef],
    branches: &[RemoteRef],
    stored: Option<&RefMap>,
) -> Reconciliation {
    let fetched = merge_refs(tags, branches);
    let is_first_seen_repo = stored.is_none();
    let empty = RefMap::new();
    let stored = stored.unwrap_or(&empty);

    let mut events = Vec::new();
    for (name, commit) in fetched.iter() {
        let last = stored.get(name).map(String::as_str).unwrap_or("");
        let changed = commit != last;
        debug!(
            repository = %repository,
            ref_name = %name,
            last = %last,
            current = %commit,
            changed,
            "evaluating ref"
        );
        if !changed {
            continue;
        }

        if is_first_seen_repo {
            info!(
                repository = %repository,
                ref_name = %name,
                "recording ref without building (repository seen for the first time)"
            );
        }

        events.push(ChangeEvent {
            repository: repository.to_string(),
            ref_name: name.clone(),
            previous_commit: last.to_string(),
            current_commit: commit.clone(),
            is_first_seen_repo,
        });
    }

    let pruned: Vec<String> = stored
        .keys()
        .filter(|name| !fetched.contains_key(*name))
        .cloned()
        .collect();
    for name in &pruned {
        info!(
            repository = %repository,
            ref_name = %name,
            "pruning ref no longer present remotely"
        );
    }

    Reconciliation {
        snapshot: fetched,
        events,
        pruned,
    }
}
