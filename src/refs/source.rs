// src/refs/source.rs

//! Remote ref listing.
//!
//! [`RefSource`] is the boundary to wherever refs come from. The production
//! implementation, [`GitRemoteSource`], shells out to `git ls-remote`; tests
//! provide canned listings instead.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::config::model::RepoConfig;
use crate::errors::{CiError, Result};

/// A (name, commit) pair as listed by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub name: String,
    pub commit: String,
}

impl RemoteRef {
    pub fn new(name: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commit: commit.into(),
        }
    }
}

pub type RefListFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<RemoteRef>>> + Send + 'a>>;

/// Two independent list operations per repository.
///
/// Either call failing aborts reconciliation for that repository only.
pub trait RefSource: Send + Sync {
    fn list_tags<'a>(&'a self, repository: &'a str, repo: &'a RepoConfig) -> RefListFuture<'a>;

    fn list_branches<'a>(&'a self, repository: &'a str, repo: &'a RepoConfig)
    -> RefListFuture<'a>;
}

/// Lists refs with `git ls-remote` against the repository's `clone_url`.
///
/// Credentials are whatever the ambient git configuration provides; terminal
/// prompts are disabled so an unauthenticated remote fails instead of hanging.
#[derive(Debug, Clone)]
pub struct GitRemoteSource {
    git: String,
}

impl GitRemoteSource {
    pub fn new() -> Self {
        Self {
            git: "git".to_string(),
        }
    }

    pub fn with_git_binary(git: impl Into<String>) -> Self {
        Self { git: git.into() }
    }

    async fn ls_remote(
        &self,
        repository: &str,
        repo: &RepoConfig,
        flag: &str,
        prefix: &str,
    ) -> Result<Vec<RemoteRef>> {
        let clone_url = repo.clone_url.as_deref().ok_or_else(|| {
            CiError::ConfigError(format!(
                "no 'clone_url' specified for repository '{repository}'"
            ))
        })?;

        debug!(repository = %repository, flag, "listing remote refs");

        let output = Command::new(&self.git)
            .arg("ls-remote")
            .arg(flag)
            .arg(clone_url)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CiError::TransientFetch {
                repository: repository.to_string(),
                reason: format!("spawning '{} ls-remote': {e}", self.git),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CiError::TransientFetch {
                repository: repository.to_string(),
                reason: format!(
                    "'git ls-remote {flag}' exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_ls_remote(&stdout, prefix))
    }
}

impl Default for GitRemoteSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RefSource for GitRemoteSource {
    fn list_tags<'a>(&'a self, repository: &'a str, repo: &'a RepoConfig) -> RefListFuture<'a> {
        Box::pin(self.ls_remote(repository, repo, "--tags", "refs/tags/"))
    }

    fn list_branches<'a>(
        &'a self,
        repository: &'a str,
        repo: &'a RepoConfig,
    ) -> RefListFuture<'a> {
        Box::pin(self.ls_remote(repository, repo, "--heads", "refs/heads/"))
    }
}

/// Parse `git ls-remote` output, keeping refs under `prefix`.
///
/// Annotated tags appear twice (`v1` and `v1^{}`); the peeled entry carries
/// the commit and takes precedence.
pub fn parse_ls_remote(output: &str, prefix: &str) -> Vec<RemoteRef> {
    let mut refs: BTreeMap<String, String> = BTreeMap::new();
    let mut peeled: BTreeMap<String, String> = BTreeMap::new();

    for line in output.lines() {
        let Some((commit, full_ref)) = line.trim().split_once(char::is_whitespace) else {
            continue;
        };
        let Some(name) = full_ref.trim().strip_prefix(prefix) else {
            continue;
        };

        match name.strip_suffix("^{}") {
            Some(base) => {
                peeled.insert(base.to_string(), commit.to_string());
            }
            None => {
                refs.insert(name.to_string(), commit.to_string());
            }
        }
    }

    refs.extend(peeled);
    refs.into_iter()
        .map(|(name, commit)| RemoteRef { name, commit })
        .collect()
}
