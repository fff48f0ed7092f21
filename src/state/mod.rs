// src/state/mod.rs

//! Locked persistent state.
//!
//! Shared state is handled with an optimistic check-out / commit-with-token
//! discipline:
//!
//! 1. [`LockedStateStore::checkout`] returns the current value with a token.
//! 2. The caller mutates a private copy.
//! 3. [`LockedStateStore::commit`] writes the copy back, presenting the same
//!    token. If another writer committed in between, the token no longer
//!    matches and the commit fails with [`CiError::StateConflict`].
//!
//! No retry or merge happens here; callers decide what a conflict means.

pub mod file;
pub mod memory;

use std::path::PathBuf;

use crate::errors::{CiError, Result};
use crate::types::StateStorageMode;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

/// Opaque token identifying the version of a value that was checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub(crate) fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A checked-out value.
#[derive(Debug, Clone)]
pub struct Checkout {
    /// `false` if nothing has ever been committed under this key.
    pub exists: bool,
    /// Current value; empty when `exists` is false.
    pub value: String,
    pub token: LockToken,
}

/// Key-value store with optimistic locking.
pub trait LockedStateStore: Send + Sync {
    fn checkout(&self, key: &str) -> Result<Checkout>;

    /// Commit `value` under `key` if `token` still matches the stored version.
    fn commit(&self, key: &str, token: &LockToken, value: &str) -> Result<()>;
}

impl<S: LockedStateStore + ?Sized> LockedStateStore for Box<S> {
    fn checkout(&self, key: &str) -> Result<Checkout> {
        (**self).checkout(key)
    }

    fn commit(&self, key: &str, token: &LockToken, value: &str) -> Result<()> {
        (**self).commit(key, token, value)
    }
}

/// Build the configured store. `state_dir` is only used in file mode.
pub fn open_store(mode: StateStorageMode, state_dir: PathBuf) -> Box<dyn LockedStateStore> {
    match mode {
        StateStorageMode::File => Box::new(FileStateStore::new(state_dir)),
        StateStorageMode::Memory => Box::new(MemoryStateStore::new()),
    }
}

pub(crate) fn conflict(key: &str) -> CiError {
    CiError::StateConflict(key.to_string())
}
