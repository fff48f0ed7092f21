// src/refs/mod.rs

//! Ref tracking.
//!
//! - `source.rs`: listing tags and branches of a remote repository.
//! - `tracker.rs`: pure reconciliation of fetched refs against the snapshot.
//! - `poller.rs`: one pass over the registry, plus the periodic loop.

pub mod poller;
pub mod source;
pub mod tracker;

pub use poller::{spawn_poller, PassReport, Poller, RepoFailure};
pub use source::{parse_ls_remote, GitRemoteSource, RefListFuture, RefSource, RemoteRef};
pub use tracker::{merge_refs, reconcile, ChangeEvent, Reconciliation, RefMap, RefSnapshot};
