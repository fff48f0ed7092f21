// src/config/mod.rs

//! Repository registry loading and validation.
//!
//! - `model.rs`: the TOML-backed data model (`[config]` + `[repository.*]`).
//! - `loader.rs`: read a registry file from disk.
//! - `validate.rs`: hard validation on load, plus soft lint issues.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{ConfigSection, RawRegistryFile, Registry, RepoConfig, TYPE_NONE};
pub use validate::{lint_registry, ConfigIssue};
