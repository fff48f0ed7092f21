// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{RawRegistryFile, Registry};
use crate::errors::Result;

/// Load a registry file and return the raw `RawRegistryFile`.
///
/// This only performs TOML deserialization; use [`load_and_validate`] for the
/// semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawRegistryFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawRegistryFile> {
    let raw: RawRegistryFile = toml::from_str(contents)?;
    Ok(raw)
}

/// Load a registry file and validate it.
///
/// Hard errors (malformed repository names, bad global settings) fail the
/// load. Soft issues such as a missing `type` are left for
/// [`crate::config::validate::lint_registry`] to report.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Registry> {
    let raw = load_from_path(&path)?;
    Registry::try_from(raw)
}
