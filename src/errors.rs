// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Multiple repositories match '{spec}', please qualify further: {}", candidates.join(", "))]
    AmbiguousRepository {
        spec: String,
        candidates: Vec<String>,
    },

    #[error("Invalid dispatch request: {0}")]
    InvalidRequest(String),

    /// A repository reappeared while walking its own transitive dependents.
    #[error("Dependency cycle detected at repository '{0}'")]
    DependencyCycle(String),

    #[error("Fetching refs for '{repository}' failed: {reason}")]
    TransientFetch { repository: String, reason: String },

    #[error("State conflict: '{0}' was modified by another writer")]
    StateConflict(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CiError {
    /// Whether a later pass is expected to succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CiError::TransientFetch { .. } | CiError::StateConflict(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CiError>;
