// src/state/file.rs

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use blake3::Hasher;
use tracing::{debug, info};

use crate::errors::{CiError, Result};
use crate::state::{conflict, Checkout, LockToken, LockedStateStore};

/// Token used for a key that has no file yet.
const ABSENT_TOKEN: &str = "absent";

/// Stores each key as `<root>/<key>.toml`.
///
/// The lock token is the blake3 hash of the file contents at checkout time,
/// so any write by another process in between invalidates it.
#[derive(Debug)]
pub struct FileStateStore {
    root: PathBuf,
    /// Serialises the compare-and-write step within this process.
    commit_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            commit_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.contains(['/', '\\'])
            || key.starts_with('.')
        {
            return Err(CiError::ConfigError(format!(
                "invalid state key '{key}'"
            )));
        }
        Ok(self.root.join(format!("{key}.toml")))
    }
}

fn content_token(contents: &str) -> LockToken {
    let mut hasher = Hasher::new();
    hasher.update(contents.as_bytes());
    LockToken::new(hasher.finalize().to_hex().to_string())
}

fn read_current(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading state file at {:?}", path))?;
    Ok(Some(contents))
}

impl LockedStateStore for FileStateStore {
    fn checkout(&self, key: &str) -> Result<Checkout> {
        let path = self.path_for(key)?;
        let checkout = match read_current(&path)? {
            Some(value) => Checkout {
                exists: true,
                token: content_token(&value),
                value,
            },
            None => Checkout {
                exists: false,
                value: String::new(),
                token: LockToken::new(ABSENT_TOKEN),
            },
        };
        debug!(key = %key, exists = checkout.exists, "checked out state (file)");
        Ok(checkout)
    }

    fn commit(&self, key: &str, token: &LockToken, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| anyhow!("file state store lock poisoned"))?;

        let current = match read_current(&path)? {
            Some(contents) => content_token(&contents),
            None => LockToken::new(ABSENT_TOKEN),
        };
        if &current != token {
            return Err(conflict(key));
        }

        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating state directory at {:?}", self.root))?;

        // Write next to the target and rename so readers never see a partial file.
        let tmp = path.with_extension("toml.tmp");
        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("creating state file at {:?}", tmp))?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("replacing state file at {:?}", path))?;

        info!(key = %key, path = ?path, "committed state (file)");
        Ok(())
    }
}
