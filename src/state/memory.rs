// src/state/memory.rs

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use tracing::debug;

use crate::errors::Result;
use crate::state::{conflict, Checkout, LockToken, LockedStateStore};

/// In-memory store; each key carries a generation counter used as its token.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, Entry>>,
}

#[derive(Debug, Clone)]
struct Entry {
    generation: u64,
    value: String,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockedStateStore for MemoryStateStore {
    fn checkout(&self, key: &str) -> Result<Checkout> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory state store lock poisoned"))?;

        let checkout = match entries.get(key) {
            Some(entry) => Checkout {
                exists: true,
                value: entry.value.clone(),
                token: LockToken::new(entry.generation.to_string()),
            },
            None => Checkout {
                exists: false,
                value: String::new(),
                token: LockToken::new("0"),
            },
        };
        Ok(checkout)
    }

    fn commit(&self, key: &str, token: &LockToken, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory state store lock poisoned"))?;

        let current = entries.get(key).map(|e| e.generation).unwrap_or(0);
        if token.as_str() != current.to_string() {
            return Err(conflict(key));
        }

        entries.insert(
            key.to_string(),
            Entry {
                generation: current + 1,
                value: value.to_string(),
            },
        );
        debug!(key = %key, generation = current + 1, "committed state (memory)");
        Ok(())
    }
}
