// src/exclusive.rs

//! In-process exclusivity locks keyed by tag.
//!
//! A build-type handler acquires the tag for its repository (and branch,
//! depending on [`LockGranularity`]) before doing any work. The lock is held
//! by the returned [`ExclusiveGuard`] and released when it is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::types::LockGranularity;

/// Tag for a build of `repository`/`branch` at the given granularity.
pub fn exclusivity_tag(repository: &str, branch: &str, granularity: LockGranularity) -> String {
    match granularity {
        LockGranularity::Repository => repository.to_string(),
        LockGranularity::Branch => format!("{repository}#{branch}"),
    }
}

type TagMap = Mutex<HashMap<String, Arc<Semaphore>>>;

fn lock_tags(tags: &TagMap) -> MutexGuard<'_, HashMap<String, Arc<Semaphore>>> {
    tags.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held exclusivity lock. Dropping it releases the tag.
#[derive(Debug)]
pub struct ExclusiveGuard {
    tag: String,
    tags: Arc<TagMap>,
    permit: Option<OwnedSemaphorePermit>,
}

impl ExclusiveGuard {
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl Drop for ExclusiveGuard {
    fn drop(&mut self) {
        drop(self.permit.take());
        let mut tags = lock_tags(&self.tags);
        // Only the map's own reference left: no holder and no waiter.
        if tags
            .get(&self.tag)
            .is_some_and(|s| Arc::strong_count(s) == 1)
        {
            tags.remove(&self.tag);
        }
        debug!(tag = %self.tag, "exclusivity lock released");
    }
}

/// Tag-keyed mutual exclusion shared by every task runner of a process.
///
/// A tag has an entry only while it is held or awaited.
#[derive(Debug, Default)]
pub struct ExclusiveLocks {
    tags: Arc<TagMap>,
}

impl ExclusiveLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore(&self, tag: &str) -> Arc<Semaphore> {
        lock_tags(&self.tags)
            .entry(tag.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    fn guard(&self, tag: &str, permit: OwnedSemaphorePermit) -> ExclusiveGuard {
        debug!(tag = %tag, "exclusivity lock acquired");
        ExclusiveGuard {
            tag: tag.to_string(),
            tags: Arc::clone(&self.tags),
            permit: Some(permit),
        }
    }

    /// Take the tag if nobody holds it.
    pub fn try_acquire(&self, tag: &str) -> Option<ExclusiveGuard> {
        let permit = self.semaphore(tag).try_acquire_owned().ok()?;
        Some(self.guard(tag, permit))
    }

    /// Acquire the tag.
    ///
    /// With `queue_if_busy = false` this never waits and returns `None` when
    /// the tag is held. With `queue_if_busy = true` it waits for the holder.
    pub async fn acquire(&self, tag: &str, queue_if_busy: bool) -> Option<ExclusiveGuard> {
        if !queue_if_busy {
            return self.try_acquire(tag);
        }

        let semaphore = self.semaphore(tag);
        debug!(tag = %tag, "waiting for exclusivity lock");
        // The semaphore is never closed, so this only fails if it were.
        let permit = semaphore.acquire_owned().await.ok()?;
        Some(self.guard(tag, permit))
    }

    pub fn is_held(&self, tag: &str) -> bool {
        lock_tags(&self.tags)
            .get(tag)
            .is_some_and(|s| s.available_permits() == 0)
    }

    /// Number of tags currently held or awaited.
    pub fn tracked_tags(&self) -> usize {
        lock_tags(&self.tags).len()
    }
}
