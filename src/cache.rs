//! In-memory cache of finished job artifacts with LRU eviction

use crate::types::DownloadRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct CacheEntry {
    records: Arc<Vec<DownloadRecord>>,
    /// Access tick; the smallest is evicted first
    last_used: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<PathBuf, CacheEntry>,
    tick: u64,
}

/// Loaded artifacts keyed by the path of their compressed artifact
///
/// The same job written to two output directories is two entries.
/// Cloning shares the underlying storage. A capacity of 0 disables the cache.
#[derive(Clone, Debug)]
pub struct ArtifactCache {
    state: Arc<Mutex<CacheState>>,
    capacity: usize,
}

impl ArtifactCache {
    /// Cache holding at most `capacity` artifacts
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            capacity,
        }
    }

    /// Maximum number of artifacts kept
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of artifacts currently cached
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up an artifact and mark it as recently used.
    pub fn get(&self, artifact: impl AsRef<Path>) -> Option<Arc<Vec<DownloadRecord>>> {
        let mut state = self.lock();
        state.tick += 1;
        let tick = state.tick;
        state.entries.get_mut(artifact.as_ref()).map(|entry| {
            entry.last_used = tick;
            Arc::clone(&entry.records)
        })
    }

    /// Store an artifact, evicting the least recently used one when full.
    pub fn insert(&self, artifact: impl Into<PathBuf>, records: Arc<Vec<DownloadRecord>>) {
        if self.capacity == 0 {
            return;
        }
        let artifact = artifact.into();
        let mut state = self.lock();
        state.tick += 1;
        let tick = state.tick;

        if !state.entries.contains_key(&artifact) && state.entries.len() >= self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                tracing::debug!(path = %oldest.display(), "Evicted artifact from cache");
            }
        }

        state.entries.insert(
            artifact,
            CacheEntry {
                records,
                last_used: tick,
            },
        );
    }

    /// Drop one artifact.
    pub fn remove(&self, artifact: impl AsRef<Path>) -> Option<Arc<Vec<DownloadRecord>>> {
        self.lock().entries.remove(artifact.as_ref()).map(|entry| entry.records)
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // The state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new(crate::config::CacheConfig::default().capacity)
    }
}
