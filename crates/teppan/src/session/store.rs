use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// Opaque identifier of a key/value cache session.
///
/// Either supplied by the caller or generated as a random uuid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Logical write clock shared by the stores of one engine pair.
///
/// Timestamps drawn from the same clock are strictly increasing, which makes
/// cross-store "which entry is newer" comparisons well defined. Overflowing a
/// `u64` write counter is not reachable in practice.
#[derive(Debug, Default, Clone)]
pub struct CacheClock {
    counter: Arc<AtomicU64>,
}

impl CacheClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// The orchestration-visible record of one session's cache state.
///
/// The key/value payload itself lives inside the external engine; this entry
/// carries what the orchestration layer needs to order writes and size masks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Session this entry belongs to.
    pub id: SessionId,
    /// Logical write timestamp; larger means more recently written.
    pub timestamp: u64,
    /// Number of non-blank cache rows, bounded by the fixed sequence length.
    pub valid_rows: usize,
}

/// Per-engine mapping from session id to cache entry.
///
/// Entries are created lazily on first write. The store never drops an entry
/// on its own; [`SessionStore::transfer`] with a stale timestamp is a no-op.
#[derive(Debug)]
pub struct SessionStore {
    entries: Mutex<HashMap<SessionId, CacheEntry>>,
    clock: CacheClock,
    sequence_length: usize,
}

impl SessionStore {
    pub fn new(clock: CacheClock, sequence_length: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            sequence_length,
        }
    }

    /// Look up the entry for a session, if one exists.
    pub fn get(&self, id: &SessionId) -> Option<CacheEntry> {
        self.entries.lock().expect("session store poisoned").get(id).cloned()
    }

    pub fn has(&self, id: &SessionId) -> bool {
        self.entries.lock().expect("session store poisoned").contains_key(id)
    }

    /// Number of non-blank cache rows for a session; zero when absent.
    pub fn non_blank_rows(&self, id: &SessionId) -> usize {
        self.get(id).map(|e| e.valid_rows).unwrap_or(0)
    }

    /// Record a cache write: create the entry if absent, set its valid row
    /// count and advance its timestamp.
    pub fn touch(&self, id: &SessionId, valid_rows: usize) -> Result<CacheEntry, PipelineError> {
        if valid_rows > self.sequence_length {
            return Err(PipelineError::Capacity {
                needed: valid_rows,
                limit: self.sequence_length,
            });
        }
        let entry = CacheEntry {
            id: id.clone(),
            timestamp: self.clock.next(),
            valid_rows,
        };
        self.entries
            .lock()
            .expect("session store poisoned")
            .insert(id.clone(), entry.clone());
        Ok(entry)
    }

    /// Replace this store's entry for the session with `entry`, unless the
    /// held entry is newer. A stale transfer is a no-op; nothing is dropped.
    pub fn transfer(&self, entry: CacheEntry) {
        let mut entries = self.entries.lock().expect("session store poisoned");
        match entries.get(&entry.id) {
            Some(existing) if existing.timestamp > entry.timestamp => {}
            _ => {
                entries.insert(entry.id.clone(), entry);
            }
        }
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }
}
