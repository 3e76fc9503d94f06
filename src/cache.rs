//! Query Cache
//!
//! Fingerprint-keyed answers with a time-to-live and a hard capacity.
//! Eviction is FIFO by creation time: reading an entry does not refresh it,
//! overwriting one does. All state sits behind one mutex so a lookup, an
//! expiry eviction or a capacity check-and-insert is never observed halfway.
//!
//! Entries can carry the dataset snapshot generation they were computed
//! from; a lookup for another generation treats them as stale.
//!
//! With a backing file every mutation rewrites the store through a temp file
//! and a rename. A store that cannot be read back is discarded with a warning.

use crate::clock::Clock;
use crate::error::{Result, SamarthError};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub fingerprint: String,
    pub payload: V,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Snapshot generation the payload was computed against
    #[serde(default)]
    pub generation: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub persisted: bool,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Store<V> {
    version: u32,
    entries: Vec<CacheEntry<V>>,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Fingerprints, oldest creation first
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl<V> CacheState<V> {
    fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    fn remove(&mut self, fingerprint: &str) -> Option<CacheEntry<V>> {
        let removed = self.entries.remove(fingerprint);
        if removed.is_some() {
            self.order.retain(|f| f != fingerprint);
        }
        removed
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let entries = &self.entries;
        self.order.retain(|f| entries.contains_key(f));
        before - self.entries.len()
    }
}

pub struct QueryCache<V> {
    state: Mutex<CacheState<V>>,
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
}

impl<V> QueryCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// In-memory cache
    pub fn new(ttl: std::time::Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CacheState::empty()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(365)),
            capacity: capacity.max(1),
            clock,
            path: None,
        }
    }

    /// Cache backed by a JSON file, loading whatever valid entries it holds.
    pub fn persistent(
        ttl: std::time::Duration,
        capacity: usize,
        clock: Arc<dyn Clock>,
        path: PathBuf,
    ) -> Self {
        let mut cache = Self::new(ttl, capacity, clock);
        match load_store::<V>(&path) {
            Ok(Some(entries)) => {
                let mut state = CacheState::empty();
                let now = cache.clock.now();
                let mut entries: Vec<_> = entries
                    .into_iter()
                    .filter(|e| !e.is_expired(now))
                    .collect();
                entries.sort_by_key(|e| e.created_at);
                // keep the newest when the file holds more than fits
                let skip = entries.len().saturating_sub(cache.capacity);
                for entry in entries.into_iter().skip(skip) {
                    state.order.push_back(entry.fingerprint.clone());
                    state.entries.insert(entry.fingerprint.clone(), entry);
                }
                info!(
                    "💾 Loaded {} cached answers from {:?}",
                    state.entries.len(),
                    path
                );
                cache.state = Mutex::new(state);
            }
            Ok(None) => debug!("No cache store at {:?}, starting empty", path),
            Err(e) => warn!("⚠️  Discarding unreadable cache store {:?}: {}", path, e),
        }
        cache.path = Some(path);
        cache
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A live entry's payload. An expired entry counts as a miss and is evicted.
    pub fn get(&self, fingerprint: &str) -> Option<V> {
        self.lookup(fingerprint, None)
    }

    /// Like [`get`](Self::get), but an entry computed against any other
    /// snapshot generation is stale: a miss, and evicted.
    pub fn get_for_generation(&self, fingerprint: &str, generation: u64) -> Option<V> {
        self.lookup(fingerprint, Some(generation))
    }

    fn lookup(&self, fingerprint: &str, generation: Option<u64>) -> Option<V> {
        let now = self.clock.now();
        let mut state = self.lock();

        let live = state.entries.get(fingerprint).map(|entry| {
            let current = generation.map_or(true, |g| entry.generation == g);
            (current && !entry.is_expired(now)).then(|| entry.payload.clone())
        });

        match live {
            Some(Some(payload)) => {
                state.hits += 1;
                Some(payload)
            }
            Some(None) => {
                state.misses += 1;
                state.remove(fingerprint);
                debug!("Cache entry {} expired or stale", short(fingerprint));
                self.persist(&state);
                None
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Insert or overwrite. Expired entries go first, then the oldest live
    /// entries until there is room.
    pub fn put(&self, fingerprint: &str, payload: V) {
        self.put_for_generation(fingerprint, payload, 0);
    }

    /// Insert tagged with the snapshot generation the payload came from.
    pub fn put_for_generation(&self, fingerprint: &str, payload: V, generation: u64) {
        let now = self.clock.now();
        let mut state = self.lock();

        state.purge_expired(now);
        state.remove(fingerprint);
        while state.entries.len() >= self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                    debug!("Evicted oldest cache entry {}", short(&oldest));
                }
                None => break,
            }
        }

        state.order.push_back(fingerprint.to_string());
        state.entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                fingerprint: fingerprint.to_string(),
                payload,
                created_at: now,
                expires_at: now + self.ttl,
                generation,
            },
        );
        self.persist(&state);
    }

    /// Drop every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let removed = state.entries.len();
        state.entries.clear();
        state.order.clear();
        self.persist(&state);
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            capacity: self.capacity,
            ttl_secs: self.ttl.num_seconds().max(0) as u64,
            hits: state.hits,
            misses: state.misses,
            persisted: self.path.is_some(),
        }
    }

    fn persist(&self, state: &CacheState<V>) {
        let Some(path) = &self.path else {
            return;
        };
        let entries: Vec<&CacheEntry<V>> = state
            .order
            .iter()
            .filter_map(|f| state.entries.get(f))
            .collect();
        if let Err(e) = write_store(path, &entries) {
            warn!("⚠️  Failed to persist cache to {:?}: {}", path, e);
        }
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

fn load_store<V: DeserializeOwned>(path: &Path) -> Result<Option<Vec<CacheEntry<V>>>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let store: Store<V> = serde_json::from_str(&raw)
        .map_err(|e| SamarthError::Cache(format!("corrupted store: {}", e)))?;
    if store.version != STORE_VERSION {
        return Err(SamarthError::Cache(format!(
            "store version {} is not {}",
            store.version, STORE_VERSION
        )));
    }
    Ok(Some(store.entries))
}

fn write_store<V: Serialize>(path: &Path, entries: &[&CacheEntry<V>]) -> Result<()> {
    #[derive(Serialize)]
    struct StoreRef<'a, V> {
        version: u32,
        entries: &'a [&'a CacheEntry<V>],
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec(&StoreRef {
        version: STORE_VERSION,
        entries,
    })?;
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    std::fs::write(&temp, body)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}
