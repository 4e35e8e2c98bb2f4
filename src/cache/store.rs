// cache/store.rs
//
// Fingerprint-keyed result cache with an in-memory map and optional JSON
// spill to disk. Every failure path degrades to a cache miss; the cache is
// never allowed to fail a transcription job.

use super::fingerprint::Fingerprint;
use crate::config::CacheConfig;
use crate::engine::TranscriptionResult;
use crate::error::CacheError;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub result: TranscriptionResult,
    pub created_at: DateTime<Utc>,
    pub model_id: String,
    pub language: String,
}

pub struct ResultCache {
    config: CacheConfig,
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a cached result. Expired and unparseable entries are dropped
    /// on the way through and report a miss.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Option<TranscriptionResult> {
        let now = Utc::now();

        let cached = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(fingerprint) {
                Some(entry) if self.is_expired(entry, now) => {
                    entries.remove(fingerprint);
                    Some(None)
                }
                Some(entry) => Some(Some(entry.result.clone())),
                None => None,
            }
        };
        match cached {
            Some(Some(result)) => return Some(result),
            Some(None) => {
                self.remove_from_disk(fingerprint).await;
                return None;
            }
            None => {}
        }

        // Cold map; see whether a previous process left the entry on disk.
        let path = self.entry_path(fingerprint)?;
        let entry = match read_disk_entry(&path).await {
            Ok(entry) => entry,
            Err(CacheError::Io(_)) => return None,
            Err(e) => {
                warn!("discarding cache entry {}: {}", path.display(), e);
                let _ = tokio::fs::remove_file(&path).await;
                return None;
            }
        };
        if self.is_expired(&entry, now) {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }

        let result = entry.result.clone();
        self.entries
            .lock()
            .unwrap()
            .insert(fingerprint.clone(), entry);
        debug!("cache entry {} loaded from disk", fingerprint);
        Some(result)
    }

    /// Insert a result, evicting the oldest entries once the cache is full.
    pub async fn store(
        &self,
        fingerprint: Fingerprint,
        result: TranscriptionResult,
        model_id: &str,
    ) {
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            language: result.language.clone(),
            result,
            created_at: Utc::now(),
            model_id: model_id.to_string(),
        };

        let evicted = {
            let mut entries = self.entries.lock().unwrap();
            entries.insert(fingerprint.clone(), entry.clone());

            let mut evicted = Vec::new();
            while entries.len() > self.config.max_entries {
                let oldest = entries
                    .values()
                    .min_by_key(|e| e.created_at)
                    .map(|e| e.fingerprint.clone());
                match oldest {
                    Some(key) => {
                        entries.remove(&key);
                        evicted.push(key);
                    }
                    None => break,
                }
            }
            evicted
        };

        for key in &evicted {
            debug!("evicting cache entry {}", key);
            self.remove_from_disk(key).await;
        }

        self.write_to_disk(&entry).await;
    }

    /// Drop a single entry from memory and disk.
    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        self.entries.lock().unwrap().remove(fingerprint);
        self.remove_from_disk(fingerprint).await;
    }

    /// Drop every entry, including persisted ones.
    pub async fn clear(&self) {
        let all: Vec<Fingerprint> = {
            let mut entries = self.entries.lock().unwrap();
            let keys = entries.keys().cloned().collect();
            entries.clear();
            keys
        };
        for fingerprint in &all {
            self.remove_from_disk(fingerprint).await;
        }
        // Entries written by an earlier process are not in the map; sweep
        // the directory too.
        let Some(dir) = self.config.dir.as_ref() else {
            return;
        };
        let Ok(mut listing) = tokio::fs::read_dir(dir).await else {
            return;
        };
        while let Ok(Some(entry)) = listing.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match (now - entry.created_at).to_std() {
            Ok(age) => age > self.config.max_age,
            // created_at in the future; treat as fresh.
            Err(_) => false,
        }
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> Option<PathBuf> {
        self.config
            .dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", fingerprint)))
    }

    async fn write_to_disk(&self, entry: &CacheEntry) {
        let Some(path) = self.entry_path(&entry.fingerprint) else {
            return;
        };
        let Some(dir) = path.parent() else { return };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("cannot create cache dir {}: {}", dir.display(), e);
            return;
        }
        match serde_json::to_vec_pretty(entry) {
            Ok(raw) => {
                if let Err(e) = tokio::fs::write(&path, raw).await {
                    warn!("cannot persist cache entry {}: {}", path.display(), e);
                }
            }
            Err(e) => warn!("cannot serialize cache entry {}: {}", entry.fingerprint, e),
        }
    }

    async fn remove_from_disk(&self, fingerprint: &Fingerprint) {
        if let Some(path) = self.entry_path(fingerprint) {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}

async fn read_disk_entry(path: &std::path::Path) -> Result<CacheEntry, CacheError> {
    let raw = tokio::fs::read(path).await?;
    serde_json::from_slice(&raw).map_err(|e| CacheError::Corrupt(e.to_string()))
}
