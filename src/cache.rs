//! Resolution cache with expiry
//!
//! Persisted mapping from query string to resolved media record. The whole
//! document is rewritten on every update; all readers and writers (playback
//! path and preload path) share the single store lock. Contention is
//! human-scale, so coarse locking is fine here.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A concrete playable record produced by the resolver or read back from the
/// cache document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMedia {
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    /// Direct playable URL, usually a time-limited edge-server link
    pub url: String,
    /// Raw format descriptor reported by the resolver
    #[serde(default)]
    pub format: Option<String>,
    pub resolved: bool,
    /// When the resolution happened
    pub timestamp: DateTime<Utc>,
    /// Human-readable expiry, informational only
    #[serde(default)]
    pub expires: Option<String>,
    /// Expiry as epoch seconds; `None` means the URL does not expire
    #[serde(default)]
    pub expire_ts: Option<i64>,
}

impl ResolvedMedia {
    /// Usable while `now < expire_ts`; a record without expiry never
    /// expires.
    pub fn is_valid_at(&self, now: i64) -> bool {
        if !self.resolved || self.url.is_empty() {
            return false;
        }
        match self.expire_ts {
            Some(ts) => now < ts,
            None => true,
        }
    }
}

/// Query → record store, persisted as one JSON document
pub struct ResolutionCache {
    path: PathBuf,
    store: Mutex<HashMap<String, ResolvedMedia>>,
}

impl ResolutionCache {
    /// Open the cache at `path`, loading the existing document if present.
    /// An unreadable or corrupt document starts an empty cache rather than
    /// failing startup.
    pub fn open(path: PathBuf) -> Self {
        let store = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            store: Mutex::new(store),
        }
    }

    /// Valid record for `query`, or a miss. Expired entries are misses;
    /// they stay in the document until re-resolved or pruned.
    pub async fn get(&self, query: &str) -> Option<ResolvedMedia> {
        let store = self.store.lock().await;
        let entry = store.get(query)?;
        if entry.is_valid_at(Utc::now().timestamp()) {
            Some(entry.clone())
        } else {
            debug!(query, expire_ts = ?entry.expire_ts, "cached URL expired");
            None
        }
    }

    /// Insert or refresh a record and rewrite the whole document.
    pub async fn put(&self, query: String, media: ResolvedMedia) -> Result<()> {
        let mut store = self.store.lock().await;
        store.insert(query, media);
        self.persist(&store).await
    }

    /// Drop every cached key not present in `valid`; called whenever the
    /// reference log is reloaded or shrinks. Returns the number removed.
    pub async fn prune(&self, valid: &HashSet<String>) -> Result<usize> {
        let mut store = self.store.lock().await;
        let before = store.len();
        store.retain(|key, _| valid.contains(key));
        let removed = before - store.len();
        if removed > 0 {
            info!(removed, "pruned cache entries absent from reference log");
            self.persist(&store).await?;
        }
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.is_empty()
    }

    async fn persist(&self, store: &HashMap<String, ResolvedMedia>) -> Result<()> {
        let doc = serde_json::to_string_pretty(store)?;
        tokio::fs::write(&self.path, doc).await?;
        Ok(())
    }
}
