//! List and counter protocol over a cache tier

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::keys;
use super::{CacheBackend, CacheSettings, ScanPage};
use crate::relation::{FollowEntry, Page};
use crate::{Error, Result};

/// Cache layer used by the orchestrator.
///
/// Every method returns `Error::CacheMiss` when the addressed list is absent
/// and `Error::CacheDegraded` when the tier fails.
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    settings: CacheSettings,
    /// Unique per layer across processes: pid, start time and a local counter
    owner: String,
    staging_seq: AtomicU64,
}

static LAYER_COUNT: AtomicU64 = AtomicU64::new(0);

fn owner_tag() -> String {
    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    format!(
        "{}-{:x}-{}",
        std::process::id(),
        started,
        LAYER_COUNT.fetch_add(1, Ordering::Relaxed)
    )
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, settings: CacheSettings) -> Self {
        let settings = CacheSettings {
            batch_size: settings.batch_size.max(1),
            scan_page_size: settings.scan_page_size.max(1),
            ..settings
        };
        Self {
            backend,
            settings,
            owner: owner_tag(),
            staging_seq: AtomicU64::new(1),
        }
    }

    /// Up to `window` ids from rank `cursor`, most recent first.
    ///
    /// One extra item is requested to compute `has_more` and then dropped.
    pub async fn get(&self, key: &str, cursor: usize, window: usize) -> Result<Page> {
        let stop = cursor.saturating_add(window);
        let mut ids = self
            .backend
            .range_desc(key, cursor, stop)
            .await?
            .ok_or_else(|| Error::CacheMiss(key.to_string()))?;

        let has_more = ids.len() > window;
        ids.truncate(window);
        Ok(Page { ids, has_more })
    }

    /// Rehydrate a whole list.
    ///
    /// Members are written in batches to a private staging key with a pause
    /// between batches; the staging key is then renamed over `key` together
    /// with the list TTL, so readers see either a miss or the complete list.
    pub async fn bulk_put(&self, key: &str, entries: &[FollowEntry]) -> Result<()> {
        let staging = keys::staging_key(key, &self.owner, self.staging_seq.fetch_add(1, Ordering::Relaxed));

        if let Err(e) = self.write_batches(&staging, entries).await {
            if let Err(cleanup) = self.backend.delete(&staging).await {
                tracing::warn!(key = %staging, error = %cleanup, "Failed to drop staging list");
            }
            return Err(e);
        }

        self.backend.rename(&staging, key, self.settings.list_ttl).await?;
        tracing::debug!(key, members = entries.len(), "Rehydrated cache list");
        Ok(())
    }

    async fn write_batches(&self, staging: &str, entries: &[FollowEntry]) -> Result<()> {
        if entries.is_empty() {
            self.backend.add_members(staging, &[]).await?;
        }

        for (i, batch) in entries.chunks(self.settings.batch_size).enumerate() {
            if i > 0 && !self.settings.batch_pause.is_zero() {
                tokio::time::sleep(self.settings.batch_pause).await;
            }
            self.backend.add_members(staging, batch).await?;
            if i == 0 {
                // An abandoned staging list must not outlive a real one
                self.backend.expire(staging, self.settings.list_ttl).await?;
            }
        }
        Ok(())
    }

    /// Insert one member if the list is cached; a miss is a no-op.
    pub async fn add_member(&self, key: &str, entry: FollowEntry) -> Result<bool> {
        self.backend.add_member_if_exists(key, entry).await
    }

    /// Remove one member if the list is cached; a miss is a no-op.
    pub async fn remove_member(&self, key: &str, member: i64) -> Result<bool> {
        self.backend.remove_member_if_exists(key, member).await
    }

    pub async fn incr_counter(&self, key: &str) -> Result<i64> {
        self.backend.incr_by(key, 1, self.settings.counter_ttl).await
    }

    pub async fn decr_counter(&self, key: &str) -> Result<i64> {
        self.backend.incr_by(key, -1, self.settings.counter_ttl).await
    }

    /// Batched counter read. Absent or undecodable values read as zero and
    /// are reported as missing.
    pub async fn read_counters(&self, keys: &[String]) -> Result<CounterSnapshot> {
        let raw = self.backend.get_many(keys).await?;

        let mut snapshot = CounterSnapshot::default();
        for (key, value) in keys.iter().zip(raw) {
            let decoded = value.as_deref().and_then(|v| match v.parse::<i64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    tracing::warn!(key = %key, value = v, "Undecodable cache counter");
                    None
                }
            });
            snapshot.values.push(decoded.unwrap_or(0));
            snapshot.present.push(decoded.is_some());
        }
        Ok(snapshot)
    }

    /// Overwrite counters with authoritative values and the counter TTL.
    pub async fn set_counters(&self, entries: &[(String, i64)]) -> Result<()> {
        self.backend.set_many(entries, self.settings.counter_ttl).await
    }

    /// One page of a full scan; cursor `0` starts, a returned `0` ends.
    pub async fn scan_all(&self, key: &str, cursor: u64) -> Result<ScanPage> {
        self.backend
            .scan(key, cursor, self.settings.scan_page_size)
            .await?
            .ok_or_else(|| Error::CacheMiss(key.to_string()))
    }
}

/// Result of a batched counter read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub values: Vec<i64>,
    pub present: Vec<bool>,
}

impl CounterSnapshot {
    /// Whether every requested counter was cached
    pub fn is_complete(&self) -> bool {
        !self.present.is_empty() && self.present.iter().all(|p| *p)
    }

    pub fn value(&self, idx: usize) -> i64 {
        self.values.get(idx).copied().unwrap_or(0)
    }
}
