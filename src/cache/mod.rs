//! Cache Layer - lossy, expiring read-through/write-through cache
//!
//! Per subject the cache holds:
//! - ordered lists (member id scored by relation creation time)
//! - denormalized counters
//!
//! Both expire. A missing structure is a cache miss and is distinct from an
//! existing-but-empty one. The tier itself sits behind [`CacheBackend`];
//! [`CacheLayer`] implements the list and counter protocol on top of it.

pub mod keys;
pub mod layer;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::relation::FollowEntry;
use crate::Result;

pub use layer::{CacheLayer, CounterSnapshot};
pub use memory::MemoryCache;

/// Primitive operations of a cache tier.
///
/// Lookups on an absent (or expired) key return `Ok(None)`; `Err` is reserved
/// for tier failures and is always `Error::CacheDegraded`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Members by descending score, ranks `start..=stop` inclusive.
    async fn range_desc(&self, key: &str, start: usize, stop: usize) -> Result<Option<Vec<i64>>>;

    /// Add members to a sorted set, creating it (possibly empty) if absent.
    async fn add_members(&self, key: &str, members: &[FollowEntry]) -> Result<()>;

    /// Add one member only when the set already exists.
    async fn add_member_if_exists(&self, key: &str, member: FollowEntry) -> Result<bool>;

    /// Remove one member only when the set already exists.
    async fn remove_member_if_exists(&self, key: &str, member: i64) -> Result<bool>;

    /// Resumable scan; a returned cursor of `0` means the scan is complete.
    async fn scan(&self, key: &str, cursor: u64, count: usize) -> Result<Option<ScanPage>>;

    /// Set a key's time to live. Returns false when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Atomically move `from` over `to`, giving `to` the supplied TTL.
    async fn rename(&self, from: &str, to: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Add `delta` to an integer value; an absent key counts as zero and is
    /// created with `ttl_if_created`. An existing key keeps its TTL.
    async fn incr_by(&self, key: &str, delta: i64, ttl_if_created: Duration) -> Result<i64>;

    /// Raw values for each key, `None` where absent.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Set integer values, each with the given TTL.
    async fn set_many(&self, entries: &[(String, i64)], ttl: Duration) -> Result<()>;
}

/// One page of a list scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub ids: Vec<i64>,
    /// Continuation cursor; `0` when the scan is complete
    pub cursor: u64,
}

/// Tunables of the cache tier
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Expiration of rehydrated lists
    pub list_ttl: Duration,
    /// Expiration of counters
    pub counter_ttl: Duration,
    /// Members written per batch during rehydration
    pub batch_size: usize,
    /// Pause between rehydration batches
    pub batch_pause: Duration,
    /// Members returned per scan page
    pub scan_page_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            list_ttl: Duration::from_secs(3600),
            counter_ttl: Duration::from_secs(5),
            batch_size: 100,
            batch_pause: Duration::from_millis(500),
            scan_page_size: 100,
        }
    }
}
