//! Consistency Orchestrator - cache-aside protocol between store and cache
//!
//! - Writes: store first (authoritative), then best-effort cache mutation.
//! - List reads: cache hit returns directly; a miss reads the whole list from
//!   the store and rehydrates the cache before answering.
//! - Count reads: a miss answers from the store and repairs the cache in a
//!   detached background task.
//! - Export: cache scan pages; a miss answers with one terminal store page and
//!   rebuilds the cache in the background.
//!
//! Cache failures are logged and never returned.

use std::future::Future;
use std::sync::Arc;

use crate::cache::{keys, CacheLayer, ScanPage};
use crate::relation::{now_millis, Counts, FollowEntry, ListKind, Page, RelationKind};
use crate::storage::SqliteStore;
use crate::{Error, Result};

#[derive(Clone)]
pub struct ConsistencyOrchestrator {
    store: Arc<SqliteStore>,
    cache: Arc<CacheLayer>,
}

impl ConsistencyOrchestrator {
    pub fn new(store: Arc<SqliteStore>, cache: Arc<CacheLayer>) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    /// Run a blocking store call off the async worker threads.
    async fn on_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SqliteStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| Error::StoreUnavailable(format!("store task failed: {}", e)))?
    }

    // ========== Reads ==========

    /// Page of a subject's list starting at rank `cursor`.
    pub async fn get_list(&self, subject: i64, list: ListKind, cursor: usize, page_size: usize) -> Result<Page> {
        let key = keys::list_key(subject, list);

        match self.cache.get(&key, cursor, page_size).await {
            Ok(page) => return Ok(page),
            Err(Error::CacheMiss(_)) => {
                tracing::debug!(subject, list = %list, "List cache miss");
            }
            Err(e) => {
                tracing::warn!(subject, list = %list, key = %key, error = %e, "List cache read failed");
            }
        }

        let entries = self.on_store(move |store| store.read_all(subject, list)).await?;

        // The caller waits on rehydration so the next page is served from cache
        if let Err(e) = self.cache.bulk_put(&key, &entries).await {
            tracing::warn!(subject, key = %key, error = %e, "List rehydration failed");
        }

        Ok(Page::from_entries(&entries, cursor, page_size))
    }

    /// Counts for a subject; incoming is zero for topics.
    pub async fn get_count(&self, subject: i64, kind: RelationKind) -> Result<Counts> {
        let counter_keys = keys::counter_keys(subject, kind);

        match self.cache.read_counters(&counter_keys).await {
            Ok(snapshot) if snapshot.is_complete() => {
                let outgoing = snapshot.value(0).max(0);
                let incoming = match kind {
                    RelationKind::Person => snapshot.value(1).max(0),
                    RelationKind::Topic => 0,
                };
                return Ok(Counts::new(outgoing, incoming));
            }
            Ok(_) => {
                tracing::debug!(subject, kind = %kind, "Counter cache miss");
            }
            Err(e) => {
                tracing::warn!(subject, kind = %kind, error = %e, "Counter cache read failed");
            }
        }

        let counts = self.on_store(move |store| store.read_count(subject, kind)).await?;

        let mut entries = vec![(counter_keys[0].clone(), counts.outgoing)];
        if kind.has_inverse() {
            entries.push((counter_keys[1].clone(), counts.incoming));
        }
        let cache = self.cache.clone();
        spawn_repair("counters", subject, async move { cache.set_counters(&entries).await });

        Ok(counts)
    }

    /// One export page. `delivered` is how many ids the caller already
    /// received from this export, so a store fallback does not repeat them.
    pub async fn scan_page(&self, subject: i64, list: ListKind, cursor: u64, delivered: usize) -> Result<ScanPage> {
        let key = keys::list_key(subject, list);

        match self.cache.scan_all(&key, cursor).await {
            Ok(page) => return Ok(page),
            Err(Error::CacheMiss(_)) => {
                tracing::debug!(subject, list = %list, cursor, "Export cache miss");
            }
            Err(e) => {
                tracing::warn!(subject, list = %list, key = %key, error = %e, "Export cache scan failed");
            }
        }

        let entries = self.on_store(move |store| store.read_all(subject, list)).await?;
        let ids = entries.iter().skip(delivered).map(|e| e.target_id).collect();

        let cache = self.cache.clone();
        spawn_repair("export", subject, async move { cache.bulk_put(&key, &entries).await });

        Ok(ScanPage { ids, cursor: 0 })
    }

    // ========== Writes ==========

    pub async fn follow(&self, subject: i64, target: i64, kind: RelationKind) -> Result<()> {
        let created_at = now_millis();
        match kind {
            RelationKind::Person => {
                self.on_store(move |store| store.add_follow(subject, target, created_at))
                    .await?;

                let follows = keys::list_key(subject, ListKind::Follows);
                let followers = keys::list_key(target, ListKind::Followers);
                let follow_count = keys::counter_key(subject, ListKind::Follows);
                let follower_count = keys::counter_key(target, ListKind::Followers);
                let (a, b, c, d) = tokio::join!(
                    self.cache.add_member(&follows, FollowEntry::new(target, created_at)),
                    self.cache.add_member(&followers, FollowEntry::new(subject, created_at)),
                    self.cache.incr_counter(&follow_count),
                    self.cache.incr_counter(&follower_count),
                );
                warn_cache("follow", subject, target, [a.map(drop), b.map(drop), c.map(drop), d.map(drop)]);
            }
            RelationKind::Topic => {
                self.on_store(move |store| store.add_topic_follow(subject, target, created_at))
                    .await?;

                let topics = keys::list_key(subject, ListKind::TopicFollows);
                let topic_count = keys::counter_key(subject, ListKind::TopicFollows);
                let (a, b) = tokio::join!(
                    self.cache.add_member(&topics, FollowEntry::new(target, created_at)),
                    self.cache.incr_counter(&topic_count),
                );
                warn_cache("follow_topic", subject, target, [a.map(drop), b.map(drop)]);
            }
        }
        Ok(())
    }

    /// Returns whether a relationship was removed. The cache side of each
    /// row is only touched when the store deleted that row.
    pub async fn unfollow(&self, subject: i64, target: i64, kind: RelationKind) -> Result<bool> {
        match kind {
            RelationKind::Person => {
                let removal = self
                    .on_store(move |store| store.remove_follow(subject, target))
                    .await?;
                if !removal.any() {
                    return Ok(false);
                }

                let follows = keys::list_key(subject, ListKind::Follows);
                let followers = keys::list_key(target, ListKind::Followers);
                let follow_count = keys::counter_key(subject, ListKind::Follows);
                let follower_count = keys::counter_key(target, ListKind::Followers);
                let outgoing = async {
                    if !removal.follow {
                        return Vec::new();
                    }
                    let (a, b) = tokio::join!(
                        self.cache.remove_member(&follows, target),
                        self.cache.decr_counter(&follow_count),
                    );
                    vec![a.map(drop), b.map(drop)]
                };
                let incoming = async {
                    if !removal.follower {
                        return Vec::new();
                    }
                    let (a, b) = tokio::join!(
                        self.cache.remove_member(&followers, subject),
                        self.cache.decr_counter(&follower_count),
                    );
                    vec![a.map(drop), b.map(drop)]
                };
                let (mut results, inverse) = tokio::join!(outgoing, incoming);
                results.extend(inverse);
                warn_cache("unfollow", subject, target, results);
                Ok(true)
            }
            RelationKind::Topic => {
                let removed = self
                    .on_store(move |store| store.remove_topic_follow(subject, target))
                    .await?;
                if !removed {
                    return Ok(false);
                }

                let topics = keys::list_key(subject, ListKind::TopicFollows);
                let topic_count = keys::counter_key(subject, ListKind::TopicFollows);
                let (a, b) = tokio::join!(
                    self.cache.remove_member(&topics, target),
                    self.cache.decr_counter(&topic_count),
                );
                warn_cache("unfollow_topic", subject, target, [a.map(drop), b.map(drop)]);
                Ok(true)
            }
        }
    }
}

/// Detached, best-effort cache repair. Not awaited, not cancelled with the
/// request; failures are only logged.
fn spawn_repair<F>(op: &'static str, subject: i64, repair: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match repair.await {
            Ok(()) => tracing::debug!(op, subject, "Cache repair finished"),
            Err(e) => tracing::warn!(op, subject, error = %e, "Cache repair failed"),
        }
    });
}

fn warn_cache(op: &'static str, subject: i64, target: i64, results: impl IntoIterator<Item = Result<()>>) {
    for result in results {
        if let Err(e) = result {
            tracing::warn!(op, subject, target, error = %e, "Cache write failed after store commit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheSettings, MemoryCache};
    use std::time::Duration;

    fn orchestrator() -> (Arc<MemoryCache>, ConsistencyOrchestrator) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let backend = Arc::new(MemoryCache::new());
        let settings = CacheSettings {
            batch_pause: Duration::from_millis(1),
            ..Default::default()
        };
        let cache = Arc::new(CacheLayer::new(backend.clone(), settings));
        (backend, ConsistencyOrchestrator::new(store, cache))
    }

    async fn wait_for(backend: &MemoryCache, key: &str) {
        for _ in 0..100 {
            if backend.exists(key) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{} was never repaired", key);
    }

    #[tokio::test]
    async fn test_list_miss_rehydrates_cache() {
        let (backend, orch) = orchestrator();
        for target in 2..=4 {
            orch.follow(1, target, RelationKind::Person).await.unwrap();
        }
        let key = keys::list_key(1, ListKind::Follows);
        assert!(!backend.exists(&key));

        let page = orch.get_list(1, ListKind::Follows, 0, 10).await.unwrap();
        assert_eq!(page.ids.len(), 3);
        assert!(!page.has_more);

        // Populated synchronously, now served from the cache alone
        let cached = orch.cache().get(&key, 0, 10).await.unwrap();
        assert_eq!(cached.ids.len(), 3);
    }

    #[tokio::test]
    async fn test_write_after_rehydration_updates_cached_list() {
        let (_, orch) = orchestrator();
        orch.follow(1, 2, RelationKind::Person).await.unwrap();
        orch.get_list(1, ListKind::Follows, 0, 10).await.unwrap();

        orch.follow(1, 3, RelationKind::Person).await.unwrap();
        let key = keys::list_key(1, ListKind::Follows);
        let cached = orch.cache().get(&key, 0, 10).await.unwrap();
        assert!(cached.ids.contains(&3));

        orch.unfollow(1, 2, RelationKind::Person).await.unwrap();
        let cached = orch.cache().get(&key, 0, 10).await.unwrap();
        assert_eq!(cached.ids, vec![3]);
    }

    #[tokio::test]
    async fn test_count_miss_answers_from_store_and_repairs() {
        let (backend, orch) = orchestrator();
        orch.follow(1, 2, RelationKind::Person).await.unwrap();
        // Drop what the write path cached to force a miss
        let follow_key = keys::counter_key(1, ListKind::Follows);
        let follower_key = keys::counter_key(1, ListKind::Followers);
        crate::cache::CacheBackend::delete(backend.as_ref(), &follow_key).await.unwrap();

        let counts = orch.get_count(1, RelationKind::Person).await.unwrap();
        assert_eq!(counts, Counts::new(1, 0));

        wait_for(&backend, &follower_key).await;
        let again = orch.get_count(1, RelationKind::Person).await.unwrap();
        assert_eq!(again, Counts::new(1, 0));
    }

    #[tokio::test]
    async fn test_unfollow_missing_leaves_cache_alone() {
        let (backend, orch) = orchestrator();
        assert!(!orch.unfollow(1, 2, RelationKind::Person).await.unwrap());
        assert!(!backend.exists(&keys::counter_key(1, ListKind::Follows)));
    }

    #[tokio::test]
    async fn test_scan_miss_returns_terminal_store_page() {
        let (backend, orch) = orchestrator();
        for target in 10..15 {
            orch.follow(1, target, RelationKind::Person).await.unwrap();
        }

        let page = orch.scan_page(1, ListKind::Follows, 0, 0).await.unwrap();
        assert_eq!(page.ids.len(), 5);
        assert_eq!(page.cursor, 0);

        wait_for(&backend, &keys::list_key(1, ListKind::Follows)).await;
    }

    #[tokio::test]
    async fn test_scan_fallback_skips_delivered_ids() {
        let (_, orch) = orchestrator();
        for target in 10..15 {
            orch.follow(1, target, RelationKind::Person).await.unwrap();
        }

        let page = orch.scan_page(1, ListKind::Follows, 7, 3).await.unwrap();
        assert_eq!(page.ids.len(), 2);
        assert_eq!(page.cursor, 0);
    }

    #[tokio::test]
    async fn test_unfollow_orphan_follower_leaves_subject_side_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let backend = Arc::new(MemoryCache::new());
        let cache = Arc::new(CacheLayer::new(backend.clone(), CacheSettings::default()));
        let orch = ConsistencyOrchestrator::new(store, cache);

        orch.follow(1, 3, RelationKind::Person).await.unwrap();
        orch.get_list(1, ListKind::Follows, 0, 10).await.unwrap();
        // Mirror row 2 <- 1 with no follow row 1 -> 2
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute("INSERT INTO follower (uid, follower_uid, ctime, mtime) VALUES (2, 1, 0, 0)", [])
            .unwrap();

        assert!(orch.unfollow(1, 2, RelationKind::Person).await.unwrap());

        let follows = orch.cache().get(&keys::list_key(1, ListKind::Follows), 0, 10).await.unwrap();
        assert_eq!(follows.ids, vec![3]);
        let counter = keys::counter_key(1, ListKind::Follows);
        let snapshot = orch.cache().read_counters(&[counter]).await.unwrap();
        assert_eq!(snapshot.value(0), 1);
    }

    #[tokio::test]
    async fn test_duplicate_follow_leaves_counters_unchanged() {
        let (_, orch) = orchestrator();
        orch.follow(1, 2, RelationKind::Person).await.unwrap();

        let err = orch.follow(1, 2, RelationKind::Person).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert_eq!(orch.get_count(1, RelationKind::Person).await.unwrap(), Counts::new(1, 0));
    }
}
