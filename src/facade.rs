//! Graph Facade - public operation surface
//!
//! Requests carry the relation kind as a wire code (see
//! [`RelationKind::from_code`]); the facade validates it, dispatches by kind
//! and delegates to the [`ConsistencyOrchestrator`].

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheBackend, CacheLayer, CacheSettings, MemoryCache};
use crate::orchestrator::ConsistencyOrchestrator;
use crate::relation::{Counts, ListKind, Page, RelationKind};
use crate::storage::{SqliteStore, StoreStats};
use crate::{Error, Result};

/// Page size used when a request leaves it unset or zero
pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowRequest {
    pub subject_id: i64,
    pub target_id: i64,
    pub kind: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRequest {
    pub subject_id: i64,
    pub kind: i32,
    /// Rank to start from
    #[serde(default)]
    pub cursor: u64,
    #[serde(default)]
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowersRequest {
    pub subject_id: i64,
    #[serde(default)]
    pub cursor: u64,
    #[serde(default)]
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountRequest {
    pub subject_id: i64,
    pub kind: i32,
}

/// Entry point to the follow graph.
#[derive(Clone)]
pub struct FollowGraph {
    orchestrator: ConsistencyOrchestrator,
    default_page_size: u32,
}

impl FollowGraph {
    pub fn new(store: Arc<SqliteStore>, cache: Arc<CacheLayer>) -> Self {
        Self {
            orchestrator: ConsistencyOrchestrator::new(store, cache),
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Wire a graph over an on-disk store and the given cache tier.
    pub fn open(path: &Path, backend: Arc<dyn CacheBackend>, settings: CacheSettings) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(path)?);
        Ok(Self::new(store, Arc::new(CacheLayer::new(backend, settings))))
    }

    /// In-memory store with an in-process cache tier.
    pub fn in_memory(settings: CacheSettings) -> Result<Self> {
        let store = Arc::new(SqliteStore::open_in_memory()?);
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new());
        Ok(Self::new(store, Arc::new(CacheLayer::new(backend, settings))))
    }

    pub fn with_default_page_size(mut self, page_size: u32) -> Self {
        if page_size > 0 {
            self.default_page_size = page_size;
        }
        self
    }

    fn page_size(&self, requested: u32) -> usize {
        if requested == 0 {
            self.default_page_size as usize
        } else {
            requested as usize
        }
    }

    pub async fn follow(&self, req: &FollowRequest) -> Result<()> {
        let kind = RelationKind::from_code(req.kind)?;
        self.orchestrator.follow(req.subject_id, req.target_id, kind).await
    }

    /// Unfollowing a relationship that does not exist succeeds.
    pub async fn unfollow(&self, req: &FollowRequest) -> Result<()> {
        let kind = RelationKind::from_code(req.kind)?;
        self.orchestrator
            .unfollow(req.subject_id, req.target_id, kind)
            .await
            .map(drop)
    }

    /// People or topics the subject follows, most recent first.
    pub async fn list_follows(&self, req: &ListRequest) -> Result<Page> {
        let list = RelationKind::from_code(req.kind)?.outgoing_list();
        self.orchestrator
            .get_list(req.subject_id, list, req.cursor as usize, self.page_size(req.page_size))
            .await
    }

    /// People following the subject, most recent first.
    pub async fn list_followers(&self, req: &FollowersRequest) -> Result<Page> {
        self.orchestrator
            .get_list(req.subject_id, ListKind::Followers, req.cursor as usize, self.page_size(req.page_size))
            .await
    }

    pub async fn get_counts(&self, req: &CountRequest) -> Result<Counts> {
        let kind = RelationKind::from_code(req.kind)?;
        self.orchestrator.get_count(req.subject_id, kind).await
    }

    /// Full export of what the subject follows.
    pub fn stream_all(&self, subject_id: i64, kind: i32) -> Result<ExportStream> {
        let list = RelationKind::from_code(kind)?.outgoing_list();
        Ok(ExportStream::new(self.orchestrator.clone(), subject_id, list))
    }

    /// Full export of the subject's followers, read from the follower list.
    pub fn stream_followers(&self, subject_id: i64) -> ExportStream {
        ExportStream::new(self.orchestrator.clone(), subject_id, ListKind::Followers)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let store = self.orchestrator.store().clone();
        tokio::task::spawn_blocking(move || store.stats())
            .await
            .map_err(|e| Error::StoreUnavailable(format!("store task failed: {}", e)))?
    }
}

/// Lazy, finite sequence of export pages.
///
/// Ends after the page whose continuation cursor is `0`. Not restartable;
/// start a new stream to read from the beginning again.
pub struct ExportStream {
    orchestrator: ConsistencyOrchestrator,
    subject_id: i64,
    list: ListKind,
    cursor: u64,
    delivered: usize,
    done: bool,
}

impl ExportStream {
    fn new(orchestrator: ConsistencyOrchestrator, subject_id: i64, list: ListKind) -> Self {
        Self {
            orchestrator,
            subject_id,
            list,
            cursor: 0,
            delivered: 0,
            done: false,
        }
    }

    pub fn list(&self) -> ListKind {
        self.list
    }

    /// Next page, or `None` once the export is complete.
    pub async fn next_page(&mut self) -> Result<Option<Vec<i64>>> {
        if self.done {
            return Ok(None);
        }

        let page = self
            .orchestrator
            .scan_page(self.subject_id, self.list, self.cursor, self.delivered)
            .await?;

        self.delivered += page.ids.len();
        self.cursor = page.cursor;
        if page.cursor == 0 {
            self.done = true;
        }
        Ok(Some(page.ids))
    }

    /// Drain the remaining pages.
    pub async fn collect_pages(mut self) -> Result<Vec<Vec<i64>>> {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page().await? {
            pages.push(page);
        }
        Ok(pages)
    }
}
