//! # Followgraph - follow relationships with a cache-aside read path
//!
//! Records directed follow relationships between users, and between users
//! and topics, and serves paginated listings and aggregate counts.
//!
//! Followgraph provides:
//! - SQLite-backed relationship store, the single source of truth
//! - Cache layer of ordered per-subject lists and denormalized counters with TTL
//! - Consistency orchestrator: store-first writes, cache-first reads with rehydration
//! - Facade dispatching by relation kind, plus an HTTP surface and CLI

pub mod relation;
pub mod storage;
pub mod cache;
pub mod orchestrator;
pub mod facade;
pub mod server;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use relation::{Counts, FollowEntry, ListKind, Page, RelationKind};
pub use storage::SqliteStore;
pub use cache::{CacheBackend, CacheLayer, CacheSettings, MemoryCache};
pub use orchestrator::ConsistencyOrchestrator;
pub use facade::FollowGraph;

/// Result type alias for Followgraph operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Followgraph operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Already following: {subject} -> {target} ({kind})")]
    Conflict {
        subject: i64,
        target: i64,
        kind: RelationKind,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Cache miss: {0}")]
    CacheMiss(String),

    #[error("Cache degraded: {0}")]
    CacheDegraded(String),
}

impl Error {
    /// Whether this error may be returned to a caller of the public surface.
    ///
    /// Cache misses and cache failures are absorbed by the orchestrator.
    pub fn is_caller_visible(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_) | Error::Conflict { .. } | Error::StoreUnavailable(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_visible_errors() {
        assert!(Error::InvalidArgument("kind 7".into()).is_caller_visible());
        assert!(Error::StoreUnavailable("locked".into()).is_caller_visible());
        assert!(Error::Conflict { subject: 1, target: 2, kind: RelationKind::Person }.is_caller_visible());
        assert!(!Error::CacheMiss("social_service_follow_1".into()).is_caller_visible());
        assert!(!Error::CacheDegraded("timeout".into()).is_caller_visible());
    }

    #[test]
    fn test_sqlite_error_maps_to_store_unavailable() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }
}
