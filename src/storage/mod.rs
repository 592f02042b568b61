//! Storage Layer - SQLite-backed source of truth
//!
//! System of record is SQLite with tables:
//! - follow(uid, follow_uid, ctime, mtime)
//! - follower(uid, follower_uid, ctime, mtime)
//! - follow_count(uid, follow_count, follower_count)
//! - follow_topic(uid, topic_id, ctime, mtime)
//! - follow_topic_count(uid, follow_count)

pub mod schema;
pub mod sqlite;

pub use sqlite::{Removal, SqliteStore, StoreStats};
