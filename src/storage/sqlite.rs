//! SQLite storage implementation

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;

use super::schema;
use crate::relation::{Counts, FollowEntry, ListKind, RelationKind};
use crate::{Error, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed relationship store.
///
/// Writes go through a single writer connection, each operation in its own
/// transaction. On-disk databases run in WAL mode with a separate read-only
/// connection serving list and counter reads; in-memory databases share one
/// connection.
pub struct SqliteStore {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        initialize_schema(&conn)?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(BUSY_TIMEOUT)?;

        tracing::debug!(path = %path.display(), "Opened relationship store");
        Ok(Self {
            writer: Mutex::new(conn),
            reader: Some(Mutex::new(reader)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            writer: Mutex::new(conn),
            reader: None,
        })
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|e| Error::StoreUnavailable(format!("writer connection poisoned: {}", e)))
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        match &self.reader {
            Some(reader) => reader
                .lock()
                .map_err(|e| Error::StoreUnavailable(format!("reader connection poisoned: {}", e))),
            None => self.writer(),
        }
    }

    // ========== Person Relationships ==========

    /// Record `subject` following `target`, with the mirrored follower row
    /// and both counters, in one transaction.
    pub fn add_follow(&self, subject: i64, target: i64, created_at: i64) -> Result<()> {
        let result = (|| -> Result<()> {
            let mut conn = self.writer()?;
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO follow (uid, follow_uid, ctime, mtime) VALUES (?1, ?2, ?3, ?3)",
                params![subject, target, created_at],
            )
            .map_err(|e| classify_insert(e, subject, target, RelationKind::Person))?;

            tx.execute(
                "INSERT INTO follower (uid, follower_uid, ctime, mtime) VALUES (?1, ?2, ?3, ?3)",
                params![target, subject, created_at],
            )
            .map_err(|e| classify_insert(e, subject, target, RelationKind::Person))?;

            tx.execute(
                r#"
                INSERT INTO follow_count (uid, follow_count, follower_count) VALUES (?1, 1, 0)
                ON CONFLICT(uid) DO UPDATE SET follow_count = follow_count + 1
                "#,
                [subject],
            )?;

            tx.execute(
                r#"
                INSERT INTO follow_count (uid, follow_count, follower_count) VALUES (?1, 0, 1)
                ON CONFLICT(uid) DO UPDATE SET follower_count = follower_count + 1
                "#,
                [target],
            )?;

            tx.commit()?;
            Ok(())
        })();
        log_failure("add_follow", subject, target, result)
    }

    /// Remove `subject` following `target`. Each side's counter is only
    /// decremented when that side's row was actually deleted.
    pub fn remove_follow(&self, subject: i64, target: i64) -> Result<Removal> {
        let result = (|| -> Result<Removal> {
            let mut conn = self.writer()?;
            let tx = conn.transaction()?;

            let removed = tx.execute(
                "DELETE FROM follow WHERE uid = ?1 AND follow_uid = ?2",
                params![subject, target],
            )?;
            let mirrored = tx.execute(
                "DELETE FROM follower WHERE uid = ?1 AND follower_uid = ?2",
                params![target, subject],
            )?;

            if removed > 0 {
                tx.execute(
                    "UPDATE follow_count SET follow_count = follow_count - 1 WHERE uid = ?1 AND follow_count > 0",
                    [subject],
                )?;
            }
            if mirrored > 0 {
                tx.execute(
                    "UPDATE follow_count SET follower_count = follower_count - 1 WHERE uid = ?1 AND follower_count > 0",
                    [target],
                )?;
            }

            tx.commit()?;
            Ok(Removal {
                follow: removed > 0,
                follower: mirrored > 0,
            })
        })();
        log_failure("remove_follow", subject, target, result)
    }

    // ========== Topic Relationships ==========

    /// Record `subject` following `topic` and bump its topic counter.
    pub fn add_topic_follow(&self, subject: i64, topic: i64, created_at: i64) -> Result<()> {
        let result = (|| -> Result<()> {
            let mut conn = self.writer()?;
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO follow_topic (uid, topic_id, ctime, mtime) VALUES (?1, ?2, ?3, ?3)",
                params![subject, topic, created_at],
            )
            .map_err(|e| classify_insert(e, subject, topic, RelationKind::Topic))?;

            tx.execute(
                r#"
                INSERT INTO follow_topic_count (uid, follow_count) VALUES (?1, 1)
                ON CONFLICT(uid) DO UPDATE SET follow_count = follow_count + 1
                "#,
                [subject],
            )?;

            tx.commit()?;
            Ok(())
        })();
        log_failure("add_topic_follow", subject, topic, result)
    }

    /// Remove `subject` following `topic`. Returns whether it existed.
    pub fn remove_topic_follow(&self, subject: i64, topic: i64) -> Result<bool> {
        let result = (|| -> Result<bool> {
            let mut conn = self.writer()?;
            let tx = conn.transaction()?;

            let removed = tx.execute(
                "DELETE FROM follow_topic WHERE uid = ?1 AND topic_id = ?2",
                params![subject, topic],
            )?;
            if removed > 0 {
                tx.execute(
                    "UPDATE follow_topic_count SET follow_count = follow_count - 1 WHERE uid = ?1 AND follow_count > 0",
                    [subject],
                )?;
            }

            tx.commit()?;
            Ok(removed > 0)
        })();
        log_failure("remove_topic_follow", subject, topic, result)
    }

    // ========== Reads ==========

    /// Point read of a subject's counters; absent rows read as zero.
    pub fn read_count(&self, subject: i64, kind: RelationKind) -> Result<Counts> {
        let result = (|| -> Result<Counts> {
            let conn = self.reader()?;
            let counts = match kind {
                RelationKind::Person => conn
                    .query_row(
                        "SELECT follow_count, follower_count FROM follow_count WHERE uid = ?1",
                        [subject],
                        |row| Ok(Counts::new(row.get(0)?, row.get(1)?)),
                    )
                    .optional()?,
                RelationKind::Topic => conn
                    .query_row(
                        "SELECT follow_count FROM follow_topic_count WHERE uid = ?1",
                        [subject],
                        |row| Ok(Counts::new(row.get(0)?, 0)),
                    )
                    .optional()?,
            };
            Ok(counts.unwrap_or_default())
        })();
        log_failure("read_count", subject, 0, result)
    }

    /// Full list for a subject, most recent first. Ties on creation time
    /// break on the higher id first.
    pub fn read_all(&self, subject: i64, list: ListKind) -> Result<Vec<FollowEntry>> {
        let sql = match list {
            ListKind::Follows => {
                "SELECT follow_uid, ctime FROM follow WHERE uid = ?1 ORDER BY ctime DESC, follow_uid DESC"
            }
            ListKind::Followers => {
                "SELECT follower_uid, ctime FROM follower WHERE uid = ?1 ORDER BY ctime DESC, follower_uid DESC"
            }
            ListKind::TopicFollows => {
                "SELECT topic_id, ctime FROM follow_topic WHERE uid = ?1 ORDER BY ctime DESC, topic_id DESC"
            }
        };

        let result = (|| -> Result<Vec<FollowEntry>> {
            let conn = self.reader()?;
            let mut stmt = conn.prepare(sql)?;
            let entries = stmt
                .query_map([subject], |row| Ok(FollowEntry::new(row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })();
        log_failure("read_all", subject, 0, result)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.reader()?;
        let count = |table: &str| -> Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(StoreStats {
            follows: count("follow")?,
            followers: count("follower")?,
            topic_follows: count("follow_topic")?,
            person_counters: count("follow_count")?,
            topic_counters: count("follow_topic_count")?,
        })
    }
}

/// Initialize the database schema
fn initialize_schema(conn: &Connection) -> Result<()> {
    for stmt in schema::all_schema_statements() {
        conn.execute(stmt, [])?;
    }
    Ok(())
}

/// Unique-constraint violations on insert are duplicates, not outages.
fn classify_insert(err: rusqlite::Error, subject: i64, target: i64, kind: RelationKind) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Error::Conflict { subject, target, kind }
        }
        _ => err.into(),
    }
}

fn log_failure<T>(op: &'static str, subject: i64, target: i64, result: Result<T>) -> Result<T> {
    match &result {
        Err(e @ Error::Conflict { .. }) => {
            tracing::debug!(op, subject, target, error = %e, "Relationship already exists");
        }
        Err(e) => {
            tracing::error!(op, subject, target, error = %e, "Store operation failed");
        }
        Ok(_) => {}
    }
    result
}

/// Which rows a person unfollow deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Removal {
    /// The subject's follow row
    pub follow: bool,
    /// The target's mirrored follower row
    pub follower: bool,
}

impl Removal {
    pub fn any(&self) -> bool {
        self.follow || self.follower
    }
}

/// Database statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub follows: usize,
    pub followers: usize,
    pub topic_follows: usize,
    pub person_counters: usize,
    pub topic_counters: usize,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Store Statistics:")?;
        writeln!(f, "  Follows: {}", self.follows)?;
        writeln!(f, "  Followers: {}", self.followers)?;
        writeln!(f, "  Topic follows: {}", self.topic_follows)?;
        writeln!(f, "  Person counters: {}", self.person_counters)?;
        writeln!(f, "  Topic counters: {}", self.topic_counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(entries: &[FollowEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.target_id).collect()
    }

    #[test]
    fn test_follow_writes_mirror_and_counters() {
        let store = SqliteStore::open_in_memory().unwrap();

        store.add_follow(1, 2, 1_000).unwrap();

        assert_eq!(ids(&store.read_all(1, ListKind::Follows).unwrap()), vec![2]);
        assert_eq!(ids(&store.read_all(2, ListKind::Followers).unwrap()), vec![1]);
        assert_eq!(store.read_count(1, RelationKind::Person).unwrap(), Counts::new(1, 0));
        assert_eq!(store.read_count(2, RelationKind::Person).unwrap(), Counts::new(0, 1));
    }

    #[test]
    fn test_duplicate_follow_is_conflict_and_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_follow(1, 2, 1_000).unwrap();

        let err = store.add_follow(1, 2, 2_000).unwrap_err();
        assert!(matches!(err, Error::Conflict { subject: 1, target: 2, kind: RelationKind::Person }));

        // Counters untouched by the failed attempt
        assert_eq!(store.read_count(1, RelationKind::Person).unwrap(), Counts::new(1, 0));
        assert_eq!(store.read_count(2, RelationKind::Person).unwrap(), Counts::new(0, 1));
    }

    #[test]
    fn test_failed_mirror_insert_rolls_back_follow_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        // Orphan follower row: the mirror insert of 1 -> 2 will collide with it
        store
            .writer()
            .unwrap()
            .execute("INSERT INTO follower (uid, follower_uid, ctime, mtime) VALUES (2, 1, 0, 0)", [])
            .unwrap();

        assert!(store.add_follow(1, 2, 1_000).is_err());
        assert!(store.read_all(1, ListKind::Follows).unwrap().is_empty());
        assert_eq!(store.read_count(1, RelationKind::Person).unwrap(), Counts::default());
    }

    #[test]
    fn test_unfollow_removes_both_sides() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_follow(1, 2, 1_000).unwrap();

        let removal = store.remove_follow(1, 2).unwrap();
        assert_eq!(removal, Removal { follow: true, follower: true });

        assert!(store.read_all(1, ListKind::Follows).unwrap().is_empty());
        assert!(store.read_all(2, ListKind::Followers).unwrap().is_empty());
        assert_eq!(store.read_count(1, RelationKind::Person).unwrap(), Counts::default());
        assert_eq!(store.read_count(2, RelationKind::Person).unwrap(), Counts::default());
    }

    #[test]
    fn test_unfollow_missing_is_noop() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_follow(1, 3, 1_000).unwrap();

        assert!(!store.remove_follow(1, 2).unwrap().any());
        assert_eq!(store.read_count(1, RelationKind::Person).unwrap(), Counts::new(1, 0));
    }

    #[test]
    fn test_unfollow_orphan_follower_row_only_touches_target() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_follow(1, 3, 1_000).unwrap();
        store.add_follow(4, 2, 1_000).unwrap();
        // Mirror row 2 <- 1 without the follow row 1 -> 2
        store
            .writer()
            .unwrap()
            .execute("INSERT INTO follower (uid, follower_uid, ctime, mtime) VALUES (2, 1, 0, 0)", [])
            .unwrap();
        store
            .writer()
            .unwrap()
            .execute("UPDATE follow_count SET follower_count = 2 WHERE uid = 2", [])
            .unwrap();

        let removal = store.remove_follow(1, 2).unwrap();
        assert_eq!(removal, Removal { follow: false, follower: true });

        assert_eq!(store.read_count(1, RelationKind::Person).unwrap(), Counts::new(1, 0));
        assert_eq!(store.read_count(2, RelationKind::Person).unwrap(), Counts::new(0, 1));
        assert_eq!(ids(&store.read_all(2, ListKind::Followers).unwrap()), vec![4]);
    }

    #[test]
    fn test_counter_never_goes_negative() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_follow(1, 2, 1_000).unwrap();
        // Simulate prior drift
        store
            .writer()
            .unwrap()
            .execute("UPDATE follow_count SET follow_count = 0 WHERE uid = 1", [])
            .unwrap();

        store.remove_follow(1, 2).unwrap();
        assert_eq!(store.read_count(1, RelationKind::Person).unwrap().outgoing, 0);
    }

    #[test]
    fn test_topic_follow_lifecycle() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_topic_follow(1, 900, 1_000).unwrap();
        store.add_topic_follow(1, 901, 2_000).unwrap();

        assert_eq!(ids(&store.read_all(1, ListKind::TopicFollows).unwrap()), vec![901, 900]);
        assert_eq!(store.read_count(1, RelationKind::Topic).unwrap(), Counts::new(2, 0));

        let err = store.add_topic_follow(1, 900, 3_000).unwrap_err();
        assert!(matches!(err, Error::Conflict { kind: RelationKind::Topic, .. }));

        assert!(store.remove_topic_follow(1, 900).unwrap());
        assert_eq!(store.read_count(1, RelationKind::Topic).unwrap(), Counts::new(1, 0));
    }

    #[test]
    fn test_read_all_most_recent_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_follow(1, 10, 1_000).unwrap();
        store.add_follow(1, 11, 3_000).unwrap();
        store.add_follow(1, 12, 2_000).unwrap();

        let entries = store.read_all(1, ListKind::Follows).unwrap();
        assert_eq!(ids(&entries), vec![11, 12, 10]);
        assert_eq!(entries[0].created_at, 3_000);
    }

    #[test]
    fn test_read_count_absent_is_zero() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.read_count(42, RelationKind::Person).unwrap(), Counts::default());
        assert_eq!(store.read_count(42, RelationKind::Topic).unwrap(), Counts::default());
    }

    #[test]
    fn test_on_disk_reader_sees_committed_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("graph.db")).unwrap();

        store.add_follow(1, 2, 1_000).unwrap();
        store.add_topic_follow(1, 7, 1_000).unwrap();

        assert_eq!(ids(&store.read_all(1, ListKind::Follows).unwrap()), vec![2]);
        let stats = store.stats().unwrap();
        assert_eq!(stats.follows, 1);
        assert_eq!(stats.followers, 1);
        assert_eq!(stats.topic_follows, 1);
        assert_eq!(stats.person_counters, 2);
    }
}
