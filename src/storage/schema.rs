//! Database schema definitions

/// SQL to create the follow table (subject follows person)
pub const CREATE_FOLLOW_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS follow (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid INTEGER NOT NULL,
    follow_uid INTEGER NOT NULL,
    ctime INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    UNIQUE(uid, follow_uid)
)
"#;

/// SQL to create the follower table
/// Mirror of `follow`, keyed by the followed person
pub const CREATE_FOLLOWER_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS follower (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid INTEGER NOT NULL,
    follower_uid INTEGER NOT NULL,
    ctime INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    UNIQUE(uid, follower_uid)
)
"#;

/// SQL to create the follow_count table
pub const CREATE_FOLLOW_COUNT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS follow_count (
    uid INTEGER PRIMARY KEY,
    follow_count INTEGER NOT NULL DEFAULT 0,
    follower_count INTEGER NOT NULL DEFAULT 0
)
"#;

/// SQL to create the follow_topic table
pub const CREATE_FOLLOW_TOPIC_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS follow_topic (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid INTEGER NOT NULL,
    topic_id INTEGER NOT NULL,
    ctime INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    UNIQUE(uid, topic_id)
)
"#;

/// SQL to create the follow_topic_count table
pub const CREATE_FOLLOW_TOPIC_COUNT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS follow_topic_count (
    uid INTEGER PRIMARY KEY,
    follow_count INTEGER NOT NULL DEFAULT 0
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_follow_uid_ctime ON follow(uid, ctime)",
    "CREATE INDEX IF NOT EXISTS idx_follower_uid_ctime ON follower(uid, ctime)",
    "CREATE INDEX IF NOT EXISTS idx_follow_topic_uid_ctime ON follow_topic(uid, ctime)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_FOLLOW_TABLE,
        CREATE_FOLLOWER_TABLE,
        CREATE_FOLLOW_COUNT_TABLE,
        CREATE_FOLLOW_TOPIC_TABLE,
        CREATE_FOLLOW_TOPIC_COUNT_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
