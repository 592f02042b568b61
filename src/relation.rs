//! Relation types - the follow graph data model
//!
//! Two relation kinds exist:
//! - `Person`: subject follows another person; mirrored by a follower row on the target
//! - `Topic`: subject follows a topic; no inverse side
//!
//! Every listing is one of three per-subject lists (`ListKind`).

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of follow relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// Subject follows another person
    Person,
    /// Subject follows a topic
    Topic,
}

impl RelationKind {
    /// Wire code for person relationships
    pub const PERSON_CODE: i32 = 1;
    /// Wire code for topic relationships
    pub const TOPIC_CODE: i32 = 2;

    /// Resolve a request's kind code; unknown codes are rejected.
    pub fn from_code(code: i32) -> crate::Result<Self> {
        match code {
            Self::PERSON_CODE => Ok(RelationKind::Person),
            Self::TOPIC_CODE => Ok(RelationKind::Topic),
            other => Err(crate::Error::InvalidArgument(format!(
                "unknown relation kind: {}",
                other
            ))),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            RelationKind::Person => Self::PERSON_CODE,
            RelationKind::Topic => Self::TOPIC_CODE,
        }
    }

    /// Get the string representation of the relation kind
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Person => "person",
            RelationKind::Topic => "topic",
        }
    }

    /// The list holding this kind's outgoing relationships
    pub fn outgoing_list(&self) -> ListKind {
        match self {
            RelationKind::Person => ListKind::Follows,
            RelationKind::Topic => ListKind::TopicFollows,
        }
    }

    /// Whether this kind keeps an inverse (follower) side
    pub fn has_inverse(&self) -> bool {
        matches!(self, RelationKind::Person)
    }
}

impl FromStr for RelationKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "person" | "user" | "1" => Ok(RelationKind::Person),
            "topic" | "2" => Ok(RelationKind::Topic),
            _ => Err(crate::Error::InvalidArgument(format!("unknown relation kind: {}", s))),
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One of the ordered per-subject lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    /// People the subject follows
    Follows,
    /// People following the subject (inverse of `Follows`)
    Followers,
    /// Topics the subject follows
    TopicFollows,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Follows => "follows",
            ListKind::Followers => "followers",
            ListKind::TopicFollows => "topic_follows",
        }
    }
}

impl std::fmt::Display for ListKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A list member together with its relation creation time (unix millis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FollowEntry {
    pub target_id: i64,
    pub created_at: i64,
}

impl FollowEntry {
    pub fn new(target_id: i64, created_at: i64) -> Self {
        Self { target_id, created_at }
    }
}

/// Aggregate counts for a subject. `incoming` is always zero for topics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub outgoing: i64,
    pub incoming: i64,
}

impl Counts {
    pub fn new(outgoing: i64, incoming: i64) -> Self {
        Self { outgoing, incoming }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub ids: Vec<i64>,
    pub has_more: bool,
}

impl Page {
    /// Slice a page out of a full, already ordered list, clamping at the end.
    pub fn from_entries(entries: &[FollowEntry], cursor: usize, page_size: usize) -> Self {
        let start = cursor.min(entries.len());
        let end = cursor.saturating_add(page_size).min(entries.len());
        Self {
            ids: entries[start..end].iter().map(|e| e.target_id).collect(),
            has_more: entries.len() > end,
        }
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: i64) -> Vec<FollowEntry> {
        (0..n).map(|i| FollowEntry::new(100 + i, 1_000 - i)).collect()
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in [RelationKind::Person, RelationKind::Topic] {
            let parsed: RelationKind = kind.as_str().parse().unwrap();
            assert_eq!(kind, parsed);
            assert_eq!(RelationKind::from_code(kind.code()).unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_code_is_invalid_argument() {
        let err = RelationKind::from_code(7).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidArgument(_)));
        assert!("group".parse::<RelationKind>().is_err());
    }

    #[test]
    fn test_page_has_more() {
        let page = Page::from_entries(&entries(15), 0, 10);
        assert_eq!(page.ids.len(), 10);
        assert!(page.has_more);

        let page = Page::from_entries(&entries(10), 0, 10);
        assert_eq!(page.ids.len(), 10);
        assert!(!page.has_more);
    }

    #[test]
    fn test_page_clamps_short_lists() {
        let page = Page::from_entries(&entries(3), 0, 10);
        assert_eq!(page.ids, vec![100, 101, 102]);
        assert!(!page.has_more);

        let page = Page::from_entries(&entries(3), 50, 10);
        assert!(page.ids.is_empty());
        assert!(!page.has_more);
    }
}
