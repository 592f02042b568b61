//! Cache key namespace
//!
//! Lists are sorted sets of member id -> creation time; counters are plain
//! integer values. All keys are per subject.

use crate::relation::{ListKind, RelationKind};

pub const KEY_PREFIX: &str = "social_service";

/// Key of a subject's ordered list
pub fn list_key(subject: i64, list: ListKind) -> String {
    match list {
        ListKind::Follows => format!("{}_follow_{}", KEY_PREFIX, subject),
        ListKind::Followers => format!("{}_follower_{}", KEY_PREFIX, subject),
        ListKind::TopicFollows => format!("{}_follow_topic_{}", KEY_PREFIX, subject),
    }
}

/// Key of one of a subject's counters
pub fn counter_key(subject: i64, list: ListKind) -> String {
    match list {
        ListKind::Follows => format!("{}_follow_count_{}", KEY_PREFIX, subject),
        ListKind::Followers => format!("{}_follower_count_{}", KEY_PREFIX, subject),
        ListKind::TopicFollows => format!("{}_follow_topic_count_{}", KEY_PREFIX, subject),
    }
}

/// Counter keys backing `GetCounts` for a kind, outgoing first.
pub fn counter_keys(subject: i64, kind: RelationKind) -> Vec<String> {
    match kind {
        RelationKind::Person => vec![
            counter_key(subject, ListKind::Follows),
            counter_key(subject, ListKind::Followers),
        ],
        RelationKind::Topic => vec![counter_key(subject, ListKind::TopicFollows)],
    }
}

/// Private staging key used while a list is being rehydrated. `owner`
/// identifies the writing cache layer so that layers sharing one tier never
/// write into each other's staging lists.
pub fn staging_key(key: &str, owner: &str, seq: u64) -> String {
    format!("{}:staging:{}:{}", key, owner, seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_keys_differ_per_owner() {
        let key = list_key(7, ListKind::Followers);
        let a = staging_key(&key, "100-1", 1);
        let b = staging_key(&key, "200-1", 1);
        assert_ne!(a, b);
        assert!(a.starts_with("social_service_follower_7:staging:"));
    }

    #[test]
    fn test_keys_are_distinct_per_list() {
        let keys = [
            list_key(7, ListKind::Follows),
            list_key(7, ListKind::Followers),
            list_key(7, ListKind::TopicFollows),
            counter_key(7, ListKind::Follows),
            counter_key(7, ListKind::Followers),
            counter_key(7, ListKind::TopicFollows),
        ];
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
        assert_eq!(keys[0], "social_service_follow_7");
        assert_eq!(keys[1], "social_service_follower_7");
    }

    #[test]
    fn test_counter_keys_per_kind() {
        assert_eq!(counter_keys(1, RelationKind::Person).len(), 2);
        assert_eq!(
            counter_keys(1, RelationKind::Topic),
            vec!["social_service_follow_topic_count_1".to_string()]
        );
    }
}
