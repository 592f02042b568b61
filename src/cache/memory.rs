//! In-process cache tier
//!
//! Sorted sets and integer counters keyed by string, with per-key expiry.
//! Expired keys are dropped lazily on access.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CacheBackend, ScanPage};
use crate::relation::FollowEntry;
use crate::{Error, Result};

/// How long an unused scan cursor stays resumable
const SCAN_CURSOR_TTL: Duration = Duration::from_secs(600);

/// Position of a member in a sorted set: (score, member), both descending.
type Rank = (Reverse<i64>, Reverse<i64>);

/// Members ordered by descending score, ties by descending member.
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<i64, i64>,
    order: BTreeSet<Rank>,
}

impl SortedSet {
    fn insert(&mut self, member: i64, score: i64) {
        if let Some(old) = self.scores.insert(member, score) {
            self.order.remove(&(Reverse(old), Reverse(member)));
        }
        self.order.insert((Reverse(score), Reverse(member)));
    }

    fn remove(&mut self, member: i64) -> bool {
        match self.scores.remove(&member) {
            Some(score) => self.order.remove(&(Reverse(score), Reverse(member))),
            None => false,
        }
    }

    fn members(&self, skip: usize, take: usize) -> Vec<i64> {
        self.order
            .iter()
            .skip(skip)
            .take(take)
            .map(|(_, Reverse(member))| *member)
            .collect()
    }

    /// Up to `take` positions strictly after `after`, or from the start.
    fn ranks_after(&self, after: Option<Rank>, take: usize) -> Vec<Rank> {
        let lower = match after {
            Some(rank) => Bound::Excluded(rank),
            None => Bound::Unbounded,
        };
        self.order.range((lower, Bound::Unbounded)).take(take).copied().collect()
    }
}

/// Where a paused scan resumes.
#[derive(Debug)]
struct ScanCursor {
    key: String,
    last: Rank,
    expires_at: Instant,
}

#[derive(Debug)]
enum Value {
    List(SortedSet),
    Counter(String),
}

#[derive(Debug)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process cache tier, safe for concurrent use.
///
/// Scan cursors name the last member delivered rather than an offset, so a
/// member present for the whole scan is returned exactly once even while the
/// list is being written to.
#[derive(Debug, Default)]
pub struct MemoryCache {
    slots: Mutex<HashMap<String, Slot>>,
    cursors: Mutex<HashMap<u64, ScanCursor>>,
    next_cursor: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> Result<MutexGuard<'_, HashMap<String, Slot>>> {
        self.slots
            .lock()
            .map_err(|e| Error::CacheDegraded(format!("cache lock poisoned: {}", e)))
    }

    fn cursors(&self) -> Result<MutexGuard<'_, HashMap<u64, ScanCursor>>> {
        self.cursors
            .lock()
            .map_err(|e| Error::CacheDegraded(format!("cursor lock poisoned: {}", e)))
    }

    /// Park a scan position and hand out its non-zero id.
    fn issue_cursor(&self, key: &str, last: Rank) -> Result<u64> {
        let now = Instant::now();
        let mut cursors = self.cursors()?;
        cursors.retain(|_, c| c.expires_at > now);

        let id = loop {
            let id = self.next_cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 && !cursors.contains_key(&id) {
                break id;
            }
        };
        cursors.insert(
            id,
            ScanCursor {
                key: key.to_string(),
                last,
                expires_at: now + SCAN_CURSOR_TTL,
            },
        );
        Ok(id)
    }

    /// Consume a cursor issued for `key`.
    fn resume_cursor(&self, key: &str, cursor: u64) -> Result<Rank> {
        let parked = self.cursors()?.remove(&cursor);
        match parked {
            Some(c) if c.key == key && c.expires_at > Instant::now() => Ok(c.last),
            _ => Err(Error::CacheDegraded(format!("invalid scan cursor {} for {}", cursor, key))),
        }
    }

    /// Whether a live key exists
    pub fn exists(&self, key: &str) -> bool {
        self.slots()
            .map(|mut slots| live_slot(&mut slots, key).is_some())
            .unwrap_or(false)
    }

    /// Remaining time to live of a live key; `None` when absent or persistent
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut slots = self.slots().ok()?;
        let slot = live_slot(&mut slots, key)?;
        slot.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots()
            .map(|slots| slots.values().filter(|s| !s.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn insert_raw_counter(&self, key: &str, raw: &str) {
        let mut slots = self.slots.lock().unwrap();
        slots.insert(key.to_string(), Slot::new(Value::Counter(raw.to_string()), None));
    }
}

/// Live slot for `key`, dropping it first if it has expired.
fn live_slot<'a>(slots: &'a mut HashMap<String, Slot>, key: &str) -> Option<&'a mut Slot> {
    let expired = slots.get(key)?.is_expired(Instant::now());
    if expired {
        slots.remove(key);
        return None;
    }
    slots.get_mut(key)
}

fn wrong_type(key: &str) -> Error {
    Error::CacheDegraded(format!("WRONGTYPE operation against key {}", key))
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn range_desc(&self, key: &str, start: usize, stop: usize) -> Result<Option<Vec<i64>>> {
        let mut slots = self.slots()?;
        match live_slot(&mut slots, key) {
            None => Ok(None),
            Some(Slot { value: Value::List(set), .. }) => {
                if stop < start {
                    return Ok(Some(Vec::new()));
                }
                Ok(Some(set.members(start, stop - start + 1)))
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn add_members(&self, key: &str, members: &[FollowEntry]) -> Result<()> {
        let mut slots = self.slots()?;
        if live_slot(&mut slots, key).is_none() {
            slots.insert(key.to_string(), Slot::new(Value::List(SortedSet::default()), None));
        }
        match slots.get_mut(key) {
            Some(Slot { value: Value::List(set), .. }) => {
                for entry in members {
                    set.insert(entry.target_id, entry.created_at);
                }
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn add_member_if_exists(&self, key: &str, member: FollowEntry) -> Result<bool> {
        let mut slots = self.slots()?;
        match live_slot(&mut slots, key) {
            None => Ok(false),
            Some(Slot { value: Value::List(set), .. }) => {
                set.insert(member.target_id, member.created_at);
                Ok(true)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn remove_member_if_exists(&self, key: &str, member: i64) -> Result<bool> {
        let mut slots = self.slots()?;
        match live_slot(&mut slots, key) {
            None => Ok(false),
            Some(Slot { value: Value::List(set), .. }) => Ok(set.remove(member)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn scan(&self, key: &str, cursor: u64, count: usize) -> Result<Option<ScanPage>> {
        let after = match cursor {
            0 => None,
            c => Some(self.resume_cursor(key, c)?),
        };
        let count = count.max(1);

        let mut slots = self.slots()?;
        match live_slot(&mut slots, key) {
            None => Ok(None),
            Some(Slot { value: Value::List(set), .. }) => {
                let mut ranks = set.ranks_after(after, count + 1);
                let more = ranks.len() > count;
                ranks.truncate(count);

                let ids = ranks.iter().map(|(_, Reverse(member))| *member).collect();
                let cursor = match ranks.last() {
                    Some(last) if more => self.issue_cursor(key, *last)?,
                    _ => 0,
                };
                Ok(Some(ScanPage { ids, cursor }))
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut slots = self.slots()?;
        match live_slot(&mut slots, key) {
            None => Ok(false),
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
        }
    }

    async fn rename(&self, from: &str, to: &str, ttl: Duration) -> Result<()> {
        let mut slots = self.slots()?;
        if live_slot(&mut slots, from).is_none() {
            return Err(Error::CacheDegraded(format!("no such key: {}", from)));
        }
        let Some(mut slot) = slots.remove(from) else {
            return Err(Error::CacheDegraded(format!("no such key: {}", from)));
        };
        slot.expires_at = Some(Instant::now() + ttl);
        slots.insert(to.to_string(), slot);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.slots()?.remove(key);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64, ttl_if_created: Duration) -> Result<i64> {
        let mut slots = self.slots()?;
        match live_slot(&mut slots, key) {
            None => {
                slots.insert(
                    key.to_string(),
                    Slot::new(Value::Counter(delta.to_string()), Some(ttl_if_created)),
                );
                Ok(delta)
            }
            Some(Slot { value: Value::Counter(raw), .. }) => {
                let current: i64 = raw.parse().map_err(|_| {
                    Error::CacheDegraded(format!("value at {} is not an integer", key))
                })?;
                let next = current + delta;
                *raw = next.to_string();
                Ok(next)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let mut slots = self.slots()?;
        Ok(keys
            .iter()
            .map(|key| match live_slot(&mut slots, key) {
                Some(Slot { value: Value::Counter(raw), .. }) => Some(raw.clone()),
                _ => None,
            })
            .collect())
    }

    async fn set_many(&self, entries: &[(String, i64)], ttl: Duration) -> Result<()> {
        let mut slots = self.slots()?;
        for (key, value) in entries {
            slots.insert(key.clone(), Slot::new(Value::Counter(value.to_string()), Some(ttl)));
        }
        Ok(())
    }
}
