//! In-process cache layer (L1): TTL expiry plus LRU eviction by last access.

use std::collections::HashMap;
use std::time::Duration;

/// A value held by the in-process layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    /// Cached value.
    pub value: T,
    /// Creation time (clock millis).
    pub timestamp: u64,
    /// Lifetime measured from `timestamp`.
    pub ttl: Duration,
    /// Number of reads served from this entry.
    pub hit_count: u64,
    /// Last read or write time (clock millis).
    pub access_time: u64,
}

impl<T> CacheEntry<T> {
    /// Fresh entry written at `now`.
    pub fn new(value: T, ttl: Duration, now: u64) -> Self {
        Self { value, timestamp: now, ttl, hit_count: 0, access_time: now }
    }

    /// Logically absent once strictly more than `ttl` has elapsed since creation.
    pub fn is_expired(&self, now: u64) -> bool {
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        now.saturating_sub(self.timestamp) > ttl_ms
    }
}

#[derive(Debug)]
struct Slot<T> {
    entry: CacheEntry<T>,
    // Tie-breaker for entries touched within the same millisecond.
    access_seq: u64,
}

/// Bounded map with lazy expiry and strict LRU eviction on `access_time`.
///
/// Eviction scans for the oldest access; capacities are small (hundreds to
/// low thousands) so the linear scan only runs when the layer is full.
#[derive(Debug)]
pub(crate) struct MemoryLayer<T> {
    entries: HashMap<String, Slot<T>>,
    capacity: usize,
    seq: u64,
}

impl<T: Clone> MemoryLayer<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { entries: HashMap::new(), capacity: capacity.max(1), seq: 0 }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Read a live value, refreshing its access time. Expired entries are removed.
    pub(crate) fn get(&mut self, key: &str, now: u64) -> Option<T> {
        let expired = match self.entries.get(key) {
            Some(slot) => slot.entry.is_expired(now),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        let seq = self.next_seq();
        let slot = self.entries.get_mut(key)?;
        slot.entry.hit_count += 1;
        slot.entry.access_time = now;
        slot.access_seq = seq;
        Some(slot.entry.value.clone())
    }

    /// Insert or replace a value. Returns the key evicted to make room, if any.
    pub(crate) fn insert(&mut self, key: &str, value: T, ttl: Duration, now: u64) -> Option<String> {
        let mut evicted = None;
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            evicted = self.evict_lru();
        }
        let seq = self.next_seq();
        self.entries
            .insert(key.to_string(), Slot { entry: CacheEntry::new(value, ttl, now), access_seq: seq });
        evicted
    }

    fn evict_lru(&mut self) -> Option<String> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, slot)| (slot.entry.access_time, slot.access_seq))
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&victim);
        Some(victim)
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every key matching a `*` wildcard pattern.
    pub(crate) fn remove_matching(&mut self, pattern: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !wildcard_match(pattern, key));
        before - self.entries.len()
    }

    /// Drop expired entries regardless of reads.
    pub(crate) fn sweep(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.entry.is_expired(now));
        before - self.entries.len()
    }

    /// Inspect an entry without touching its access metadata.
    pub(crate) fn peek(&self, key: &str) -> Option<&CacheEntry<T>> {
        self.entries.get(key).map(|slot| &slot.entry)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Match `key` against a pattern where `*` stands for any run of characters.
///
/// A pattern without `*` must equal the key.
pub(crate) fn wildcard_match(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    if !key.starts_with(first) {
        return false;
    }
    let segments: Vec<&str> = parts.collect();
    if segments.is_empty() {
        return key.len() == first.len();
    }
    let mut rest = &key[first.len()..];
    let (last, middle) = match segments.split_last() {
        Some(split) => split,
        None => return true,
    };
    for segment in middle {
        match rest.find(segment) {
            Some(idx) => rest = &rest[idx + segment.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn entry_expires_strictly_after_ttl() {
        let entry = CacheEntry::new(1, Duration::from_secs(1), 1_000);
        assert!(!entry.is_expired(2_000));
        assert!(entry.is_expired(2_001));
    }

    #[test]
    fn get_removes_expired_entries() {
        let mut layer = MemoryLayer::new(4);
        layer.insert("k", 1, Duration::from_secs(1), 0);
        assert_eq!(layer.get("k", 500), Some(1));
        assert_eq!(layer.get("k", 1_001), None);
        assert_eq!(layer.len(), 0);
    }

    #[test]
    fn evicts_least_recently_accessed_not_oldest_inserted() {
        let mut layer = MemoryLayer::new(3);
        layer.insert("a", 1, TTL, 10);
        layer.insert("b", 2, TTL, 20);
        layer.insert("c", 3, TTL, 30);
        // "a" was inserted first but read most recently.
        assert_eq!(layer.get("a", 40), Some(1));

        let evicted = layer.insert("d", 4, TTL, 50);
        assert_eq!(evicted.as_deref(), Some("b"));
        assert!(layer.peek("a").is_some());
        assert!(layer.peek("b").is_none());
        assert_eq!(layer.len(), 3);
    }

    #[test]
    fn same_millisecond_accesses_fall_back_to_sequence() {
        let mut layer = MemoryLayer::new(2);
        layer.insert("a", 1, TTL, 5);
        layer.insert("b", 2, TTL, 5);
        layer.get("a", 5);
        assert_eq!(layer.insert("c", 3, TTL, 5).as_deref(), Some("b"));
    }

    #[test]
    fn replacing_existing_key_does_not_evict() {
        let mut layer = MemoryLayer::new(2);
        layer.insert("a", 1, TTL, 0);
        layer.insert("b", 2, TTL, 1);
        assert!(layer.insert("a", 10, TTL, 2).is_none());
        assert_eq!(layer.get("a", 3), Some(10));
        assert_eq!(layer.len(), 2);
    }

    #[test]
    fn hit_count_tracks_reads() {
        let mut layer = MemoryLayer::new(2);
        layer.insert("a", 1, TTL, 0);
        layer.get("a", 1);
        layer.get("a", 2);
        let entry = layer.peek("a").unwrap();
        assert_eq!(entry.hit_count, 2);
        assert_eq!(entry.access_time, 2);
        assert_eq!(entry.timestamp, 0);
    }

    #[test]
    fn sweep_drops_only_expired() {
        let mut layer = MemoryLayer::new(8);
        layer.insert("short", 1, Duration::from_secs(1), 0);
        layer.insert("long", 2, Duration::from_secs(100), 0);
        assert_eq!(layer.sweep(5_000), 1);
        assert!(layer.peek("long").is_some());
    }

    #[test]
    fn remove_matching_uses_wildcard() {
        let mut layer = MemoryLayer::new(8);
        layer.insert("toggle:email", 1, TTL, 0);
        layer.insert("toggle:sms", 2, TTL, 0);
        layer.insert("settings:org", 3, TTL, 0);
        assert_eq!(layer.remove_matching("toggle:*"), 2);
        assert_eq!(layer.len(), 1);
    }

    #[test]
    fn wildcard_matching_rules() {
        assert!(wildcard_match("user:*", "user:42"));
        assert!(wildcard_match("user:*", "user:"));
        assert!(!wildcard_match("user:*", "org:42"));
        assert!(wildcard_match("*:settings", "org:settings"));
        assert!(wildcard_match("org:*:settings", "org:7:settings"));
        assert!(!wildcard_match("org:*:settings", "org:7:toggles"));
        assert!(wildcard_match("exact", "exact"));
        assert!(!wildcard_match("exact", "exactly"));
        assert!(wildcard_match("*", "anything"));
        assert!(!wildcard_match("ab*ba", "aba"));
    }
}
