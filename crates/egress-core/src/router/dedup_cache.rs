//! Crash-recovery dedup cache
//!
//! Seeded at startup from orphaned journal entries (§4.5): every
//! `messageId` already uploaded before a crash is inserted here, and the
//! batch composer skips any job whose `messageId` is already present. This
//! delivers at-most-once effective delivery across a crash-and-retry cycle
//! for raw uploads.
//!
//! Capped with oldest-inserted-first eviction once the journal has been
//! drained, per the bounded-eviction note in the design notes — an
//! unbounded version would grow for the lifetime of the process.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

pub struct DedupCache {
    capacity: usize,
    state: Mutex<DedupCacheState>,
}

struct DedupCacheState {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(DedupCacheState {
                seen: HashSet::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// `true` if this message id has already been recorded as uploaded.
    pub fn contains(&self, message_id: &str) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).seen.contains(message_id)
    }

    /// Records a message id as uploaded, evicting the oldest entry first if
    /// the cache is at capacity.
    pub fn insert(&self, message_id: &str) {
        if self.capacity == 0 {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.seen.contains(message_id) {
            return;
        }
        if state.order.len() >= self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.seen.remove(&oldest);
            }
        }
        state.seen.insert(message_id.to_string());
        state.order.push_back(message_id.to_string());
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_contains() {
        let cache = DedupCache::new(10);
        assert!(!cache.contains("msg-1"));
        cache.insert("msg-1");
        assert!(cache.contains("msg-1"));
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let cache = DedupCache::new(2);
        cache.insert("msg-1");
        cache.insert("msg-2");
        cache.insert("msg-3");

        assert!(!cache.contains("msg-1"));
        assert!(cache.contains("msg-2"));
        assert!(cache.contains("msg-3"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_duplicate_insert_does_not_evict() {
        let cache = DedupCache::new(2);
        cache.insert("msg-1");
        cache.insert("msg-2");
        cache.insert("msg-1");

        assert!(cache.contains("msg-1"));
        assert!(cache.contains("msg-2"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_never_dedupes() {
        let cache = DedupCache::new(0);
        cache.insert("msg-1");
        assert!(!cache.contains("msg-1"));
    }
}
