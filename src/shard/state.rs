//! Shard state tracking
//!
//! Read-only view of what the engine is doing, shared with the health
//! endpoints. The engine is the only writer.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counters for a single tracked shard
#[derive(Debug)]
pub struct ShardStateEntry {
    pub reads: AtomicU64,
    pub records_emitted: AtomicU64,
    pub last_read: Option<Instant>,
    pub exhausted: bool,
}

impl Default for ShardStateEntry {
    fn default() -> Self {
        Self {
            reads: AtomicU64::new(0),
            records_emitted: AtomicU64::new(0),
            last_read: None,
            exhausted: false,
        }
    }
}

/// Shared state of the tracked set
#[derive(Debug, Clone, Default)]
pub struct ShardState {
    inner: Arc<ShardStateInner>,
}

#[derive(Debug, Default)]
struct ShardStateInner {
    shards: DashMap<String, ShardStateEntry>,
    active: AtomicBool,
    cycles: AtomicU64,
    resolutions: AtomicU64,
    last_cycle: Mutex<Option<Instant>>,
}

impl ShardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new tracked set replaced the old one
    pub fn replace_tracked<'a>(&self, shard_ids: impl IntoIterator<Item = &'a str>) {
        self.inner.shards.clear();
        for shard_id in shard_ids {
            self.inner
                .shards
                .insert(shard_id.to_string(), ShardStateEntry::default());
        }
        self.inner.active.store(true, Ordering::SeqCst);
        self.inner.resolutions.fetch_add(1, Ordering::Relaxed);
    }

    /// The tracked set was dropped (engine back to Idle)
    pub fn clear(&self) {
        self.inner.shards.clear();
        self.inner.active.store(false, Ordering::SeqCst);
    }

    /// Record a successful read and how many records it produced
    pub fn record_read(&self, shard_id: &str, records: usize) {
        if let Some(mut entry) = self.inner.shards.get_mut(shard_id) {
            entry.reads.fetch_add(1, Ordering::Relaxed);
            entry
                .records_emitted
                .fetch_add(records as u64, Ordering::Relaxed);
            entry.last_read = Some(Instant::now());
        }
    }

    pub fn mark_exhausted(&self, shard_id: &str) {
        if let Some(mut entry) = self.inner.shards.get_mut(shard_id) {
            entry.exhausted = true;
        }
    }

    pub fn record_cycle(&self) {
        self.inner.cycles.fetch_add(1, Ordering::Relaxed);
        *self.inner.last_cycle.lock() = Some(Instant::now());
    }

    /// True while a tracked set is present
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    pub fn shard_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.shards.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn is_exhausted(&self, shard_id: &str) -> Option<bool> {
        self.inner.shards.get(shard_id).map(|e| e.exhausted)
    }

    pub fn records_emitted(&self, shard_id: &str) -> Option<u64> {
        self.inner
            .shards
            .get(shard_id)
            .map(|e| e.records_emitted.load(Ordering::Relaxed))
    }

    /// Records emitted by the current tracked set
    pub fn total_records_emitted(&self) -> u64 {
        self.inner
            .shards
            .iter()
            .map(|e| e.records_emitted.load(Ordering::Relaxed))
            .sum()
    }

    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::Relaxed)
    }

    pub fn resolutions(&self) -> u64 {
        self.inner.resolutions.load(Ordering::Relaxed)
    }

    /// Seconds since the last completed cycle
    pub fn seconds_since_last_cycle(&self) -> Option<u64> {
        self.inner.last_cycle.lock().map(|at| at.elapsed().as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_resets_counters_and_activates() {
        let state = ShardState::new();
        assert!(!state.is_active());

        state.replace_tracked(["a", "b"]);
        state.record_read("a", 3);
        assert_eq!(state.records_emitted("a"), Some(3));
        assert_eq!(state.total_records_emitted(), 3);
        assert!(state.is_active());

        state.replace_tracked(["a"]);
        assert_eq!(state.records_emitted("a"), Some(0));
        assert_eq!(state.shard_ids(), vec!["a".to_string()]);
        assert_eq!(state.resolutions(), 2);
    }

    #[test]
    fn clear_returns_to_idle() {
        let state = ShardState::new();
        state.replace_tracked(["a"]);
        state.mark_exhausted("a");
        assert_eq!(state.is_exhausted("a"), Some(true));

        state.clear();
        assert!(!state.is_active());
        assert_eq!(state.shard_count(), 0);
        assert_eq!(state.is_exhausted("a"), None);
    }

    #[test]
    fn cycles_are_counted() {
        let state = ShardState::new();
        assert!(state.seconds_since_last_cycle().is_none());
        state.record_cycle();
        state.record_cycle();
        assert_eq!(state.cycles(), 2);
        assert_eq!(state.seconds_since_last_cycle(), Some(0));
    }
}
