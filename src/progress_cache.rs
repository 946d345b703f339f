//! Short-lived per-level statistics cache (word totals, completion, the
//! familiarity histogram) used to avoid redundant progress queries during a
//! session.
//!
//! Owned explicitly by the engine and passed by Arc; invalidation is an
//! explicit call, never ambient. Entries carry a freshness flag: stale
//! entries stay around as hints but read as misses.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, instrument};

use crate::domain::CachedProgressEntry;
use crate::events::EngineEvent;

/// Where a cached entry came from. Estimates are derived from local level
/// content and never satisfy a fresh read, so the next access retries the
/// network path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOrigin {
    Server,
    Estimated,
}

#[derive(Clone, Debug)]
struct CacheSlot {
    entry: CachedProgressEntry,
    fresh: bool,
}

#[derive(Clone)]
pub struct ProgressCache {
    slots: Arc<RwLock<HashMap<u32, CacheSlot>>>,
    events: broadcast::Sender<EngineEvent>,
}

impl ProgressCache {
    pub fn new(events: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Fresh entry for a level, or a miss.
    pub async fn get(&self, level_number: u32) -> Option<CachedProgressEntry> {
        let slots = self.slots.read().await;
        slots
            .get(&level_number)
            .filter(|s| s.fresh)
            .map(|s| s.entry.clone())
    }

    /// Last known entry regardless of freshness. Presentation can render a
    /// stale value while a refresh is on the way.
    pub async fn get_stale(&self, level_number: u32) -> Option<CachedProgressEntry> {
        let slots = self.slots.read().await;
        slots.get(&level_number).map(|s| s.entry.clone())
    }

    #[instrument(level = "debug", skip(self, entry), fields(%level_number))]
    pub async fn put(&self, level_number: u32, entry: CachedProgressEntry) {
        self.store(level_number, entry, CacheOrigin::Server).await;
    }

    /// Cache a locally derived estimate. Stored stale so the next access
    /// still tries the network path.
    #[instrument(level = "debug", skip(self, entry), fields(%level_number))]
    pub async fn put_estimate(&self, level_number: u32, entry: CachedProgressEntry) {
        self.store(level_number, entry, CacheOrigin::Estimated).await;
    }

    async fn store(&self, level_number: u32, entry: CachedProgressEntry, origin: CacheOrigin) {
        let fresh = origin == CacheOrigin::Server;
        let mut slots = self.slots.write().await;
        slots.insert(level_number, CacheSlot { entry: entry.clone(), fresh });
        drop(slots);
        let _ = self.events.send(EngineEvent::ProgressUpdated { level_number, entry });
    }

    /// Bulk warm from the collaborator's one-round-trip stats endpoint.
    #[instrument(level = "debug", skip(self, entries), fields(count = entries.len()))]
    pub async fn warm_bulk(&self, entries: HashMap<u32, CachedProgressEntry>) {
        for (level_number, entry) in entries {
            self.store(level_number, entry, CacheOrigin::Server).await;
        }
    }

    /// Mark a level's entry stale. Called whenever generation completes for
    /// the level or new gameplay progress is recorded.
    #[instrument(level = "debug", skip(self), fields(%level_number))]
    pub async fn invalidate(&self, level_number: u32) {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(&level_number) {
            slot.fresh = false;
            debug!(target: "curriculum_engine", %level_number, "Progress cache entry invalidated");
        }
    }

    /// Drop everything; used when the active group changes.
    pub async fn clear(&self) {
        self.slots.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ProgressCache {
        let (tx, _) = broadcast::channel(64);
        ProgressCache::new(tx)
    }

    fn entry(total: u32) -> CachedProgressEntry {
        CachedProgressEntry {
            total_words: total,
            completed_words: total / 2,
            level_score: 0.5,
            familiarity_counts: [total, 0, 0, 0, 0, 0],
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = cache();
        cache.put(3, entry(12)).await;
        assert_eq!(cache.get(3).await, Some(entry(12)));
        assert_eq!(cache.get(4).await, None);
    }

    #[tokio::test]
    async fn invalidation_turns_hits_into_misses() {
        let cache = cache();
        cache.put(3, entry(12)).await;
        cache.invalidate(3).await;
        assert_eq!(cache.get(3).await, None);
        // The stale value is still available as a rendering hint.
        assert_eq!(cache.get_stale(3).await, Some(entry(12)));
    }

    #[tokio::test]
    async fn estimates_never_read_as_fresh() {
        let cache = cache();
        cache.put_estimate(5, entry(7)).await;
        assert_eq!(cache.get(5).await, None);
        assert_eq!(cache.get_stale(5).await, Some(entry(7)));

        // A later server entry upgrades the slot.
        cache.put(5, entry(9)).await;
        assert_eq!(cache.get(5).await, Some(entry(9)));
    }

    #[tokio::test]
    async fn bulk_warm_populates_all_levels() {
        let cache = cache();
        let mut entries = HashMap::new();
        entries.insert(1, entry(4));
        entries.insert(2, entry(8));
        cache.warm_bulk(entries).await;
        assert!(cache.get(1).await.is_some());
        assert!(cache.get(2).await.is_some());
    }

    #[tokio::test]
    async fn updates_are_broadcast() {
        let (tx, mut rx) = broadcast::channel(64);
        let cache = ProgressCache::new(tx);
        cache.put(2, entry(6)).await;
        match rx.try_recv() {
            Ok(EngineEvent::ProgressUpdated { level_number, entry: e }) => {
                assert_eq!(level_number, 2);
                assert_eq!(e.total_words, 6);
            }
            other => panic!("expected progress event, got {other:?}"),
        }
    }
}
