//! In-memory content store: the lifecycle state of every level's generated
//! material, observed by the presentation layer.
//!
//! Transitions are driven exclusively by scheduler task completions:
//! `Empty -> Generating -> {Ready | Error}`. A level returns to `Empty` only
//! through an explicit regeneration request. The `begin_generation` guard is
//! the engine's whole mutual-exclusion story: at most one in-flight attempt
//! per level, enforced by a state check rather than a lock primitive.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::domain::{ContentState, PracticeItem};
use crate::events::EngineEvent;

#[derive(Clone, Debug, Default)]
struct LevelSlot {
    state: ContentState,
    items: Vec<PracticeItem>,
    error_message: Option<String>,
}

#[derive(Clone)]
pub struct ContentStore {
    slots: Arc<RwLock<HashMap<u32, LevelSlot>>>,
    events: broadcast::Sender<EngineEvent>,
}

impl ContentStore {
    pub fn new(events: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Reset the store to a freshly loaded group: levels with persisted
    /// content start `Ready`, lazy levels start `Empty`.
    #[instrument(level = "debug", skip(self, levels), fields(count = levels.len()))]
    pub async fn seed_group(&self, levels: Vec<(u32, Option<Vec<PracticeItem>>)>) {
        let mut slots = self.slots.write().await;
        slots.clear();
        for (level_number, content) in levels {
            let slot = match content {
                Some(items) if !items.is_empty() => LevelSlot {
                    state: ContentState::Ready,
                    items: items.into_iter().map(PracticeItem::with_derived_words).collect(),
                    error_message: None,
                },
                _ => LevelSlot::default(),
            };
            slots.insert(level_number, slot);
        }
    }

    /// Claim a level for generation. Returns false (and leaves the slot
    /// untouched) when a task is already in flight or content is already
    /// present; callers treat that as a no-op, not an error.
    #[instrument(level = "debug", skip(self), fields(%level_number))]
    pub async fn begin_generation(&self, level_number: u32) -> bool {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(level_number).or_default();
        match slot.state {
            ContentState::Generating => {
                debug!(target: "generation", %level_number, "Generation already in flight; rejecting duplicate");
                false
            }
            ContentState::Ready => {
                debug!(target: "generation", %level_number, "Content already present; skipping generation");
                false
            }
            ContentState::Empty | ContentState::Error => {
                slot.state = ContentState::Generating;
                slot.error_message = None;
                drop(slots);
                self.emit_state(level_number, ContentState::Generating);
                true
            }
        }
    }

    #[instrument(level = "debug", skip(self, items), fields(%level_number, item_count = items.len()))]
    pub async fn mark_ready(&self, level_number: u32, items: Vec<PracticeItem>) {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(level_number).or_default();
        slot.state = ContentState::Ready;
        slot.items = items.into_iter().map(PracticeItem::with_derived_words).collect();
        slot.error_message = None;
        drop(slots);
        info!(target: "generation", %level_number, "Level content ready");
        self.emit_state(level_number, ContentState::Ready);
    }

    #[instrument(level = "debug", skip(self, message), fields(%level_number))]
    pub async fn mark_error(&self, level_number: u32, message: impl Into<String>) {
        let message = message.into();
        let mut slots = self.slots.write().await;
        let slot = slots.entry(level_number).or_default();
        slot.state = ContentState::Error;
        slot.error_message = Some(message.clone());
        drop(slots);
        warn!(target: "generation", %level_number, error = %message, "Level generation failed");
        self.emit_state(level_number, ContentState::Error);
    }

    /// Explicit regeneration entry point: drop existing content and return
    /// the level to `Empty` so a fresh attempt can claim it.
    #[instrument(level = "info", skip(self), fields(%level_number))]
    pub async fn reset_for_regeneration(&self, level_number: u32) {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(level_number).or_default();
        slot.state = ContentState::Empty;
        slot.items.clear();
        slot.error_message = None;
        drop(slots);
        self.emit_state(level_number, ContentState::Empty);
    }

    pub async fn state(&self, level_number: u32) -> ContentState {
        self.slots
            .read()
            .await
            .get(&level_number)
            .map(|s| s.state.clone())
            .unwrap_or_default()
    }

    pub async fn items(&self, level_number: u32) -> Option<Vec<PracticeItem>> {
        let slots = self.slots.read().await;
        slots.get(&level_number).and_then(|s| {
            if s.state == ContentState::Ready {
                Some(s.items.clone())
            } else {
                None
            }
        })
    }

    pub async fn error_message(&self, level_number: u32) -> Option<String> {
        let slots = self.slots.read().await;
        slots.get(&level_number).and_then(|s| s.error_message.clone())
    }

    /// Sorted level numbers with no content and no task in flight.
    pub async fn needing_generation(&self) -> Vec<u32> {
        let slots = self.slots.read().await;
        let mut out: Vec<u32> = slots
            .iter()
            .filter(|(_, s)| s.state == ContentState::Empty)
            .map(|(l, _)| *l)
            .collect();
        out.sort_unstable();
        out
    }

    /// Distinct-word count across a ready level's items. Feeds the progress
    /// cache's local estimate when the network path is unavailable.
    pub async fn distinct_word_count(&self, level_number: u32) -> u32 {
        let slots = self.slots.read().await;
        let Some(slot) = slots.get(&level_number) else { return 0 };
        let mut words: Vec<&str> = slot.items.iter().flat_map(|i| i.words.iter().map(String::as_str)).collect();
        words.sort_unstable();
        words.dedup();
        words.len() as u32
    }

    pub async fn snapshot(&self) -> HashMap<u32, ContentState> {
        let slots = self.slots.read().await;
        slots.iter().map(|(l, s)| (*l, s.state.clone())).collect()
    }

    fn emit_state(&self, level_number: u32, state: ContentState) {
        // Nobody subscribed is fine; the store does not require observers.
        let _ = self.events.send(EngineEvent::ContentStateChanged { level_number, state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ContentStore {
        let (tx, _) = broadcast::channel(64);
        ContentStore::new(tx)
    }

    fn items() -> Vec<PracticeItem> {
        vec![
            PracticeItem::new("El gato duerme.", "The cat sleeps."),
            PracticeItem::new("El perro corre.", "The dog runs."),
        ]
    }

    #[tokio::test]
    async fn seed_marks_existing_content_ready() {
        let store = store();
        store.seed_group(vec![(1, Some(items())), (2, None)]).await;
        assert_eq!(store.state(1).await, ContentState::Ready);
        assert_eq!(store.state(2).await, ContentState::Empty);
        assert_eq!(store.needing_generation().await, vec![2]);
    }

    #[tokio::test]
    async fn generation_lifecycle_round_trips_items() {
        let store = store();
        store.seed_group(vec![(3, None)]).await;
        assert!(store.begin_generation(3).await);
        assert_eq!(store.state(3).await, ContentState::Generating);

        let generated = items();
        store.mark_ready(3, generated.clone()).await;
        assert_eq!(store.items(3).await.unwrap(), generated);
    }

    #[tokio::test]
    async fn duplicate_generation_is_rejected() {
        let store = store();
        store.seed_group(vec![(1, None)]).await;
        assert!(store.begin_generation(1).await);
        assert!(!store.begin_generation(1).await);

        // The eventual transition is identical to the single-task case.
        store.mark_ready(1, items()).await;
        assert_eq!(store.state(1).await, ContentState::Ready);
    }

    #[tokio::test]
    async fn ready_levels_are_not_reclaimed_without_reset() {
        let store = store();
        store.seed_group(vec![(1, Some(items()))]).await;
        assert!(!store.begin_generation(1).await);

        store.reset_for_regeneration(1).await;
        assert_eq!(store.state(1).await, ContentState::Empty);
        assert!(store.items(1).await.is_none());
        assert!(store.begin_generation(1).await);
    }

    #[tokio::test]
    async fn errored_levels_stay_retryable() {
        let store = store();
        store.seed_group(vec![(2, None)]).await;
        assert!(store.begin_generation(2).await);
        store.mark_error(2, "backend unreachable").await;
        assert_eq!(store.state(2).await, ContentState::Error);
        assert_eq!(store.error_message(2).await.as_deref(), Some("backend unreachable"));
        assert!(store.begin_generation(2).await);
    }

    #[tokio::test]
    async fn transitions_are_broadcast() {
        let (tx, mut rx) = broadcast::channel(64);
        let store = ContentStore::new(tx);
        store.seed_group(vec![(1, None)]).await;
        store.begin_generation(1).await;
        store.mark_ready(1, items()).await;

        let mut states = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let EngineEvent::ContentStateChanged { level_number, state } = ev {
                states.push((level_number, state));
            }
        }
        assert_eq!(
            states,
            vec![(1, ContentState::Generating), (1, ContentState::Ready)]
        );
    }
}
