//! Engine wiring: owns the backend client, content store, progress cache,
//! and scheduler, and exposes the group-open flow to the presentation layer.
//!
//! `open_group` returns once the current active level is `Ready` or `Error`;
//! everything else fills in on a spawned background task, surfaced through
//! the event stream.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::api::{ApiError, LevelsBackend};
use crate::config::EngineConfig;
use crate::content::ContentStore;
use crate::domain::{CachedProgressEntry, Caller, ContentState, LevelGroup, PracticeItem};
use crate::events::EngineEvent;
use crate::progress_cache::ProgressCache;
use crate::scheduler::{self, GenerationPlan, Scheduler};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Result of opening a group: the plan that was executed, the post-immediate
/// content states, and a handle on the still-running background work.
pub struct OpenedGroup {
    pub group: LevelGroup,
    pub plan: GenerationPlan,
    pub states: HashMap<u32, ContentState>,
    pub background: Option<JoinHandle<()>>,
}

pub struct Engine<B: LevelsBackend> {
    backend: Arc<B>,
    config: EngineConfig,
    content: ContentStore,
    progress_cache: ProgressCache,
    scheduler: Arc<Scheduler<B>>,
    active_group: Arc<RwLock<Option<String>>>,
    events: broadcast::Sender<EngineEvent>,
}

impl<B: LevelsBackend + 'static> Engine<B> {
    pub fn new(backend: Arc<B>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let content = ContentStore::new(events.clone());
        let progress_cache = ProgressCache::new(events.clone());
        let active_group = Arc::new(RwLock::new(None));
        let scheduler = Arc::new(Scheduler::new(
            backend.clone(),
            content.clone(),
            progress_cache.clone(),
            config.scheduler.clone(),
            active_group.clone(),
        ));
        Self { backend, config, content, progress_cache, scheduler, active_group, events }
    }

    /// Subscribe to `(level, ContentState)` and `(level, CachedProgressEntry)`
    /// updates as generation and cache refreshes land.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn progress_cache(&self) -> &ProgressCache {
        &self.progress_cache
    }

    /// Open a group: load its levels and the caller's progress, compute the
    /// generation plan, generate the immediate set (awaited), and kick off
    /// background generation plus a bulk cache warm.
    #[instrument(level = "info", skip(self, caller), fields(%group_id, authenticated = caller.is_authenticated()))]
    pub async fn open_group(&self, group_id: &str, caller: &Caller) -> Result<OpenedGroup, ApiError> {
        *self.active_group.write().await = Some(group_id.to_string());
        self.progress_cache.clear().await;

        let group_levels = self.backend.fetch_group_levels(group_id).await?;
        let total_levels = group_levels.levels.len() as u32;
        self.content
            .seed_group(
                group_levels
                    .levels
                    .into_iter()
                    .map(|l| {
                        // The lazy-loading flag is authoritative: a lazy level
                        // needs generation even if stale content tags along.
                        let content = if l.lazy_loading { None } else { l.content };
                        (l.level_number, content)
                    })
                    .collect(),
            )
            .await;

        // Progress is read-only to the engine; a failed fetch degrades to
        // the brand-new-group path rather than aborting the open.
        let progress = if caller.is_authenticated() {
            match self.backend.fetch_user_progress(group_id).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(target: "curriculum_engine", %group_id, error = %e, "Progress fetch failed; treating group as new");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        let needing = self.content.needing_generation().await;
        let plan = scheduler::plan(
            caller,
            total_levels,
            &progress,
            &needing,
            self.config.progression.pass_score,
        );
        info!(
            target: "curriculum_engine",
            %group_id,
            unlocked_through = ?plan.unlocked.last(),
            active_level = ?plan.active_level,
            immediate = plan.immediate.len(),
            background = plan.background.len(),
            "Generation plan computed"
        );

        self.scheduler.run_immediate(group_id, &plan.immediate).await;

        // Spawned even when the background set is empty: the bulk cache warm
        // still keeps per-level queries off the network.
        let background = Some(self.spawn_group_task(group_id.to_string(), plan.background.clone()));

        let states = self.content.snapshot().await;
        Ok(OpenedGroup { group: group_levels.group, plan, states, background })
    }

    fn spawn_group_task(&self, group_id: String, background: Vec<u32>) -> JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        let backend = self.backend.clone();
        let cache = self.progress_cache.clone();
        let active_group = self.active_group.clone();
        tokio::spawn(async move {
            // One round trip warms the whole cache when the collaborator
            // supports it; misses fall back lazily per level.
            match backend.fetch_progress_cache(&group_id).await {
                Ok(entries) => {
                    let still_active = active_group.read().await.as_deref() == Some(group_id.as_str());
                    if still_active {
                        cache.warm_bulk(entries).await;
                    }
                }
                Err(e) => {
                    info!(target: "curriculum_engine", %group_id, error = %e, "Bulk progress-cache fetch unavailable; will populate lazily");
                }
            }
            scheduler.run_background(&group_id, background).await;
        })
    }

    /// Per-level statistics with the full fallback chain: fresh cache entry,
    /// then the per-level progress + familiarity endpoints, then a local
    /// estimate from generated content (never blocks on network).
    #[instrument(level = "debug", skip(self), fields(%group_id, %level_number))]
    pub async fn level_progress(&self, group_id: &str, level_number: u32) -> CachedProgressEntry {
        if let Some(entry) = self.progress_cache.get(level_number).await {
            return entry;
        }

        let stats = self.backend.fetch_level_progress(group_id, level_number).await;
        let familiarity = self.backend.fetch_level_familiarity(group_id, level_number).await;
        match (stats, familiarity) {
            (Ok(stats), Ok(familiarity_counts)) => {
                let entry = CachedProgressEntry {
                    total_words: stats.total_words,
                    completed_words: stats.completed_words,
                    level_score: stats.level_score,
                    familiarity_counts,
                };
                self.progress_cache.put(level_number, entry.clone()).await;
                entry
            }
            (stats, familiarity) => {
                if let Err(e) = stats.as_ref() {
                    info!(target: "curriculum_engine", %level_number, error = %e, "Per-level progress fetch failed; estimating locally");
                }
                if let Err(e) = familiarity {
                    info!(target: "curriculum_engine", %level_number, error = %e, "Familiarity fetch failed; estimating locally");
                }
                let entry = self.estimate_entry(level_number).await;
                self.progress_cache.put_estimate(level_number, entry.clone()).await;
                entry
            }
        }
    }

    /// Estimate from whatever content is locally available: every distinct
    /// word counts as unseen (familiarity stage 0).
    async fn estimate_entry(&self, level_number: u32) -> CachedProgressEntry {
        let total_words = self.content.distinct_word_count(level_number).await;
        CachedProgressEntry {
            total_words,
            completed_words: 0,
            level_score: 0.0,
            familiarity_counts: [total_words, 0, 0, 0, 0, 0],
        }
    }

    /// Explicit single-level retry. Always permitted regardless of how many
    /// attempts came before; resets the level and generates it immediately.
    #[instrument(level = "info", skip(self), fields(%group_id, %level_number))]
    pub async fn regenerate_level(&self, group_id: &str, level_number: u32) {
        if self.active_group.read().await.as_deref() != Some(group_id) {
            warn!(target: "curriculum_engine", %group_id, %level_number, "Regeneration requested for inactive group; ignoring");
            return;
        }
        self.content.reset_for_regeneration(level_number).await;
        self.scheduler.run_immediate(group_id, &[level_number]).await;
    }

    /// Gameplay recorded new progress for a level; its cached statistics are
    /// stale until the next read refreshes them.
    pub async fn progress_recorded(&self, level_number: u32) {
        self.progress_cache.invalidate(level_number).await;
    }

    /// Clear the active-group context. In-flight generation may finish, but
    /// its results will be discarded.
    #[instrument(level = "info", skip(self))]
    pub async fn leave_group(&self) {
        *self.active_group.write().await = None;
    }

    /// Convenience accessor mirroring the store's item query.
    pub async fn level_items(&self, level_number: u32) -> Option<Vec<PracticeItem>> {
        self.content.items(level_number).await
    }
}
