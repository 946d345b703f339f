//! Generation scheduler: partitions the levels that need content into an
//! immediate set (blocking, makes the group playable right away) and a
//! background set (batched, opportunistic), then drives the generation calls
//! with a batch -> individual fallback.
//!
//! Only the level the user can actually play next is worth blocking on;
//! everything else completes in the background. Batch failures stay local:
//! they mark the affected levels `Error` and never abort sibling batches or
//! the immediate path.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::api::{ApiError, LevelOutcome, LevelsBackend};
use crate::config::SchedulerConfig;
use crate::content::ContentStore;
use crate::domain::{Caller, GenerationTask, ProgressRecord, TaskClass};
use crate::progress_cache::ProgressCache;
use crate::progression::{current_active_level, unlocked_levels};

/// The scheduler's verdict for one group-open: what to generate now, what to
/// generate later, and the progression context both came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationPlan {
  pub unlocked: Vec<u32>,
  pub active_level: Option<u32>,
  pub immediate: Vec<u32>,
  pub background: Vec<u32>,
}

/// Partition the levels needing generation.
///
/// 1. Anonymous callers only ever get level 1 playable: immediate is level 1
///    when it needs content, everything else fills in behind it.
/// 2. Authenticated with no progress yet (brand-new group): level 1 is the
///    fastest path to a playable group.
/// 3. Authenticated with progress: the current active level (highest
///    unlocked level still needing content) blocks; the rest goes to the
///    background set.
pub fn plan(
  caller: &Caller,
  total_levels: u32,
  progress: &HashMap<u32, ProgressRecord>,
  needing: &[u32],
  pass_score: f32,
) -> GenerationPlan {
  let needs = |level: u32| needing.contains(&level);

  let (unlocked, active_level) = if !caller.is_authenticated() {
    (vec![1], None)
  } else if progress.is_empty() {
    (unlocked_levels(progress, total_levels, pass_score), None)
  } else {
    let unlocked = unlocked_levels(progress, total_levels, pass_score);
    let active = current_active_level(&unlocked, needing);
    (unlocked, active)
  };

  let immediate: Vec<u32> = match active_level {
    Some(level) => vec![level],
    None if needs(1) => vec![1],
    None => vec![],
  };
  let background: Vec<u32> = needing
    .iter()
    .copied()
    .filter(|l| !immediate.contains(l))
    .collect();

  GenerationPlan { unlocked, active_level, immediate, background }
}

/// Chunk the background set: small sets go out as one combined batch, larger
/// sets as fixed-size batches processed strictly in order.
pub fn batch_partition(levels: &[u32], cfg: &SchedulerConfig) -> Vec<Vec<u32>> {
  if levels.is_empty() {
    return Vec::new();
  }
  if levels.len() <= cfg.single_batch_max {
    return vec![levels.to_vec()];
  }
  levels.chunks(cfg.batch_size).map(|c| c.to_vec()).collect()
}

pub struct Scheduler<B: LevelsBackend> {
  backend: Arc<B>,
  content: ContentStore,
  progress_cache: ProgressCache,
  config: SchedulerConfig,
  active_group: Arc<RwLock<Option<String>>>,
}

impl<B: LevelsBackend> Scheduler<B> {
  pub fn new(
    backend: Arc<B>,
    content: ContentStore,
    progress_cache: ProgressCache,
    config: SchedulerConfig,
    active_group: Arc<RwLock<Option<String>>>,
  ) -> Self {
    Self { backend, content, progress_cache, config, active_group }
  }

  /// Results for groups the user has navigated away from are discarded;
  /// in-flight requests are allowed to finish but must not touch state.
  async fn group_is_active(&self, group_id: &str) -> bool {
    self.active_group.read().await.as_deref() == Some(group_id)
  }

  /// Generate the immediate set, one awaited call per level. Returns once
  /// every immediate level is `Ready` or `Error`.
  #[instrument(level = "info", skip(self, levels), fields(%group_id, count = levels.len()))]
  pub async fn run_immediate(&self, group_id: &str, levels: &[u32]) {
    for &level_number in levels {
      let task = GenerationTask::new(level_number, TaskClass::Immediate);
      self.generate_single(group_id, &task).await;
    }
  }

  /// Generate the background set in sequential batches with a fixed pause
  /// between them, so the generation backend sees a bounded request rate.
  #[instrument(level = "info", skip(self, levels), fields(%group_id, count = levels.len()))]
  pub async fn run_background(&self, group_id: &str, levels: Vec<u32>) {
    let batches = batch_partition(&levels, &self.config);
    if batches.is_empty() {
      return;
    }
    info!(
      target: "generation",
      %group_id,
      levels = levels.len(),
      batches = batches.len(),
      "Starting background generation"
    );
    let pause = Duration::from_millis(self.config.inter_batch_pause_ms);
    let last = batches.len() - 1;
    for (idx, batch) in batches.into_iter().enumerate() {
      self.run_batch(group_id, &batch).await;
      if idx < last {
        sleep(pause).await;
      }
    }
  }

  /// One batch call, with the fallback path: if the batch endpoint itself
  /// fails (transport or server error, not a per-item failure), every level
  /// in the batch is generated individually and in parallel instead, so a
  /// backend outage degrades to slower-but-working generation.
  #[instrument(level = "info", skip(self, batch), fields(%group_id, size = batch.len()))]
  async fn run_batch(&self, group_id: &str, batch: &[u32]) {
    // Claim levels up front; anything already in flight or ready is skipped.
    let mut claimed = Vec::with_capacity(batch.len());
    for &level_number in batch {
      if self.content.begin_generation(level_number).await {
        claimed.push(level_number);
      }
    }
    if claimed.is_empty() {
      return;
    }

    let batch_id = Uuid::new_v4();
    let tasks: Vec<GenerationTask> = claimed
      .iter()
      .map(|&l| GenerationTask::new(l, TaskClass::Background))
      .collect();

    match self.backend.generate_content_batch(group_id, &claimed).await {
      Ok(res) => {
        if !self.group_is_active(group_id).await {
          debug!(target: "generation", %group_id, %batch_id, "Group no longer active; discarding batch results");
          return;
        }
        let mut failed_levels = Vec::new();
        let mut seen = Vec::new();
        for result in res.results {
          seen.push(result.level_number);
          match result.outcome {
            LevelOutcome::Generated { items } => {
              self.content.mark_ready(result.level_number, items).await;
              self.progress_cache.invalidate(result.level_number).await;
            }
            LevelOutcome::Failed { message } => {
              failed_levels.push(result.level_number);
              self.content.mark_error(result.level_number, message).await;
            }
          }
        }
        // Claimed levels the backend never reported on count as failures.
        for &level_number in claimed.iter().filter(|l| !seen.contains(*l)) {
          failed_levels.push(level_number);
          self.content.mark_error(level_number, "no result returned for level").await;
        }
        if !failed_levels.is_empty() {
          warn!(
            target: "generation",
            %group_id,
            %batch_id,
            ?failed_levels,
            successful = res.successful_count,
            "Batch completed with per-level failures"
          );
        }
      }
      Err(e) => {
        warn!(
          target: "generation",
          %group_id,
          %batch_id,
          error = %e,
          "Batch endpoint failed; falling back to individual generation"
        );
        let retries: Vec<GenerationTask> = tasks.iter().map(GenerationTask::retry).collect();
        // Parallel, bounded by the batch size itself.
        join_all(
          retries
            .iter()
            .map(|task| self.finish_claimed(group_id, task)),
        )
        .await;
      }
    }
  }

  /// Claim and generate one level through the single-level endpoint.
  async fn generate_single(&self, group_id: &str, task: &GenerationTask) {
    if !self.content.begin_generation(task.level_number).await {
      return;
    }
    self.finish_claimed(group_id, task).await;
  }

  /// Generate one already-claimed level and record the outcome.
  #[instrument(
    level = "debug",
    skip(self, task),
    fields(%group_id, level = task.level_number, class = ?task.class, attempt = task.attempt)
  )]
  async fn finish_claimed(&self, group_id: &str, task: &GenerationTask) {
    let outcome = self.backend.generate_content(group_id, task.level_number).await;
    if !self.group_is_active(group_id).await {
      debug!(target: "generation", %group_id, level = task.level_number, "Group no longer active; discarding result");
      return;
    }
    match outcome {
      Ok(items) => {
        self.content.mark_ready(task.level_number, items).await;
        self.progress_cache.invalidate(task.level_number).await;
      }
      Err(e) => {
        self.record_failure(task, e).await;
      }
    }
  }

  async fn record_failure(&self, task: &GenerationTask, e: ApiError) {
    error!(
      target: "generation",
      level = task.level_number,
      attempt = task.attempt,
      error = %e,
      "Generation attempt failed"
    );
    self.content.mark_error(task.level_number, e.to_string()).await;
    self.progress_cache.invalidate(task.level_number).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::LevelStatus;

  fn cfg() -> SchedulerConfig {
    SchedulerConfig::default()
  }

  fn completed(score: f32) -> ProgressRecord {
    ProgressRecord { status: LevelStatus::Completed, score }
  }

  #[test]
  fn single_batch_up_to_six_levels() {
    for n in 1..=6u32 {
      let levels: Vec<u32> = (1..=n).collect();
      let batches = batch_partition(&levels, &cfg());
      assert_eq!(batches.len(), 1, "{n} levels must be one batch");
      assert_eq!(batches[0], levels);
    }
  }

  #[test]
  fn ten_levels_make_three_sequential_batches() {
    let levels: Vec<u32> = (1..=10).collect();
    let batches = batch_partition(&levels, &cfg());
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0], vec![1, 2, 3, 4]);
    assert_eq!(batches[1], vec![5, 6, 7, 8]);
    assert_eq!(batches[2], vec![9, 10]);
  }

  #[test]
  fn seven_levels_split_into_four_and_three() {
    let levels: Vec<u32> = (1..=7).collect();
    let batches = batch_partition(&levels, &cfg());
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1], vec![5, 6, 7]);
  }

  #[test]
  fn empty_set_makes_no_batches() {
    assert!(batch_partition(&[], &cfg()).is_empty());
  }

  #[test]
  fn anonymous_plan_never_blocks_beyond_level_one() {
    let needing: Vec<u32> = (1..=8).collect();
    let p = plan(&Caller::Anonymous, 8, &HashMap::new(), &needing, 0.6);
    assert_eq!(p.immediate, vec![1]);
    assert_eq!(p.background, (2..=8).collect::<Vec<u32>>());

    // Level 1 already generated: nothing blocks at all.
    let needing: Vec<u32> = (2..=8).collect();
    let p = plan(&Caller::Anonymous, 8, &HashMap::new(), &needing, 0.6);
    assert!(p.immediate.is_empty());
    assert_eq!(p.background, needing);
  }

  #[test]
  fn brand_new_group_blocks_on_level_one_only() {
    let needing: Vec<u32> = (1..=12).collect();
    let caller = Caller::User("u-77".into());
    let p = plan(&caller, 12, &HashMap::new(), &needing, 0.6);
    assert_eq!(p.immediate, vec![1]);
    assert_eq!(p.unlocked, vec![1]);
    assert_eq!(p.background, (2..=12).collect::<Vec<u32>>());
  }

  #[test]
  fn progressed_group_blocks_on_current_active_level() {
    let mut progress = HashMap::new();
    for l in 1..=3 {
      progress.insert(l, completed(0.8));
    }
    progress.insert(4, ProgressRecord { status: LevelStatus::InProgress, score: 0.0 });

    let needing: Vec<u32> = vec![4, 5, 6, 7, 8, 9, 10];
    let caller = Caller::User("u-77".into());
    let p = plan(&caller, 10, &progress, &needing, 0.6);
    assert_eq!(p.unlocked, vec![1, 2, 3, 4]);
    assert_eq!(p.active_level, Some(4));
    assert_eq!(p.immediate, vec![4]);
    assert_eq!(p.background, vec![5, 6, 7, 8, 9, 10]);
  }

  #[test]
  fn no_active_level_falls_back_to_level_one_when_it_needs_content() {
    let mut progress = HashMap::new();
    progress.insert(1, completed(0.9));
    // Levels 1 and 2 unlocked; only locked levels still need content.
    let needing: Vec<u32> = vec![1, 5, 6];
    let caller = Caller::User("u-1".into());
    let p = plan(&caller, 6, &progress, &needing, 0.6);
    assert_eq!(p.active_level, Some(1));
    assert_eq!(p.immediate, vec![1]);

    let needing: Vec<u32> = vec![5, 6];
    let p = plan(&caller, 6, &progress, &needing, 0.6);
    assert_eq!(p.active_level, None);
    assert!(p.immediate.is_empty());
    assert_eq!(p.background, vec![5, 6]);
  }
}
