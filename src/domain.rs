//! Domain models used by the engine: level groups, level payloads, practice
//! items, progress records, and the generation-task value object.

use serde::{Deserialize, Serialize};

use crate::util::distinct_words;

/// Lifecycle of a level group. The engine only reads this; edits happen in
/// the persistence collaborator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
  Draft,
  Active,
  Published,
}
impl Default for GroupStatus {
  fn default() -> Self { GroupStatus::Draft }
}

/// An ordered collection of levels sharing a language pair and CEFR level.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevelGroup {
  pub id: String,
  pub owner: String,
  pub target_lang: String,   // BCP-47-ish tag (e.g., "es", "zh-Hans")
  pub native_lang: String,
  pub cefr_level: String,    // free-form ("a1".."c2")
  #[serde(default)] pub level_numbers: Vec<u32>,
  #[serde(default)] pub status: GroupStatus,
}

/// One generated practice item: target-language text, native translation,
/// and the distinct word set derived from the target text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PracticeItem {
  pub target: String,
  pub native: String,
  #[serde(default)] pub words: Vec<String>,
}

impl PracticeItem {
  pub fn new(target: impl Into<String>, native: impl Into<String>) -> Self {
    let target = target.into();
    let words = distinct_words(&target);
    Self { target, native: native.into(), words }
  }

  /// Backends may omit the word set; derive it locally when absent.
  pub fn with_derived_words(mut self) -> Self {
    if self.words.is_empty() {
      self.words = distinct_words(&self.target);
    }
    self
  }
}

/// Lifecycle state of a level's generated material.
/// Moves `Empty -> Generating -> {Ready | Error}`; it only returns to
/// `Empty` through an explicit regeneration request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentState {
  Empty,
  Generating,
  Ready,
  Error,
}
impl Default for ContentState {
  fn default() -> Self { ContentState::Empty }
}

/// Per-level user progress as reported by the gameplay collaborator.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LevelStatus {
  NotStarted,
  InProgress,
  Completed,
  /// Unrecognized server value. Kept so one bad record fails closed for its
  /// level instead of poisoning the whole bulk fetch.
  #[serde(other)]
  Unknown,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ProgressRecord {
  pub status: LevelStatus,
  pub score: f32,   // [0,1]; out-of-range values are treated as locked
}

/// Per-level statistics snapshot held by the progress cache.
/// `familiarity_counts` is a histogram over familiarity stages 0..=5.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CachedProgressEntry {
  pub total_words: u32,
  pub completed_words: u32,
  pub level_score: f32,
  pub familiarity_counts: [u32; 6],
}

/// Who is opening the group. Anonymous sessions only ever get level 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Caller {
  Anonymous,
  User(String),
}

impl Caller {
  pub fn is_authenticated(&self) -> bool {
    matches!(self, Caller::User(_))
  }
}

/// How a level was scheduled for generation.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
  Immediate,
  Background,
}

/// Ephemeral per-invocation generation task. Built by the scheduler, logged,
/// and discarded once the level reaches a terminal state.
#[derive(Clone, Debug)]
pub struct GenerationTask {
  pub level_number: u32,
  pub class: TaskClass,
  pub attempt: u32,
}

impl GenerationTask {
  pub fn new(level_number: u32, class: TaskClass) -> Self {
    Self { level_number, class, attempt: 1 }
  }

  /// The individual fallback re-attempts a level after its batch failed.
  pub fn retry(&self) -> Self {
    Self { level_number: self.level_number, class: self.class, attempt: self.attempt + 1 }
  }
}
