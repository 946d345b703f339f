//! Progression gate: which levels are unlocked, and which one the user will
//! actually play next.
//!
//! Pure decision functions over the bulk progress map. Levels are gated
//! strictly in sequence; a level unlocks only when its predecessor was
//! completed with a passing score. Malformed progress data locks the chain
//! at that point (never unlock by default).

use std::collections::HashMap;

use tracing::debug;

use crate::domain::{LevelStatus, ProgressRecord};

/// Did this record earn the unlock for the following level?
fn passes(record: &ProgressRecord, pass_score: f32) -> bool {
  if record.status != LevelStatus::Completed {
    return false;
  }
  // Fail closed on scores the gameplay collaborator should never send.
  if !record.score.is_finite() || !(0.0..=1.0).contains(&record.score) {
    return false;
  }
  record.score > pass_score
}

/// Ordered set of unlocked level numbers: a contiguous prefix starting at 1.
/// Level 1 is always unlocked; unlocking stops at the first level whose
/// predecessor fails the completion/score test.
pub fn unlocked_levels(
  progress: &HashMap<u32, ProgressRecord>,
  total_levels: u32,
  pass_score: f32,
) -> Vec<u32> {
  let mut unlocked = Vec::new();
  if total_levels == 0 {
    return unlocked;
  }
  unlocked.push(1);
  for level in 2..=total_levels {
    let prev_passed = progress
      .get(&(level - 1))
      .map(|r| passes(r, pass_score))
      .unwrap_or(false);
    if !prev_passed {
      break;
    }
    unlocked.push(level);
  }
  debug!(target: "progression", total_levels, unlocked_through = ?unlocked.last(), "Computed unlocked prefix");
  unlocked
}

/// The highest unlocked level that still needs content generation.
/// `None` when every unlocked level already has content; the caller then
/// falls back to presenting level 1.
pub fn current_active_level(unlocked: &[u32], needing_generation: &[u32]) -> Option<u32> {
  unlocked
    .iter()
    .copied()
    .filter(|l| needing_generation.contains(l))
    .max()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::LevelStatus;

  fn record(status: LevelStatus, score: f32) -> ProgressRecord {
    ProgressRecord { status, score }
  }

  fn completed(score: f32) -> ProgressRecord {
    record(LevelStatus::Completed, score)
  }

  #[test]
  fn empty_progress_unlocks_only_level_one() {
    let progress = HashMap::new();
    for total in [1, 5, 50] {
      assert_eq!(unlocked_levels(&progress, total, 0.6), vec![1]);
    }
  }

  #[test]
  fn zero_levels_unlocks_nothing() {
    assert!(unlocked_levels(&HashMap::new(), 0, 0.6).is_empty());
  }

  #[test]
  fn unlocked_set_is_contiguous_prefix() {
    // Level 3 passed but level 2 did not: 3's pass must not unlock 4.
    let mut progress = HashMap::new();
    progress.insert(1, completed(0.9));
    progress.insert(2, record(LevelStatus::InProgress, 0.9));
    progress.insert(3, completed(0.9));
    assert_eq!(unlocked_levels(&progress, 10, 0.6), vec![1, 2]);
  }

  #[test]
  fn score_rule_is_strictly_greater() {
    let mut progress = HashMap::new();
    progress.insert(1, completed(0.6));
    assert_eq!(unlocked_levels(&progress, 3, 0.6), vec![1]);
    progress.insert(1, completed(0.601));
    assert_eq!(unlocked_levels(&progress, 3, 0.6), vec![1, 2]);
  }

  #[test]
  fn malformed_records_fail_closed() {
    // (score, status) pairs that must all read as "locked".
    let bad = [
      completed(f32::NAN),
      completed(1.5),
      completed(-0.1),
      record(LevelStatus::Unknown, 0.9),
    ];
    for r in bad {
      let mut progress = HashMap::new();
      progress.insert(1, r);
      assert_eq!(unlocked_levels(&progress, 5, 0.6), vec![1], "record {r:?} unlocked level 2");
    }
  }

  #[test]
  fn ten_level_scenario() {
    let mut progress = HashMap::new();
    for l in 1..=3 {
      progress.insert(l, completed(0.8));
    }
    progress.insert(4, record(LevelStatus::InProgress, 0.0));
    let unlocked = unlocked_levels(&progress, 10, 0.6);
    assert_eq!(unlocked, vec![1, 2, 3, 4]);

    let needing: Vec<u32> = vec![4, 5, 6, 7, 8, 9, 10];
    assert_eq!(current_active_level(&unlocked, &needing), Some(4));

    // Level 4 already generated: nothing unlocked needs content.
    let needing: Vec<u32> = vec![5, 6, 7, 8, 9, 10];
    assert_eq!(current_active_level(&unlocked, &needing), None);
  }

  #[test]
  fn active_level_is_highest_unlocked_needing_generation() {
    let unlocked = vec![1, 2, 3, 4];
    assert_eq!(current_active_level(&unlocked, &[1, 3]), Some(3));
    assert_eq!(current_active_level(&unlocked, &[]), None);
  }
}
