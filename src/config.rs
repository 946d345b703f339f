//! Loading engine configuration (API endpoint + scheduler tunables) from TOML.
//!
//! See `EngineConfig` for the expected schema. Every field has a default so
//! the engine runs with no config file at all.

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EngineConfig {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub scheduler: SchedulerConfig,
  #[serde(default)]
  pub progression: ProgressionConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the levels/progress/generation collaborator API.
  pub base_url: String,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8080/api/v1".into(),
      timeout_secs: 30,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SchedulerConfig {
  /// A background set at most this large goes out as one combined batch.
  pub single_batch_max: usize,
  /// Chunk size for sequential batches beyond that.
  pub batch_size: usize,
  /// Fixed pause between sequential batches (not after the last one).
  pub inter_batch_pause_ms: u64,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      single_batch_max: 6,
      batch_size: 4,
      inter_batch_pause_ms: 200,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProgressionConfig {
  /// A level unlocks its successor once completed with a score above this.
  pub pass_score: f32,
}

impl Default for ProgressionConfig {
  fn default() -> Self {
    Self { pass_score: 0.6 }
  }
}

/// Attempt to load `EngineConfig` from ENGINE_CONFIG_PATH.
/// On any parsing/IO error, falls back to defaults.
pub fn load_engine_config_from_env() -> EngineConfig {
  let Some(path) = std::env::var("ENGINE_CONFIG_PATH").ok() else {
    return EngineConfig::default();
  };
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<EngineConfig>(&s) {
      Ok(cfg) => {
        info!(target: "curriculum_engine", %path, "Loaded engine config (TOML)");
        cfg
      }
      Err(e) => {
        error!(target: "curriculum_engine", %path, error = %e, "Failed to parse TOML config; using defaults");
        EngineConfig::default()
      }
    },
    Err(e) => {
      error!(target: "curriculum_engine", %path, error = %e, "Failed to read TOML config file; using defaults");
      EngineConfig::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_scheduler_contract() {
    let cfg = EngineConfig::default();
    assert_eq!(cfg.scheduler.single_batch_max, 6);
    assert_eq!(cfg.scheduler.batch_size, 4);
    assert_eq!(cfg.scheduler.inter_batch_pause_ms, 200);
    assert!((cfg.progression.pass_score - 0.6).abs() < f32::EPSILON);
  }

  #[test]
  fn partial_toml_fills_in_defaults() {
    let cfg: EngineConfig = toml::from_str(
      r#"
      [scheduler]
      single_batch_max = 8
      batch_size = 4
      inter_batch_pause_ms = 50
      "#,
    )
    .unwrap();
    assert_eq!(cfg.scheduler.single_batch_max, 8);
    assert_eq!(cfg.api.timeout_secs, 30);
  }
}
