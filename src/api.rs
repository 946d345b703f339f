//! Typed client for the levels/progress/generation collaborator API.
//!
//! The engine is generic over `LevelsBackend`; `HttpApi` is the production
//! implementation. Calls are instrumented and log latencies and response
//! sizes (not contents).
//!
//! Every response is deserialized into an explicit tagged type at this
//! boundary so the rest of the engine never inspects loosely-typed maps.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::ApiConfig;
use crate::domain::{CachedProgressEntry, LevelGroup, PracticeItem, ProgressRecord};
use crate::util::trunc_for_log;

/// Boundary error taxonomy. `Transport` and `Http` on the batch endpoint
/// trigger the individual-generation fallback; `Generation` is a
/// server-reported failure of a single-level call.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("transport error: {0}")]
  Transport(String),
  #[error("HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("malformed response: {0}")]
  Decode(String),
  #[error("generation failed: {message}")]
  Generation { message: String },
}

// --- Response DTOs ---

#[derive(Clone, Debug, Deserialize)]
pub struct GroupLevels {
  pub group: LevelGroup,
  pub levels: Vec<LevelPayload>,
}

/// A level as the persistence collaborator reports it: content may already
/// exist, or the level may be flagged for lazy loading.
#[derive(Clone, Debug, Deserialize)]
pub struct LevelPayload {
  pub level_number: u32,
  #[serde(default)] pub content: Option<Vec<PracticeItem>>,
  #[serde(default)] pub lazy_loading: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BatchResponse {
  pub successful_count: u32,
  pub failed_count: u32,
  pub results: Vec<BatchLevelResult>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BatchLevelResult {
  pub level_number: u32,
  #[serde(flatten)]
  pub outcome: LevelOutcome,
}

/// Per-level batch outcome, tagged on the wire.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LevelOutcome {
  Generated { items: Vec<PracticeItem> },
  Failed { message: String },
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct LevelProgressStats {
  pub total_words: u32,
  pub completed_words: u32,
  pub level_score: f32,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
  level_numbers: &'a [u32],
}

#[derive(Deserialize)]
struct GenerateResponse {
  success: bool,
  #[serde(default)] items: Vec<PracticeItem>,
  #[serde(default)] error: Option<String>,
}

#[derive(Deserialize)]
struct FamiliarityResponse {
  familiarity_counts: [u32; 6],
}

/// Operations the engine consumes from its collaborators.
#[async_trait]
pub trait LevelsBackend: Send + Sync {
  async fn fetch_group_levels(&self, group_id: &str) -> Result<GroupLevels, ApiError>;
  async fn fetch_user_progress(&self, group_id: &str)
    -> Result<HashMap<u32, ProgressRecord>, ApiError>;
  async fn generate_content(&self, group_id: &str, level_number: u32)
    -> Result<Vec<PracticeItem>, ApiError>;
  async fn generate_content_batch(&self, group_id: &str, level_numbers: &[u32])
    -> Result<BatchResponse, ApiError>;
  async fn fetch_progress_cache(&self, group_id: &str)
    -> Result<HashMap<u32, CachedProgressEntry>, ApiError>;
  async fn fetch_level_progress(&self, group_id: &str, level_number: u32)
    -> Result<LevelProgressStats, ApiError>;
  async fn fetch_level_familiarity(&self, group_id: &str, level_number: u32)
    -> Result<[u32; 6], ApiError>;
}

#[derive(Clone)]
pub struct HttpApi {
  client: reqwest::Client,
  base_url: String,
}

impl HttpApi {
  pub fn new(cfg: &ApiConfig) -> Result<Self, ApiError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_secs))
      .build()
      .map_err(|e| ApiError::Transport(e.to_string()))?;
    Ok(Self { client, base_url: cfg.base_url.trim_end_matches('/').to_string() })
  }

  /// GET a JSON endpoint. Generic over the target type T.
  #[instrument(level = "debug", skip(self), fields(%path))]
  async fn get_json<T: for<'a> Deserialize<'a>>(&self, path: &str) -> Result<T, ApiError> {
    let url = format!("{}{}", self.base_url, path);
    let start = std::time::Instant::now();
    let res = self.client.get(&url)
      .header(USER_AGENT, "curriculum-engine/0.1")
      .send().await.map_err(|e| ApiError::Transport(e.to_string()))?;
    self.decode(res, start).await
  }

  /// POST a JSON body and decode a JSON response.
  #[instrument(level = "debug", skip(self, body), fields(%path))]
  async fn post_json<B: Serialize, T: for<'a> Deserialize<'a>>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<T, ApiError> {
    let url = format!("{}{}", self.base_url, path);
    let start = std::time::Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "curriculum-engine/0.1")
      .header(CONTENT_TYPE, "application/json")
      .json(body)
      .send().await.map_err(|e| ApiError::Transport(e.to_string()))?;
    self.decode(res, start).await
  }

  async fn decode<T: for<'a> Deserialize<'a>>(
    &self,
    res: reqwest::Response,
    start: std::time::Instant,
  ) -> Result<T, ApiError> {
    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let message = extract_api_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(ApiError::Http { status: status.as_u16(), message });
    }
    let body = res.text().await.map_err(|e| ApiError::Transport(e.to_string()))?;
    let elapsed = start.elapsed();
    info!(target: "curriculum_engine", ?elapsed, body_len = body.len(), "API response received");
    serde_json::from_str::<T>(&body).map_err(|e| ApiError::Decode(e.to_string()))
  }
}

#[async_trait]
impl LevelsBackend for HttpApi {
  #[instrument(level = "info", skip(self), fields(%group_id))]
  async fn fetch_group_levels(&self, group_id: &str) -> Result<GroupLevels, ApiError> {
    self.get_json(&format!("/groups/{group_id}/levels")).await
  }

  #[instrument(level = "info", skip(self), fields(%group_id))]
  async fn fetch_user_progress(
    &self,
    group_id: &str,
  ) -> Result<HashMap<u32, ProgressRecord>, ApiError> {
    self.get_json(&format!("/groups/{group_id}/progress")).await
  }

  #[instrument(level = "info", skip(self), fields(%group_id, %level_number))]
  async fn generate_content(
    &self,
    group_id: &str,
    level_number: u32,
  ) -> Result<Vec<PracticeItem>, ApiError> {
    let res: GenerateResponse = self
      .post_json(&format!("/groups/{group_id}/levels/{level_number}/generate"), &serde_json::json!({}))
      .await?;
    if res.success {
      Ok(res.items.into_iter().map(PracticeItem::with_derived_words).collect())
    } else {
      Err(ApiError::Generation {
        message: res.error.unwrap_or_else(|| "generation failed without detail".into()),
      })
    }
  }

  #[instrument(level = "info", skip(self), fields(%group_id, count = level_numbers.len()))]
  async fn generate_content_batch(
    &self,
    group_id: &str,
    level_numbers: &[u32],
  ) -> Result<BatchResponse, ApiError> {
    self
      .post_json(
        &format!("/groups/{group_id}/generate_batch"),
        &BatchRequest { level_numbers },
      )
      .await
  }

  #[instrument(level = "info", skip(self), fields(%group_id))]
  async fn fetch_progress_cache(
    &self,
    group_id: &str,
  ) -> Result<HashMap<u32, CachedProgressEntry>, ApiError> {
    self.get_json(&format!("/groups/{group_id}/progress_cache")).await
  }

  #[instrument(level = "debug", skip(self), fields(%group_id, %level_number))]
  async fn fetch_level_progress(
    &self,
    group_id: &str,
    level_number: u32,
  ) -> Result<LevelProgressStats, ApiError> {
    self.get_json(&format!("/groups/{group_id}/levels/{level_number}/progress")).await
  }

  #[instrument(level = "debug", skip(self), fields(%group_id, %level_number))]
  async fn fetch_level_familiarity(
    &self,
    group_id: &str,
    level_number: u32,
  ) -> Result<[u32; 6], ApiError> {
    let res: FamiliarityResponse = self
      .get_json(&format!("/groups/{group_id}/levels/{level_number}/familiarity"))
      .await?;
    Ok(res.familiarity_counts)
  }
}

/// Try to extract a clean error message from a collaborator error body.
fn extract_api_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}
