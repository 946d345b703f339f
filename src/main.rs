//! Curriculum Engine · demo entry point
//!
//! Opens one level group against the configured collaborator API and prints
//! engine events until background generation settles.
//!
//! Important env variables:
//!   ENGINE_CONFIG_PATH : path to TOML config (API endpoint + tunables)
//!   GROUP_ID     : level group to open (required)
//!   USER_ID      : authenticated user; omit for an anonymous session
//!   LOG_LEVEL    : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT   : "pretty" (default) or "json"

use std::sync::Arc;

use tracing::{info, instrument};

use curriculum_engine::api::HttpApi;
use curriculum_engine::config::load_engine_config_from_env;
use curriculum_engine::domain::Caller;
use curriculum_engine::engine::Engine;
use curriculum_engine::events::EngineEvent;
use curriculum_engine::telemetry;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let config = load_engine_config_from_env();
  let group_id = std::env::var("GROUP_ID")
    .map_err(|_| "GROUP_ID must be set to the level group to open")?;
  let caller = match std::env::var("USER_ID") {
    Ok(user) => Caller::User(user),
    Err(_) => Caller::Anonymous,
  };

  let backend = Arc::new(HttpApi::new(&config.api)?);
  let engine = Engine::new(backend, config);
  let mut events = engine.subscribe();

  let opened = engine.open_group(&group_id, &caller).await?;
  info!(
    target: "curriculum_engine",
    group = %opened.group.id,
    cefr = %opened.group.cefr_level,
    active_level = ?opened.plan.active_level,
    immediate = ?opened.plan.immediate,
    background = ?opened.plan.background,
    "Group opened"
  );

  let background = opened.background;
  let printer = tokio::spawn(async move {
    while let Ok(event) = events.recv().await {
      match event {
        EngineEvent::ContentStateChanged { level_number, state } => {
          info!(target: "curriculum_engine", %level_number, ?state, "Level state changed");
        }
        EngineEvent::ProgressUpdated { level_number, entry } => {
          info!(
            target: "curriculum_engine",
            %level_number,
            total_words = entry.total_words,
            completed_words = entry.completed_words,
            "Level progress updated"
          );
        }
      }
    }
  });

  if let Some(handle) = background {
    handle.await?;
  }
  printer.abort();
  info!(target: "curriculum_engine", "Background generation settled; exiting");
  Ok(())
}
