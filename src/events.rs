//! Update events pushed to the presentation layer as background work lands.
//! Serialized form is stable so a transport adapter can forward them as-is.

use serde::Serialize;

use crate::domain::{CachedProgressEntry, ContentState};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
  ContentStateChanged {
    level_number: u32,
    state: ContentState,
  },
  ProgressUpdated {
    level_number: u32,
    entry: CachedProgressEntry,
  },
}
