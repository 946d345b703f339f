//! Curriculum Engine · Adaptive Content Generation & Progression
//!
//! Decides, for a level group a user opens, which levels need generated
//! content right now versus later, drives the generation calls with bounded
//! concurrency and a batch -> individual fallback, and keeps per-level
//! progress statistics cached for the presentation layer.
//!
//! The content generator, persistence, and transport are external
//! collaborators reached through [`api::LevelsBackend`].

pub mod telemetry;
pub mod util;
pub mod domain;
pub mod config;
pub mod api;
pub mod events;
pub mod progression;
pub mod content;
pub mod progress_cache;
pub mod scheduler;
pub mod engine;
