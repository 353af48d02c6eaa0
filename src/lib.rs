//! Search workflow orchestrator
//!
//! Runs multi-step research workflows: a query is enhanced by a text model,
//! sent to web search providers, aggregated, optionally reviewed by a human,
//! read, ranked and summarized. Progress streams to clients as ordered events.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP API with SSE progress streams
//! - **Workflow**: Step graph engine with fan-out, branching and suspension
//! - **Orchestrator**: Run lifecycle, timeouts, resume and cancellation
//! - **Persistence**: Suspend checkpoints, progress log and results (memory or Postgres)
//!
//! # Modules
//!
//! - [`workflow`]: Generic step graph engine
//! - [`steps`]: The research steps
//! - [`pipeline`]: Wiring of the steps into the search graph
//! - [`orchestrator`]: Run lifecycle
//! - [`events`]: Progress events, throttled writer and SSE framing
//! - [`providers`]: Search providers, scraper and embedder
//! - [`llm`]: Text model client

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod orchestrator;
pub mod persistence;
pub mod pipeline;
pub mod providers;
pub mod server;
pub mod steps;
pub mod telemetry;
pub mod workflow;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::orchestrator::OrchestrationSystem;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Run lifecycle for every search.
    pub orchestrator: Arc<OrchestrationSystem>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}
