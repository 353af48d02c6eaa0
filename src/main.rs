//! Search orchestrator server
//!
//! Entry point for the research workflow API.

use std::sync::Arc;

use dotenvy::dotenv;
use mimalloc::MiMalloc;
use tracing::error;

use search_orchestrator::config::AppConfig;
use search_orchestrator::{server, telemetry};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    telemetry::init();

    let config = match AppConfig::load() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "Configuration error");
            std::process::exit(1);
        }
    };

    server::start_server(config).await
}
