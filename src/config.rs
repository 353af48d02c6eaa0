use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::llm::{LlmSettings, Provider};
use crate::providers::RateLimit;

const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Pause every run for human review of search results
    #[arg(long, env = "HUMAN_REVIEW")]
    pub human_review: Option<bool>,

    /// Wall-clock budget per execution segment, in milliseconds
    #[arg(long, env = "WORKFLOW_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Knobs of the search pipeline.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Budget for each execution segment (start, or each resume).
    pub timeout_ms: u64,
    pub results_per_provider: usize,
    pub deep_results_per_query: usize,
    pub max_sub_questions: usize,
    pub max_scrape: usize,
    /// Results shown to the reviewer.
    pub review_candidates: usize,
    pub human_review: bool,
    pub event_throttle_ms: u64,
    pub max_chunks: usize,
    /// Characters per RAG chunk.
    pub chunk_size: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            results_per_provider: 5,
            deep_results_per_query: 3,
            max_sub_questions: 3,
            max_scrape: 5,
            review_candidates: 10,
            human_review: false,
            event_throttle_ms: 250,
            max_chunks: 12,
            chunk_size: 800,
        }
    }
}

impl WorkflowConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn event_throttle(&self) -> Duration {
        Duration::from_millis(self.event_throttle_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    pub tavily_api_key: Option<String>,
    pub exa_api_key: Option<String>,
    pub cache_ttl_secs: u64,
    pub rate_limit: RateLimit,
    /// Per-provider overrides of `rate_limit`.
    pub rate_limits: HashMap<String, RateLimit>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            exa_api_key: None,
            cache_ttl_secs: 300,
            rate_limit: RateLimit::default(),
            rate_limits: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ScraperConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub enabled: bool,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceProvider {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PersistenceConfig {
    pub provider: PersistenceProvider,
    pub database_url: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    /// Layers, lowest priority first: defaults, config file, `SEARCH_`
    /// environment, CLI flags (and their env aliases).
    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let workflow = WorkflowConfig::default();
        let providers = ProvidersConfig::default();

        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.request_timeout_secs", 30)?
            .set_default("workflow.timeout_ms", workflow.timeout_ms)?
            .set_default("workflow.human_review", workflow.human_review)?
            .set_default("workflow.max_scrape", workflow.max_scrape as u64)?
            .set_default("workflow.review_candidates", workflow.review_candidates as u64)?
            .set_default("providers.cache_ttl_secs", providers.cache_ttl_secs)?
            .set_default("persistence.provider", "memory")?;

        // Unprefixed provider keys are the common convention; prefixed ones win.
        if let Ok(key) = env::var("TAVILY_API_KEY") {
            builder = builder.set_default("providers.tavily_api_key", key)?;
        }
        if let Ok(key) = env::var("EXA_API_KEY") {
            builder = builder.set_default("providers.exa_api_key", key)?;
        }
        if let Ok(url) = env::var("DATABASE_URL") {
            builder = builder.set_default("persistence.database_url", url)?;
        }

        let file = match &cli.config {
            Some(path) => Some(File::with_name(path).required(true)),
            None => Path::new(DEFAULT_CONFIG_FILE)
                .exists()
                .then(|| File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        if let Some(file) = file {
            builder = builder.add_source(file);
        }

        // E.g. SEARCH_SERVER__PORT=8000, SEARCH_WORKFLOW__HUMAN_REVIEW=true
        builder = builder.add_source(
            Environment::with_prefix("SEARCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(review) = cli.human_review {
            builder = builder.set_override("workflow.human_review", review)?;
        }
        if let Some(timeout) = cli.timeout_ms {
            builder = builder.set_override("workflow.timeout_ms", timeout)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}

pub fn load_llm_settings() -> Result<LlmSettings, String> {
    let base_url = std::env::var("LLM_BASE_URL")
        .map_err(|e| format!("LLM_BASE_URL: {e}"))?;
    if base_url.trim().is_empty() {
        return Err("LLM_BASE_URL cannot be empty".to_string());
    }

    let model = std::env::var("LLM_MODEL").map_err(|e| format!("LLM_MODEL: {e}"))?;
    if model.trim().is_empty() {
        return Err("LLM_MODEL cannot be empty".to_string());
    }

    let api_key = std::env::var("LLM_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    let mut provider = Provider::detect_from_url(&base_url);
    if let Provider::AzureOpenAI { .. } = &provider
        && let Ok(deployment) = std::env::var("AZURE_DEPLOYMENT_NAME")
    {
        provider = Provider::azure(deployment, std::env::var("AZURE_API_VERSION").ok());
    }

    Ok(LlmSettings {
        base_url,
        api_key,
        model,
        provider,
    })
}
