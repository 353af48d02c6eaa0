use search_orchestrator::config::{AppConfig, PersistenceProvider};
use serial_test::serial;
use std::env;
use std::io::Write;

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        env::remove_var("SEARCH_SERVER__PORT");
        env::remove_var("SEARCH_WORKFLOW__HUMAN_REVIEW");
        env::remove_var("SEARCH_WORKFLOW__TIMEOUT_MS");
        env::remove_var("SEARCH_PROVIDERS__TAVILY_API_KEY");
        env::remove_var("TAVILY_API_KEY");
        env::remove_var("EXA_API_KEY");
        env::remove_var("DATABASE_URL");
        env::remove_var("CONFIG_FILE");
        env::remove_var("PORT");
        env::remove_var("HUMAN_REVIEW");
        env::remove_var("WORKFLOW_TIMEOUT_MS");
    }
}

fn load(args: &[&str]) -> AppConfig {
    let mut argv = vec!["search-orchestrator"];
    argv.extend_from_slice(args);
    AppConfig::load_from_args(argv).expect("Failed to load config")
}

fn config_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp config");
    file
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = load(&[]);
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.workflow.timeout_ms, 120_000);
    assert!(!config.workflow.human_review);
    assert_eq!(config.workflow.max_scrape, 5);
    assert_eq!(config.persistence.provider, PersistenceProvider::Memory);
    assert!(config.providers.tavily_api_key.is_none());
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("SEARCH_SERVER__PORT", "9090");
        env::set_var("SEARCH_WORKFLOW__HUMAN_REVIEW", "true");
    }

    let config = load(&[]);
    assert_eq!(config.server.port, 9090);
    assert!(config.workflow.human_review);

    clear_env_vars();
}

#[test]
#[serial]
fn test_unprefixed_provider_keys() {
    clear_env_vars();
    unsafe {
        env::set_var("TAVILY_API_KEY", "tvly-plain");
        env::set_var("EXA_API_KEY", "exa-plain");
    }

    let config = load(&[]);
    assert_eq!(config.providers.tavily_api_key.as_deref(), Some("tvly-plain"));
    assert_eq!(config.providers.exa_api_key.as_deref(), Some("exa-plain"));

    // The prefixed form wins.
    unsafe {
        env::set_var("SEARCH_PROVIDERS__TAVILY_API_KEY", "tvly-prefixed");
    }
    let config = load(&[]);
    assert_eq!(
        config.providers.tavily_api_key.as_deref(),
        Some("tvly-prefixed")
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let file = config_file(
        r"
server:
  port: 7070
workflow:
  max_scrape: 2
  review_candidates: 4
providers:
  rate_limits:
    exa:
      max_requests: 1
      window_secs: 10
",
    );

    let config = load(&["--config", file.path().to_str().unwrap()]);
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.workflow.max_scrape, 2);
    assert_eq!(config.workflow.review_candidates, 4);
    let exa = config.providers.rate_limits["exa"];
    assert_eq!(exa.max_requests, 1);
    assert_eq!(exa.window_secs, 10);
    // Untouched sections keep their defaults.
    assert_eq!(config.workflow.timeout_ms, 120_000);
}

#[test]
#[serial]
fn test_cli_beats_env_and_file() {
    clear_env_vars();
    let file = config_file("server:\n  port: 7070\nworkflow:\n  timeout_ms: 5000\n");
    unsafe {
        env::set_var("SEARCH_SERVER__PORT", "9090");
    }

    let config = load(&[
        "--config",
        file.path().to_str().unwrap(),
        "--port",
        "8081",
        "--timeout-ms",
        "1500",
        "--human-review",
        "true",
    ]);
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.workflow.timeout_ms, 1500);
    assert!(config.workflow.human_review);

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.yaml");

    let result = AppConfig::load_from_args(["search-orchestrator", "--config", missing.to_str().unwrap()]);
    assert!(result.is_err());
}
