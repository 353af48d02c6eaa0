use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::AppState;
use crate::config::{AppConfig, load_llm_settings};
use crate::error::WorkflowError;
use crate::events::sse::build_sse_response;
use crate::llm::{ChatCompletionsClient, TextModel};
use crate::orchestrator::{Capabilities, OrchestrationSystem, SearchRequest};
use crate::persistence::Stores;
use crate::providers::embeddings::FastEmbedder;
use crate::providers::exa::ExaProvider;
use crate::providers::scraper::ReaderScraper;
use crate::providers::tavily::TavilyProvider;
use crate::providers::{Embedder, ProviderRegistry, ResultCache, SlidingWindowLimiter};

/// Wires the configured clients into [`Capabilities`].
pub fn build_capabilities(config: &AppConfig) -> Capabilities {
    let http = reqwest::Client::new();

    let mut limiter = SlidingWindowLimiter::new(config.providers.rate_limit);
    for (name, limit) in &config.providers.rate_limits {
        limiter = limiter.with_limit(name.clone(), *limit);
    }
    let cache = ResultCache::new(Duration::from_secs(config.providers.cache_ttl_secs));
    let mut registry = ProviderRegistry::new(Arc::new(limiter), Arc::new(cache));

    if let Some(key) = config.providers.tavily_api_key.as_deref().filter(|k| !k.is_empty()) {
        registry.register(Arc::new(TavilyProvider::new(http.clone(), key)));
    }
    if let Some(key) = config.providers.exa_api_key.as_deref().filter(|k| !k.is_empty()) {
        registry.register(Arc::new(ExaProvider::new(http.clone(), key)));
    }
    info!(providers = ?registry.names(), "Search providers registered");

    let model: Option<Arc<dyn TextModel>> = match load_llm_settings() {
        Ok(settings) => {
            info!(
                name: "llm.config.loaded",
                base_url = %settings.base_url,
                model = %settings.model,
                "LLM configuration loaded"
            );
            Some(Arc::new(ChatCompletionsClient::with_client(
                http.clone(),
                settings,
            )))
        }
        Err(msg) => {
            warn!(error = %msg, "LLM is not configured");
            None
        }
    };

    let embedder: Option<Arc<dyn Embedder>> = config
        .embeddings
        .enabled
        .then(|| Arc::new(FastEmbedder::new()) as Arc<dyn Embedder>);

    Capabilities {
        registry,
        model,
        scraper: Arc::new(ReaderScraper::new(
            http,
            config.scraper.base_url.clone(),
            config.scraper.api_key.clone(),
        )),
        embedder,
    }
}

/// Routes of the search API.
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .route("/api/search", post(start_search))
        .route("/api/search/{id}", get(get_search))
        .route("/api/search/{id}/stream", get(stream_search))
        .route("/api/search/{id}/progress", get(search_progress))
        .route("/api/search/{id}/review", get(pending_review))
        .route("/api/search/{id}/resume", post(resume_search))
        .route("/api/search/{id}/cancel", post(cancel_search))
        .route("/health", get(|| async { "ok" }))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                // Bounds time to first byte; SSE bodies stream past it.
                match tokio::time::timeout(timeout, next.run(req)).await {
                    Ok(res) => res,
                    Err(_elapsed) => {
                        (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response()
                    }
                }
            },
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let stores = Stores::from_config(&config.persistence).await?;
    info!(provider = ?config.persistence.provider, "Persistence initialized");

    let capabilities = build_capabilities(&config);
    let orchestrator =
        OrchestrationSystem::new(config.workflow.clone(), capabilities, stores)?;

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        config: Arc::clone(&config),
    };
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Error body: `{ "error": message, "kind": tag }`.
#[derive(Debug)]
pub struct ApiError(WorkflowError);

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WorkflowError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::Conflict(_) => StatusCode::CONFLICT,
            WorkflowError::MissingApiKeys(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.0.to_string(), "kind": self.0.kind() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartSearchResponse {
    run_id: String,
    stream_url: String,
    progress_url: String,
}

#[derive(Debug, Deserialize)]
struct AfterQuery {
    after: Option<u64>,
}

/// POST /api/search - Start a search and get its stream URL.
async fn start_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<impl IntoResponse> {
    let run_id = state.orchestrator.start_search(req).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartSearchResponse {
            stream_url: format!("/api/search/{run_id}/stream"),
            progress_url: format!("/api/search/{run_id}/progress"),
            run_id,
        }),
    ))
}

/// GET /api/search/{id} - Run status, step results and outcome.
async fn get_search(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.get_run(&run_id).await?))
}

/// GET /api/search/{id}/stream - SSE replay plus live events.
///
/// Reconnecting clients resume after `?after=` or `Last-Event-ID`.
async fn stream_search(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(query): Query<AfterQuery>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let after = query.after.or_else(|| {
        headers
            .get("last-event-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    });
    let stream = state.orchestrator.stream(&run_id, after).await?;
    Ok(build_sse_response(stream))
}

/// GET /api/search/{id}/progress?after= - Poll logged events.
async fn search_progress(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(query): Query<AfterQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.progress(&run_id, query.after).await?))
}

/// GET /api/search/{id}/review - What the reviewer should look at.
async fn pending_review(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .orchestrator
        .pending_review(&run_id)
        .await?
        .ok_or_else(|| WorkflowError::NotFound(format!("no pending review for run {run_id}")))?;
    Ok(Json(json!({
        "runId": record.run_id,
        "stepId": record.step_id,
        "data": record.suspend_payload,
        "resumeError": record.resume_error,
        "createdAt": record.created_at,
    })))
}

/// POST /api/search/{id}/resume - Submit the review, e.g. `{ "selectedIndices": [0, 2] }`.
async fn resume_search(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.resume_search(&run_id, body).await?))
}

/// POST /api/search/{id}/cancel
async fn cancel_search(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.orchestrator.cancel(&run_id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "runId": run_id }))))
}
