pub mod cancel;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod github;
pub mod metrics;
pub mod pagination;
pub mod querier;
pub mod rest;
pub mod session;
pub mod types;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use config::{AppConfig, RepoId};
use error::FetchError;
use metrics::MetricsWindow;
use querier::MetricsQuerier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Shared application state accessible to all request handlers.
pub struct AppState {
    /// Service for searching repositories and computing their metrics.
    pub querier: MetricsQuerier,
    /// Application configuration loaded from environment variables.
    pub config: AppConfig,
}

impl AppState {
    /// Initializes the application state, including the GitHub client.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let querier = MetricsQuerier::new(&config)?;
        Ok(Self { querier, config })
    }
}

pub fn create_app(state: Arc<AppState>) -> Router {
    let serve_dir = ServeDir::new("dist").not_found_service(ServeFile::new("dist/index.html"));

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/owners", get(search_owners))
        .route("/api/repos/{owner}/{repo}/metrics", get(get_repo_metrics))
        .route("/api/sessions/{session_id}", get(get_session_state))
        .fallback_service(serve_dir)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "repo-pulse",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Query parameters of the metrics endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct MetricsParams {
    /// First day of the window (inclusive). Defaults to `summary_days` before `to`.
    pub from: Option<NaiveDate>,
    /// Last day of the window (inclusive). Defaults to today, UTC.
    pub to: Option<NaiveDate>,
    /// Dashboard session; a new search in the same session cancels the previous one.
    pub session: Option<String>,
}

pub async fn get_repo_metrics(
    Path(repo_id): Path<RepoId>,
    Query(params): Query<MetricsParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, (StatusCode, String)> {
    let to = params.to.unwrap_or_else(|| Utc::now().date_naive());
    let window = match params.from {
        Some(from) => MetricsWindow::new(from, to),
        None => MetricsWindow::ending_at(to, state.config.summary_days),
    }
    .and_then(|window| window.limited_to(state.config.max_window_days))
    .map_err(|e| {
        tracing::debug!(repo_id = %repo_id, "Rejected window: {}", e);
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;

    match state
        .querier
        .search(params.session.as_deref(), repo_id.clone(), window)
        .await
    {
        Ok(metrics) => {
            tracing::debug!(repo_id = %repo_id, "Returning metrics");
            Ok(Json(metrics).into_response())
        }
        Err(FetchError::Cancelled) => {
            tracing::debug!(repo_id = %repo_id, "Search was superseded");
            Ok(error_response(&FetchError::Cancelled).into_response())
        }
        Err(e) => {
            tracing::error!("Failed to fetch activity for {}: {}", repo_id, e);
            Err(error_response(&e))
        }
    }
}

pub async fn get_session_state(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<session::SearchState>, (StatusCode, String)> {
    state
        .querier
        .session_state(&session_id)
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "Unknown session".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct OwnerParams {
    pub q: String,
}

pub async fn search_owners(
    Query(params): Query<OwnerParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<github::OwnerSuggestion>>, (StatusCode, String)> {
    let partial = params.q.trim();
    if partial.is_empty() {
        return Ok(Json(Vec::new()));
    }

    match state.querier.search_owners(partial).await {
        Ok(owners) => Ok(Json(owners)),
        Err(e) => {
            tracing::error!("Failed to search owners matching {:?}: {}", partial, e);
            Err(error_response(&e))
        }
    }
}

/// Maps a failed fetch to the status and message shown to the dashboard. A cancelled search
/// was superseded rather than failed, so it answers with an empty `204 No Content`.
fn error_response(err: &FetchError) -> (StatusCode, String) {
    match err {
        FetchError::Cancelled => (StatusCode::NO_CONTENT, String::new()),
        FetchError::Api(_) if err.has_api_kind("NOT_FOUND") => {
            (StatusCode::NOT_FOUND, err.user_message())
        }
        FetchError::Api(_) if err.has_api_kind("RATE_LIMITED") => (
            StatusCode::TOO_MANY_REQUESTS,
            "GitHub Rate Limit Exceeded".to_string(),
        ),
        FetchError::Api(_) | FetchError::Transport(_) | FetchError::Decode(_) => {
            (StatusCode::BAD_GATEWAY, err.user_message())
        }
    }
}
