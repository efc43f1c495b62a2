//! HTTP surface over the webhook handler.
//!
//! Routes: `POST /webhook/pr`, `POST /webhook/scan`, plus `GET /health` and
//! `GET /status` for operators. Scheduled scans arrive in-process through
//! the dispatcher, not over HTTP.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use prism_registry::ToolRegistry;
use prism_scheduler::ScheduleManager;

use crate::{
    GatewayError, PrReviewRequest, PrReviewResponse, RepoScanRequest, WebhookHandler,
};
use prism_analysis::{AnalysisError, TierResult};

/// Shared state behind the HTTP routes.
#[derive(Clone)]
pub struct GatewayState {
    /// The webhook handler.
    pub handler: Arc<WebhookHandler>,
    /// Registry, for health reporting.
    pub registry: Arc<ToolRegistry>,
    /// Schedule manager, for status reporting.
    pub manager: Arc<ScheduleManager>,
}

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/webhook/pr", post(pr_review))
        .route("/webhook/scan", post(repo_scan))
        .route("/health", get(health))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    tools_total: usize,
    tools_healthy: usize,
}

async fn pr_review(
    State(state): State<GatewayState>,
    Json(request): Json<PrReviewRequest>,
) -> Result<Json<PrReviewResponse>, GatewayError> {
    state.handler.handle_pr_event(request).await.map(Json)
}

async fn repo_scan(
    State(state): State<GatewayState>,
    Json(request): Json<RepoScanRequest>,
) -> Result<Json<TierResult>, GatewayError> {
    state.handler.handle_repo_scan(request).await.map(Json)
}

async fn health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let health = state.registry.health_check().await;
    let healthy = health.values().filter(|ok| **ok).count();
    Json(HealthResponse {
        status: if healthy == health.len() {
            "healthy"
        } else {
            "degraded"
        },
        tools_total: health.len(),
        tools_healthy: healthy,
    })
}

async fn status(State(state): State<GatewayState>) -> Response {
    match state.manager.store().list_active().await {
        Ok(active) => Json(json!({
            "active_schedules": active.len(),
            "repositories": active
                .iter()
                .map(|s| json!({
                    "url": s.repository_url,
                    "cadence": s.cadence,
                    "priority": s.priority,
                    "next_run_at": s.next_run_at,
                }))
                .collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::BadRepositoryUrl { .. } => StatusCode::BAD_REQUEST,
            GatewayError::UnknownSchedule { .. } | GatewayError::UnknownRepository { .. } => {
                StatusCode::NOT_FOUND
            }
            GatewayError::OnDemandNeverFires { .. } => StatusCode::CONFLICT,
            GatewayError::Analysis(AnalysisError::MissingPullRequest) => StatusCode::BAD_REQUEST,
            GatewayError::Analysis(AnalysisError::Selection(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::Analysis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
