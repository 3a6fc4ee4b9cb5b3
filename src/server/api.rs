use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde_json::{Value, json};

use crate::errors::PipelineError;
use crate::gate::{Gate, enforce_rate_limit, require_bearer};
use crate::models::{ChangeRequest, PullRequestResult};
use crate::pipeline::PipelineRunner;

// ── State ─────────────────────────────────────────────────────────────

pub struct AppState {
    pub pipeline: Arc<PipelineRunner>,
    pub gate: Arc<Gate>,
}

pub type SharedState = Arc<AppState>;

// ── Errors ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Internal(String),
    Pipeline(PipelineError),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Pipeline(e) => {
                let status = e.status();
                let message = e.to_string();
                if status.is_server_error() {
                    tracing::error!(error = ?e, "pipeline failed");
                } else {
                    tracing::info!(status = status.as_u16(), error = %message, "pipeline rejected request");
                }

                let mut body = json!({ "error": message });
                if let Some(branch) = e.orphaned_branch() {
                    body["branch"] = json!(branch);
                    body["pushed"] = json!(true);
                }
                (status, Json(body)).into_response()
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router(gate: Arc<Gate>) -> Router<SharedState> {
    // Layers added later run first: auth, then rate limiting.
    let submit_route = post(submit)
        .options(no_content)
        .route_layer(middleware::from_fn_with_state(gate.clone(), enforce_rate_limit))
        .route_layer(middleware::from_fn_with_state(gate, require_bearer));

    Router::new()
        .route("/", submit_route)
        .route("/health", get(health).options(no_content))
        .fallback(fallback)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "repo_ready": state.pipeline.is_ready(),
    }))
}

async fn submit(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<PullRequestResult>, ApiError> {
    if !state.pipeline.is_ready() {
        return Err(PipelineError::NotReady.into());
    }

    let request = ChangeRequest::from_json(&body)?;

    // Run detached so a client disconnect cannot cancel the pipeline half way.
    let pipeline = state.pipeline.clone();
    let result = tokio::spawn(async move { pipeline.run(request).await })
        .await
        .map_err(|e| ApiError::Internal(format!("Pipeline task failed: {}", e)))??;

    Ok(Json(result))
}

async fn no_content() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    ApiError::NotFound("Not found".to_string()).into_response()
}
