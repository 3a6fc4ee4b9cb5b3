//! Request gate: bearer authentication, per-client rate limiting and CORS,
//! evaluated before any pipeline stage runs.

pub mod auth;
pub mod client;
pub mod cors;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub use auth::BearerAuth;
pub use client::client_identity;
pub use cors::{cors_layer, preflight_no_content};
pub use rate_limit::{Clock, ManualClock, RateDecision, RateLimiter, SystemClock};

use crate::config::ServiceConfig;

/// Shared gate state for the middleware below.
pub struct Gate {
    pub auth: BearerAuth,
    pub limiter: RateLimiter,
}

impl Gate {
    pub fn new(auth: BearerAuth, limiter: RateLimiter) -> Self {
        Self { auth, limiter }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            BearerAuth::new(config.auth.token.as_deref()),
            RateLimiter::new(
                config.rate_limit.max_requests,
                Duration::from_secs(config.rate_limit.window_secs),
            ),
        )
    }
}

/// Why the gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    Unauthorized,
    RateLimited { retry_after: Duration },
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            GateRejection::Unauthorized => {
                let mut response = (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": "Unauthorized: missing or invalid bearer token" })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                response
            }
            GateRejection::RateLimited { retry_after } => {
                // Round up so clients never retry a moment too early.
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({
                        "error": format!("Rate limit exceeded. Try again in {} seconds", secs)
                    })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(secs));
                response
            }
        }
    }
}

/// Reject requests without a valid `Authorization: Bearer` header.
pub async fn require_bearer(State(gate): State<Arc<Gate>>, request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS || gate.auth.verify(request.headers().get(AUTHORIZATION)) {
        return next.run(request).await;
    }

    let client = client_identity(request.headers(), request.extensions());
    tracing::warn!(client = %client, "rejected request without valid bearer token");
    GateRejection::Unauthorized.into_response()
}

/// Count the request against its client's window.
pub async fn enforce_rate_limit(
    State(gate): State<Arc<Gate>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let client = client_identity(request.headers(), request.extensions());
    match gate.limiter.check(&client) {
        RateDecision::Allowed { remaining } => {
            tracing::debug!(client = %client, remaining, "rate limit check passed");
            next.run(request).await
        }
        RateDecision::Limited { retry_after } => {
            tracing::warn!(client = %client, retry_after_secs = retry_after.as_secs(), "rate limit exceeded");
            GateRejection::RateLimited { retry_after }.into_response()
        }
    }
}
