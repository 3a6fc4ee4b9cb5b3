//! HTTP surface: `POST /` submits a change request, `GET /health` reports
//! readiness.

pub mod api;
mod app;

pub use api::{ApiError, AppState, SharedState, api_router};
pub use app::{build_router, start_server};
