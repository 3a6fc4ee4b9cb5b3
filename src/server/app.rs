use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use tower_http::trace::TraceLayer;

use super::api::{AppState, SharedState, api_router};
use crate::config::ServiceConfig;
use crate::gate::{Gate, cors_layer, preflight_no_content};
use crate::pipeline::PipelineRunner;
use crate::repo::bootstrap;

/// Build the full application router: API routes behind the gate, CORS,
/// body limit and access logging.
pub fn build_router(state: SharedState, config: &ServiceConfig) -> Router {
    api_router(state.gate.clone())
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.server.max_body_bytes))
        .layer(cors_layer(&config.cors))
        .layer(middleware::from_fn(preflight_no_content))
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP service and run until Ctrl-C or SIGTERM.
pub async fn start_server(config: ServiceConfig) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let pipeline = Arc::new(
        PipelineRunner::from_config(&config).context("Failed to set up change-request pipeline")?,
    );

    if let Some(url) = config.repo.clone_url.clone()
        && !pipeline.is_ready()
    {
        let workdir = pipeline.workdir().clone();
        let base = config.repo.base_branch.clone();
        tokio::spawn(async move {
            if let Err(e) = bootstrap::ensure_checkout(&workdir, &url, &base).await {
                tracing::error!(error = %format!("{:#}", e), "initial checkout failed; service stays not-ready");
            }
        });
    }

    let state = Arc::new(AppState {
        pipeline,
        gate: Arc::new(Gate::from_config(&config)),
    });
    let app = build_router(state, &config);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        repo = %config.repo.path.display(),
        base = %config.repo.base_branch,
        forge = %config.forge.provider,
        "prwright listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down; waiting for in-flight requests");
}
