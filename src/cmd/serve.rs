//! `prwright serve`

use std::path::{Path, PathBuf};

use anyhow::Result;

use prwright::config::ServiceConfig;
use prwright::logging;
use prwright::server::start_server;

pub async fn cmd_serve(
    config_path: Option<&Path>,
    port: Option<u16>,
    repo_path: Option<PathBuf>,
) -> Result<()> {
    let mut config = ServiceConfig::resolve(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(path) = repo_path {
        config.repo.path = path;
    }

    let _log_guard = logging::init(&config.logging)?;
    start_server(config).await
}
