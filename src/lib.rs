pub mod api; // HTTP + WebSocket surface
pub mod config;
pub mod core_state; // Transport-agnostic state
pub mod dialogue; // Slot-filling engine, flow registry, parser, fallback
pub mod jobs; // Submission + progress tracking
pub mod launcher;
pub mod notify; // Notification coordinator
pub mod quiz; // Parameters + distribution calculator

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::core_state::{CoreError, CoreState};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Server(#[from] api::ServerError),
    #[error("Cannot listen for shutdown signal: {0}")]
    Signal(std::io::Error),
}

/// Boot the service and serve until Ctrl-C.
pub async fn run() -> Result<(), RunError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = config::QuizflowConfig::from_env();
    let bind_addr = config.bind_addr;
    let core = Arc::new(CoreState::from_config(config)?);
    core.spawn_background()?;

    let server = api::start_server(core.clone(), bind_addr).await?;
    tracing::info!(addr = %server.session.server_addr, "Listening");
    *core.api_server.lock().await = Some(server);

    tokio::signal::ctrl_c().await.map_err(RunError::Signal)?;
    tracing::info!("Shutdown requested");

    if let Some(mut server) = core.api_server.lock().await.take() {
        server.shutdown_and_wait().await;
    }
    core.stop_background();
    tracing::info!("{} stopped", config::APP_NAME);
    Ok(())
}
