use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use workbench_core::Settings;
use workbench_gateway::{app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging Setup
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    info!("Workbench Gateway Initializing...");
    let settings = Settings::from_env()?;
    let addr = settings.addr;
    let state = AppState::new(settings)?;

    // Quick connectivity check
    if let Some(brain) = &state.brain {
        info!("Connecting to OpenAI Brain ({})...", brain.model());
        match brain.say_hello().await {
            Ok(msg) => info!("Brain Status: {}", msg),
            Err(e) => error!("Brain is online but unresponsive: {}", e),
        }
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Gateway listening on {}...", listener.local_addr()?);

    axum::serve(listener, app(state))
        .await
        .context("Gateway server stopped unexpectedly")?;
    Ok(())
}
