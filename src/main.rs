use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use eta_predictor::{server, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::parse();
    let addr = settings.bind_addr()?;

    // Nothing is bound until every artifact has loaded
    let state = server::bootstrap(&settings)
        .await
        .context("startup aborted")?;

    let app = server::router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(server::shutdown_signal())
        .await?;
    Ok(())
}
