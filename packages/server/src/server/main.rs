//! Foreman dispatch server.

use anyhow::{Context, Result};
use foreman_core::api::Api;
use foreman_core::config::Config;
use foreman_core::domains::commitments::reaper;
use foreman_core::kernel::Kernel;
use foreman_core::server;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,foreman_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Config::from_env()?;

    let kernel = Kernel::connect(&config).await?;
    kernel.migrate().await?;

    if config.reaper_enabled {
        let pool = kernel.db.clone();
        let silence = config.reaper_silence_secs;
        tracing::info!(silence, "heartbeat reaper enabled");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                ticker.tick().await;
                if let Err(err) = reaper::expire_silent(&pool, silence).await {
                    tracing::error!(error = %err, "reaper sweep failed");
                }
            }
        });
    }

    let app = server::router(Api::new(kernel));
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "foreman server listening");

    axum::serve(listener, app).await.context("Server exited")?;
    Ok(())
}
