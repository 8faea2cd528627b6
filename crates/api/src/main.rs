use anyhow::Context;

use storefront_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    storefront_observability::init(config.log_format);

    let app = storefront_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Joining the executor thread blocks; keep it off the runtime workers.
    let executor = app.executor;
    tokio::task::spawn_blocking(move || executor.shutdown()).await?;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
