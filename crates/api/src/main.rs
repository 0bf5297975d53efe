use anyhow::Context;

use crewbook_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("invalid configuration")?;
    crewbook_observability::init(&config.log_level);

    let app = crewbook_api::app::build_app(&config).await?;

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(environment = ?config.environment, "listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
