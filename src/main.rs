use anyhow::Context;
use rbx_kernel::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = rbx_telemetry::logging::bootstrap_scope(Settings::load)
        .with_context(|| "failed to load rbx settings")?;

    let telemetry = rbx_telemetry::setup_with(settings.telemetry.clone());

    tracing::info!(
        host = %settings.server.host,
        port = settings.server.port,
        telemetry = telemetry.config().enabled,
        "rbx-app bootstrap starting"
    );

    let app = rbx_http::build_router(
        &settings.server,
        rbx_app::services(),
        telemetry.instrumentations(),
    );
    rbx_http::start_server(&settings.server, app, shutdown_signal()).await?;

    // Flushing blocks on the exporter; keep it off the async workers.
    tokio::task::spawn_blocking(move || telemetry.shutdown())
        .await
        .context("telemetry shutdown task failed")?
        .context("failed to flush telemetry")?;

    tracing::info!("rbx-app stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
