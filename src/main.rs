//! OSINT pipeline service entrypoint.
//! Builds shared state, starts the scheduler and retention tasks, and hands
//! the Axum router to the Shuttle runtime.

use osint_pipeline::config::AppConfig;
use osint_pipeline::{build_state, router, scheduler, telemetry};
use shuttle_axum::ShuttleAxum;
use tokio::sync::watch;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    telemetry::init(telemetry::log_format_from_env());

    let cfg = AppConfig::from_env()?;
    tracing::info!(
        environment = cfg.env.as_str(),
        sqlite = cfg.database_url.is_some(),
        tick_secs = cfg.scheduler.tick_secs,
        max_concurrent = cfg.scheduler.max_concurrent,
        "starting osint-pipeline"
    );
    let state = build_state(cfg).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    state.scheduler.clone().spawn(shutdown_rx.clone());
    scheduler::spawn_retention(state.store.clone(), state.config.retention_secs, shutdown_rx);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
        let _ = shutdown_tx.send(true);
    });

    Ok(router(state).into())
}
