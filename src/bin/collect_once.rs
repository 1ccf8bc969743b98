//! Run every configured source (or those whose name contains the first
//! argument) once and print the run reports as JSON.
//!
//! cargo run --bin collect_once -- "security feed"

use anyhow::{Context, Result};
use osint_pipeline::config::AppConfig;
use osint_pipeline::{build_state, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init(telemetry::log_format_from_env());

    let mut cfg = AppConfig::from_env()?;
    cfg.metrics_enabled = false;
    cfg.auth.admin_email = None;
    let state = build_state(cfg).await?;

    let filter = std::env::args().nth(1).map(|s| s.to_lowercase());
    let sources: Vec<_> = state
        .registry
        .list()
        .into_iter()
        .filter(|s| filter.as_ref().is_none_or(|f| s.name.to_lowercase().contains(f)))
        .collect();
    if sources.is_empty() {
        eprintln!("no matching sources; configure config/sources.toml or SOURCES_CONFIG_PATH");
        return Ok(());
    }

    let mut failed = 0usize;
    for src in sources {
        match state.scheduler.run_now(src.id).await {
            Ok(report) => {
                println!("{}", serde_json::to_string_pretty(&report).context("encoding report")?);
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} ({}): {e:#}", src.name, src.kind.as_str());
            }
        }
    }

    let stats = state.store.stats().await?;
    eprintln!(
        "records={} analyzed={} pending={} failed_sources={failed}",
        stats.records, stats.analyzed, stats.pending
    );
    Ok(())
}
