//! transfer-preparer daemon
//!
//! ```text
//! loop {
//!     BEGIN
//!       lock PREPARING batch (SKIP LOCKED)
//!       rank / filter / reduce / admit
//!       write QUEUED | WAITING | NO_SOURCES
//!     COMMIT
//!     sleep sleep_time_ms
//! }
//! ```
//!
//! Flags:
//! - `--env <name>` / `-e <name>` - load `config/<name>.yaml` (default `dev`)
//! - `--once` - run a single pass and exit
//! - `--init-schema` - create the catalog tables before starting

use std::time::Duration;

use anyhow::{Context, Result};
use transfer_preparer::config::AppConfig;
use transfer_preparer::db::{Database, schema};
use transfer_preparer::logging::init_logging;
use transfer_preparer::preparer::Preparer;

// ============================================================
// ARGUMENTS
// ============================================================

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn use_once_mode() -> bool {
    std::env::args().any(|a| a == "--once")
}

fn use_init_schema() -> bool {
    std::env::args().any(|a| a == "--init-schema")
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env).with_context(|| format!("loading config '{}'", env))?;
    let _log_guard = init_logging(&app_config.logging);

    tracing::info!("Starting transfer-preparer in {} mode", env);

    let database_url = app_config
        .database_url()
        .context("no postgres_url configured and DATABASE_URL unset")?;
    let db = Database::connect(&database_url, app_config.postgres_pool_size)
        .await
        .context("connecting to PostgreSQL")?;
    let version = db.health_check().await.context("PostgreSQL health check")?;
    tracing::info!(%version, "Catalog reachable");

    if use_init_schema() {
        schema::init_schema(db.pool()).await?;
    }

    let preparer = Preparer::new(app_config.preparer.clone());

    if use_once_mode() {
        let summary = preparer.run_pass(&db).await?;
        tracing::info!(?summary, "Single pass done");
        return Ok(());
    }

    let sleep_time = Duration::from_millis(app_config.preparer.sleep_time_ms);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        match preparer.run_pass(&db).await {
            Ok(summary) if summary.is_noop() => {
                tracing::debug!("Nothing to prepare");
            }
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                tracing::warn!(code = e.code(), error = %e, "Pass aborted, retrying next cycle");
            }
            Err(e) => {
                tracing::error!(code = e.code(), error = %e, "Pass failed");
            }
        }

        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = tokio::time::sleep(sleep_time) => {}
        }
    }

    tracing::info!("transfer-preparer stopped");
    Ok(())
}
