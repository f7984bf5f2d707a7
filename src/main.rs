//! DAO Tracker backend
//!
//! Hosts the process-lifetime context until shutdown.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dao_tracker::config::{Config, LogFormat};
use dao_tracker::services::LogMailer;
use dao_tracker::AppContext;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!("Starting DAO Tracker backend");
    tracing::info!(
        "External store: {} (strict: {}, fallback: {})",
        config.use_external_store,
        config.strict_store,
        config.fallback_on_failure
    );
    if config.use_external_store {
        tracing::info!("Database path: {:?}", config.db_path);
    }

    // Resolve storage and build services; a strict store failure ends here
    let ctx = AppContext::new(config, Arc::new(LogMailer)).await?;
    tracing::info!("Storage backend: {:?}", ctx.repos.backend);

    let report = ctx.repos.daos.verify_integrity().await?;
    if !report.is_clean() {
        tracing::warn!("Repaired DAO index on startup: {:?}", report);
    }

    let restored = ctx.notifications.hydrate().await?;
    tracing::info!("Restored {} notifications", restored);

    match ctx.repos.daos.get_last_created().await? {
        Some(last) => tracing::info!("Last created DAO: {}", last.numero_liste),
        None => tracing::info!("No DAO yet; next number is {}", ctx.daos.peek_next_number().await?),
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    Ok(())
}
