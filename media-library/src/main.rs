use media_library::config::LibraryConfig;
use media_library::logging::{self, LOG_RETENTION_DAYS};
use media_library::services::ServiceContainer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads .env, then MEDIA_* overrides
    let config = LibraryConfig::from_env()?;
    let (_logging, _guard) = logging::init_logging(config.log_dir.as_deref())?;

    if let Some(dir) = config.log_dir.as_deref()
        && let Err(e) = logging::cleanup_old_logs(dir, LOG_RETENTION_DAYS).await
    {
        tracing::warn!(error = %e, "Failed to cleanup old logs");
    }

    let services = ServiceContainer::from_config(&config).await?;
    services.report().await?;

    tracing::info!("media-library initialized successfully");

    Ok(())
}
