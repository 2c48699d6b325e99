//! Logging setup with a reloadable filter.
//!
//! This module provides:
//! - Runtime log level changes via `tracing_subscriber::reload`
//! - Optional daily-rotated log files with retention cleanup
//! - Local timezone timestamps for logs

use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::utils::fs;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "media_library=info,sqlx=warn";

/// Log retention period in days.
pub const LOG_RETENTION_DAYS: i64 = 7;

const LOG_FILE_PREFIX: &str = "media-library.log";

/// Timer that formats timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle on the installed subscriber.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: Option<PathBuf>,
}

impl LoggingConfig {
    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Set a new filter directive (e.g. `"media_library=debug,sqlx=warn"`).
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::config(format!("Invalid filter directive: {}", e)))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    /// Directory receiving log files, if file logging is on.
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Delete rotated log files older than `retention_days`.
pub async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        // media-library.log.YYYY-MM-DD
        let Some(date_str) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(LOG_FILE_PREFIX))
            .and_then(|n| n.strip_prefix('.'))
        else {
            continue;
        };

        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };
        if file_date < cutoff {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to delete old log file");
            } else {
                deleted_count += 1;
                debug!(path = %path.display(), "Deleted old log file");
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }
    Ok(deleted_count)
}

/// Initialize logging.
///
/// Console output is always on. When `log_dir` is given, a daily-rotated
/// file layer is added; keep the returned guard alive for the process
/// lifetime or buffered lines are lost.
pub fn init_logging(
    log_dir: Option<&Path>,
) -> crate::Result<(Arc<LoggingConfig>, Option<WorkerGuard>)> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::ensure_dir_all_sync(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    let config = Arc::new(LoggingConfig {
        handle: filter_handle,
        log_dir: log_dir.map(Path::to_path_buf),
    });

    Ok((config, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("media_library=info"));
        assert!(DEFAULT_LOG_FILTER.contains("sqlx=warn"));
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_logs() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join(format!("{LOG_FILE_PREFIX}.2001-01-01"));
        let today = dir.path().join(format!(
            "{LOG_FILE_PREFIX}.{}",
            Utc::now().format("%Y-%m-%d")
        ));
        let other = dir.path().join("notes.txt");
        for path in [&old, &today, &other] {
            std::fs::write(path, b"x").unwrap();
        }

        let removed = cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(today.exists());
        assert!(other.exists());
    }
}
