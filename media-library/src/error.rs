//! Library-wide error types.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable, caller-facing classification of an [`Error`].
///
/// Outer layers (HTTP controllers, CLIs) map these to status codes; the kind
/// never carries paths or driver messages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidArgument,
    TransientConflict,
    PipelineFailure,
    TransactionFailure,
    Internal,
}

/// Library-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Position assignment for {collection} still conflicting after {attempts} attempts")]
    TransientConflict {
        collection: &'static str,
        attempts: usize,
    },

    #[error("Pipeline stage '{stage}' failed: {message}")]
    PipelineFailure { stage: &'static str, message: String },

    #[error("Transaction on {collection} rolled back: {source}")]
    TransactionFailure {
        collection: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("Position integrity violated in {collection}: {detail}")]
    Integrity {
        collection: &'static str,
        detail: String,
    },

    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn pipeline(stage: &'static str, msg: impl Into<String>) -> Self {
        Self::PipelineFailure {
            stage,
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Wrap an error raised inside a rolled-back transaction.
    ///
    /// Errors that already describe a caller mistake keep their own kind.
    pub fn transaction(collection: &'static str, source: Error) -> Self {
        match source {
            Self::NotFound { .. }
            | Self::Conflict(_)
            | Self::InvalidArgument(_)
            | Self::TransientConflict { .. }
            | Self::TransactionFailure { .. } => source,
            other => Self::TransactionFailure {
                collection,
                source: Box::new(other),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::TransientConflict { .. } => ErrorKind::TransientConflict,
            Self::PipelineFailure { .. } => ErrorKind::PipelineFailure,
            Self::TransactionFailure { .. } => ErrorKind::TransactionFailure,
            Self::Integrity { .. }
            | Self::DatabaseSqlx(_)
            | Self::Migration(_)
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::IoPath { .. }
            | Self::Configuration(_)
            | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to hand to an untrusted caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::NotFound { entity_type, id } => format!("{entity_type} {id} not found"),
            Self::Conflict(msg) | Self::InvalidArgument(msg) => msg.clone(),
            Self::TransientConflict { .. } => {
                "the collection is busy, please retry the request".to_string()
            }
            Self::PipelineFailure { stage, .. } => format!("media processing failed at {stage}"),
            Self::TransactionFailure { .. } => "the update could not be applied".to_string(),
            _ => "internal error".to_string(),
        }
    }

    /// `true` when this is a SQLite UNIQUE violation on `table.column`.
    pub(crate) fn is_unique_violation_on(&self, table: &str, column: &str) -> bool {
        let Self::DatabaseSqlx(sqlx::Error::Database(db_err)) = self else {
            return false;
        };
        db_err.is_unique_violation() && {
            let needle = format!("{table}.{column}");
            db_err.message().contains(&needle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Error::not_found("Still", "x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::conflict("dup").kind(), ErrorKind::Conflict);
        assert_eq!(Error::invalid("bad").kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            Error::pipeline("resize", "boom").kind(),
            ErrorKind::PipelineFailure
        );
        assert_eq!(Error::Other("x".into()).kind(), ErrorKind::Internal);
        assert_eq!(ErrorKind::TransientConflict.to_string(), "transient_conflict");
    }

    #[test]
    fn transaction_keeps_caller_errors() {
        let err = Error::transaction("stills", Error::invalid("short payload"));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = Error::transaction("stills", Error::Other("disk full".into()));
        assert_eq!(err.kind(), ErrorKind::TransactionFailure);
    }

    #[test]
    fn public_message_hides_paths() {
        let err = Error::io_path(
            "reading",
            Path::new("/srv/secret/assets/x.jpg"),
            std::io::Error::other("denied"),
        );
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.public_message().contains("/srv"));

        let err = Error::pipeline("overlay", "ffmpeg exited with /tmp/a.mp4");
        assert!(!err.public_message().contains("/tmp"));
    }
}
