//! Error types for polisync-sync.

use std::path::PathBuf;

use thiserror::Error;

use polisync_core::error::StoreError;
use polisync_core::types::PolicyName;
use polisync_events::IngestError;

/// All errors that can arise from reconciliation operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the policy store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An error from spool ingestion.
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (replication state file).
    #[error("replication state JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML rendering error (status diff).
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Optimistic-concurrency retries exhausted for one policy's status write.
    #[error("status write for '{policy}' conflicted {attempts} times; giving up")]
    WriteConflict { policy: PolicyName, attempts: u32 },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
