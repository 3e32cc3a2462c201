//! Error types for polisync-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::PolicyName;

/// All errors that can arise from policy store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse policy at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.polisync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The policy document did not exist at the expected path.
    #[error("policy not found at {path}")]
    PolicyNotFound { path: PathBuf },

    /// Optimistic-concurrency check failed: the stored copy moved on since
    /// the caller's read. Retry from a fresh read.
    #[error("version conflict on '{name}': expected {expected}, found {actual}")]
    Conflict {
        name: PolicyName,
        expected: u64,
        actual: u64,
    },
}
