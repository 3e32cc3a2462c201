//! Daemon configuration.
//!
//! Loaded from `<home>/.polisync/config.yaml`; every field has a default and
//! an absent file yields the full default configuration, so a fresh install
//! runs without any setup.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use polisync_core::compliance::DEFAULT_HISTORY_CAPACITY;
use polisync_core::types::Namespace;

use crate::error::{io_err, DaemonError};
use crate::paths::config_path;

pub const DEFAULT_NAMESPACE: &str = "managed";
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 30;

/// Runtime configuration surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Managed-cluster namespace the event spool is scoped to.
    pub namespace: Namespace,
    /// Period of the full-reconcile tick; bounds self-healing latency.
    pub reconcile_interval_secs: u64,
    /// Per-template history bound.
    pub history_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            namespace: Namespace::from(DEFAULT_NAMESPACE),
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl DaemonConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

/// Load the configuration, falling back to defaults when the file is absent.
pub fn load_at(home: &Path) -> Result<DaemonConfig, DaemonError> {
    let path = config_path(home);
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| DaemonError::Config { path, source: e })
}
