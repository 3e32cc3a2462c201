//! Replication state — per-policy record of the last hub write.
//!
//! Persists a `SyncStateFile` JSON document at
//! `<home>/.polisync/state/<namespace>/<policy>.json`.
//! Writes use the same atomic `.tmp` + rename pattern as the policy store.
//!
//! The `status_hash` is the SHA-256 of the canonical JSON form of the
//! replicated status; divergence classification and status reporting compare
//! against it without re-reading the hub document byte-for-byte.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use polisync_core::store::polisync_root;
use polisync_core::types::{Namespace, PolicyName, PolicyStatus};

use crate::error::{io_err, SyncError};

/// On-disk replication record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStateFile {
    pub synced_at: DateTime<Utc>,
    pub status_hash: String,
}

/// Path to the replication record for a policy, rooted at `home`.
///
/// `~/.polisync/state/<namespace>/<policy>.json`
pub fn state_path_at(home: &Path, namespace: &Namespace, name: &PolicyName) -> PathBuf {
    polisync_root(home)
        .join("state")
        .join(&namespace.0)
        .join(format!("{}.json", name.0))
}

/// Load the replication record for a policy.
///
/// Returns `None` if the policy has never been replicated.
pub fn load_at(
    home: &Path,
    namespace: &Namespace,
    name: &PolicyName,
) -> Result<Option<SyncStateFile>, SyncError> {
    let path = state_path_at(home, namespace, name);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Save the replication record for a policy atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save_at(
    home: &Path,
    namespace: &Namespace,
    name: &PolicyName,
    state: &SyncStateFile,
) -> Result<(), SyncError> {
    let path = state_path_at(home, namespace, name);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid state path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// SHA-256 hex digest of the canonical JSON form of a status.
///
/// An absent status hashes as JSON `null`, so "status cleared" and "status
/// empty" are distinguishable from any populated status.
pub fn status_hash(status: &Option<PolicyStatus>) -> Result<String, SyncError> {
    let canonical = serde_json::to_vec(status)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}
