//! Per-cluster-side YAML policy store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.polisync/
//!   clusters/
//!     managed/
//!       <namespace>/
//!         <policy_name>.yaml    (one file per policy — mode 0600)
//!     hub/
//!       <namespace>/
//!         <policy_name>.yaml
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.
//!
//! Writes are atomic: serialize to `<path>.tmp`, then rename. Every write
//! bumps `resource_version`, which backs the optimistic-concurrency check in
//! [`update_status_at`].

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::StoreError;
use crate::types::{Namespace, Policy, PolicyManifest, PolicyName, PolicyStatus};

/// Which cluster's store a path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterSide {
    /// The spoke cluster — authoritative for compliance facts.
    Managed,
    /// The central cluster — derived mirror.
    Hub,
}

impl ClusterSide {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterSide::Managed => "managed",
            ClusterSide::Hub => "hub",
        }
    }
}

impl fmt::Display for ClusterSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.polisync/`
pub fn polisync_root(home: &Path) -> PathBuf {
    home.join(".polisync")
}

/// `<home>/.polisync/clusters/<side>/<namespace>/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn namespace_dir_at(
    home: &Path,
    side: ClusterSide,
    namespace: &Namespace,
) -> Result<PathBuf, StoreError> {
    let dir = polisync_root(home)
        .join("clusters")
        .join(side.as_str())
        .join(&namespace.0);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.polisync/clusters/<side>/<namespace>/<policy>.yaml` — pure, no I/O.
pub fn policy_path_at(
    home: &Path,
    side: ClusterSide,
    namespace: &Namespace,
    name: &PolicyName,
) -> PathBuf {
    polisync_root(home)
        .join("clusters")
        .join(side.as_str())
        .join(&namespace.0)
        .join(format!("{}.yaml", name.0))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load a single policy document.
///
/// Returns `StoreError::PolicyNotFound` if absent,
/// `StoreError::Parse` (with path + line context) if malformed YAML.
pub fn load_policy_at(
    home: &Path,
    side: ClusterSide,
    namespace: &Namespace,
    name: &PolicyName,
) -> Result<Policy, StoreError> {
    let path = policy_path_at(home, side, namespace, name);
    if !path.exists() {
        return Err(StoreError::PolicyNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
}

/// `load_policy_at` convenience wrapper.
pub fn load_policy(
    side: ClusterSide,
    namespace: &Namespace,
    name: &PolicyName,
) -> Result<Policy, StoreError> {
    load_policy_at(&home()?, side, namespace, name)
}

/// Walk `<home>/.polisync/clusters/<side>/*/*.yaml` and return all policies,
/// sorted deterministically (namespace, then policy name).
pub fn list_policies_at(home: &Path, side: ClusterSide) -> Result<Vec<Policy>, StoreError> {
    let side_dir = polisync_root(home).join("clusters").join(side.as_str());
    if !side_dir.exists() {
        return Ok(vec![]);
    }

    let mut policies = Vec::new();
    let mut namespaces: Vec<PathBuf> = std::fs::read_dir(&side_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    namespaces.sort();

    for ns_dir in namespaces {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&ns_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("yaml"))
            .collect();
        files.sort();
        for path in files {
            let contents = std::fs::read_to_string(&path)?;
            let policy: Policy = serde_yaml::from_str(&contents)
                .map_err(|e| StoreError::Parse { path, source: e })?;
            policies.push(policy);
        }
    }
    Ok(policies)
}

/// `list_policies_at` convenience wrapper.
pub fn list_policies(side: ClusterSide) -> Result<Vec<Policy>, StoreError> {
    list_policies_at(&home()?, side)
}

// ---------------------------------------------------------------------------
// 3. Save
// ---------------------------------------------------------------------------

/// Persist a policy atomically, bumping `resource_version` and `updated_at`.
///
/// Returns the stored copy (with the new version).
pub fn save_policy_at(
    home: &Path,
    side: ClusterSide,
    policy: &Policy,
) -> Result<Policy, StoreError> {
    let mut stored = policy.clone();
    stored.resource_version = policy.resource_version.saturating_add(1);
    stored.updated_at = Utc::now();
    write_policy_file(home, side, &stored)?;
    Ok(stored)
}

/// Replace the `status` of the stored policy if, and only if, the stored
/// `resource_version` still matches `expected_version`.
///
/// On mismatch returns `StoreError::Conflict`; the caller retries from a
/// fresh read. Only `status` is touched — no other field is rewritten.
pub fn update_status_at(
    home: &Path,
    side: ClusterSide,
    namespace: &Namespace,
    name: &PolicyName,
    status: Option<PolicyStatus>,
    expected_version: u64,
) -> Result<Policy, StoreError> {
    let current = load_policy_at(home, side, namespace, name)?;
    if current.resource_version != expected_version {
        return Err(StoreError::Conflict {
            name: name.clone(),
            expected: expected_version,
            actual: current.resource_version,
        });
    }
    let mut updated = current;
    updated.status = status;
    save_policy_at(home, side, &updated)
}

/// `update_status_at` convenience wrapper.
pub fn update_status(
    side: ClusterSide,
    namespace: &Namespace,
    name: &PolicyName,
    status: Option<PolicyStatus>,
    expected_version: u64,
) -> Result<Policy, StoreError> {
    update_status_at(&home()?, side, namespace, name, status, expected_version)
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// Register a policy from a manifest on one cluster side with an empty status.
///
/// The document starts at `resource_version` 1. Re-applying an existing
/// manifest rewrites spec fields but preserves the recorded status and keeps
/// the version moving forward.
pub fn init_policy_at(
    home: &Path,
    side: ClusterSide,
    manifest: &PolicyManifest,
) -> Result<Policy, StoreError> {
    let now = Utc::now();
    let existing = match load_policy_at(home, side, &manifest.namespace, &manifest.name) {
        Ok(policy) => Some(policy),
        Err(StoreError::PolicyNotFound { .. }) => None,
        Err(err) => return Err(err),
    };

    let policy = match existing {
        Some(mut current) => {
            current.templates = manifest.templates.clone();
            current
        }
        None => Policy {
            name: manifest.name.clone(),
            namespace: manifest.namespace.clone(),
            resource_version: 0,
            templates: manifest.templates.clone(),
            status: None,
            created_at: now,
            updated_at: now,
        },
    };
    save_policy_at(home, side, &policy)
}

/// `init_policy_at` convenience wrapper.
pub fn init_policy(side: ClusterSide, manifest: &PolicyManifest) -> Result<Policy, StoreError> {
    init_policy_at(&home()?, side, manifest)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn write_policy_file(home: &Path, side: ClusterSide, policy: &Policy) -> Result<(), StoreError> {
    namespace_dir_at(home, side, &policy.namespace)?;
    let path = policy_path_at(home, side, &policy.namespace, &policy.name);
    let yaml = serde_yaml::to_string(policy)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, &yaml)?;
    std::fs::rename(&tmp, &path)?;
    set_file_permissions(&path)?;
    Ok(())
}

fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}
