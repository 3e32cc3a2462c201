//! Hub divergence classification.
//!
//! Signal precedence:
//! 1. `SourceMissing` (managed copy gone)
//! 2. `HubMissing` (hub copy gone)
//! 3. `NeverReplicated` (no replication record)
//! 4. `StatusCleared` (hub status field absent while managed has one)
//! 5. `Drifted` (hub status present but unequal)
//! 6. `Converged`

use std::path::Path;

use polisync_core::error::StoreError;
use polisync_core::store::{load_policy_at, ClusterSide};
use polisync_core::types::{Namespace, PolicyName};

use crate::error::SyncError;
use crate::sync_state;

/// Divergence classification for one policy's hub copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DivergenceSignal {
    SourceMissing,
    HubMissing,
    NeverReplicated,
    Converged,
    StatusCleared,
    Drifted { reason: String },
}

/// Classify a policy's hub copy against its managed copy and the replication
/// record. Read-only; used by status reporting and post-reconcile logging.
pub fn check(
    home: &Path,
    namespace: &Namespace,
    name: &PolicyName,
) -> Result<DivergenceSignal, SyncError> {
    let managed = match load_policy_at(home, ClusterSide::Managed, namespace, name) {
        Ok(policy) => policy,
        Err(StoreError::PolicyNotFound { .. }) => return Ok(DivergenceSignal::SourceMissing),
        Err(err) => return Err(err.into()),
    };
    let hub = match load_policy_at(home, ClusterSide::Hub, namespace, name) {
        Ok(policy) => policy,
        Err(StoreError::PolicyNotFound { .. }) => return Ok(DivergenceSignal::HubMissing),
        Err(err) => return Err(err.into()),
    };

    // First-run handling: no replication record means "never replicated",
    // not "drifted".
    if sync_state::load_at(home, namespace, name)?.is_none() {
        return Ok(DivergenceSignal::NeverReplicated);
    }

    if hub.status == managed.status {
        return Ok(DivergenceSignal::Converged);
    }

    if hub.status.is_none() {
        return Ok(DivergenceSignal::StatusCleared);
    }

    let managed_hash = sync_state::status_hash(&managed.status)?;
    let hub_hash = sync_state::status_hash(&hub.status)?;
    Ok(DivergenceSignal::Drifted {
        reason: format!(
            "hub status {} != managed status {}",
            short(&hub_hash),
            short(&managed_hash),
        ),
    })
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}

/// Format age from a replication timestamp (`SyncStateFile::synced_at`).
pub fn format_datetime_age(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    let now = chrono::Utc::now();
    let age = now.signed_duration_since(timestamp).num_seconds().max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polisync_core::store::{init_policy_at, update_status_at};
    use polisync_core::types::{ComplianceState, PolicyManifest, PolicyStatus};
    use tempfile::TempDir;

    use crate::replicator::replicate_policy;

    fn seed(home: &Path) -> (Namespace, PolicyName) {
        let manifest = PolicyManifest {
            name: PolicyName::from("audit-pods"),
            namespace: Namespace::from("managed"),
            templates: vec![],
        };
        init_policy_at(home, ClusterSide::Managed, &manifest).expect("managed");
        init_policy_at(home, ClusterSide::Hub, &manifest).expect("hub");
        (manifest.namespace, manifest.name)
    }

    fn set_status(home: &Path, side: ClusterSide, ns: &Namespace, name: &PolicyName, state: Option<ComplianceState>) {
        let current = load_policy_at(home, side, ns, name).expect("load");
        update_status_at(
            home,
            side,
            ns,
            name,
            state.map(|compliant| PolicyStatus {
                compliant,
                details: vec![],
            }),
            current.resource_version,
        )
        .expect("update");
    }

    #[test]
    fn missing_sides_classify_first() {
        let home = TempDir::new().expect("home");
        let ns = Namespace::from("managed");
        let name = PolicyName::from("ghost");
        assert_eq!(
            check(home.path(), &ns, &name).expect("check"),
            DivergenceSignal::SourceMissing
        );
    }

    #[test]
    fn never_replicated_before_first_pass() {
        let home = TempDir::new().expect("home");
        let (ns, name) = seed(home.path());
        assert_eq!(
            check(home.path(), &ns, &name).expect("check"),
            DivergenceSignal::NeverReplicated
        );
    }

    #[test]
    fn converged_after_replication() {
        let home = TempDir::new().expect("home");
        let (ns, name) = seed(home.path());
        set_status(home.path(), ClusterSide::Managed, &ns, &name, Some(ComplianceState::Compliant));
        replicate_policy(home.path(), &ns, &name, false).expect("replicate");

        assert_eq!(
            check(home.path(), &ns, &name).expect("check"),
            DivergenceSignal::Converged
        );
    }

    #[test]
    fn cleared_hub_status_is_distinguished_from_drift() {
        let home = TempDir::new().expect("home");
        let (ns, name) = seed(home.path());
        set_status(home.path(), ClusterSide::Managed, &ns, &name, Some(ComplianceState::Compliant));
        replicate_policy(home.path(), &ns, &name, false).expect("replicate");

        set_status(home.path(), ClusterSide::Hub, &ns, &name, None);
        assert_eq!(
            check(home.path(), &ns, &name).expect("check"),
            DivergenceSignal::StatusCleared
        );

        set_status(home.path(), ClusterSide::Hub, &ns, &name, Some(ComplianceState::NonCompliant));
        match check(home.path(), &ns, &name).expect("check") {
            DivergenceSignal::Drifted { reason } => {
                assert!(reason.contains("!="), "reason should compare hashes: {reason}");
            }
            other => panic!("expected Drifted, got {other:?}"),
        }
    }

    #[test]
    fn datetime_age_is_compact() {
        let now = chrono::Utc::now();
        assert_eq!(format_datetime_age(now), "0s");
        assert_eq!(
            format_datetime_age(now - chrono::Duration::seconds(65)),
            "1m"
        );
        assert_eq!(format_datetime_age(now - chrono::Duration::hours(3)), "3h");
    }

    #[test]
    fn hub_deleted_after_replication_is_hub_missing() {
        let home = TempDir::new().expect("home");
        let (ns, name) = seed(home.path());
        set_status(home.path(), ClusterSide::Managed, &ns, &name, Some(ComplianceState::Compliant));
        replicate_policy(home.path(), &ns, &name, false).expect("replicate");

        let hub_path =
            polisync_core::store::policy_path_at(home.path(), ClusterSide::Hub, &ns, &name);
        std::fs::remove_file(hub_path).expect("delete hub copy");

        assert_eq!(
            check(home.path(), &ns, &name).expect("check"),
            DivergenceSignal::HubMissing
        );
    }
}
