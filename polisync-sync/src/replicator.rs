//! Hub replication — one-directional status propagation with self-healing.
//!
//! Each pass reads the managed copy (source of truth), reads the hub copy,
//! and patches the hub status when the two are structurally unequal. The pass
//! is level-triggered and idempotent: given the same managed status it always
//! converges to the same hub status, however many times it runs. A version
//! conflict on the hub write is retried from a fresh read with a doubling
//! sleep; policy-object deletion on either side ends the pass cleanly.

use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use chrono::Utc;

use polisync_core::error::StoreError;
use polisync_core::store::{load_policy_at, update_status_at, ClusterSide};
use polisync_core::types::{Namespace, Policy, PolicyName};

use crate::error::SyncError;
use crate::sync_state::{self, SyncStateFile};

/// Bound on hub-write retries within one replication pass.
pub const CONFLICT_RETRY_LIMIT: u32 = 5;

const CONFLICT_RETRY_BASE: Duration = Duration::from_millis(50);

/// Outcome of one replication pass for one policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicateResult {
    /// The hub status diverged and was rewritten.
    Updated { policy: PolicyName },
    /// The hub status already equals the managed status.
    Converged { policy: PolicyName },
    /// `--dry-run` mode: the hub status *would* have been rewritten.
    WouldUpdate { policy: PolicyName },
    /// The managed copy is gone — terminal for this pass, nothing to report.
    SourceMissing { policy: PolicyName },
    /// The hub copy is gone — terminal for this pass, nothing to patch.
    HubMissing { policy: PolicyName },
}

/// Replicate one policy's status from the managed store to the hub store.
///
/// The managed copy is never mutated. A hub copy whose `status` field is
/// absent is treated as holding the empty status and patched like any other
/// divergence, which is what makes externally cleared hub status self-heal.
pub fn replicate_policy(
    home: &Path,
    namespace: &Namespace,
    name: &PolicyName,
    dry_run: bool,
) -> Result<ReplicateResult, SyncError> {
    let managed = match load_policy_at(home, ClusterSide::Managed, namespace, name) {
        Ok(policy) => policy,
        Err(StoreError::PolicyNotFound { .. }) => {
            tracing::info!("managed policy '{}/{}' is gone; stopping pass", namespace, name);
            return Ok(ReplicateResult::SourceMissing {
                policy: name.clone(),
            });
        }
        Err(err) => return Err(err.into()),
    };
    let desired = managed.status.clone();

    let mut attempt = 0u32;
    loop {
        let hub: Policy = match load_policy_at(home, ClusterSide::Hub, namespace, name) {
            Ok(policy) => policy,
            Err(StoreError::PolicyNotFound { .. }) => {
                tracing::info!("hub policy '{}/{}' is gone; stopping pass", namespace, name);
                return Ok(ReplicateResult::HubMissing {
                    policy: name.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        if hub.status == desired {
            if !dry_run {
                record_replication(home, namespace, name, &desired)?;
            }
            return Ok(ReplicateResult::Converged {
                policy: name.clone(),
            });
        }

        if dry_run {
            tracing::info!("[dry-run] would replicate status for '{}/{}'", namespace, name);
            return Ok(ReplicateResult::WouldUpdate {
                policy: name.clone(),
            });
        }

        match update_status_at(
            home,
            ClusterSide::Hub,
            namespace,
            name,
            desired.clone(),
            hub.resource_version,
        ) {
            Ok(_) => {
                record_replication(home, namespace, name, &desired)?;
                tracing::info!("replicated status for '{}/{}' to hub", namespace, name);
                return Ok(ReplicateResult::Updated {
                    policy: name.clone(),
                });
            }
            Err(StoreError::Conflict {
                expected, actual, ..
            }) => {
                attempt += 1;
                if attempt >= CONFLICT_RETRY_LIMIT {
                    return Err(SyncError::WriteConflict {
                        policy: name.clone(),
                        attempts: attempt,
                    });
                }
                tracing::warn!(
                    "hub status write conflict for '{}/{}' (expected version {}, found {}); retrying",
                    namespace,
                    name,
                    expected,
                    actual,
                );
                sleep(CONFLICT_RETRY_BASE * 2u32.saturating_pow(attempt - 1));
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn record_replication(
    home: &Path,
    namespace: &Namespace,
    name: &PolicyName,
    status: &Option<polisync_core::types::PolicyStatus>,
) -> Result<(), SyncError> {
    let state = SyncStateFile {
        synced_at: Utc::now(),
        status_hash: sync_state::status_hash(status)?,
    };
    sync_state::save_at(home, namespace, name, &state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polisync_core::store::{init_policy_at, save_policy_at};
    use polisync_core::types::{
        ComplianceState, PolicyManifest, PolicyStatus, TemplateName, TemplateSpec,
    };
    use tempfile::TempDir;

    fn manifest(name: &str) -> PolicyManifest {
        PolicyManifest {
            name: PolicyName::from(name),
            namespace: Namespace::from("managed"),
            templates: vec![TemplateSpec {
                kind: "ConfigurationPolicy".to_string(),
                name: TemplateName::from("configurationpolicy"),
            }],
        }
    }

    fn seed_both_sides(home: &Path, name: &str) -> (Namespace, PolicyName) {
        let m = manifest(name);
        init_policy_at(home, ClusterSide::Managed, &m).expect("init managed");
        init_policy_at(home, ClusterSide::Hub, &m).expect("init hub");
        (m.namespace, m.name)
    }

    fn set_managed_status(home: &Path, ns: &Namespace, name: &PolicyName, state: ComplianceState) {
        let managed = load_policy_at(home, ClusterSide::Managed, ns, name).expect("load");
        update_status_at(
            home,
            ClusterSide::Managed,
            ns,
            name,
            Some(PolicyStatus {
                compliant: state,
                details: vec![],
            }),
            managed.resource_version,
        )
        .expect("set status");
    }

    #[test]
    fn first_pass_updates_hub() {
        let _ = env_logger::builder().is_test(true).try_init();
        let home = TempDir::new().expect("home");
        let (ns, name) = seed_both_sides(home.path(), "audit-pods");
        set_managed_status(home.path(), &ns, &name, ComplianceState::Compliant);

        let result = replicate_policy(home.path(), &ns, &name, false).expect("replicate");
        assert!(matches!(result, ReplicateResult::Updated { .. }));

        let managed = load_policy_at(home.path(), ClusterSide::Managed, &ns, &name).expect("m");
        let hub = load_policy_at(home.path(), ClusterSide::Hub, &ns, &name).expect("h");
        assert_eq!(hub.status, managed.status);
    }

    #[test]
    fn second_pass_is_converged_and_idempotent() {
        let home = TempDir::new().expect("home");
        let (ns, name) = seed_both_sides(home.path(), "audit-pods");
        set_managed_status(home.path(), &ns, &name, ComplianceState::Compliant);

        replicate_policy(home.path(), &ns, &name, false).expect("first");
        let hub_before = load_policy_at(home.path(), ClusterSide::Hub, &ns, &name).expect("h");

        let result = replicate_policy(home.path(), &ns, &name, false).expect("second");
        assert!(matches!(result, ReplicateResult::Converged { .. }));

        let hub_after = load_policy_at(home.path(), ClusterSide::Hub, &ns, &name).expect("h");
        assert_eq!(
            hub_after.resource_version, hub_before.resource_version,
            "a converged pass must not rewrite the hub copy"
        );
    }

    #[test]
    fn cleared_hub_status_is_healed() {
        let home = TempDir::new().expect("home");
        let (ns, name) = seed_both_sides(home.path(), "audit-pods");
        set_managed_status(home.path(), &ns, &name, ComplianceState::NonCompliant);
        replicate_policy(home.path(), &ns, &name, false).expect("converge");

        // External actor deletes the status field on the hub copy.
        let hub = load_policy_at(home.path(), ClusterSide::Hub, &ns, &name).expect("h");
        update_status_at(
            home.path(),
            ClusterSide::Hub,
            &ns,
            &name,
            None,
            hub.resource_version,
        )
        .expect("clear");

        let result = replicate_policy(home.path(), &ns, &name, false).expect("heal");
        assert!(matches!(result, ReplicateResult::Updated { .. }));

        let managed = load_policy_at(home.path(), ClusterSide::Managed, &ns, &name).expect("m");
        let hub = load_policy_at(home.path(), ClusterSide::Hub, &ns, &name).expect("h");
        assert_eq!(hub.status, managed.status);
        assert!(hub.status.is_some());
    }

    #[test]
    fn tampered_hub_status_is_overwritten() {
        let home = TempDir::new().expect("home");
        let (ns, name) = seed_both_sides(home.path(), "audit-pods");
        set_managed_status(home.path(), &ns, &name, ComplianceState::Compliant);
        replicate_policy(home.path(), &ns, &name, false).expect("converge");

        // External actor rewrites the hub status to a different verdict.
        let hub = load_policy_at(home.path(), ClusterSide::Hub, &ns, &name).expect("h");
        update_status_at(
            home.path(),
            ClusterSide::Hub,
            &ns,
            &name,
            Some(PolicyStatus {
                compliant: ComplianceState::NonCompliant,
                details: vec![],
            }),
            hub.resource_version,
        )
        .expect("tamper");

        replicate_policy(home.path(), &ns, &name, false).expect("heal");
        let managed = load_policy_at(home.path(), ClusterSide::Managed, &ns, &name).expect("m");
        let hub = load_policy_at(home.path(), ClusterSide::Hub, &ns, &name).expect("h");
        assert_eq!(hub.status, managed.status);
    }

    #[test]
    fn dry_run_reports_without_writing() {
        let home = TempDir::new().expect("home");
        let (ns, name) = seed_both_sides(home.path(), "audit-pods");
        set_managed_status(home.path(), &ns, &name, ComplianceState::Compliant);

        let result = replicate_policy(home.path(), &ns, &name, true).expect("dry run");
        assert!(matches!(result, ReplicateResult::WouldUpdate { .. }));

        let hub = load_policy_at(home.path(), ClusterSide::Hub, &ns, &name).expect("h");
        assert!(hub.status.is_none(), "dry-run must not write the hub copy");
        assert!(
            sync_state::load_at(home.path(), &ns, &name)
                .expect("state")
                .is_none(),
            "dry-run must not record replication"
        );
    }

    #[test]
    fn missing_managed_policy_is_terminal() {
        let home = TempDir::new().expect("home");
        let m = manifest("audit-pods");
        init_policy_at(home.path(), ClusterSide::Hub, &m).expect("hub only");

        let result =
            replicate_policy(home.path(), &m.namespace, &m.name, false).expect("pass");
        assert!(matches!(result, ReplicateResult::SourceMissing { .. }));
    }

    #[test]
    fn missing_hub_policy_is_terminal() {
        let home = TempDir::new().expect("home");
        let m = manifest("audit-pods");
        init_policy_at(home.path(), ClusterSide::Managed, &m).expect("managed only");

        let result =
            replicate_policy(home.path(), &m.namespace, &m.name, false).expect("pass");
        assert!(matches!(result, ReplicateResult::HubMissing { .. }));
    }

    #[test]
    fn replication_records_state_file() {
        let home = TempDir::new().expect("home");
        let (ns, name) = seed_both_sides(home.path(), "audit-pods");
        set_managed_status(home.path(), &ns, &name, ComplianceState::Compliant);
        replicate_policy(home.path(), &ns, &name, false).expect("replicate");

        let state = sync_state::load_at(home.path(), &ns, &name)
            .expect("load")
            .expect("record written");
        let managed = load_policy_at(home.path(), ClusterSide::Managed, &ns, &name).expect("m");
        assert_eq!(
            state.status_hash,
            sync_state::status_hash(&managed.status).expect("hash")
        );
    }

    #[test]
    fn stale_version_retry_recovers() {
        let home = TempDir::new().expect("home");
        let (ns, name) = seed_both_sides(home.path(), "audit-pods");
        set_managed_status(home.path(), &ns, &name, ComplianceState::Compliant);

        // Move the hub copy forward so the first optimistic write conflicts
        // against any stale observation a concurrent writer may have made.
        let hub = load_policy_at(home.path(), ClusterSide::Hub, &ns, &name).expect("h");
        save_policy_at(home.path(), ClusterSide::Hub, &hub).expect("bump");

        let result = replicate_policy(home.path(), &ns, &name, false).expect("replicate");
        assert!(matches!(result, ReplicateResult::Updated { .. }));
        let hub = load_policy_at(home.path(), ClusterSide::Hub, &ns, &name).expect("h");
        assert!(hub.status.is_some());
    }
}
