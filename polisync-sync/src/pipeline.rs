//! Shared reconcile pipeline entrypoint used by CLI and daemon.
//!
//! One pass per policy: collect qualifying spool events, fold them into the
//! managed status through the reducer (optimistic-concurrency retry),
//! acknowledge the consumed spool files, then replicate to the hub. Spool
//! files are deleted only after the managed write succeeds; redelivery after
//! a crash is resolved by the reducer's event-identity dedup.

use std::collections::HashSet;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use polisync_core::error::StoreError;
use polisync_core::store::{list_policies_at, load_policy_at, update_status_at, ClusterSide};
use polisync_core::types::{Namespace, Policy, PolicyName};
use polisync_events::{self as events, TemplateEvent};

use crate::error::SyncError;
use crate::reducer::{self, ApplyOutcome};
use crate::replicator::{replicate_policy, ReplicateResult, CONFLICT_RETRY_LIMIT};

const CONFLICT_RETRY_BASE: Duration = Duration::from_millis(50);

/// Scope for a reconcile pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileScope {
    /// Reconcile every policy in the managed store.
    All,
    /// Reconcile a single policy.
    Policy(Namespace, PolicyName),
}

/// Outcome of reconciling a single policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub namespace: Namespace,
    pub policy: PolicyName,
    pub applied_events: usize,
    pub replayed_events: usize,
    pub dropped_events: usize,
    pub replication: ReplicateResult,
}

/// Run the reconcile pipeline for a scope.
///
/// This is the canonical entrypoint for both `polisync reconcile` and the
/// daemon dispatcher.
pub fn run(
    home: &Path,
    scope: ReconcileScope,
    capacity: usize,
    dry_run: bool,
) -> Result<Vec<ReconcileOutcome>, SyncError> {
    match scope {
        ReconcileScope::All => {
            let policies = list_policies_at(home, ClusterSide::Managed)?;
            let mut outcomes = Vec::new();
            for policy in &policies {
                outcomes.push(reconcile_policy(
                    home,
                    &policy.namespace,
                    &policy.name,
                    capacity,
                    dry_run,
                )?);
            }
            if !dry_run {
                sweep_orphan_events(home, &policies)?;
            }
            Ok(outcomes)
        }
        ReconcileScope::Policy(namespace, name) => Ok(vec![reconcile_policy(
            home, &namespace, &name, capacity, dry_run,
        )?]),
    }
}

/// Reconcile one policy: ingest → reduce → aggregate → replicate.
pub fn reconcile_policy(
    home: &Path,
    namespace: &Namespace,
    name: &PolicyName,
    capacity: usize,
    dry_run: bool,
) -> Result<ReconcileOutcome, SyncError> {
    let pending = events::collect_for_policy_at(home, namespace, name)?;
    let tuples: Vec<TemplateEvent> = pending.iter().map(|(_, event)| event.clone()).collect();

    let mut applied = ApplyOutcome::default();
    if !tuples.is_empty() {
        // A `None` fold means the managed copy vanished mid-pass; its events
        // stay unconsumed and replication reports the condition below.
        if let Some(outcome) = fold_into_managed(home, namespace, name, &tuples, capacity, dry_run)?
        {
            applied = outcome;
            if !dry_run {
                for (path, _) in &pending {
                    events::remove_event_at(path)?;
                }
            }
        }
    }

    let replication = replicate_policy(home, namespace, name, dry_run)?;
    Ok(ReconcileOutcome {
        namespace: namespace.clone(),
        policy: name.clone(),
        applied_events: applied.applied,
        replayed_events: applied.replayed,
        dropped_events: applied.dropped,
        replication,
    })
}

/// Fold events into the managed status with a conflict retry loop.
///
/// Returns `None` when the managed copy does not exist (terminal for this
/// pass). In dry-run mode the fold runs on an in-memory copy only.
fn fold_into_managed(
    home: &Path,
    namespace: &Namespace,
    name: &PolicyName,
    tuples: &[TemplateEvent],
    capacity: usize,
    dry_run: bool,
) -> Result<Option<ApplyOutcome>, SyncError> {
    let mut attempt = 0u32;
    loop {
        let mut policy: Policy =
            match load_policy_at(home, ClusterSide::Managed, namespace, name) {
                Ok(policy) => policy,
                Err(StoreError::PolicyNotFound { .. }) => {
                    tracing::info!(
                        "managed policy '{}/{}' is gone; leaving its events unconsumed",
                        namespace,
                        name,
                    );
                    return Ok(None);
                }
                Err(err) => return Err(err.into()),
            };
        let observed_version = policy.resource_version;

        let outcome = reducer::apply_events(&mut policy, tuples, capacity);
        if dry_run {
            return Ok(Some(outcome));
        }

        match update_status_at(
            home,
            ClusterSide::Managed,
            namespace,
            name,
            policy.status.clone(),
            observed_version,
        ) {
            Ok(_) => return Ok(Some(outcome)),
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
                    "managed status write conflict for '{}/{}' (expected version {}, found {}); retrying",
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

/// Remove spooled records that reference policies absent from the managed
/// store. The policy was deleted; retrying can never succeed. Records whose
/// reason never qualified are left alone — they are not ours to manage.
fn sweep_orphan_events(home: &Path, policies: &[Policy]) -> Result<(), SyncError> {
    let known: HashSet<(String, String)> = policies
        .iter()
        .map(|p| (p.namespace.0.clone(), p.name.0.clone()))
        .collect();

    let namespaces: HashSet<Namespace> = policies.iter().map(|p| p.namespace.clone()).collect();
    for namespace in namespaces {
        for spooled in events::read_spool_at(home, &namespace)? {
            let Some(tuple) = events::qualify(&spooled.event, &namespace) else {
                continue;
            };
            if !known.contains(&(namespace.0.clone(), tuple.policy.0.clone())) {
                tracing::warn!(
                    "removing event '{}' for deleted policy '{}/{}'",
                    tuple.event_id,
                    namespace,
                    tuple.policy,
                );
                events::remove_event_at(&spooled.path)?;
            }
        }
    }
    Ok(())
}
