//! Unified diff of hub status versus managed status for `polisync diff`.

use std::path::Path;

use similar::TextDiff;

use polisync_core::error::StoreError;
use polisync_core::store::{load_policy_at, ClusterSide};
use polisync_core::types::{Namespace, PolicyName, PolicyStatus};

use crate::error::SyncError;

/// Render what replication would change on the hub copy as a unified diff.
///
/// Returns `None` when the two statuses are already structurally equal.
/// A hub copy that is missing entirely diffs against empty content.
pub fn diff_policy(
    home: &Path,
    namespace: &Namespace,
    name: &PolicyName,
) -> Result<Option<String>, SyncError> {
    let managed = load_policy_at(home, ClusterSide::Managed, namespace, name)?;
    let hub_status = match load_policy_at(home, ClusterSide::Hub, namespace, name) {
        Ok(policy) => policy.status,
        Err(StoreError::PolicyNotFound { .. }) => None,
        Err(err) => return Err(err.into()),
    };

    if hub_status == managed.status {
        return Ok(None);
    }

    let hub_rendered = render_status(&hub_status)?;
    let managed_rendered = render_status(&managed.status)?;

    let old_header = format!("hub/{namespace}/{name}");
    let new_header = format!("managed/{namespace}/{name}");
    let unified = TextDiff::from_lines(&hub_rendered, &managed_rendered)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string();
    Ok(Some(unified))
}

fn render_status(status: &Option<PolicyStatus>) -> Result<String, SyncError> {
    match status {
        Some(status) => Ok(serde_yaml::to_string(status)?),
        None => Ok(String::new()),
    }
}
