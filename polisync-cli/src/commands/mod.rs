pub mod apply;
pub mod daemon;
pub mod diff;
pub mod emit;
pub mod reconcile;
pub mod status;

use polisync_core::types::{Namespace, PolicyName};

/// Parse a `<namespace>/<name>` policy scope argument.
pub(crate) fn parse_policy_scope(scope: &str) -> Option<(Namespace, PolicyName)> {
    let (namespace, name) = scope.split_once('/')?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    Some((Namespace::from(namespace), PolicyName::from(name)))
}
