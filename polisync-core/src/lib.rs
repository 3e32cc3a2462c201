//! Polisync core library — domain types, policy store, compliance logic.
//!
//! Public API surface:
//! - [`types`] — newtypes and domain structs
//! - [`compliance`] — message parsing and status aggregation
//! - [`error`] — [`StoreError`]
//! - [`store`] — per-cluster-side policy persistence

pub mod compliance;
pub mod error;
pub mod store;
pub mod types;

pub use compliance::{aggregate, parse_compliance, ComplianceParseError, DEFAULT_HISTORY_CAPACITY};
pub use error::StoreError;
pub use store::ClusterSide;
pub use types::{
    ComplianceDetail, ComplianceState, EventId, EventSeverity, HistoryEntry, Namespace, Policy,
    PolicyManifest, PolicyName, PolicyStatus, TemplateMeta, TemplateName, TemplateSpec,
};
