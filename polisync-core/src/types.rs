//! Domain types for policy compliance status.
//!
//! Loosely-typed status payloads exist only at the file boundary; everything
//! here is a strongly-typed serde record. All types serialize via serde +
//! serde_yaml in the cluster stores.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed policy object name, shared by the managed and hub copies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyName(pub String);

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PolicyName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PolicyName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed name of a policy template embedded in a parent policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateName(pub String);

impl fmt::Display for TemplateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TemplateName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TemplateName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed notification record identity (event name/UID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub String);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A managed-cluster namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(pub String);

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Namespace {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Namespace {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Evaluation result for a template or for the aggregate policy.
///
/// `Pending` is the unknown state: no compliance fact has been recorded yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ComplianceState {
    Compliant,
    NonCompliant,
    #[default]
    Pending,
}

impl fmt::Display for ComplianceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComplianceState::Compliant => write!(f, "Compliant"),
            ComplianceState::NonCompliant => write!(f, "NonCompliant"),
            ComplianceState::Pending => write!(f, "Pending"),
        }
    }
}

/// Severity of a notification record, mirroring the evaluator's event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EventSeverity {
    #[default]
    Normal,
    Warning,
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSeverity::Normal => write!(f, "Normal"),
            EventSeverity::Warning => write!(f, "Warning"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Identity of a policy template; immutable once created with its detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMeta {
    pub kind: String,
    pub name: TemplateName,
}

/// One recorded compliance event; immutable once appended, only ever evicted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub event_id: EventId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-template compliance record: identity, current state, bounded history
/// ordered newest-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceDetail {
    pub template_meta: TemplateMeta,
    pub compliance_state: ComplianceState,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Aggregate policy status: overall state plus one detail per template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PolicyStatus {
    pub compliant: ComplianceState,
    #[serde(default)]
    pub details: Vec<ComplianceDetail>,
}

/// A template declared in a policy's spec. Used to resolve the `kind` of a
/// detail's `TemplateMeta` on first event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub kind: String,
    pub name: TemplateName,
}

/// A policy object as stored on either cluster side.
///
/// The managed copy is authoritative for compliance facts; the hub copy is a
/// derived mirror whose `status` is written only by the replicator.
/// `resource_version` increments on every store write and backs optimistic
/// concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: PolicyName,
    pub namespace: Namespace,
    pub resource_version: u64,
    #[serde(default)]
    pub templates: Vec<TemplateSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PolicyStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Operator-facing input for registering a policy on both cluster sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyManifest {
    pub name: PolicyName,
    pub namespace: Namespace,
    #[serde(default)]
    pub templates: Vec<TemplateSpec>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
