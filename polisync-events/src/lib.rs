//! Notification-record ingestion for `polisync-events`.
//!
//! Template controllers deposit one YAML [`PolicyEvent`] per file into the
//! per-namespace spool (`~/.polisync/events/<namespace>/`). [`qualify`]
//! filters records to those whose reason references a policy template
//! (`policy: <namespace>/<policy-name>-<template-name>`) and extracts the
//! `(policy, template, severity, message, timestamp, event id)` tuple;
//! non-matching records are ignored, never an error. [`order_events`]
//! restores ascending `(timestamp, event id)` delivery order when the spool
//! is read out of order.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use polisync_core::store::polisync_root;
use polisync_core::types::{EventId, EventSeverity, Namespace, PolicyName, TemplateName};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A notification record as emitted by a template controller.
///
/// `policy` and `namespace` carry the involved-object reference; `reason`
/// carries the template reference pattern. Records are consumed read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEvent {
    pub id: EventId,
    pub severity: EventSeverity,
    pub reason: String,
    pub message: String,
    pub policy: PolicyName,
    pub namespace: Namespace,
    pub timestamp: DateTime<Utc>,
}

/// A qualifying record reduced to the tuple downstream stages consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateEvent {
    pub policy: PolicyName,
    pub template: TemplateName,
    pub severity: EventSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub event_id: EventId,
}

/// A spooled record together with the file it was read from, so the caller
/// can acknowledge (delete) it after successful application.
#[derive(Debug, Clone)]
pub struct SpooledEvent {
    pub path: PathBuf,
    pub event: PolicyEvent,
}

/// Errors from spool ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// ---------------------------------------------------------------------------
// Qualification
// ---------------------------------------------------------------------------

/// Extract the template name from a reason of the form
/// `policy: <namespace>/<policy-name>-<template-name>`.
///
/// Policy names may themselves contain dashes, so the match is anchored on
/// the known involved-object policy name rather than split on `-`. Returns
/// `None` for any reason that does not reference a template of `policy` in
/// `namespace`.
pub fn template_reference(
    reason: &str,
    namespace: &Namespace,
    policy: &PolicyName,
) -> Option<TemplateName> {
    let rest = reason.strip_prefix("policy:")?.trim_start();
    let (ns, object) = rest.split_once('/')?;
    if ns != namespace.0 {
        return None;
    }
    let template = object.strip_prefix(policy.0.as_str())?.strip_prefix('-')?;
    if template.is_empty() {
        return None;
    }
    Some(TemplateName::from(template))
}

/// Qualify a record: namespace scope plus template reference.
///
/// Returns the downstream tuple, or `None` for records that do not concern a
/// policy template in `namespace`.
pub fn qualify(event: &PolicyEvent, namespace: &Namespace) -> Option<TemplateEvent> {
    if &event.namespace != namespace {
        return None;
    }
    let template = template_reference(&event.reason, namespace, &event.policy)?;
    Some(TemplateEvent {
        policy: event.policy.clone(),
        template,
        severity: event.severity,
        message: event.message.clone(),
        timestamp: event.timestamp,
        event_id: event.id.clone(),
    })
}

/// Stable-sort events into ascending `(timestamp, event id)` order — the
/// order downstream stages require regardless of spool read order.
pub fn order_events(events: &mut [TemplateEvent]) {
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
}

// ---------------------------------------------------------------------------
// Spool
// ---------------------------------------------------------------------------

/// `<home>/.polisync/events/<namespace>/` — pure, no I/O.
pub fn spool_dir_at(home: &Path, namespace: &Namespace) -> PathBuf {
    polisync_root(home).join("events").join(&namespace.0)
}

/// Deposit a record into the spool as
/// `<zero-padded-nanos>-<sanitized id>.yaml`. Returns the written path.
pub fn write_event_at(home: &Path, event: &PolicyEvent) -> Result<PathBuf, IngestError> {
    let dir = spool_dir_at(home, &event.namespace);
    std::fs::create_dir_all(&dir)?;

    let nanos = event.timestamp.timestamp_nanos_opt().unwrap_or_default().max(0);
    let path = dir.join(format!("{nanos:020}-{}.yaml", sanitize(&event.id.0)));
    let yaml = serde_yaml::to_string(event)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, &yaml)?;
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}

/// Read every record currently spooled for a namespace.
///
/// Malformed record files are logged and skipped — a bad record must never
/// abort the stream. Returns records in file-name order; callers needing the
/// delivery contract use [`order_events`] after qualification.
pub fn read_spool_at(home: &Path, namespace: &Namespace) -> Result<Vec<SpooledEvent>, IngestError> {
    let dir = spool_dir_at(home, namespace);
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("yaml"))
        .collect();
    paths.sort();

    let mut spooled = Vec::new();
    for path in paths {
        let contents = std::fs::read_to_string(&path)?;
        match serde_yaml::from_str::<PolicyEvent>(&contents) {
            Ok(event) => spooled.push(SpooledEvent { path, event }),
            Err(err) => {
                tracing::warn!("skipping malformed event record {}: {err}", path.display());
            }
        }
    }
    Ok(spooled)
}

/// Acknowledge a consumed record by deleting its spool file.
///
/// A record already gone (consumed by a concurrent pass) is not an error.
pub fn remove_event_at(path: &Path) -> Result<(), IngestError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(IngestError::Io(err)),
    }
}

/// Read, qualify, and order the spooled records concerning one policy.
///
/// Returns `(spool path, tuple)` pairs in ascending `(timestamp, event id)`
/// order; the path accompanies each tuple for acknowledgment.
pub fn collect_for_policy_at(
    home: &Path,
    namespace: &Namespace,
    policy: &PolicyName,
) -> Result<Vec<(PathBuf, TemplateEvent)>, IngestError> {
    let spooled = read_spool_at(home, namespace)?;
    let mut qualified: Vec<(PathBuf, TemplateEvent)> = spooled
        .into_iter()
        .filter_map(|s| {
            let tuple = qualify(&s.event, namespace)?;
            (&tuple.policy == policy).then_some((s.path, tuple))
        })
        .collect();
    qualified.sort_by(|a, b| {
        a.1.timestamp
            .cmp(&b.1.timestamp)
            .then_with(|| a.1.event_id.cmp(&b.1.event_id))
    });
    Ok(qualified)
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
