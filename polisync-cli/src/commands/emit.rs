//! `polisync emit` — deposit a notification record into the event spool.
//!
//! Stands in for a template controller: builds the canonical
//! `policy: <namespace>/<policy>-<template>` reason and writes one spooled
//! record for the watcher or the next reconcile pass to pick up.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use polisync_core::compliance::parse_compliance;
use polisync_core::types::{ComplianceState, EventId, EventSeverity, Namespace, PolicyName};
use polisync_events::{write_event_at, PolicyEvent};

/// Thin wrapper so clap can parse `EventSeverity` from CLI args.
#[derive(Debug, Clone)]
pub struct SeverityArg(pub EventSeverity);

impl FromStr for SeverityArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Self(EventSeverity::Normal)),
            "warning" => Ok(Self(EventSeverity::Warning)),
            other => Err(format!(
                "unknown severity '{other}'; expected: normal, warning"
            )),
        }
    }
}

impl fmt::Display for SeverityArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Arguments for `polisync emit`.
#[derive(Args, Debug)]
pub struct EmitArgs {
    /// Policy the record concerns.
    #[arg(long)]
    pub policy: String,

    /// Template within the policy.
    #[arg(long)]
    pub template: String,

    /// Event message; the token before the first `;` names the compliance
    /// state (e.g. "Compliant; No violation detected").
    #[arg(long)]
    pub message: String,

    /// Managed-cluster namespace.
    #[arg(long, default_value = "managed")]
    pub namespace: String,

    /// Event severity; inferred from the message when omitted.
    #[arg(long)]
    pub severity: Option<SeverityArg>,
}

impl EmitArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        let severity = match self.severity {
            Some(arg) => arg.0,
            None => infer_severity(&self.message),
        };

        let timestamp = Utc::now();
        let nanos = timestamp.timestamp_nanos_opt().unwrap_or_default().max(0);
        let event = PolicyEvent {
            id: EventId::from(format!("{}.{nanos:x}", self.policy)),
            severity,
            reason: format!(
                "policy: {}/{}-{}",
                self.namespace, self.policy, self.template
            ),
            message: self.message,
            policy: PolicyName::from(self.policy),
            namespace: Namespace::from(self.namespace),
            timestamp,
        };

        let path = write_event_at(&home, &event).context("failed to spool event record")?;
        println!("✓ spooled {} event {} at {}", severity, event.id, path.display());
        Ok(())
    }
}

/// Compliant messages report as `Normal`, violations as `Warning` — the
/// pairing evaluators use. Unparseable messages default to `Normal`.
fn infer_severity(message: &str) -> EventSeverity {
    match parse_compliance(message) {
        Ok(ComplianceState::NonCompliant) => EventSeverity::Warning,
        _ => EventSeverity::Normal,
    }
}
