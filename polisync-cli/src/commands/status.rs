//! `polisync status` — compliance and hub convergence visibility.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use polisync_core::store::{list_policies_at, ClusterSide};
use polisync_core::types::{ComplianceState, Policy};
use polisync_sync::divergence::{check, format_datetime_age, DivergenceSignal};
use polisync_sync::sync_state;

/// Arguments for `polisync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Filter to a specific namespace.
    #[arg(long)]
    pub namespace: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        let mut policies = list_policies_at(&home, ClusterSide::Managed)
            .context("failed to load managed store — run `polisync apply` first")?;
        if let Some(namespace_filter) = self.namespace.as_ref() {
            policies.retain(|policy| policy.namespace.0 == *namespace_filter);
        }

        let report = build_report(&home, &policies)?;
        if self.json {
            print_json(report)?;
            return Ok(());
        }

        print_table(report);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct PolicyRow {
    namespace: String,
    policy: String,
    compliance: Option<ComplianceState>,
    details: usize,
    history_entries: usize,
    signal: DivergenceSignal,
    last_replicated_age: String,
    last_replicated_at: Option<String>,
}

#[derive(Debug, Clone)]
struct StatusReport {
    noncompliant_count: usize,
    diverged_count: usize,
    rows: Vec<PolicyRow>,
}

#[derive(Serialize)]
struct StatusReportJson {
    summary: StatusSummaryJson,
    policies: Vec<PolicyRowJson>,
}

#[derive(Serialize)]
struct StatusSummaryJson {
    policies: usize,
    noncompliant: usize,
    diverged: usize,
}

#[derive(Serialize)]
struct PolicyRowJson {
    namespace: String,
    policy: String,
    compliance: String,
    details: usize,
    history_entries: usize,
    hub: String,
    last_replicated_age: String,
    last_replicated_at: Option<String>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "policy")]
    policy: String,
    #[tabled(rename = "compliance")]
    compliance: String,
    #[tabled(rename = "details")]
    details: usize,
    #[tabled(rename = "history")]
    history: usize,
    #[tabled(rename = "hub")]
    hub: String,
    #[tabled(rename = "last replicated")]
    last_replicated: String,
}

fn build_report(home: &Path, policies: &[Policy]) -> Result<StatusReport> {
    let mut rows = Vec::new();
    for policy in policies {
        let signal = check(home, &policy.namespace, &policy.name)
            .with_context(|| format!("divergence check failed for '{}'", policy.name))?;
        let (last_replicated_at, last_replicated_age) =
            load_last_replicated(home, policy)
                .with_context(|| format!("failed to load replication state for '{}'", policy.name))?;

        let (details, history_entries) = match &policy.status {
            Some(status) => (
                status.details.len(),
                status.details.iter().map(|d| d.history.len()).sum(),
            ),
            None => (0, 0),
        };

        rows.push(PolicyRow {
            namespace: policy.namespace.0.clone(),
            policy: policy.name.0.clone(),
            compliance: policy.status.as_ref().map(|s| s.compliant),
            details,
            history_entries,
            signal,
            last_replicated_age,
            last_replicated_at,
        });
    }

    let noncompliant_count = rows
        .iter()
        .filter(|row| row.compliance == Some(ComplianceState::NonCompliant))
        .count();
    let diverged_count = rows
        .iter()
        .filter(|row| !matches!(row.signal, DivergenceSignal::Converged))
        .count();

    Ok(StatusReport {
        noncompliant_count,
        diverged_count,
        rows,
    })
}

fn load_last_replicated(home: &Path, policy: &Policy) -> Result<(Option<String>, String)> {
    let Some(state) = sync_state::load_at(home, &policy.namespace, &policy.name)? else {
        return Ok((None, "never".to_string()));
    };
    let iso = Some(state.synced_at.to_rfc3339());
    let age = format_datetime_age(state.synced_at);
    Ok((iso, age))
}

fn print_json(report: StatusReport) -> Result<()> {
    let payload = StatusReportJson {
        summary: StatusSummaryJson {
            policies: report.rows.len(),
            noncompliant: report.noncompliant_count,
            diverged: report.diverged_count,
        },
        policies: report
            .rows
            .into_iter()
            .map(|row| PolicyRowJson {
                namespace: row.namespace,
                policy: row.policy,
                compliance: compliance_label(row.compliance).to_string(),
                details: row.details,
                history_entries: row.history_entries,
                hub: signal_key(&row.signal).to_string(),
                last_replicated_age: row.last_replicated_age,
                last_replicated_at: row.last_replicated_at,
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(report: StatusReport) {
    println!(
        "Polisync v{} | {} policies | {} noncompliant | {} diverged",
        env!("CARGO_PKG_VERSION"),
        report.rows.len(),
        report.noncompliant_count,
        report.diverged_count,
    );

    if report.rows.is_empty() {
        println!("No policies registered.");
        return;
    }

    let separator = "■".repeat(67).bright_black().to_string();
    println!("{separator}");
    println!(
        "Indicators: {} CONVERGED  {} CLEARED  {} DRIFTED  {} NEVER  {} MISSING",
        signal_indicator(&DivergenceSignal::Converged),
        signal_indicator(&DivergenceSignal::StatusCleared),
        signal_indicator(&DivergenceSignal::Drifted {
            reason: String::new(),
        }),
        signal_indicator(&DivergenceSignal::NeverReplicated),
        signal_indicator(&DivergenceSignal::HubMissing),
    );
    println!("{separator}");

    let mut namespaces: Vec<String> = report
        .rows
        .iter()
        .map(|row| row.namespace.clone())
        .collect();
    namespaces.sort();
    namespaces.dedup();

    for namespace in namespaces {
        println!("{}", namespace.to_uppercase().bold());
        let table_rows: Vec<StatusTableRow> = report
            .rows
            .iter()
            .filter(|row| row.namespace == namespace)
            .map(|row| StatusTableRow {
                policy: row.policy.clone(),
                compliance: compliance_colored(row.compliance),
                details: row.details,
                history: row.history_entries,
                hub: signal_label(&row.signal).to_string(),
                last_replicated: row.last_replicated_age.clone(),
            })
            .collect();
        let mut table = Table::new(table_rows);
        table.with(Style::rounded());
        println!("{table}");
        println!("{separator}");
    }

    if report.diverged_count > 0 {
        println!("Run 'polisync reconcile --all' to converge diverged policies.");
    }
}

fn compliance_label(compliance: Option<ComplianceState>) -> &'static str {
    match compliance {
        Some(ComplianceState::Compliant) => "Compliant",
        Some(ComplianceState::NonCompliant) => "NonCompliant",
        Some(ComplianceState::Pending) | None => "Pending",
    }
}

fn compliance_colored(compliance: Option<ComplianceState>) -> String {
    match compliance {
        Some(ComplianceState::Compliant) => "Compliant".green().to_string(),
        Some(ComplianceState::NonCompliant) => "NonCompliant".red().bold().to_string(),
        Some(ComplianceState::Pending) | None => "Pending".yellow().to_string(),
    }
}

fn signal_key(signal: &DivergenceSignal) -> &'static str {
    match signal {
        DivergenceSignal::SourceMissing => "source_missing",
        DivergenceSignal::HubMissing => "hub_missing",
        DivergenceSignal::NeverReplicated => "never_replicated",
        DivergenceSignal::Converged => "converged",
        DivergenceSignal::StatusCleared => "status_cleared",
        DivergenceSignal::Drifted { .. } => "drifted",
    }
}

fn signal_label(signal: &DivergenceSignal) -> &'static str {
    match signal {
        DivergenceSignal::SourceMissing => "SOURCE MISSING",
        DivergenceSignal::HubMissing => "HUB MISSING",
        DivergenceSignal::NeverReplicated => "NEVER",
        DivergenceSignal::Converged => "CONVERGED",
        DivergenceSignal::StatusCleared => "CLEARED",
        DivergenceSignal::Drifted { .. } => "DRIFTED",
    }
}

fn signal_indicator(signal: &DivergenceSignal) -> String {
    match signal {
        DivergenceSignal::SourceMissing | DivergenceSignal::HubMissing => {
            "■".magenta().bold().to_string()
        }
        DivergenceSignal::NeverReplicated => "■".bright_black().bold().to_string(),
        DivergenceSignal::Converged => "■".green().bold().to_string(),
        DivergenceSignal::StatusCleared => "■".yellow().bold().to_string(),
        DivergenceSignal::Drifted { .. } => "■".red().bold().to_string(),
    }
}
