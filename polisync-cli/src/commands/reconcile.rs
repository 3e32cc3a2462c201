//! `polisync reconcile` — one-shot ingest + replicate pass.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use polisync_daemon::config;
use polisync_sync::{
    pipeline::{self, ReconcileScope},
    ReconcileOutcome, ReplicateResult,
};

use super::parse_policy_scope;

/// Arguments for `polisync reconcile`.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Policy to reconcile as `<namespace>/<name>` (omit when using `--all`).
    pub policy: Option<String>,

    /// Reconcile every policy in the managed store.
    #[arg(long, conflicts_with = "policy")]
    pub all: bool,

    /// Show what would change without writing or consuming anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let config = config::load_at(&home).context("failed to load configuration")?;

        if self.all {
            let outcomes = pipeline::run(
                &home,
                ReconcileScope::All,
                config.history_capacity,
                self.dry_run,
            )
            .context("reconcile --all failed")?;
            for outcome in &outcomes {
                print_outcome(outcome, self.dry_run);
            }
            if outcomes.is_empty() {
                println!("No policies registered. Run `polisync apply` first.");
            }
        } else {
            let Some(scope) = self.policy.clone() else {
                bail!("provide a policy as <namespace>/<name> or use --all");
            };
            let Some((namespace, name)) = parse_policy_scope(&scope) else {
                bail!("invalid policy scope '{scope}'; expected <namespace>/<name>");
            };
            let outcomes = pipeline::run(
                &home,
                ReconcileScope::Policy(namespace, name),
                config.history_capacity,
                self.dry_run,
            )
            .with_context(|| format!("reconcile failed for '{scope}'"))?;
            for outcome in &outcomes {
                print_outcome(outcome, self.dry_run);
            }
        }

        Ok(())
    }
}

fn print_outcome(outcome: &ReconcileOutcome, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    let key = format!("{}/{}", outcome.namespace, outcome.policy);

    let replication = match &outcome.replication {
        ReplicateResult::Updated { .. } => "hub updated",
        ReplicateResult::Converged { .. } => "hub in sync",
        ReplicateResult::WouldUpdate { .. } => "hub would update",
        ReplicateResult::SourceMissing { .. } => "managed copy missing",
        ReplicateResult::HubMissing { .. } => "hub copy missing",
    };

    if outcome.applied_events == 0 && outcome.dropped_events == 0 {
        println!("{prefix}✓ '{key}' — no new events, {replication}");
        return;
    }

    println!(
        "{prefix}✓ '{key}' — {} applied, {} replayed, {} dropped, {replication}",
        outcome.applied_events, outcome.replayed_events, outcome.dropped_events,
    );
}
