//! Polisync — policy compliance status synchronizer CLI.
//!
//! # Usage
//!
//! ```text
//! polisync apply <manifest.yaml>
//! polisync emit --policy <name> --template <name> --message <text> [--namespace <ns>] [--severity normal|warning]
//! polisync reconcile [<namespace>/<name>] [--all] [--dry-run]
//! polisync status [--json]
//! polisync diff <namespace>/<name>
//! polisync daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    apply::ApplyArgs, daemon::DaemonCommand, diff::DiffArgs, emit::EmitArgs,
    reconcile::ReconcileArgs, status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "polisync",
    version,
    about = "Reconcile policy compliance events and replicate status to the hub cluster",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a policy from a manifest on both cluster stores.
    Apply(ApplyArgs),

    /// Deposit a compliance notification record into the event spool.
    Emit(EmitArgs),

    /// Run the reconcile pipeline for one policy or all policies.
    Reconcile(ReconcileArgs),

    /// Show compliance and hub convergence across policies.
    Status(StatusArgs),

    /// Show a unified diff of what replication would change on the hub copy.
    Diff(DiffArgs),

    /// Manage the background reconcile daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Apply(args) => args.run(),
        Commands::Emit(args) => args.run(),
        Commands::Reconcile(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
