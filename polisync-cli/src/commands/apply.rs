//! `polisync apply` — register a policy on both cluster stores.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use polisync_core::store::{init_policy_at, ClusterSide};
use polisync_core::types::PolicyManifest;

/// Arguments for `polisync apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Path to the policy manifest YAML (name, namespace, templates).
    pub manifest: PathBuf,
}

impl ApplyArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        let contents = std::fs::read_to_string(&self.manifest)
            .with_context(|| format!("failed to read manifest {}", self.manifest.display()))?;
        let manifest: PolicyManifest = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse manifest {}", self.manifest.display()))?;

        let managed = init_policy_at(&home, ClusterSide::Managed, &manifest)
            .context("failed to register policy on the managed store")?;
        init_policy_at(&home, ClusterSide::Hub, &manifest)
            .context("failed to register policy on the hub store")?;

        println!(
            "✓ applied '{}/{}' ({} template(s)) to managed and hub stores",
            managed.namespace,
            managed.name,
            managed.templates.len(),
        );
        Ok(())
    }
}
