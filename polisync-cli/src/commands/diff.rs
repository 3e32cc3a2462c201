//! `polisync diff` — show what replication would change on the hub copy.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use polisync_sync::diff::diff_policy;

use super::parse_policy_scope;

/// Arguments for `polisync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Policy to diff as `<namespace>/<name>`.
    pub policy: String,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let Some((namespace, name)) = parse_policy_scope(&self.policy) else {
            bail!(
                "invalid policy scope '{}'; expected <namespace>/<name>",
                self.policy
            );
        };

        let diff = diff_policy(&home, &namespace, &name)
            .with_context(|| format!("diff failed for '{}'", self.policy))?;

        match diff {
            Some(unified) => print!("{unified}"),
            None => println!("✓ '{}' — hub status is in sync", self.policy),
        }
        Ok(())
    }
}
