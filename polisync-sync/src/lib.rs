//! # polisync-sync
//!
//! History reduction and hub replication.
//!
//! Call [`pipeline::run`] to reconcile one policy or every policy: spool
//! events are folded into the managed status and the result is replicated to
//! the hub copy, healing any out-of-band divergence.

pub mod diff;
pub mod divergence;
pub mod error;
pub mod pipeline;
pub mod reducer;
pub mod replicator;
pub mod sync_state;

pub use error::SyncError;
pub use pipeline::{ReconcileOutcome, ReconcileScope};
pub use replicator::{replicate_policy, ReplicateResult, CONFLICT_RETRY_LIMIT};
