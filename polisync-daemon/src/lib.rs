//! Daemon runtime: watcher + keyed reconcile dispatcher + socket server.

pub mod config;
mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use config::DaemonConfig;
pub use error::DaemonError;
pub use protocol::{
    request_reconcile, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, start_blocking, ComplianceCache, ReconcileSummary};
