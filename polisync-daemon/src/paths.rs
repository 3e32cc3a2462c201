use std::path::{Path, PathBuf};
use std::time::Duration;

use polisync_core::store::polisync_root;

pub const DAEMON_LABEL: &str = "dev.polisync.daemon";
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub const DAEMON_STDOUT_LOG: &str = "daemon.log";
pub const DAEMON_STDERR_LOG: &str = "daemon-err.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn run_dir(home: &Path) -> PathBuf {
    polisync_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    polisync_root(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDERR_LOG)
}

pub fn clusters_root(home: &Path) -> PathBuf {
    polisync_root(home).join("clusters")
}

pub fn spool_root(home: &Path) -> PathBuf {
    polisync_root(home).join("events")
}

pub fn config_path(home: &Path) -> PathBuf {
    polisync_root(home).join("config.yaml")
}
