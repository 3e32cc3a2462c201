use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use polisync_core::error::StoreError;
use polisync_core::store::{list_policies_at, load_policy_at, ClusterSide};
use polisync_core::types::{ComplianceState, Namespace, PolicyName};
use polisync_events::PolicyEvent;
use polisync_sync::pipeline::{self, ReconcileOutcome, ReconcileScope};
use polisync_sync::{ReplicateResult, SyncError};

use crate::config::{self, DaemonConfig};
use crate::error::{io_err, DaemonError};
use crate::paths::{clusters_root, logs_dir, run_dir, socket_path, spool_root, DEBOUNCE_WINDOW};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Per-policy compliance states for status reporting.
/// Key: `<namespace>/<name>`. Value: compliance state display string.
pub type ComplianceCache = HashMap<String, String>;

/// Per-policy last-successful-reconcile timestamps (Unix seconds).
pub type ReconcileTimestamps = HashMap<String, u64>;

const RECONCILE_RETRY_BASE: Duration = Duration::from_millis(500);
const RECONCILE_RETRY_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
enum ReconcileTarget {
    All,
    Policy {
        namespace: Namespace,
        name: PolicyName,
    },
}

impl ReconcileTarget {
    fn label(&self) -> String {
        match self {
            ReconcileTarget::All => "all".to_string(),
            ReconcileTarget::Policy { namespace, name } => format!("{namespace}/{name}"),
        }
    }
}

struct ReconcileJob {
    target: ReconcileTarget,
    source: &'static str,
    respond_to: Option<oneshot::Sender<Result<ReconcileSummary, String>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileSummary {
    pub target: String,
    pub source: String,
    pub enqueued: usize,
    pub applied_events: usize,
    pub updated: usize,
    pub converged: usize,
    pub duration_ms: u128,
}

struct WorkerReport {
    key: String,
    namespace: Namespace,
    name: PolicyName,
    source: &'static str,
    duration: Duration,
    result: Result<(Vec<ReconcileOutcome>, Option<String>), String>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    ensure_runtime_dirs(&home, &config)?;

    let cache: Arc<RwLock<ComplianceCache>> = Arc::new(RwLock::new(HashMap::new()));
    let timestamps: Arc<RwLock<ReconcileTimestamps>> = Arc::new(RwLock::new(HashMap::new()));
    let started_at_unix = unix_seconds_now();

    let (job_tx, job_rx) = mpsc::channel::<ReconcileJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    // Level-triggered recovery: one full pass at startup picks up anything
    // that happened while the daemon was down.
    job_tx
        .send(ReconcileJob {
            target: ReconcileTarget::All,
            source: "startup",
            respond_to: None,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("reconcile queue"))?;

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(home, job_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let dispatcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let capacity = config.history_capacity;
        let cache = cache.clone();
        let timestamps = timestamps.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = dispatcher_task(
                home,
                capacity,
                cache,
                timestamps,
                job_tx,
                job_rx,
                shutdown.subscribe(),
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let interval_handle = {
        let shutdown = shutdown_tx.clone();
        let interval = config.reconcile_interval();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = interval_task(interval, job_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let config = config.clone();
        let cache = cache.clone();
        let timestamps = timestamps.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                config,
                cache,
                timestamps,
                job_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, dispatcher_result, interval_result, socket_result, signal_result) = tokio::join!(
        watcher_handle,
        dispatcher_handle,
        interval_handle,
        socket_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("dispatcher", dispatcher_result)?;
    handle_join("interval", interval_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

async fn watcher_task(
    home: PathBuf,
    job_tx: mpsc::Sender<ReconcileJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let clusters = clusters_root(&home);
    let spool = spool_root(&home);
    for dir in [&clusters, &spool] {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
    }

    // Canonicalize so that FSEvents paths (which arrive as real paths, e.g.
    // /private/var/... on macOS) match the `starts_with` checks below.
    let clusters = fs::canonicalize(&clusters).unwrap_or(clusters);
    let spool = fs::canonicalize(&spool).unwrap_or(spool);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut _watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;

    let mut watched_dirs = HashSet::new();
    register_tree(&mut _watcher, &mut watched_dirs, &clusters)?;
    register_tree(&mut _watcher, &mut watched_dirs, &spool)?;

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    // FSEvents is directory-based; always register parent directory.
                    if let Some(watch_dir) = directory_to_watch(&path) {
                        for root in [&clusters, &spool] {
                            if watch_dir.starts_with(root) && watch_dir.exists() {
                                register_tree(&mut _watcher, &mut watched_dirs, &watch_dir)?;
                            }
                        }
                    }

                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }

                    let Some(target) = classify_path(&clusters, &spool, &path) else {
                        continue;
                    };

                    tracing::debug!(
                        target = %target.label(),
                        path = %path.display(),
                        "watcher enqueued reconcile",
                    );
                    if job_tx
                        .send(ReconcileJob {
                            target,
                            source: "watcher",
                            respond_to: None,
                        })
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                }
            }
        }
    }

    Ok(())
}

/// Map a changed path to the policy it concerns.
///
/// A cluster-store path names the policy directly; a spool path names it
/// through the record's involved-object reference (records are written with
/// tmp + rename, so the file is complete once its final name appears).
fn classify_path(clusters: &Path, spool: &Path, path: &Path) -> Option<ReconcileTarget> {
    if let Ok(rel) = path.strip_prefix(clusters) {
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.len() != 3 {
            return None;
        }
        let name = parts[2].strip_suffix(".yaml")?;
        return Some(ReconcileTarget::Policy {
            namespace: Namespace::from(parts[1].clone()),
            name: PolicyName::from(name),
        });
    }

    if let Ok(rel) = path.strip_prefix(spool) {
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.len() != 2 || !parts[1].ends_with(".yaml") {
            return None;
        }
        let contents = std::fs::read_to_string(path).ok()?;
        let event: PolicyEvent = serde_yaml::from_str(&contents).ok()?;
        return Some(ReconcileTarget::Policy {
            namespace: event.namespace,
            name: event.policy,
        });
    }

    None
}

// ---------------------------------------------------------------------------
// Dispatcher — keyed single-flight reconcile queue
// ---------------------------------------------------------------------------

async fn dispatcher_task(
    home: PathBuf,
    capacity: usize,
    cache: Arc<RwLock<ComplianceCache>>,
    timestamps: Arc<RwLock<ReconcileTimestamps>>,
    job_tx: mpsc::Sender<ReconcileJob>,
    mut job_rx: mpsc::Receiver<ReconcileJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (done_tx, mut done_rx) = mpsc::channel::<WorkerReport>(64);

    let mut in_flight = HashSet::<String>::new();
    let mut rerun = HashSet::<String>::new();
    let mut attempts = HashMap::<String, u32>::new();
    let mut waiters =
        HashMap::<String, Vec<oneshot::Sender<Result<ReconcileSummary, String>>>>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(job) = maybe_job else { break };
                match job.target {
                    ReconcileTarget::All => {
                        let list_home = home.clone();
                        let listed = tokio::task::spawn_blocking(move || {
                            list_policies_at(&list_home, ClusterSide::Managed)
                        })
                        .await
                        .map_err(|err| DaemonError::Protocol(format!("list task join error: {err}")))?;

                        match listed {
                            Ok(policies) => {
                                let enqueued = policies.len();
                                for policy in policies {
                                    spawn_worker(
                                        &home,
                                        capacity,
                                        job.source,
                                        policy.namespace,
                                        policy.name,
                                        &mut in_flight,
                                        &mut rerun,
                                        &done_tx,
                                    );
                                }
                                if let Some(respond_to) = job.respond_to {
                                    let _ = respond_to.send(Ok(ReconcileSummary {
                                        target: "all".to_string(),
                                        source: job.source.to_string(),
                                        enqueued,
                                        applied_events: 0,
                                        updated: 0,
                                        converged: 0,
                                        duration_ms: 0,
                                    }));
                                }
                            }
                            Err(err) => {
                                tracing::error!(error = %err, "failed to list policies for full reconcile");
                                if let Some(respond_to) = job.respond_to {
                                    let _ = respond_to.send(Err(err.to_string()));
                                }
                            }
                        }
                    }
                    ReconcileTarget::Policy { namespace, name } => {
                        let key = policy_key(&namespace, &name);
                        if let Some(respond_to) = job.respond_to {
                            waiters.entry(key).or_default().push(respond_to);
                        }
                        spawn_worker(
                            &home,
                            capacity,
                            job.source,
                            namespace,
                            name,
                            &mut in_flight,
                            &mut rerun,
                            &done_tx,
                        );
                    }
                }
            }
            maybe_report = done_rx.recv() => {
                let Some(report) = maybe_report else { break };
                in_flight.remove(&report.key);

                match report.result {
                    Ok((outcomes, compliance)) => {
                        attempts.remove(&report.key);
                        {
                            let mut ts = timestamps.write().await;
                            ts.insert(report.key.clone(), unix_seconds_now());
                        }
                        {
                            let mut cache = cache.write().await;
                            match compliance {
                                Some(state) => {
                                    cache.insert(report.key.clone(), state);
                                }
                                // Policy is gone; drop it from status reporting.
                                None => {
                                    cache.remove(&report.key);
                                }
                            }
                        }

                        let summary = build_reconcile_summary(
                            report.key.clone(),
                            report.source,
                            &outcomes,
                            report.duration,
                        );
                        tracing::info!(
                            target = %summary.target,
                            source = %summary.source,
                            applied = summary.applied_events,
                            updated = summary.updated,
                            duration_ms = summary.duration_ms,
                            "reconcile pass completed",
                        );
                        for waiter in waiters.remove(&report.key).unwrap_or_default() {
                            let _ = waiter.send(Ok(summary.clone()));
                        }

                        // A trigger that arrived mid-pass owes exactly one more pass.
                        if rerun.remove(&report.key) {
                            spawn_worker(
                                &home,
                                capacity,
                                "coalesced",
                                report.namespace,
                                report.name,
                                &mut in_flight,
                                &mut rerun,
                                &done_tx,
                            );
                        }
                    }
                    Err(message) => {
                        let attempt = attempts.entry(report.key.clone()).or_insert(0);
                        *attempt += 1;
                        let delay = backoff_delay(*attempt);
                        tracing::error!(
                            target = %report.key,
                            attempt = *attempt,
                            error = %message,
                            "reconcile pass failed; requeueing with backoff",
                        );
                        for waiter in waiters.remove(&report.key).unwrap_or_default() {
                            let _ = waiter.send(Err(message.clone()));
                        }
                        rerun.remove(&report.key);

                        let retry_tx = job_tx.clone();
                        let namespace = report.namespace.clone();
                        let name = report.name.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = retry_tx
                                .send(ReconcileJob {
                                    target: ReconcileTarget::Policy { namespace, name },
                                    source: "retry",
                                    respond_to: None,
                                })
                                .await;
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

/// Single-flight gate: `true` means spawn now, `false` means the key is
/// already running and the trigger was coalesced into one follow-up pass.
fn note_trigger(in_flight: &HashSet<String>, rerun: &mut HashSet<String>, key: &str) -> bool {
    if in_flight.contains(key) {
        rerun.insert(key.to_string());
        return false;
    }
    true
}

#[allow(clippy::too_many_arguments)]
fn spawn_worker(
    home: &Path,
    capacity: usize,
    source: &'static str,
    namespace: Namespace,
    name: PolicyName,
    in_flight: &mut HashSet<String>,
    rerun: &mut HashSet<String>,
    done_tx: &mpsc::Sender<WorkerReport>,
) {
    let key = policy_key(&namespace, &name);
    if !note_trigger(in_flight, rerun, &key) {
        return;
    }
    in_flight.insert(key.clone());

    let home = home.to_path_buf();
    let done_tx = done_tx.clone();
    tokio::spawn(async move {
        let started = Instant::now();
        let pass_home = home.clone();
        let pass_namespace = namespace.clone();
        let pass_name = name.clone();
        let joined = tokio::task::spawn_blocking(move || {
            run_pass(&pass_home, capacity, &pass_namespace, &pass_name)
        })
        .await;

        let result = match joined {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(err)) => Err(err.to_string()),
            Err(err) => Err(format!("reconcile task join error: {err}")),
        };
        let _ = done_tx
            .send(WorkerReport {
                key,
                namespace,
                name,
                source,
                duration: started.elapsed(),
                result,
            })
            .await;
    });
}

/// One blocking reconcile pass plus the compliance snapshot for the cache.
fn run_pass(
    home: &Path,
    capacity: usize,
    namespace: &Namespace,
    name: &PolicyName,
) -> Result<(Vec<ReconcileOutcome>, Option<String>), SyncError> {
    let outcomes = pipeline::run(
        home,
        ReconcileScope::Policy(namespace.clone(), name.clone()),
        capacity,
        false,
    )?;
    let compliance = match load_policy_at(home, ClusterSide::Managed, namespace, name) {
        Ok(policy) => Some(
            policy
                .status
                .map(|s| s.compliant.to_string())
                .unwrap_or_else(|| ComplianceState::Pending.to_string()),
        ),
        Err(StoreError::PolicyNotFound { .. }) => None,
        Err(err) => return Err(err.into()),
    };
    Ok((outcomes, compliance))
}

fn build_reconcile_summary(
    target: String,
    source: &'static str,
    outcomes: &[ReconcileOutcome],
    duration: Duration,
) -> ReconcileSummary {
    let mut applied_events = 0usize;
    let mut updated = 0usize;
    let mut converged = 0usize;

    for outcome in outcomes {
        applied_events += outcome.applied_events;
        match outcome.replication {
            ReplicateResult::Updated { .. } | ReplicateResult::WouldUpdate { .. } => updated += 1,
            ReplicateResult::Converged { .. } => converged += 1,
            ReplicateResult::SourceMissing { .. } | ReplicateResult::HubMissing { .. } => {}
        }
    }

    ReconcileSummary {
        target,
        source: source.to_string(),
        enqueued: outcomes.len(),
        applied_events,
        updated,
        converged,
        duration_ms: duration.as_millis(),
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(7);
    let delay = RECONCILE_RETRY_BASE * 2u32.saturating_pow(exponent);
    delay.min(RECONCILE_RETRY_MAX)
}

// ---------------------------------------------------------------------------
// Interval tick
// ---------------------------------------------------------------------------

async fn interval_task(
    interval: Duration,
    job_tx: mpsc::Sender<ReconcileJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut ticker = tokio::time::interval(interval);
    // Skip the first (immediate) tick: startup already enqueued a full pass.
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                if job_tx
                    .send(ReconcileJob {
                        target: ReconcileTarget::All,
                        source: "interval",
                        respond_to: None,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn socket_server_task(
    home: PathBuf,
    config: DaemonConfig,
    cache: Arc<RwLock<ComplianceCache>>,
    timestamps: Arc<RwLock<ReconcileTimestamps>>,
    job_tx: mpsc::Sender<ReconcileJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let run = run_dir(&home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let config = config.clone();
                let cache = cache.clone();
                let timestamps = timestamps.clone();
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        config,
                        cache,
                        timestamps,
                        job_tx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    config: DaemonConfig,
    cache: Arc<RwLock<ComplianceCache>>,
    timestamps: Arc<RwLock<ReconcileTimestamps>>,
    job_tx: mpsc::Sender<ReconcileJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: Result<DaemonRequest, _> = serde_json::from_str(&line);
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let cmd = request.cmd.clone();

        let response = match cmd.as_str() {
            "status" => {
                let payload = build_status_payload(
                    &home,
                    &config,
                    cache.clone(),
                    timestamps.clone(),
                    started_at_unix,
                )
                .await;
                DaemonResponse::ok(payload)
            }
            "reconcile" => {
                let target = match request.policy.as_deref() {
                    Some(scope) => match parse_policy_scope(scope) {
                        Some((namespace, name)) => ReconcileTarget::Policy { namespace, name },
                        None => {
                            write_response(
                                &mut writer,
                                &DaemonResponse::error(format!(
                                    "invalid policy scope '{scope}'; expected <namespace>/<name>"
                                )),
                            )
                            .await?;
                            continue;
                        }
                    },
                    None => ReconcileTarget::All,
                };
                match enqueue_reconcile(&job_tx, target, "socket").await {
                    Ok(summary) => DaemonResponse::ok(json!(summary)),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(
    home: &Path,
    config: &DaemonConfig,
    cache: Arc<RwLock<ComplianceCache>>,
    timestamps: Arc<RwLock<ReconcileTimestamps>>,
    started_at_unix: u64,
) -> Value {
    // Snapshot compliance states (read lock, dropped immediately).
    let mut entries: Vec<(String, String)> = {
        let cache = cache.read().await;
        cache
            .iter()
            .map(|(key, state)| (key.clone(), state.clone()))
            .collect()
    };
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    // Snapshot timestamps (read lock, dropped before JSON assembly).
    let ts_snapshot: HashMap<String, u64> = {
        let ts = timestamps.read().await;
        ts.clone()
    };

    let policies: Vec<Value> = entries
        .iter()
        .map(|(key, state)| {
            let last = ts_snapshot.get(key).copied().unwrap_or(0);
            json!({
                "policy": key,
                "compliance": state,
                "last_reconcile_at_unix": last,
            })
        })
        .collect();

    // Daemon-wide last reconcile = max of per-policy timestamps (0 if none yet).
    let last_reconcile_at_unix = ts_snapshot.values().copied().max().unwrap_or(0);

    json!({
        "running": true,
        "label": crate::paths::DAEMON_LABEL,
        "namespace": config.namespace.0,
        "reconcile_interval_secs": config.reconcile_interval_secs,
        "history_capacity": config.history_capacity,
        "started_at_unix": started_at_unix,
        "last_reconcile_at_unix": last_reconcile_at_unix,
        "policies": policies,
        "socket": socket_path(home).display().to_string(),
    })
}

async fn enqueue_reconcile(
    job_tx: &mpsc::Sender<ReconcileJob>,
    target: ReconcileTarget,
    source: &'static str,
) -> Result<ReconcileSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    job_tx
        .send(ReconcileJob {
            target,
            source,
            respond_to: Some(tx),
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("reconcile queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("reconcile response"))?;
    outcome.map_err(DaemonError::Protocol)
}

fn parse_policy_scope(scope: &str) -> Option<(Namespace, PolicyName)> {
    let (namespace, name) = scope.split_once('/')?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    Some((Namespace::from(namespace), PolicyName::from(name)))
}

fn policy_key(namespace: &Namespace, name: &PolicyName) -> String {
    format!("{namespace}/{name}")
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn register_tree(
    watcher: &mut RecommendedWatcher,
    watched_dirs: &mut HashSet<PathBuf>,
    root: &Path,
) -> Result<(), DaemonError> {
    if !root.exists() {
        fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
    }
    for dir in collect_dirs(root)? {
        let canonical = match fs::canonicalize(&dir) {
            Ok(path) => path,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&dir, err)),
        };
        if watched_dirs.insert(canonical.clone()) {
            watcher.watch(&canonical, RecursiveMode::NonRecursive)?;
            tracing::debug!(path = %canonical.display(), "watching directory");
        }
    }
    Ok(())
}

fn collect_dirs(root: &Path) -> Result<Vec<PathBuf>, DaemonError> {
    let mut dirs = vec![root.to_path_buf()];
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() == ErrorKind::NotFound {
                    continue;
                }
                return Err(io_err(&current, err));
            }
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if ty.is_dir() {
                dirs.push(entry.path());
            }
        }
    }
    dirs.sort();
    dirs.dedup();
    Ok(dirs)
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn directory_to_watch(path: &Path) -> Option<PathBuf> {
    if path.is_dir() {
        Some(path.to_path_buf())
    } else {
        path.parent().map(Path::to_path_buf)
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path, config: &DaemonConfig) -> Result<(), DaemonError> {
    let clusters = clusters_root(home);
    let spool = spool_root(home).join(&config.namespace.0);
    let run = run_dir(home);
    let logs = logs_dir(home);
    for dir in [&clusters, &spool, &run, &logs] {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
