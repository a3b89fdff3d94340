use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use deploydb_core::{config, Config, PassReport, PollSettings};
use deploydb_sync::{PassMode, SyncError, SyncOrchestrator};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::protocol::{DaemonRequest, DaemonResponse};

// ---------------------------------------------------------------------------
// Pass runner seam
// ---------------------------------------------------------------------------

/// Something that can run one deployment pass. Implemented by
/// [`SyncOrchestrator`]; tests substitute scripted runners.
pub trait PassRunner: Send + Sync + 'static {
    fn run_pass(&self, mode: PassMode) -> Result<PassReport, SyncError>;
}

impl PassRunner for SyncOrchestrator {
    fn run_pass(&self, mode: PassMode) -> Result<PassReport, SyncError> {
        SyncOrchestrator::run_pass(self, mode)
    }
}

// ---------------------------------------------------------------------------
// Retry bound
// ---------------------------------------------------------------------------

/// Consecutive raised failures, reset by any pass that returns a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryCounter {
    max_retry: u32,
    consecutive: u32,
}

impl RetryCounter {
    pub fn new(max_retry: u32) -> Self {
        Self {
            max_retry,
            consecutive: 0,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Count a failed pass. Returns `true` once `max_retry` further attempts
    /// after the first failure have also failed.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive > self.max_retry
    }
}

/// Why the pass loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LoopExit {
    /// Ctrl-C or a `stop` request.
    Stopped,
    RetryLimitReached { failures: u32, last_error: String },
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Payload of the `status` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub label: String,
    pub started_at_unix: u64,
    pub passes: u64,
    pub last_pass_at_unix: Option<u64>,
    pub last_commit: Option<String>,
    pub last_failures: usize,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub socket: String,
}

type SharedStatus = Arc<RwLock<DaemonStatus>>;

struct PassJob {
    mode: PassMode,
    respond_to: oneshot::Sender<Result<PassReport, String>>,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Load the config under `home`, start the runtime and block until it exits.
pub fn start_blocking(home: &Path) -> Result<LoopExit, DaemonError> {
    let config = config::load_at(home)?;
    start_blocking_with_config(home, config)
}

/// Same as [`start_blocking`] with an already loaded config.
pub fn start_blocking_with_config(home: &Path, config: Config) -> Result<LoopExit, DaemonError> {
    init_tracing();
    let poll = config.poll.clone();
    let orchestrator = SyncOrchestrator::from_config(config);
    orchestrator.check()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), Arc::new(orchestrator), poll))
}

/// Run the poll loop, the control socket and the signal handler until one of
/// them ends the daemon.
pub async fn run(
    home: PathBuf,
    runner: Arc<dyn PassRunner>,
    poll: PollSettings,
) -> Result<LoopExit, DaemonError> {
    let socket = socket_path(&home);
    let status: SharedStatus = Arc::new(RwLock::new(DaemonStatus {
        running: true,
        label: crate::paths::DAEMON_LABEL.to_string(),
        started_at_unix: unix_seconds_now(),
        socket: socket.display().to_string(),
        ..DaemonStatus::default()
    }));

    let (job_tx, job_rx) = mpsc::channel::<PassJob>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    // Bind before the first pass so a second daemon fails fast.
    let listener = bind_socket(&socket)?;

    let loop_handle = {
        let shutdown = shutdown_tx.clone();
        let status = status.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = pass_loop(runner, poll, status, job_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let status = status.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result =
                socket_server_task(listener, socket, status, job_tx, shutdown.clone(), shutdown_rx)
                    .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
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

    let (loop_result, socket_result, signal_result) =
        tokio::join!(loop_handle, socket_handle, signal_handle);

    let exit = handle_join("pass_loop", loop_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    status.write().await.running = false;
    Ok(exit)
}

// ---------------------------------------------------------------------------
// Pass loop
// ---------------------------------------------------------------------------

/// One pass per poll interval (the first immediately) plus passes requested
/// over the socket, strictly one at a time.
async fn pass_loop(
    runner: Arc<dyn PassRunner>,
    poll: PollSettings,
    status: SharedStatus,
    mut jobs: mpsc::Receiver<PassJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<LoopExit, DaemonError> {
    let mut counter = RetryCounter::new(poll.max_retry);
    let mut interval = tokio::time::interval(Duration::from_secs(poll.interval_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let (mode, trigger, respond_to) = tokio::select! {
            _ = shutdown_rx.recv() => return Ok(LoopExit::Stopped),
            _ = interval.tick() => (PassMode::Execute, "poll", None),
            job = jobs.recv() => match job {
                Some(job) => (job.mode, "socket", Some(job.respond_to)),
                None => return Ok(LoopExit::Stopped),
            },
        };

        let started = Instant::now();
        let result = run_pass_blocking(runner.clone(), mode).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut exhausted = None;
        {
            let mut status = status.write().await;
            status.passes += 1;
            status.last_pass_at_unix = Some(unix_seconds_now());
            match &result {
                Ok(report) => {
                    counter.record_success();
                    status.last_commit = Some(report.commit_id.clone());
                    status.last_failures = report.failures.len();
                    status.last_error = None;
                    tracing::info!(
                        trigger,
                        commit = %report.commit_id,
                        files = report.outcomes.len(),
                        failures = report.failures.len(),
                        elapsed_ms,
                        "pass completed",
                    );
                }
                Err(err) => {
                    let limit_reached = counter.record_failure();
                    status.last_error = Some(err.to_string());
                    tracing::error!(
                        trigger,
                        error = %err,
                        infrastructure = err.is_infrastructure(),
                        consecutive = counter.consecutive(),
                        max_retry = poll.max_retry,
                        "pass failed",
                    );
                    if limit_reached {
                        exhausted = Some(err.to_string());
                    }
                }
            }
            status.consecutive_failures = counter.consecutive();
        }

        if let Some(respond_to) = respond_to {
            let _ = respond_to.send(result.map_err(|err| err.to_string()));
        }

        if let Some(last_error) = exhausted {
            tracing::error!(
                failures = counter.consecutive(),
                "giving up after {} consecutive failed passes",
                counter.consecutive(),
            );
            return Ok(LoopExit::RetryLimitReached {
                failures: counter.consecutive(),
                last_error,
            });
        }
    }
}

async fn run_pass_blocking(
    runner: Arc<dyn PassRunner>,
    mode: PassMode,
) -> Result<Result<PassReport, SyncError>, DaemonError> {
    tokio::task::spawn_blocking(move || runner.run_pass(mode))
        .await
        .map_err(|err| DaemonError::Protocol(format!("pass task join error: {err}")))
}

// ---------------------------------------------------------------------------
// Control socket
// ---------------------------------------------------------------------------

fn bind_socket(socket: &Path) -> Result<UnixListener, DaemonError> {
    if let Some(dir) = socket.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
    }
    prepare_socket_for_bind(socket)?;
    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    set_socket_permissions(socket)?;
    Ok(listener)
}

async fn socket_server_task(
    listener: UnixListener,
    socket: PathBuf,
    status: SharedStatus,
    job_tx: mpsc::Sender<PassJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let status = status.clone();
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, status, job_tx, shutdown_tx).await {
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

async fn handle_socket_client(
    stream: UnixStream,
    status: SharedStatus,
    job_tx: mpsc::Sender<PassJob>,
    shutdown_tx: broadcast::Sender<()>,
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

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request {
            DaemonRequest::Status => {
                let snapshot = status.read().await.clone();
                DaemonResponse::ok(json!(snapshot))
            }
            DaemonRequest::Sync { mode } => match enqueue_pass(&job_tx, mode).await {
                Ok(report) => DaemonResponse::ok(json!(report)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            DaemonRequest::Stop => DaemonResponse::ok(json!({ "stopping": true })),
        };

        write_response(&mut writer, &response).await?;
        if request == DaemonRequest::Stop {
            // Reply first so the caller sees the acknowledgement.
            let _ = shutdown_tx.send(());
            break;
        }
    }

    Ok(())
}

async fn enqueue_pass(
    job_tx: &mpsc::Sender<PassJob>,
    mode: PassMode,
) -> Result<PassReport, DaemonError> {
    let (tx, rx) = oneshot::channel();
    job_tx
        .send(PassJob {
            mode,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("pass queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("pass response"))?;
    outcome.map_err(DaemonError::Protocol)
}

/// Refuse to bind over a live daemon; clear a stale socket file otherwise.
fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::AlreadyRunning {
                socket: socket.to_path_buf(),
            });
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

fn handle_join<T>(
    task: &str,
    result: Result<Result<T, DaemonError>, tokio::task::JoinError>,
) -> Result<T, DaemonError> {
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

/// Install the fmt subscriber on stderr (`RUST_LOG`, default `info`).
/// Records from the `log` facade used by the library crates are bridged in.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
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

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use deploydb_core::SourceError;
    use tempfile::TempDir;

    use super::*;

    /// Plays back scripted pass results; once the script is exhausted every
    /// pass succeeds.
    struct ScriptedRunner {
        script: Mutex<VecDeque<bool>>,
        calls: Mutex<u32>,
    }

    impl ScriptedRunner {
        fn new(script: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                calls: Mutex::new(0),
            })
        }

        fn always_failing(passes: usize) -> Arc<Self> {
            Self::new(&vec![false; passes])
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl PassRunner for ScriptedRunner {
        fn run_pass(&self, _mode: PassMode) -> Result<PassReport, SyncError> {
            *self.calls.lock().unwrap() += 1;
            let ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
            if ok {
                return Ok(report("c1"));
            }
            Err(SyncError::Source(SourceError::CommandFailed {
                command: "git pull".to_string(),
                status: "exit status: 128".to_string(),
                stderr: "could not resolve host".to_string(),
            }))
        }
    }

    fn report(commit: &str) -> PassReport {
        PassReport {
            commit_id: commit.to_string(),
            previous_commit: None,
            changes_detected: false,
            had_failures: false,
            failures: Vec::new(),
            outcomes: Vec::new(),
            pointer_advanced: false,
        }
    }

    fn poll(max_retry: u32) -> PollSettings {
        PollSettings {
            interval_secs: 60,
            max_retry,
        }
    }

    fn status() -> SharedStatus {
        Arc::new(RwLock::new(DaemonStatus::default()))
    }

    #[test]
    fn retry_counter_trips_after_max_retry_further_failures() {
        let mut counter = RetryCounter::new(2);
        assert!(!counter.record_failure());
        assert!(!counter.record_failure());
        assert!(counter.record_failure());
        assert_eq!(counter.consecutive(), 3);
    }

    #[test]
    fn retry_counter_resets_on_success() {
        let mut counter = RetryCounter::new(1);
        assert!(!counter.record_failure());
        counter.record_success();
        assert_eq!(counter.consecutive(), 0);
        assert!(!counter.record_failure());
        assert!(counter.record_failure());
    }

    #[test]
    fn zero_max_retry_stops_on_first_failure() {
        let mut counter = RetryCounter::new(0);
        assert!(counter.record_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_gives_up_after_bounded_retries() {
        let runner = ScriptedRunner::always_failing(10);
        let (_job_tx, job_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = status();

        let exit = pass_loop(
            runner.clone(),
            poll(2),
            state.clone(),
            job_rx,
            shutdown_tx.subscribe(),
        )
        .await
        .expect("loop");

        match exit {
            LoopExit::RetryLimitReached {
                failures,
                last_error,
            } => {
                assert_eq!(failures, 3);
                assert!(last_error.contains("could not resolve host"));
            }
            other => panic!("expected retry limit, got {other:?}"),
        }
        assert_eq!(runner.calls(), 3, "first attempt plus max_retry retries");
        assert_eq!(state.read().await.consecutive_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_streak() {
        // Three failures in total, never two in a row until the end.
        let runner = ScriptedRunner::new(&[false, true, false, true, false, false]);
        let (_job_tx, job_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = broadcast::channel(1);

        let exit = pass_loop(runner.clone(), poll(1), status(), job_rx, shutdown_tx.subscribe())
            .await
            .expect("loop");

        assert!(matches!(exit, LoopExit::RetryLimitReached { failures: 2, .. }));
        assert_eq!(runner.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop_between_passes() {
        let runner = ScriptedRunner::new(&[]);
        let (_job_tx, job_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = status();

        let handle = tokio::spawn(pass_loop(
            runner.clone(),
            poll(5),
            state.clone(),
            job_rx,
            shutdown_tx.subscribe(),
        ));
        // Let the immediate first pass finish.
        while state.read().await.passes == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown_tx.send(()).expect("send shutdown");

        let exit = handle.await.expect("join").expect("loop");
        assert_eq!(exit, LoopExit::Stopped);
        assert_eq!(state.read().await.last_commit.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn requested_pass_reports_back_through_the_job_channel() {
        let runner = ScriptedRunner::new(&[]);
        let (job_tx, job_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = tokio::spawn(pass_loop(
            runner.clone(),
            poll(5),
            status(),
            job_rx,
            shutdown_tx.subscribe(),
        ));

        let report = enqueue_pass(&job_tx, PassMode::DryRun).await.expect("pass");
        assert_eq!(report.commit_id, "c1");

        shutdown_tx.send(()).expect("send shutdown");
        handle.await.expect("join").expect("loop");
        assert!(runner.calls() >= 1);
    }

    #[test]
    fn live_socket_blocks_a_second_daemon() {
        let home = TempDir::new().expect("home");
        let socket = socket_path(home.path());
        fs::create_dir_all(socket.parent().unwrap()).unwrap();
        let _live = std::os::unix::net::UnixListener::bind(&socket).expect("bind");

        let err = prepare_socket_for_bind(&socket).unwrap_err();
        assert!(matches!(err, DaemonError::AlreadyRunning { .. }), "got {err}");
    }

    #[test]
    fn stale_socket_file_is_removed() {
        let home = TempDir::new().expect("home");
        let socket = socket_path(home.path());
        fs::create_dir_all(socket.parent().unwrap()).unwrap();
        {
            let _listener = std::os::unix::net::UnixListener::bind(&socket).expect("bind");
        }
        assert!(socket.exists(), "dropped listener leaves its file behind");

        prepare_socket_for_bind(&socket).expect("prepare");
        assert!(!socket.exists());
    }
}
