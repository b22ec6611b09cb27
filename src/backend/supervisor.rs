//! Backend process lifecycle
//!
//! Owns the single long-lived `chatlog server` process: start (stop any
//! previous instance, spawn, mirror output, wait for health), stop
//! (graceful termination racing a timer, then an unconditional kill), and
//! exit-driven state reset. At most one backend process exists at a time;
//! start/stop transitions are serialized.

use parking_lot::Mutex;
use serde::Serialize;
use std::env;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tauri::{AppHandle, Manager, State};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backend::{detect, locator};
use crate::config::{ConfigStore, ServerConfig};
use crate::logging;

/// Address the backend listens on unless configured otherwise.
pub const DEFAULT_ADDR: &str = "127.0.0.1:5030";
/// Environment variable the backend reads its listen address from.
pub const ADDR_ENV: &str = "CHATLOG_HTTP_ADDR";
/// Placeholder written by first-run setup; never a real decryption key.
const PLACEHOLDER_DATA_KEY: &str = "default-key-for-initial-setup";

const HEALTH_TIMEOUT: Duration = Duration::from_millis(30_000);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);
const STOP_GRACE: Duration = Duration::from_millis(1_500);
const STOP_GRACE_FORCED: Duration = Duration::from_millis(200);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to spawn backend: {0}")]
    Spawn(String),
    #[error("Backend did not become healthy within {0} ms")]
    HealthTimeout(u128),
}

impl Serialize for BackendError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStateInfo {
    pub running: bool,
    pub addr: String,
}

/// Supervises the single backend process. Constructed once in `main` and
/// placed in Tauri managed state; the child handle never leaves it.
pub struct Supervisor {
    child: Arc<Mutex<Option<Child>>>,
    log_path: Mutex<Option<PathBuf>>,
    /// Serializes start/stop transitions so two callers can never race to
    /// kill or replace the same process.
    transition: tokio::sync::Mutex<()>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            child: Arc::new(Mutex::new(None)),
            log_path: Mutex::new(None),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.child.lock().is_some()
    }

    /// Start (or restart) the backend with `overrides` merged into the
    /// stored configuration, then block until the health endpoint responds
    /// or the 30-second startup window elapses.
    pub async fn start(
        &self,
        app: &AppHandle,
        store: &ConfigStore,
        overrides: ServerConfig,
    ) -> Result<(), BackendError> {
        let _transition = self.transition.lock().await;

        let cfg = prepare_config(store, overrides);
        let addr = cfg.addr.clone().unwrap_or_else(|| DEFAULT_ADDR.to_string());

        self.stop_inner(false).await;

        let args = build_server_args(&cfg);
        let bin = locator::resolve_bin(Some(app));
        let cwd = app
            .path()
            .resource_dir()
            .unwrap_or_else(|_| locator::repo_root());
        let log_path = logging::server_log_path(app);
        *self.log_path.lock() = Some(log_path.clone());

        info!(
            bin = %bin.as_deref().unwrap_or_else(|| Path::new("<none>")).display(),
            cwd = %cwd.display(),
            "Starting backend: chatlog {}",
            args.join(" ")
        );

        let mut child = spawn_backend(bin.as_deref(), &args, &cwd, &addr)?;
        let pid = child.id();
        if let Some(stdout) = child.stdout.take() {
            mirror_stream(stdout, log_path.clone(), false);
        }
        if let Some(stderr) = child.stderr.take() {
            mirror_stream(stderr, log_path.clone(), true);
        }
        *self.child.lock() = Some(child);
        watch_exit(Arc::clone(&self.child), pid, log_path);

        wait_for_health(&addr).await
    }

    /// Idempotent stop. `force` shortens the grace period (application
    /// quit). Never errors.
    pub async fn stop(&self, force: bool) {
        let _transition = self.transition.lock().await;
        self.stop_inner(force).await;
    }

    /// Stop without taking the transition lock; callers hold it already.
    /// The handle is taken out of the slot before any termination wait, so
    /// concurrent observers see "stopped" immediately.
    async fn stop_inner(&self, force: bool) {
        let Some(child) = self.child.lock().take() else {
            return;
        };
        let pid = child.id();
        let grace = if force { STOP_GRACE_FORCED } else { STOP_GRACE };
        info!(pid, force, "Stopping backend");
        let log_path = self.log_path.lock().clone();
        let _ = tokio::task::spawn_blocking(move || terminate_gracefully(child, grace, log_path))
            .await;
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge overrides into the stored configuration, auto-detect a missing
/// data directory, pin the listen address, and persist the result.
fn prepare_config(store: &ConfigStore, overrides: ServerConfig) -> ServerConfig {
    let mut cfg = store.server();
    cfg.merge(overrides);

    if cfg.data_dir.as_deref().map_or(true, str::is_empty) {
        if let Some(dir) = detect::detect_wechat_data_dir() {
            cfg.data_dir = Some(dir.to_string_lossy().into_owned());
        }
    }

    let addr = cfg
        .addr
        .clone()
        .filter(|a| !a.is_empty())
        .or_else(|| env::var(ADDR_ENV).ok().filter(|a| !a.is_empty()))
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    cfg.addr = Some(addr);

    store.update_server(cfg)
}

fn default_platform() -> String {
    if cfg!(target_os = "macos") {
        "darwin".to_string()
    } else if cfg!(target_os = "windows") {
        "windows".to_string()
    } else {
        String::new()
    }
}

/// Deterministic argument list for `chatlog server`. The placeholder key
/// from first-run setup must not reach the backend, and `--auto-decrypt`
/// always comes last so the backend acquires keys on its own.
pub fn build_server_args(cfg: &ServerConfig) -> Vec<String> {
    let mut args = vec!["server".to_string()];
    let platform = cfg
        .platform
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(default_platform);
    let version = match cfg.version {
        Some(v) if v > 0 => v,
        _ => 3,
    };

    if let Some(addr) = cfg.addr.as_deref().filter(|s| !s.is_empty()) {
        args.push("--addr".to_string());
        args.push(addr.to_string());
    }
    if let Some(dir) = cfg.data_dir.as_deref().filter(|s| !s.is_empty()) {
        args.push("--data-dir".to_string());
        args.push(dir.to_string());
    }
    if let Some(key) = cfg
        .data_key
        .as_deref()
        .filter(|k| !k.is_empty() && *k != PLACEHOLDER_DATA_KEY)
    {
        args.push("--data-key".to_string());
        args.push(key.to_string());
    }
    if let Some(key) = cfg.img_key.as_deref().filter(|s| !s.is_empty()) {
        args.push("--img-key".to_string());
        args.push(key.to_string());
    }
    if let Some(dir) = cfg.work_dir.as_deref().filter(|s| !s.is_empty()) {
        args.push("--work-dir".to_string());
        args.push(dir.to_string());
    }
    if !platform.is_empty() {
        args.push("--platform".to_string());
        args.push(platform);
    }
    args.push("--version".to_string());
    args.push(version.to_string());
    args.push("--auto-decrypt".to_string());
    args
}

fn backend_command(program: &OsStr, args: &[String], cwd: &Path, addr: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .env(ADDR_ENV, addr)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// Spawn the resolved binary, falling back to running the backend from
/// source when no binary exists or the spawn itself fails (unpackaged
/// development environments).
fn spawn_backend(
    bin: Option<&Path>,
    args: &[String],
    cwd: &Path,
    addr: &str,
) -> Result<Child, BackendError> {
    if let Some(bin) = bin {
        match backend_command(bin.as_os_str(), args, cwd, addr).spawn() {
            Ok(child) => return Ok(child),
            Err(err) => {
                warn!(bin = %bin.display(), error = %err, "Backend binary failed to spawn, falling back to go run");
            }
        }
    } else {
        warn!("No backend binary found, falling back to go run");
    }

    let go = if cfg!(target_os = "windows") { "go.exe" } else { "go" };
    let mut full_args: Vec<String> = vec!["run".to_string(), ".".to_string()];
    full_args.extend(args.iter().cloned());
    backend_command(OsStr::new(go), &full_args, cwd, addr)
        .spawn()
        .map_err(|err| BackendError::Spawn(format!("go run fallback failed: {err}")))
}

/// Mirror one backend stream line-wise to our own stdout/stderr (prefixed
/// for identification) and the append-only log file.
fn mirror_stream<R: Read + Send + 'static>(stream: R, log_path: PathBuf, to_stderr: bool) {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if to_stderr {
                eprintln!("[server] {line}");
            } else {
                println!("[server] {line}");
            }
            let _ = logging::append_server_log(&log_path, &format!("{line}\n"));
        }
    });
}

/// Exit bookkeeping: when the process identified by `pid` exits on its own,
/// clear the live handle and append an exit record. This is the only crash
/// detection; there is no automatic restart.
fn watch_exit(slot: Arc<Mutex<Option<Child>>>, pid: u32, log_path: PathBuf) {
    thread::spawn(move || loop {
        {
            let mut guard = slot.lock();
            match guard.as_mut() {
                Some(child) if child.id() == pid => match child.try_wait() {
                    Ok(Some(status)) => {
                        *guard = None;
                        record_exit(Some(log_path.as_path()), pid, &status);
                        return;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        error!(pid, error = %err, "Failed to poll backend process");
                        return;
                    }
                },
                // Stopped or replaced by a newer start; nothing to watch.
                _ => return,
            }
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    });
}

fn exit_record(status: &ExitStatus) -> String {
    let code = status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "null".to_string());
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status
            .signal()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "null".to_string())
    };
    #[cfg(not(unix))]
    let signal = "null".to_string();
    format!("\n[server] exited code={code} signal={signal}\n")
}

fn record_exit(log_path: Option<&Path>, pid: u32, status: &ExitStatus) {
    info!(pid, code = ?status.code(), "Backend exited");
    let Some(path) = log_path else { return };
    let _ = logging::append_server_log(path, &exit_record(status));
}

/// Request graceful termination, wait out the grace period, then kill.
#[cfg(unix)]
fn terminate_gracefully(mut child: Child, grace: Duration, log_path: Option<PathBuf>) -> bool {
    let pid = child.id();
    let _ = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                record_exit(log_path.as_deref(), pid, &status);
                return true;
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
            _ => break,
        }
    }

    warn!(pid, grace_ms = grace.as_millis() as u64, "Graceful stop timed out, killing");
    let _ = child.kill();
    if let Ok(status) = child.wait() {
        record_exit(log_path.as_deref(), pid, &status);
    }
    true
}

#[cfg(not(unix))]
fn terminate_gracefully(mut child: Child, _grace: Duration, log_path: Option<PathBuf>) -> bool {
    let pid = child.id();
    let _ = child.kill();
    if let Ok(status) = child.wait() {
        record_exit(log_path.as_deref(), pid, &status);
    }
    true
}

/// Poll the health endpoint until it responds or the startup window closes.
/// Any HTTP response counts as healthy; only connection failures mean the
/// server is not up yet. On timeout the process is intentionally left
/// running so a slow first decrypt pass can still finish and manual
/// recovery stays possible.
async fn wait_for_health(addr: &str) -> Result<(), BackendError> {
    let url = format!("http://{addr}/health");
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(2))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    let deadline = Instant::now() + HEALTH_TIMEOUT;
    let mut attempt = 0u32;
    while Instant::now() < deadline {
        attempt += 1;
        match client
            .get(&url)
            .timeout(Duration::from_secs(1))
            .send()
            .await
        {
            Ok(resp) => {
                debug!(status = %resp.status(), attempt, "Backend health probe responded");
                info!(attempt, "Backend healthy");
                return Ok(());
            }
            Err(err) => debug!(attempt, error = %err, "Backend health probe failed"),
        }
        tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
    }

    error!("Backend health check timed out");
    Err(BackendError::HealthTimeout(HEALTH_TIMEOUT.as_millis()))
}

/// Launch-time start attempt; failures are logged and swallowed so the
/// window still opens and the UI can retry from settings.
pub fn start_on_launch(app: &AppHandle) {
    let app = app.clone();
    tauri::async_runtime::spawn(async move {
        let store = app.state::<ConfigStore>();
        let cfg = store.get();
        if cfg.use_external.unwrap_or(false) || !cfg.start_on_launch.unwrap_or(true) {
            info!("Backend auto-start skipped by configuration");
            return;
        }
        let supervisor = app.state::<Supervisor>();
        if let Err(err) = supervisor.start(&app, &store, ServerConfig::default()).await {
            warn!(error = %err, "Backend failed to auto-start");
        }
    });
}

// ============ TAURI COMMANDS ============

#[tauri::command]
pub fn backend_get_state(
    supervisor: State<'_, Supervisor>,
    store: State<'_, ConfigStore>,
) -> BackendStateInfo {
    let addr = store
        .server()
        .addr
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    BackendStateInfo {
        running: supervisor.is_running(),
        addr,
    }
}

#[tauri::command]
pub async fn backend_start(
    app: AppHandle,
    supervisor: State<'_, Supervisor>,
    store: State<'_, ConfigStore>,
    cfg: Option<ServerConfig>,
) -> Result<(), BackendError> {
    let overrides = cfg.unwrap_or_default();
    if store.get().use_external.unwrap_or(false) {
        // External backend: record the configuration, spawn nothing.
        store.update_server(overrides);
        return Ok(());
    }
    supervisor.start(&app, &store, overrides).await
}

#[tauri::command]
pub async fn backend_stop(
    supervisor: State<'_, Supervisor>,
    store: State<'_, ConfigStore>,
) -> Result<(), BackendError> {
    if !store.get().use_external.unwrap_or(false) {
        supervisor.stop(true).await;
    }
    Ok(())
}
