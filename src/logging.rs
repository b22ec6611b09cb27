//! Desktop-side logging
//!
//! `tracing` carries the desktop shell's own diagnostics; the supervised
//! backend's output is additionally mirrored to an append-only plain-text
//! log file under the per-user app data directory. Log-file writes return
//! `io::Result` and are discarded at every call site: log I/O must never
//! take the supervisor down.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tauri::{AppHandle, Manager};
use tracing_subscriber::EnvFilter;

/// Backend log file name under the per-user app data directory.
pub const SERVER_LOG_FILE: &str = "chatlog-server.log";

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Per-user app data directory, with a `dirs` fallback for the rare case
/// Tauri cannot resolve one.
pub fn app_data_dir(app: &AppHandle) -> PathBuf {
    app.path().app_data_dir().unwrap_or_else(|_| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chatlog-desktop")
    })
}

pub fn server_log_path(app: &AppHandle) -> PathBuf {
    app_data_dir(app).join(SERVER_LOG_FILE)
}

/// Append raw text to the backend log, creating the directory on demand.
pub fn append_server_log(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerLog {
    pub content: String,
    pub size: u64,
    pub mtime: u64,
    pub path: String,
}

// ============ TAURI COMMANDS ============

#[tauri::command]
pub fn logs_read(app: AppHandle) -> ServerLog {
    let path = server_log_path(&app);
    let content = fs::read_to_string(&path).unwrap_or_default();
    let meta = fs::metadata(&path).ok();
    let size = meta.as_ref().map(|m| m.len()).unwrap_or(0);
    let mtime = meta
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    ServerLog {
        content,
        size,
        mtime,
        path: path.display().to_string(),
    }
}

#[tauri::command]
pub fn logs_clear(app: AppHandle) {
    let _ = fs::write(server_log_path(&app), "");
}
