//! One-shot chatlog CLI invocations
//!
//! Walks the same candidate chain as the supervisor and runs a single
//! subcommand to completion, capturing output. Missing files and spawn
//! errors move on to the next candidate; exhausting every candidate falls
//! back exactly once to running the backend from source, whose outcome is
//! final.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tauri::{AppHandle, Manager};
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::locator;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("{0}")]
    Tool(String),
}

impl Serialize for RunnerError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Captured result of one CLI invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    fn from_output(output: Output) -> Self {
        Self {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `args` against the first candidate that spawns. Returns `None` when
/// every candidate is missing or fails to spawn.
pub fn run_with_candidates(
    candidates: &[PathBuf],
    args: &[String],
    cwd: &Path,
) -> Option<ToolOutput> {
    for bin in candidates {
        if !bin.exists() {
            continue;
        }
        match Command::new(bin)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()
        {
            Ok(output) => {
                debug!(bin = %bin.display(), code = ?output.status.code(), "chatlog CLI finished");
                return Some(ToolOutput::from_output(output));
            }
            Err(err) => {
                warn!(bin = %bin.display(), error = %err, "chatlog CLI candidate failed to spawn")
            }
        }
    }
    None
}

/// Final fallback: run the backend CLI from source in the repo root.
fn run_from_source(args: &[String], cwd: &Path) -> ToolOutput {
    let go = if cfg!(target_os = "windows") { "go.exe" } else { "go" };
    match Command::new(go)
        .arg("run")
        .arg(".")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
    {
        Ok(output) => ToolOutput::from_output(output),
        Err(err) => ToolOutput {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("go run fallback failed: {err}"),
        },
    }
}

/// Run one chatlog subcommand, trying every known binary location first.
pub fn run_tool(app: Option<&AppHandle>, args: &[String]) -> ToolOutput {
    let candidates = locator::candidate_list(app);
    let cwd = app
        .and_then(|a| a.path().resource_dir().ok())
        .unwrap_or_else(locator::repo_root);
    match run_with_candidates(&candidates, args, &cwd) {
        Some(output) => output,
        None => {
            warn!("No backend binary candidate spawned, running from source");
            run_from_source(args, &cwd)
        }
    }
}

fn finish(output: ToolOutput) -> Result<String, RunnerError> {
    if output.success() {
        Ok(output.stdout.trim().to_string())
    } else {
        let detail = if output.stderr.is_empty() {
            output.stdout
        } else {
            output.stderr
        };
        Err(RunnerError::Tool(detail))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecryptRequest {
    pub platform: Option<String>,
    pub version: Option<i64>,
    pub data_dir: Option<String>,
    pub data_key: Option<String>,
    pub work_dir: Option<String>,
}

// ============ TAURI COMMANDS ============

#[tauri::command]
pub async fn op_get_data_key(
    app: AppHandle,
    pid: Option<u32>,
    force: Option<bool>,
    show_xor_key: Option<bool>,
) -> Result<String, RunnerError> {
    let mut args = vec!["key".to_string()];
    if let Some(pid) = pid {
        args.push("--pid".to_string());
        args.push(pid.to_string());
    }
    if force.unwrap_or(false) {
        args.push("--force".to_string());
    }
    if show_xor_key.unwrap_or(false) {
        args.push("--xor-key".to_string());
    }

    let output = tauri::async_runtime::spawn_blocking(move || run_tool(Some(&app), &args))
        .await
        .map_err(|err| RunnerError::Tool(err.to_string()))?;
    finish(output)
}

#[tauri::command]
pub async fn op_decrypt(app: AppHandle, payload: DecryptRequest) -> Result<String, RunnerError> {
    let mut args = vec!["decrypt".to_string()];
    if let Some(platform) = payload.platform.filter(|s| !s.is_empty()) {
        args.push("--platform".to_string());
        args.push(platform);
    }
    if let Some(version) = payload.version.filter(|v| *v > 0) {
        args.push("--version".to_string());
        args.push(version.to_string());
    }
    if let Some(dir) = payload.data_dir.filter(|s| !s.is_empty()) {
        args.push("--data-dir".to_string());
        args.push(dir);
    }
    if let Some(key) = payload.data_key.filter(|s| !s.is_empty()) {
        args.push("--data-key".to_string());
        args.push(key);
    }
    if let Some(dir) = payload.work_dir.filter(|s| !s.is_empty()) {
        args.push("--work-dir".to_string());
        args.push(dir);
    }

    let output = tauri::async_runtime::spawn_blocking(move || run_tool(Some(&app), &args))
        .await
        .map_err(|err| RunnerError::Tool(err.to_string()))?;
    finish(output)
}
