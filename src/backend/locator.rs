//! Backend executable discovery
//!
//! Ordered search over the known locations of the `chatlog` binary:
//! environment override, packaged resources, then repository-relative build
//! outputs. Absence is a valid outcome; callers fall back to running the
//! backend from source.

use std::env;
use std::path::{Path, PathBuf};
use tauri::{AppHandle, Manager};
use tracing::debug;

/// Environment override for the backend binary location.
pub const BIN_ENV: &str = "CHATLOG_BIN";

pub fn bin_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "chatlog.exe"
    } else {
        "chatlog"
    }
}

/// Repository root when running unpackaged; the crate lives two levels
/// below it (`packages/chatlog-desktop`).
pub fn repo_root() -> PathBuf {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest
        .ancestors()
        .nth(2)
        .map(Path::to_path_buf)
        .unwrap_or(manifest)
}

/// First packaged-resource location of the backend binary that exists on
/// disk. Some packagers emit a `chatlog/` folder, others a plain file.
pub fn resolve_bundled_bin(app: Option<&AppHandle>) -> Option<PathBuf> {
    let resource_dir = app?.path().resource_dir().ok()?;
    let candidates = [
        resource_dir.join("chatlog").join("chatlog"),
        resource_dir.join("chatlog"),
        resource_dir.join("Resources").join("chatlog"),
    ];
    candidates.into_iter().find(|p| p.exists())
}

/// Ordered candidate list, filtered to paths that exist, order preserved.
/// An empty result means "no executable found" and is not an error.
pub fn candidate_list(app: Option<&AppHandle>) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(over) = env::var_os(BIN_ENV) {
        if !over.is_empty() {
            candidates.push(PathBuf::from(over));
        }
    }
    if let Some(bundled) = resolve_bundled_bin(app) {
        candidates.push(bundled);
    }
    let root = repo_root();
    candidates.push(root.join("packages").join("chatlog_macos").join("chatlog"));
    candidates.push(root.join("bin").join(bin_name()));

    let survivors = existing_only(candidates);
    debug!(candidates = survivors.len(), "Backend binary candidates");
    survivors
}

/// The chosen executable: the first surviving candidate.
pub fn resolve_bin(app: Option<&AppHandle>) -> Option<PathBuf> {
    candidate_list(app).into_iter().next()
}

fn existing_only(candidates: Vec<PathBuf>) -> Vec<PathBuf> {
    candidates.into_iter().filter(|p| p.exists()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn search_selects_the_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("chatlog");
        fs::write(&existing, b"").unwrap();

        let survivors = existing_only(vec![
            dir.path().join("missing-one"),
            dir.path().join("missing-two"),
            existing.clone(),
        ]);
        assert_eq!(survivors, vec![existing]);
    }

    #[test]
    fn all_missing_candidates_survive_as_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let survivors = existing_only(vec![dir.path().join("a"), dir.path().join("b")]);
        assert!(survivors.is_empty());
    }

    #[test]
    fn order_is_preserved_among_survivors() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        fs::write(&first, b"").unwrap();
        fs::write(&second, b"").unwrap();

        let survivors = existing_only(vec![second.clone(), dir.path().join("gone"), first.clone()]);
        assert_eq!(survivors, vec![second, first]);
    }
}
