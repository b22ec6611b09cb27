//! WeChat data-directory auto-detection
//!
//! Probes a fixed, ordered list of well-known install locations for the two
//! supported platform families. Detection never fails; an unrecognized
//! layout just yields `None` and the backend is started without a data dir.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Version directory used by current macOS WeChat builds.
const DARWIN_VERSION_DIR: &str = "2.0b4.0.9";

/// Probe one macOS-style base: newer builds keep user data in a
/// 32-character account directory under the version directory, older ones
/// put `Message` directly inside it.
fn scan_darwin_base(base: &Path) -> Option<PathBuf> {
    let version_dir = base.join(DARWIN_VERSION_DIR);
    if !version_dir.is_dir() {
        return None;
    }
    let mut accounts: Vec<PathBuf> = fs::read_dir(&version_dir)
        .ok()?
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().len() == 32)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    accounts.sort();
    if let Some(first) = accounts.into_iter().next() {
        return Some(first);
    }
    if version_dir.join("Message").exists() {
        return Some(version_dir);
    }
    None
}

/// Probe one Windows-style base: `wxid_*` account directories, else a
/// `Message` directory directly under the base.
fn scan_windows_base(base: &Path) -> Option<PathBuf> {
    if !base.is_dir() {
        return None;
    }
    let mut accounts: Vec<PathBuf> = fs::read_dir(base)
        .ok()?
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().contains("wxid_"))
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    accounts.sort();
    if let Some(first) = accounts.into_iter().next() {
        return Some(first);
    }
    if base.join("Message").exists() {
        return Some(base.to_path_buf());
    }
    None
}

fn darwin_bases() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    vec![
        home.join("Library/Containers/com.tencent.xinWeChat/Data/Library/Application Support/com.tencent.xinWeChat"),
        home.join("Library/Application Support/com.tencent.xinWeChat"),
        home.join("Documents/WeChat Files"),
    ]
}

fn windows_bases() -> Vec<PathBuf> {
    let mut bases = Vec::new();
    if let Some(home) = dirs::home_dir() {
        bases.push(home.join("Documents").join("WeChat Files"));
        bases.push(home.join("AppData").join("Roaming").join("Tencent").join("WeChat"));
    }
    bases.push(PathBuf::from(r"C:\Program Files (x86)\Tencent\WeChat"));
    bases.push(PathBuf::from(r"C:\Program Files\Tencent\WeChat"));
    bases
}

/// Auto-detect the WeChat data directory for the current platform.
pub fn detect_wechat_data_dir() -> Option<PathBuf> {
    let found = if cfg!(target_os = "macos") {
        darwin_bases().iter().find_map(|base| scan_darwin_base(base))
    } else if cfg!(target_os = "windows") {
        windows_bases().iter().find_map(|base| scan_windows_base(base))
    } else {
        None
    };
    if let Some(dir) = &found {
        info!(dir = %dir.display(), "Auto-detected WeChat data directory");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT_ID: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn darwin_scan_prefers_account_directory() {
        let dir = tempfile::tempdir().unwrap();
        let account = dir.path().join(DARWIN_VERSION_DIR).join(ACCOUNT_ID);
        fs::create_dir_all(&account).unwrap();

        assert_eq!(scan_darwin_base(dir.path()), Some(account));
    }

    #[test]
    fn darwin_scan_falls_back_to_message_layout() {
        let dir = tempfile::tempdir().unwrap();
        let version_dir = dir.path().join(DARWIN_VERSION_DIR);
        fs::create_dir_all(version_dir.join("Message")).unwrap();

        assert_eq!(scan_darwin_base(dir.path()), Some(version_dir));
    }

    #[test]
    fn darwin_scan_without_version_dir_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(scan_darwin_base(dir.path()), None);
    }

    #[test]
    fn windows_scan_finds_account_directory() {
        let dir = tempfile::tempdir().unwrap();
        let account = dir.path().join("wxid_abc123");
        fs::create_dir_all(&account).unwrap();

        assert_eq!(scan_windows_base(dir.path()), Some(account));
    }

    #[test]
    fn windows_scan_falls_back_to_message_layout() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Message")).unwrap();

        assert_eq!(scan_windows_base(dir.path()), Some(dir.path().to_path_buf()));
    }

    #[test]
    fn windows_scan_ignores_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("wxid_not_a_dir"), b"").unwrap();

        assert_eq!(scan_windows_base(dir.path()), None);
    }
}
