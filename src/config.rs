//! Application configuration store
//!
//! Loads, merges, and persists the partial backend configuration. All
//! persistence is best-effort: a missing or corrupt file loads as the empty
//! config, and save failures are logged and discarded.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tauri::{AppHandle, State};
use tracing::{info, warn};

use crate::logging;

/// Configuration file name under the per-user app data directory.
pub const CONFIG_FILE: &str = "chatlog-desktop.json";

/// Partial backend launch configuration. Every field is optional; absent
/// fields are auto-derived at start time or omitted from the invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_decrypt: Option<bool>,
}

impl ServerConfig {
    /// Merge a partial update: later non-absent values win per field,
    /// omitted fields retain their prior value.
    pub fn merge(&mut self, update: ServerConfig) {
        if update.addr.is_some() {
            self.addr = update.addr;
        }
        if update.data_dir.is_some() {
            self.data_dir = update.data_dir;
        }
        if update.data_key.is_some() {
            self.data_key = update.data_key;
        }
        if update.img_key.is_some() {
            self.img_key = update.img_key;
        }
        if update.work_dir.is_some() {
            self.work_dir = update.work_dir;
        }
        if update.platform.is_some() {
            self.platform = update.platform;
        }
        if update.version.is_some() {
            self.version = update.version;
        }
        if update.auto_decrypt.is_some() {
            self.auto_decrypt = update.auto_decrypt;
        }
    }

    /// Enough configuration to start the backend meaningfully: a data or
    /// work directory plus a data key.
    pub fn is_ready(&self) -> bool {
        let has_dirs = non_empty(&self.data_dir) || non_empty(&self.work_dir);
        has_dirs && non_empty(&self.data_key)
    }
}

/// The persisted configuration: the server portion plus desktop-only flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    #[serde(flatten)]
    pub server: ServerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_on_launch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_external: Option<bool>,
}

impl AppConfig {
    pub fn merge(&mut self, update: AppConfig) {
        self.server.merge(update.server);
        if update.start_on_launch.is_some() {
            self.start_on_launch = update.start_on_launch;
        }
        if update.use_external.is_some() {
            self.use_external = update.use_external;
        }
    }
}

/// Which configuration pieces are present, as reported to the webview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigKeys {
    pub has_data_dir: bool,
    pub has_data_key: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigStatus {
    pub configured: bool,
    pub needs_config: bool,
    pub config_keys: ConfigKeys,
}

impl ConfigStatus {
    pub fn of(cfg: &ServerConfig) -> Self {
        let configured = cfg.is_ready();
        Self {
            configured,
            needs_config: !configured,
            config_keys: ConfigKeys {
                has_data_dir: non_empty(&cfg.data_dir) || non_empty(&cfg.work_dir),
                has_data_key: non_empty(&cfg.data_key),
            },
        }
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.is_empty())
}

/// In-memory configuration, loaded once at startup and written back after
/// every mutation. Placed in Tauri managed state.
pub struct ConfigStore {
    path: Option<PathBuf>,
    config: Mutex<AppConfig>,
}

impl ConfigStore {
    /// Load the store from `path`. Pass `None` for a purely in-memory store
    /// (nothing is persisted).
    pub fn open(path: Option<PathBuf>) -> Self {
        let config = path.as_deref().map(load_config).unwrap_or_default();
        Self {
            path,
            config: Mutex::new(config),
        }
    }

    pub fn get(&self) -> AppConfig {
        self.config.lock().clone()
    }

    pub fn server(&self) -> ServerConfig {
        self.config.lock().server.clone()
    }

    /// Merge a partial update and persist the result.
    pub fn update(&self, update: AppConfig) -> AppConfig {
        let merged = {
            let mut cfg = self.config.lock();
            cfg.merge(update);
            cfg.clone()
        };
        self.persist(&merged);
        merged
    }

    /// Merge a partial server-config update and persist the result.
    pub fn update_server(&self, update: ServerConfig) -> ServerConfig {
        let merged = {
            let mut cfg = self.config.lock();
            cfg.server.merge(update);
            cfg.clone()
        };
        self.persist(&merged);
        merged.server
    }

    fn persist(&self, cfg: &AppConfig) {
        let Some(path) = &self.path else { return };
        // Persistence is best-effort by contract: a read-only disk must
        // never break configuration changes.
        if let Err(err) = save_config(path, cfg) {
            warn!(path = %path.display(), error = %err, "Failed to persist configuration");
        }
    }
}

fn load_config(path: &Path) -> AppConfig {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Config file unreadable, starting empty");
                AppConfig::default()
            }
        },
        Err(_) => AppConfig::default(),
    }
}

fn save_config(path: &Path, cfg: &AppConfig) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(cfg)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    fs::write(path, json)
}

/// Where the configuration lives for this user.
pub fn default_config_path(app: &AppHandle) -> PathBuf {
    logging::app_data_dir(app).join(CONFIG_FILE)
}

// ============ TAURI COMMANDS ============

#[tauri::command]
pub fn config_get(store: State<'_, ConfigStore>) -> AppConfig {
    store.get()
}

#[tauri::command]
pub fn config_set(store: State<'_, ConfigStore>, cfg: AppConfig) -> ConfigStatus {
    let merged = store.update(cfg);
    info!("Configuration updated");
    ConfigStatus::of(&merged.server)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(data_dir: Option<&str>, work_dir: Option<&str>, data_key: Option<&str>) -> ServerConfig {
        ServerConfig {
            data_dir: data_dir.map(String::from),
            work_dir: work_dir.map(String::from),
            data_key: data_key.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn merge_keeps_last_non_absent_value_per_field() {
        let mut base = ServerConfig {
            addr: Some("127.0.0.1:5030".into()),
            data_dir: Some("/old".into()),
            version: Some(3),
            ..Default::default()
        };
        base.merge(ServerConfig {
            data_dir: Some("/new".into()),
            data_key: Some("k".into()),
            ..Default::default()
        });

        assert_eq!(base.addr.as_deref(), Some("127.0.0.1:5030"));
        assert_eq!(base.data_dir.as_deref(), Some("/new"));
        assert_eq!(base.data_key.as_deref(), Some("k"));
        assert_eq!(base.version, Some(3));
    }

    #[test]
    fn merge_sequence_equals_last_write_per_field() {
        let updates = [
            ServerConfig {
                addr: Some("a:1".into()),
                ..Default::default()
            },
            ServerConfig {
                data_key: Some("k1".into()),
                ..Default::default()
            },
            ServerConfig {
                addr: Some("b:2".into()),
                data_key: Some("k2".into()),
                ..Default::default()
            },
        ];
        let mut merged = ServerConfig::default();
        for update in updates {
            merged.merge(update);
        }

        assert_eq!(merged.addr.as_deref(), Some("b:2"));
        assert_eq!(merged.data_key.as_deref(), Some("k2"));
    }

    #[test]
    fn readiness_needs_a_directory_and_a_key() {
        assert!(!cfg(None, None, None).is_ready());
        assert!(!cfg(Some("/d"), None, None).is_ready());
        assert!(!cfg(None, None, Some("k")).is_ready());
        assert!(!cfg(Some(""), Some(""), Some("k")).is_ready());
        assert!(cfg(Some("/d"), None, Some("k")).is_ready());
        assert!(cfg(None, Some("/w"), Some("k")).is_ready());
    }

    #[test]
    fn corrupt_config_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "not json at all").unwrap();

        let store = ConfigStore::open(Some(path));
        assert_eq!(store.get(), AppConfig::default());
    }

    #[test]
    fn missing_config_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(Some(dir.path().join("nope").join(CONFIG_FILE)));
        assert_eq!(store.get(), AppConfig::default());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        // Parent directories are created on demand.
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let store = ConfigStore::open(Some(path.clone()));
        store.update(AppConfig {
            server: ServerConfig {
                data_key: Some("sekrit".into()),
                ..Default::default()
            },
            use_external: Some(true),
            ..Default::default()
        });

        let reloaded = ConfigStore::open(Some(path));
        assert_eq!(reloaded.server().data_key.as_deref(), Some("sekrit"));
        assert_eq!(reloaded.get().use_external, Some(true));
    }

    #[test]
    fn config_status_reports_missing_pieces() {
        let status = ConfigStatus::of(&cfg(Some("/d"), None, None));
        assert!(!status.configured);
        assert!(status.needs_config);
        assert!(status.config_keys.has_data_dir);
        assert!(!status.config_keys.has_data_key);
    }
}
