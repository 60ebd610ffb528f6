use crate::conntrack::DEFAULT_CONNTRACK_PATH;
use crate::utils::data_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration, stored as `config.json` in the data directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// State file location; `None` means `state.json` in the data directory
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    #[serde(default = "default_conntrack_path")]
    pub conntrack_path: PathBuf,
    /// Connection tracking entries on this port are hidden from snapshots
    #[serde(default)]
    pub conntrack_exclude_port: Option<u16>,
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
    /// Pretty-print the state file (easier to inspect, larger on disk)
    #[serde(default = "default_true")]
    pub pretty_state: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_file: None,
            conntrack_path: default_conntrack_path(),
            conntrack_exclude_port: None,
            audit_enabled: true,
            pretty_state: true,
        }
    }
}

fn default_conntrack_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONNTRACK_PATH)
}

fn default_true() -> bool {
    true
}

/// Default config file location.
pub fn config_path() -> Option<PathBuf> {
    data_dir().map(|mut path| {
        path.push("config.json");
        path
    })
}

/// Saves the config to `path` using an atomic write pattern.
/// 1. Writes to a temporary file.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames to the target path.
///
/// # Async
/// Uses `tokio::fs` for non-blocking I/O.
pub async fn save_config_to(config: &AppConfig, path: &Path) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(config)?;

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    // Create file with restrictive permissions from the start so it is never
    // briefly world-readable
    #[cfg(unix)]
    {
        use tokio::fs::OpenOptions;
        use tokio::io::AsyncWriteExt;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(&temp_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
    }

    #[cfg(not(unix))]
    {
        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
    }

    tokio::fs::rename(temp_path, path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e
        }
    })
}

/// Loads the config from `path`, or returns the default if it is missing or
/// unreadable.
pub async fn load_config_from(path: &Path) -> AppConfig {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => serde_json::from_str::<AppConfig>(&json).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
            AppConfig::default()
        }),
        Err(_) => AppConfig::default(),
    }
}

/// Loads the config from the default location.
pub async fn load_config() -> AppConfig {
    match config_path() {
        Some(path) => load_config_from(&path).await,
        None => AppConfig::default(),
    }
}
