use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Where a successful transfer records its completion marker.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMarkerMode {
    /// `success.txt` inside the run directory on the destination.
    #[default]
    RunDirectory,
    /// `backup-marker.txt` at the source root, so re-inserted cards are skipped.
    BesideSource,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub media_root: PathBuf,
    /// Filesystems at least this large are treated as the backup drive.
    pub destination_threshold: u64,
    pub scan_period_secs: u64,
    pub debounce_ms: u64,
    pub scan_timeout_secs: u64,
    pub delivery_timeout_ms: u64,
    pub settle_secs: u64,
    pub log_flush_secs: u64,
    pub drain_grace_secs: u64,
    pub check_capacity: bool,
    pub remount: bool,
    pub completion_marker: CompletionMarkerMode,
    pub rsync_path: PathBuf,
    pub df_path: PathBuf,
    pub sync_path: PathBuf,
    /// Program plus leading args used for `mount -o remount,{rw,ro} <path>`.
    pub mount_command: Vec<String>,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            media_root: PathBuf::from("/media"),
            destination_threshold: 750 << 30,
            scan_period_secs: 10,
            debounce_ms: 1000,
            scan_timeout_secs: 10,
            delivery_timeout_ms: 2000,
            settle_secs: 5,
            log_flush_secs: 10,
            drain_grace_secs: 5,
            check_capacity: true,
            remount: true,
            completion_marker: CompletionMarkerMode::default(),
            rsync_path: PathBuf::from("rsync"),
            df_path: PathBuf::from("df"),
            sync_path: PathBuf::from("sync"),
            mount_command: vec!["sudo".to_string(), "mount".to_string()],
            log_dir: None,
        }
    }
}

impl Config {
    /// `<config_dir>/offload/config.json`, falling back to `/etc/offload/config.json`
    /// on systems without a per-user config dir.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join(env!("CARGO_PKG_NAME"))
            .join("config.json")
    }

    /// Read and validate the config at `path`; `Ok(None)` when the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ConfigError::Read { path: path.to_path_buf(), source }),
        };
        let config: Config = serde_json::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Like [`Config::read`], but a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::read(path)?.unwrap_or_default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let zeroes = [
            ("destination_threshold", self.destination_threshold),
            ("scan_period_secs", self.scan_period_secs),
            ("debounce_ms", self.debounce_ms),
            ("scan_timeout_secs", self.scan_timeout_secs),
            ("log_flush_secs", self.log_flush_secs),
        ];
        if let Some((name, _)) = zeroes.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
        }
        if self.remount && self.mount_command.is_empty() {
            return Err(ConfigError::Invalid(
                "mount_command must not be empty when remount is enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scan_period(&self) -> Duration {
        Duration::from_secs(self.scan_period_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn log_flush_interval(&self) -> Duration {
        Duration::from_secs(self.log_flush_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}
