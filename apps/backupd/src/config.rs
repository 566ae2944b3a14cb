use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use backup_core::format::{DEFAULT_GZIP_LEVEL, DEFAULT_ZIP_LEVEL, DEFAULT_ZSTD_LEVEL};
use backup_core::{BackupError, BackupSettings, CompressionFormat, CompressionLevels, RetentionPolicy};
use serde::Deserialize;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "backupd.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackupdConfig {
    pub server: ServerSection,
    pub backup: BackupSection,
    pub compress: CompressSection,
    pub interval_backup_task: IntervalSection,
    pub sessions: SessionsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Directory holding `server.properties` and the worlds.
    pub root: PathBuf,
    pub worlds: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    pub backups_dir: PathBuf,
    pub keep_last_n_backups: i64,
    /// MiB; 0 disables the limit.
    pub backups_dir_storage_limit: i64,
    pub on_player_join: bool,
    pub on_player_quit: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressSection {
    pub default_type: String,
    pub zstd_level: i32,
    pub gzip_level: i32,
    pub zip_level: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntervalSection {
    pub enable: bool,
    pub initial_delay_minutes: u64,
    pub interval_minutes: u64,
    pub skip_if_no_players: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    pub poll_seconds: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            worlds: vec![
                "world".to_string(),
                "world_nether".to_string(),
                "world_the_end".to_string(),
            ],
        }
    }
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            backups_dir: PathBuf::from("./backups"),
            keep_last_n_backups: 10,
            backups_dir_storage_limit: 1024,
            on_player_join: false,
            on_player_quit: true,
        }
    }
}

impl Default for CompressSection {
    fn default() -> Self {
        Self {
            default_type: "zstd".to_string(),
            zstd_level: DEFAULT_ZSTD_LEVEL,
            gzip_level: DEFAULT_GZIP_LEVEL,
            zip_level: DEFAULT_ZIP_LEVEL,
        }
    }
}

impl Default for IntervalSection {
    fn default() -> Self {
        Self {
            enable: true,
            initial_delay_minutes: 1,
            interval_minutes: 20,
            skip_if_no_players: true,
        }
    }
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self { poll_seconds: 5 }
    }
}

/// Reads the TOML config at `path`; a missing file means all defaults.
pub fn load_config(path: &Path) -> Result<BackupdConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!("no config at {}, using defaults", path.display());
            return Ok(BackupdConfig::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read {}", path.display()));
        }
    };
    parse_config(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<BackupdConfig> {
    Ok(toml::from_str(content)?)
}

impl BackupdConfig {
    /// Validates compression settings and resolves paths. Runs before any
    /// trigger starts so a bad level stops the daemon instead of a backup.
    pub fn resolve(&self) -> Result<BackupSettings, BackupError> {
        let levels = CompressionLevels::new(
            self.compress.zstd_level,
            self.compress.gzip_level,
            self.compress.zip_level,
        )?;
        let default_format: CompressionFormat = self.compress.default_type.parse()?;

        if self.interval_backup_task.enable && self.interval_backup_task.interval_minutes == 0 {
            return Err(BackupError::Config(
                "interval_backup_task.interval_minutes must be greater than 0".to_string(),
            ));
        }

        let retention = RetentionPolicy::from_megabytes(
            usize::try_from(self.backup.keep_last_n_backups.max(0)).unwrap_or(usize::MAX),
            u64::try_from(self.backup.backups_dir_storage_limit.max(0)).unwrap_or(0),
        );

        Ok(BackupSettings {
            backups_dir: self.backups_dir(),
            retention,
            levels,
            default_format,
        })
    }

    /// Relative backup directories hang off the server root.
    pub fn backups_dir(&self) -> PathBuf {
        if self.backup.backups_dir.is_absolute() {
            self.backup.backups_dir.clone()
        } else {
            self.server.root.join(&self.backup.backups_dir)
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.interval_backup_task.initial_delay_minutes.saturating_mul(60))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_backup_task.interval_minutes.saturating_mul(60))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.poll_seconds.max(1))
    }
}
