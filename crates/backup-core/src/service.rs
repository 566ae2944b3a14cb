use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::errors::BackupError;
use crate::format::{CompressionFormat, CompressionLevels, FormatSettings};
use crate::host::DataStoreHost;
use crate::naming::artifact_file_name_now;
use crate::pipeline::{ArtifactSummary, build_artifact};
use crate::quiesce::run_backup_transaction;
use crate::retention::{BackupArtifact, RetentionPolicy, RetentionReport, enforce_retention, list_artifacts};

/// Resolved configuration the service runs with.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub backups_dir: PathBuf,
    pub retention: RetentionPolicy,
    pub levels: CompressionLevels,
    pub default_format: CompressionFormat,
}

#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub file_name: String,
    pub summary: ArtifactSummary,
}

/// Entry point for every trigger. Backups run one at a time; a trigger that
/// fires while one is running waits for it.
pub struct BackupService {
    host: Arc<dyn DataStoreHost>,
    settings: BackupSettings,
    in_flight: Mutex<()>,
}

impl BackupService {
    pub fn new(host: Arc<dyn DataStoreHost>, settings: BackupSettings) -> Self {
        Self {
            host,
            settings,
            in_flight: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    pub fn host(&self) -> Arc<dyn DataStoreHost> {
        Arc::clone(&self.host)
    }

    pub async fn run_default_backup(&self, label: &str) -> Result<BackupOutcome, BackupError> {
        self.run_backup(label, self.settings.default_format).await
    }

    /// Produces `<timestamp>--<label><suffix>` in the backups directory, then
    /// enforces retention. Retention runs even when the archive fails; its
    /// result is only logged.
    pub async fn run_backup(
        &self,
        label: &str,
        format: CompressionFormat,
    ) -> Result<BackupOutcome, BackupError> {
        let _serial = self.in_flight.lock().await;

        let units = self.host.units().await?;
        let sources: Vec<PathBuf> = units.iter().map(|unit| unit.root.clone()).collect();
        let format_settings = self.settings.levels.settings(format);
        let file_name = artifact_file_name_now(label, format);
        let destination = self.settings.backups_dir.join(&file_name);
        let backups_dir = self.settings.backups_dir.clone();
        let policy = self.settings.retention;

        info!("creating backup archive {}", file_name);
        let summary = run_backup_transaction(self.host(), &units, move || {
            let built = build_fresh_artifact(&destination, &sources, format_settings);
            if let Err(err) = enforce_retention(&backups_dir, policy) {
                warn!("failed to run retention: {}", err);
            }
            built
        })
        .await?;

        info!("created backup archive {}", file_name);
        Ok(BackupOutcome { file_name, summary })
    }

    /// Retention alone, serialized with backups.
    pub async fn prune(&self) -> Result<RetentionReport, BackupError> {
        let _serial = self.in_flight.lock().await;
        let dir = self.settings.backups_dir.clone();
        let policy = self.settings.retention;
        tokio::task::spawn_blocking(move || enforce_retention(&dir, policy))
            .await
            .map_err(|err| BackupError::Worker(err.to_string()))?
    }

    /// Resolves once no backup is running.
    pub async fn wait_idle(&self) {
        drop(self.in_flight.lock().await);
    }

    pub async fn list(&self) -> Result<Vec<BackupArtifact>, BackupError> {
        let dir = self.settings.backups_dir.clone();
        tokio::task::spawn_blocking(move || {
            list_artifacts(&dir)
                .map_err(|err| BackupError::pipeline(format!("listing {}", dir.display()), err))
        })
        .await
        .map_err(|err| BackupError::Worker(err.to_string()))?
    }
}

/// Builds the artifact and removes it again if the build fails. A file that
/// was already at `destination` belongs to an earlier backup and is kept.
fn build_fresh_artifact(
    destination: &Path,
    sources: &[PathBuf],
    settings: FormatSettings,
) -> Result<ArtifactSummary, BackupError> {
    let preexisting = destination.exists();
    let built = build_artifact(destination, sources, settings);
    if built.is_err() && !preexisting {
        discard_partial(destination);
    }
    built
}

fn discard_partial(destination: &Path) {
    match std::fs::remove_file(destination) {
        Ok(()) => info!("removed incomplete backup {}", destination.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            "failed to remove incomplete backup {}: {}",
            destination.display(),
            err
        ),
    }
}
