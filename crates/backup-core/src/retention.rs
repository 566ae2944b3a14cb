use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::errors::BackupError;
use crate::naming::is_artifact_name;

const MIB: u64 = 1024 * 1024;

/// `0` disables the corresponding rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_last_n: usize,
    pub storage_limit_bytes: u64,
}

impl RetentionPolicy {
    pub fn new(keep_last_n: usize, storage_limit_bytes: u64) -> Self {
        Self {
            keep_last_n,
            storage_limit_bytes,
        }
    }

    /// The storage limit is configured in MiB.
    pub fn from_megabytes(keep_last_n: usize, storage_limit_mb: u64) -> Self {
        Self::new(keep_last_n, storage_limit_mb.saturating_mul(MIB))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct RetentionReport {
    pub deleted: Vec<String>,
    pub failed: Vec<BackupError>,
    pub remaining_bytes: u64,
}

/// Regular files in `dir` whose name carries the timestamp prefix, oldest first.
pub fn list_artifacts(dir: &Path) -> io::Result<Vec<BackupArtifact>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut artifacts = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_artifact_name(&name) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        artifacts.push(BackupArtifact {
            name,
            path: entry.path(),
            size: metadata.len(),
        });
    }

    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(artifacts)
}

/// Picks the artifacts to delete. `artifacts` must be sorted oldest first.
///
/// The count rule runs first. The size rule then looks at what the count rule
/// left behind and drops the oldest of those until the deficit is covered. The
/// size rule is not held back by `keep_last_n`, and when the limit is smaller
/// than what can be freed it deletes everything it visits and stops there.
pub fn plan_retention(artifacts: &[BackupArtifact], policy: RetentionPolicy) -> Vec<BackupArtifact> {
    let mut doomed: Vec<BackupArtifact> = Vec::new();

    let mut remaining: &[BackupArtifact] = artifacts;
    if policy.keep_last_n > 0 && remaining.len() > policy.keep_last_n {
        let excess = remaining.len() - policy.keep_last_n;
        doomed.extend_from_slice(&remaining[..excess]);
        remaining = &remaining[excess..];
    }

    if policy.storage_limit_bytes > 0 {
        let total: u64 = remaining.iter().map(|a| a.size).sum();
        if total > policy.storage_limit_bytes {
            let mut to_free = total - policy.storage_limit_bytes;
            for artifact in remaining {
                if to_free == 0 {
                    break;
                }
                doomed.push(artifact.clone());
                to_free = to_free.saturating_sub(artifact.size);
            }
        }
    }

    doomed
}

/// Lists `dir`, plans against `policy` and deletes. A file that cannot be
/// removed is reported in `failed` and the rest are still attempted.
pub fn enforce_retention(dir: &Path, policy: RetentionPolicy) -> Result<RetentionReport, BackupError> {
    enforce_with(dir, policy, |path| fs::remove_file(path))
}

fn enforce_with<R>(
    dir: &Path,
    policy: RetentionPolicy,
    mut remove: R,
) -> Result<RetentionReport, BackupError>
where
    R: FnMut(&Path) -> io::Result<()>,
{
    let artifacts = list_artifacts(dir)
        .map_err(|err| BackupError::pipeline(format!("listing {}", dir.display()), err))?;
    let doomed = plan_retention(&artifacts, policy);

    let mut report = RetentionReport::default();
    for artifact in doomed {
        match remove(&artifact.path) {
            Ok(()) => report.deleted.push(artifact.name),
            Err(source) => {
                let err = BackupError::RetentionDelete {
                    path: artifact.path,
                    source,
                };
                warn!("{}", err);
                report.failed.push(err);
            }
        }
    }

    if !report.deleted.is_empty() {
        info!("deleted old backups: {}", report.deleted.join(", "));
    }

    report.remaining_bytes = list_artifacts(dir)
        .map(|artifacts| artifacts.iter().map(|a| a.size).sum())
        .unwrap_or_else(|err| {
            warn!("failed to measure backups dir {}: {}", dir.display(), err);
            0
        });

    if policy.storage_limit_bytes > 0 {
        info!(
            "backups use {}MiB of {}MiB",
            report.remaining_bytes / MIB,
            policy.storage_limit_bytes / MIB
        );
    } else {
        info!(
            "backups use {}MiB, storage limit disabled",
            report.remaining_bytes / MIB
        );
    }

    Ok(report)
}
