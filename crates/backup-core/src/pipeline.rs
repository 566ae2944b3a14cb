use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::ArchiveWriter;
use crate::errors::BackupError;
use crate::format::FormatSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    pub path: PathBuf,
    /// Container entries written (directories, files and symlinks).
    pub entries: u64,
    pub files: u64,
    pub bytes_read: u64,
    /// Size of the finished artifact on disk.
    pub size: u64,
}

/// Archives every source tree into `destination`, streaming through the
/// format's codec. Entry names are relative to each root's parent, so
/// `/srv/mc/world/level.dat` lands as `world/level.dat`.
///
/// Symlinks are recorded, never followed. Entries are written in walk order.
/// An existing file at `destination` is never overwritten.
/// On error the destination may be left half-written; removing it is up to the
/// caller.
pub fn build_artifact(
    destination: &Path,
    sources: &[PathBuf],
    settings: FormatSettings,
) -> Result<ArtifactSummary, BackupError> {
    let roots: Vec<&PathBuf> = sources
        .iter()
        .filter(|root| {
            let exists = root.is_dir();
            if !exists {
                warn!("backup source {} is not a directory, skipping", root.display());
            }
            exists
        })
        .collect();
    if roots.is_empty() {
        return Err(BackupError::pipeline(
            "collecting backup sources",
            io::Error::new(io::ErrorKind::NotFound, "no source directory exists"),
        ));
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            BackupError::pipeline(format!("creating {}", parent.display()), e)
        })?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
        .map_err(|e| BackupError::pipeline(format!("creating {}", destination.display()), e))?;
    let mut archive = ArchiveWriter::new(settings, BufWriter::new(file))
        .map_err(|e| BackupError::pipeline("opening archive stream", e))?;

    let mut summary = ArtifactSummary {
        path: destination.to_path_buf(),
        entries: 0,
        files: 0,
        bytes_read: 0,
        size: 0,
    };

    for root in roots {
        let base = root.parent().unwrap_or(Path::new(""));
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| {
                BackupError::pipeline(format!("walking {}", root.display()), e.into())
            })?;
            let path = entry.path();
            if path == destination {
                continue;
            }

            let rel = path.strip_prefix(base).unwrap_or(path);
            let name = rel.to_string_lossy().replace('\\', "/");
            let file_type = entry.file_type();

            let written = if file_type.is_dir() {
                archive.append_dir(&name, path)
            } else if file_type.is_file() {
                archive.append_file(&name, path).map(|copied| {
                    summary.files += 1;
                    summary.bytes_read += copied;
                })
            } else if file_type.is_symlink() {
                archive.append_symlink(&name, path)
            } else {
                debug!("skipping special file {}", path.display());
                continue;
            };
            written.map_err(|e| BackupError::pipeline(format!("archiving {}", path.display()), e))?;
            summary.entries += 1;
        }
    }

    let writer = archive
        .finish()
        .map_err(|e| BackupError::pipeline("finalizing archive", e))?;
    let file = writer
        .into_inner()
        .map_err(|e| BackupError::pipeline("flushing archive", e.into_error()))?;
    file.sync_all()
        .map_err(|e| BackupError::pipeline("syncing archive", e))?;
    summary.size = file
        .metadata()
        .map_err(|e| BackupError::pipeline("reading archive size", e))?
        .len();

    info!(
        "archived {} entries ({} files, {} bytes) into {} ({} bytes)",
        summary.entries,
        summary.files,
        summary.bytes_read,
        destination.display(),
        summary.size
    );
    Ok(summary)
}
