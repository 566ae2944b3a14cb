use fs2::FileExt;
use std::{fs::File, fs::OpenOptions, path::Path, path::PathBuf};

pub const LOCK_FILE_NAME: &str = ".backupd.lock";

pub struct LockGuard {
    _file: File,
}

/// Takes the exclusive lock guarding `backups_dir`. Fails with `WouldBlock`
/// when another backupd process holds it.
pub fn acquire_lock(backups_dir: &Path) -> std::io::Result<LockGuard> {
    std::fs::create_dir_all(backups_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path(backups_dir))?;

    file.try_lock_exclusive()?;
    Ok(LockGuard { _file: file })
}

pub fn lock_path(backups_dir: &Path) -> PathBuf {
    backups_dir.join(LOCK_FILE_NAME)
}
