use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::HostError;

/// One independently saved directory tree of the host (e.g. a world).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataStoreUnit {
    pub name: String,
    pub root: PathBuf,
}

impl DataStoreUnit {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }
}

/// What the backup pipeline needs from the live server. Implementations own the
/// autosave flags; the pipeline only reads and writes them for the duration of
/// one transaction.
#[async_trait]
pub trait DataStoreHost: Send + Sync {
    /// Units to back up. The coordinator orders them by name.
    async fn units(&self) -> Result<Vec<DataStoreUnit>, HostError>;

    async fn autosave(&self, unit: &DataStoreUnit) -> Result<bool, HostError>;

    async fn set_autosave(&self, unit: &DataStoreUnit, enabled: bool) -> Result<(), HostError>;

    /// Persist all live session (player) state.
    async fn flush_sessions(&self) -> Result<(), HostError>;

    async fn flush_unit(&self, unit: &DataStoreUnit) -> Result<(), HostError>;

    /// Names of currently connected sessions.
    async fn online_sessions(&self) -> Result<Vec<String>, HostError>;
}

/// Host for a server that is not running or cannot be reached: flushing is a
/// no-op and autosave flags live in memory. It has no view of connected
/// players, so the session query fails instead of claiming an empty server.
pub struct OfflineHost {
    units: Vec<DataStoreUnit>,
    autosave: Mutex<HashMap<String, bool>>,
}

impl OfflineHost {
    pub fn new(units: Vec<DataStoreUnit>) -> Self {
        let autosave = units.iter().map(|u| (u.name.clone(), true)).collect();
        Self {
            units,
            autosave: Mutex::new(autosave),
        }
    }

    /// Units for each name in `names` whose directory exists under `server_root`.
    pub fn discover(server_root: &Path, names: &[String]) -> Self {
        Self::new(existing_units(server_root, names))
    }
}

pub fn existing_units(server_root: &Path, names: &[String]) -> Vec<DataStoreUnit> {
    names
        .iter()
        .map(|name| DataStoreUnit::new(name.clone(), server_root.join(name)))
        .filter(|unit| unit.root.is_dir())
        .collect()
}

#[async_trait]
impl DataStoreHost for OfflineHost {
    async fn units(&self) -> Result<Vec<DataStoreUnit>, HostError> {
        Ok(self.units.clone())
    }

    async fn autosave(&self, unit: &DataStoreUnit) -> Result<bool, HostError> {
        let flags = self
            .autosave
            .lock()
            .map_err(|_| HostError::new("autosave flags poisoned"))?;
        flags
            .get(&unit.name)
            .copied()
            .ok_or_else(|| HostError::new(format!("unknown unit {}", unit.name)))
    }

    async fn set_autosave(&self, unit: &DataStoreUnit, enabled: bool) -> Result<(), HostError> {
        let mut flags = self
            .autosave
            .lock()
            .map_err(|_| HostError::new("autosave flags poisoned"))?;
        flags.insert(unit.name.clone(), enabled);
        Ok(())
    }

    async fn flush_sessions(&self) -> Result<(), HostError> {
        Ok(())
    }

    async fn flush_unit(&self, _unit: &DataStoreUnit) -> Result<(), HostError> {
        Ok(())
    }

    async fn online_sessions(&self) -> Result<Vec<String>, HostError> {
        Err(HostError::new("no session source"))
    }
}
