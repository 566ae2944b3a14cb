use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use backup_core::host::existing_units;
use backup_core::{DataStoreHost, DataStoreUnit, HostError, OfflineHost};
use backup_rcon::{RconClient, load_rcon_settings};
use tracing::{info, warn};

use crate::config::BackupdConfig;

/// Drives a running vanilla/Paper server over RCON.
///
/// The server only has one global autosave switch, so per-world flags are
/// tracked here and folded into `save-on` (any world enabled) or `save-off`.
/// Worlds start out enabled, which is the server default.
pub struct RconHost {
    client: RconClient,
    server_root: PathBuf,
    worlds: Vec<String>,
    flags: Mutex<FlagState>,
}

#[derive(Debug, Default)]
struct FlagState {
    per_world: BTreeMap<String, bool>,
    /// Last switch the server acknowledged.
    applied: Option<bool>,
}

impl FlagState {
    fn enabled(&self, world: &str) -> bool {
        self.per_world.get(world).copied().unwrap_or(true)
    }

    /// Records `world`'s flag and returns the switch to send, or `None` when
    /// the server is already in that state.
    fn update(&mut self, worlds: &[String], world: &str, enabled: bool) -> Option<bool> {
        self.per_world.insert(world.to_string(), enabled);
        let any_enabled = worlds.iter().any(|w| self.enabled(w));
        (self.applied != Some(any_enabled)).then_some(any_enabled)
    }
}

impl RconHost {
    pub fn new(client: RconClient, server_root: PathBuf, worlds: Vec<String>) -> Self {
        Self {
            client,
            server_root,
            worlds,
            flags: Mutex::new(FlagState::default()),
        }
    }

    async fn command(&self, command: &str) -> Result<String, HostError> {
        self.client
            .execute(command)
            .await
            .map_err(|err| HostError::new(format!("rcon {command} failed: {err:#}")))
    }
}

#[async_trait]
impl DataStoreHost for RconHost {
    async fn units(&self) -> Result<Vec<DataStoreUnit>, HostError> {
        Ok(existing_units(&self.server_root, &self.worlds))
    }

    async fn autosave(&self, unit: &DataStoreUnit) -> Result<bool, HostError> {
        let flags = self
            .flags
            .lock()
            .map_err(|_| HostError::new("autosave flags poisoned"))?;
        Ok(flags.enabled(&unit.name))
    }

    async fn set_autosave(&self, unit: &DataStoreUnit, enabled: bool) -> Result<(), HostError> {
        let wanted = {
            let mut flags = self
                .flags
                .lock()
                .map_err(|_| HostError::new("autosave flags poisoned"))?;
            flags.update(&self.worlds, &unit.name, enabled)
        };
        let Some(wanted) = wanted else {
            return Ok(());
        };

        self.command(if wanted { "save-on" } else { "save-off" }).await?;
        if let Ok(mut flags) = self.flags.lock() {
            flags.applied = Some(wanted);
        }
        Ok(())
    }

    async fn flush_sessions(&self) -> Result<(), HostError> {
        self.command("save-all").await.map(|_| ())
    }

    async fn flush_unit(&self, _unit: &DataStoreUnit) -> Result<(), HostError> {
        // Vanilla cannot save a single dimension; `flush` blocks until chunks hit disk.
        self.command("save-all flush").await.map(|_| ())
    }

    async fn online_sessions(&self) -> Result<Vec<String>, HostError> {
        self.client
            .online_players()
            .await
            .map_err(|err| HostError::new(format!("rcon list failed: {err:#}")))
    }
}

pub struct ResolvedHost {
    pub host: Arc<dyn DataStoreHost>,
    /// Whether the host can report online players.
    pub tracks_sessions: bool,
}

/// RCON when `server.properties` enables it, otherwise an offline host that
/// copies the worlds without flushing.
pub async fn resolve_host(config: &BackupdConfig) -> ResolvedHost {
    let root = config.server.root.clone();
    let worlds = config.server.worlds.clone();

    match load_rcon_settings(&root).await {
        Ok(Some(settings)) => {
            info!("using RCON at {} to flush the server", settings.address);
            ResolvedHost {
                host: Arc::new(RconHost::new(RconClient::from_settings(settings), root, worlds)),
                tracks_sessions: true,
            }
        }
        Ok(None) => {
            info!("RCON not enabled; backing up {} without flushing", root.display());
            ResolvedHost {
                host: Arc::new(OfflineHost::discover(&root, &worlds)),
                tracks_sessions: false,
            }
        }
        Err(err) => {
            warn!("invalid RCON settings ({err:#}); backing up without flushing");
            ResolvedHost {
                host: Arc::new(OfflineHost::discover(&root, &worlds)),
                tracks_sessions: false,
            }
        }
    }
}
