use std::sync::Arc;

use anyhow::{Context, Result};
use backup_core::BackupService;
use tracing::{info, warn};

use crate::config::BackupdConfig;
use crate::host::resolve_host;
use crate::lock;
use crate::triggers::{IntervalSchedule, SessionTriggers, run_interval_backups, watch_sessions};

pub struct OpenService {
    pub service: Arc<BackupService>,
    pub tracks_sessions: bool,
    _lock: lock::LockGuard,
}

/// Validates configuration, takes the lock and builds the service the
/// one-shot commands and the daemon share. `None` when another process holds
/// the lock.
pub async fn open_service(config: &BackupdConfig) -> Result<Option<OpenService>> {
    let settings = config.resolve().context("Invalid configuration")?;

    let guard = match lock::acquire_lock(&settings.backups_dir) {
        Ok(guard) => guard,
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
            warn!(
                "another backupd holds {}, exiting",
                lock::lock_path(&settings.backups_dir).display()
            );
            return Ok(None);
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to lock {}", settings.backups_dir.display())
            });
        }
    };

    let resolved = resolve_host(config).await;
    Ok(Some(OpenService {
        service: Arc::new(BackupService::new(resolved.host, settings)),
        tracks_sessions: resolved.tracks_sessions,
        _lock: guard,
    }))
}

/// Without a player list the "skip empty server" check cannot be answered, so
/// every interval tick backs up.
pub fn interval_schedule(config: &BackupdConfig, tracks_sessions: bool) -> IntervalSchedule {
    let skip_requested = config.interval_backup_task.skip_if_no_players;
    if skip_requested && !tracks_sessions {
        warn!("skip_if_no_players needs RCON to see players; backing up on every interval");
    }
    IntervalSchedule {
        initial_delay: config.initial_delay(),
        every: config.interval(),
        skip_if_no_players: skip_requested && tracks_sessions,
    }
}

pub async fn serve(config: BackupdConfig) -> Result<()> {
    let Some(opened) = open_service(&config).await? else {
        return Ok(());
    };
    let service = Arc::clone(&opened.service);
    info!(
        "backupd started: backups in {}, default format {}",
        service.settings().backups_dir.display(),
        service.settings().default_format
    );

    let interval_cfg = &config.interval_backup_task;
    if interval_cfg.enable {
        let schedule = interval_schedule(&config, opened.tracks_sessions);
        tokio::spawn(run_interval_backups(Arc::clone(&service), schedule));
    }

    let triggers = SessionTriggers {
        on_join: config.backup.on_player_join,
        on_quit: config.backup.on_player_quit,
        on_last_quit: interval_cfg.enable && interval_cfg.skip_if_no_players,
    };
    if triggers.any() {
        if opened.tracks_sessions {
            tokio::spawn(watch_sessions(Arc::clone(&service), triggers, config.poll_interval()));
        } else {
            warn!("player join/quit backups need RCON; they are disabled");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown requested, waiting for a running backup to finish");
    service.wait_idle().await;
    info!("backupd stopped");
    Ok(())
}
