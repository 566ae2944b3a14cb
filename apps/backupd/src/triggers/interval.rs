use std::sync::Arc;

use backup_core::{BackupService, DataStoreHost};
use tokio::time::{Duration, MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};

pub const INTERVAL_LABEL: &str = "autobackup";

#[derive(Debug, Clone, Copy)]
pub struct IntervalSchedule {
    pub initial_delay: Duration,
    pub every: Duration,
    pub skip_if_no_players: bool,
}

/// Backs up after `initial_delay`, then every `every`. Meant to be spawned as
/// a detached task.
pub async fn run_interval_backups(service: Arc<BackupService>, schedule: IntervalSchedule) {
    info!(
        "interval backup task enabled: first backup in {} minute(s), then every {} minute(s)",
        schedule.initial_delay.as_secs() / 60,
        schedule.every.as_secs() / 60
    );
    info!("skip backup if no players online: {}", schedule.skip_if_no_players);

    sleep(schedule.initial_delay).await;

    let mut ticker = interval(schedule.every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;

        if schedule.skip_if_no_players {
            let online = match service.host().online_sessions().await {
                Ok(players) => Some(players.len()),
                Err(err) => {
                    warn!("could not query online players: {}", err);
                    None
                }
            };
            if should_skip(online) {
                debug!("no players online, skipping interval backup");
                continue;
            }
        }

        info!("running interval backup task");
        if let Err(err) = service.run_default_backup(INTERVAL_LABEL).await {
            warn!("interval backup failed: {}", err);
        }
    }
}

/// Skip only when the host positively reports an empty server; an unknown
/// player count still backs up.
fn should_skip(online: Option<usize>) -> bool {
    online == Some(0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use backup_core::{
        BackupService, BackupSettings, CompressionFormat, CompressionLevels, OfflineHost,
        RetentionPolicy,
    };
    use tokio::time::{Duration, timeout};

    use super::{IntervalSchedule, run_interval_backups, should_skip};

    #[test]
    fn skips_only_known_empty_servers() {
        assert!(should_skip(Some(0)));
        assert!(!should_skip(Some(3)));
        assert!(!should_skip(None));
    }

    #[tokio::test]
    async fn offline_host_still_backs_up_on_schedule() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let server = std::env::temp_dir().join(format!("atlas-backupd-interval-{nanos}"));
        std::fs::create_dir_all(server.join("world")).unwrap();
        std::fs::write(server.join("world").join("level.dat"), b"level").unwrap();
        let backups = server.join("backups");

        let host = Arc::new(OfflineHost::discover(&server, &["world".to_string()]));
        let service = Arc::new(BackupService::new(
            host,
            BackupSettings {
                backups_dir: backups.clone(),
                retention: RetentionPolicy::default(),
                levels: CompressionLevels::default(),
                default_format: CompressionFormat::TarGzip,
            },
        ));
        let schedule = IntervalSchedule {
            initial_delay: Duration::from_millis(10),
            every: Duration::from_millis(50),
            skip_if_no_players: true,
        };

        let _ = timeout(
            Duration::from_millis(300),
            run_interval_backups(Arc::clone(&service), schedule),
        )
        .await;

        assert!(!service.list().await.unwrap().is_empty());

        let _ = std::fs::remove_dir_all(server);
    }
}
