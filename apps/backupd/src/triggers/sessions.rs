use std::collections::BTreeSet;
use std::sync::Arc;

use backup_core::{BackupService, DataStoreHost};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionTriggers {
    pub on_join: bool,
    pub on_quit: bool,
    /// Back up when the last player leaves. Set when the interval task skips
    /// empty servers, so the final stretch of play is not lost between runs.
    pub on_last_quit: bool,
}

impl SessionTriggers {
    pub fn any(&self) -> bool {
        self.on_join || self.on_quit || self.on_last_quit
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Joined(String),
    Left { name: String, last: bool },
}

/// Events between two polls of the player list. When the server went empty,
/// only the final departure counts as the last one.
pub fn diff_sessions(before: &BTreeSet<String>, after: &BTreeSet<String>) -> Vec<SessionEvent> {
    let mut events: Vec<SessionEvent> = after
        .difference(before)
        .map(|name| SessionEvent::Joined(name.clone()))
        .collect();

    let left: Vec<&String> = before.difference(after).collect();
    let emptied = after.is_empty();
    for (index, name) in left.iter().enumerate() {
        events.push(SessionEvent::Left {
            name: (*name).clone(),
            last: emptied && index + 1 == left.len(),
        });
    }
    events
}

/// Backup label for `event`, or `None` when no trigger is enabled for it.
pub fn label_for(event: &SessionEvent, triggers: SessionTriggers) -> Option<String> {
    match event {
        SessionEvent::Joined(name) if triggers.on_join => Some(format!("{name}-join")),
        SessionEvent::Joined(_) => None,
        SessionEvent::Left { name, last: true } if triggers.on_last_quit => {
            Some(format!("lastplayer-{name}-quit"))
        }
        SessionEvent::Left { name, .. } if triggers.on_quit => Some(format!("{name}-quit")),
        SessionEvent::Left { .. } => None,
    }
}

/// Polls the player list and fires a backup for every join/leave with an
/// enabled trigger. The first poll only sets the baseline.
pub async fn watch_sessions(service: Arc<BackupService>, triggers: SessionTriggers, poll: Duration) {
    let host = service.host();
    let mut known: Option<BTreeSet<String>> = None;
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let online: BTreeSet<String> = match host.online_sessions().await {
            Ok(players) => players.into_iter().collect(),
            Err(err) => {
                debug!("player list unavailable: {}", err);
                continue;
            }
        };

        if let Some(before) = &known {
            for event in diff_sessions(before, &online) {
                let Some(label) = label_for(&event, triggers) else {
                    continue;
                };
                match &event {
                    SessionEvent::Joined(name) => info!("player {} joined, running backup task", name),
                    SessionEvent::Left { name, last: true } if triggers.on_last_quit => info!(
                        "last player {} quit, triggering one-time backup",
                        name
                    ),
                    SessionEvent::Left { name, .. } => info!("player {} quit, running backup task", name),
                }

                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    if let Err(err) = service.run_default_backup(&label).await {
                        warn!("backup {} failed: {}", label, err);
                    }
                });
            }
        }
        known = Some(online);
    }
}
