use std::io;
use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::BackupError;
use crate::host::{DataStoreHost, DataStoreUnit};

/// Holds the autosave flags captured before a backup and puts them back.
///
/// Flags are read, forced on and restored from the task that acquired the
/// guard; only the unit of work leaves that task. `release` restores exactly
/// once. A guard dropped without `release` (the owning future was cancelled or
/// panicked) hands the restoration to the current runtime.
pub struct QuiesceGuard {
    host: Arc<dyn DataStoreHost>,
    /// Flags not yet restored.
    snapshot: Vec<(DataStoreUnit, bool)>,
}

impl QuiesceGuard {
    /// Snapshots every unit's autosave flag, flushes session state, then turns
    /// autosave on and flushes each unit. Flush failures are logged and the
    /// backup goes ahead.
    pub async fn acquire(host: Arc<dyn DataStoreHost>, units: &[DataStoreUnit]) -> Self {
        let mut units = units.to_vec();
        units.sort_by(|a, b| a.name.cmp(&b.name));

        let mut snapshot = Vec::with_capacity(units.len());
        for unit in &units {
            match host.autosave(unit).await {
                Ok(enabled) => snapshot.push((unit.clone(), enabled)),
                Err(err) => warn!(
                    "failed to read autosave flag of {}: {}; leaving it untouched",
                    unit.name, err
                ),
            }
        }

        let guard = Self { host, snapshot };

        info!("saving all worlds and player data");
        match guard.host.flush_sessions().await {
            Ok(()) => info!("saved all players"),
            Err(err) => warn!("{}", BackupError::flush("player data", err)),
        }

        for unit in &units {
            if guard.snapshot.iter().any(|(saved, _)| saved == unit) {
                if let Err(err) = guard.host.set_autosave(unit, true).await {
                    warn!("failed to enable autosave for {}: {}", unit.name, err);
                }
            }
            match guard.host.flush_unit(unit).await {
                Ok(()) => info!("saved world: {}", unit.name),
                Err(err) => warn!("{}", BackupError::flush(format!("world {}", unit.name), err)),
            }
        }

        guard
    }

    /// Flags as they were before the guard touched them.
    pub fn snapshot(&self) -> &[(DataStoreUnit, bool)] {
        &self.snapshot
    }

    /// Restores flags one unit at a time. A unit leaves the snapshot only once
    /// its flag is back, so cancelling mid-way leaves the rest to `Drop`.
    pub async fn release(mut self) {
        while let Some((unit, enabled)) = self.snapshot.first().cloned() {
            restore_flag(self.host.as_ref(), &unit, enabled).await;
            self.snapshot.remove(0);
        }
    }
}

impl Drop for QuiesceGuard {
    fn drop(&mut self) {
        if self.snapshot.is_empty() {
            return;
        }

        let host = Arc::clone(&self.host);
        let snapshot = std::mem::take(&mut self.snapshot);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("backup interrupted; restoring autosave flags in the background");
                handle.spawn(async move {
                    restore_flags(host.as_ref(), &snapshot).await;
                });
            }
            Err(_) => warn!("backup interrupted outside a runtime; autosave flags were not restored"),
        }
    }
}

async fn restore_flags(host: &dyn DataStoreHost, snapshot: &[(DataStoreUnit, bool)]) {
    for (unit, enabled) in snapshot {
        restore_flag(host, unit, *enabled).await;
    }
}

async fn restore_flag(host: &dyn DataStoreHost, unit: &DataStoreUnit, enabled: bool) {
    if let Err(err) = host.set_autosave(unit, enabled).await {
        warn!("failed to restore autosave flag of {}: {}", unit.name, err);
    }
}

/// Quiesces `units`, runs `work` on the blocking pool and restores autosave
/// flags afterwards, whatever `work` returned. A failed or panicked `work` is
/// logged here and handed back to the caller once the flags are restored.
pub async fn run_backup_transaction<T, F>(
    host: Arc<dyn DataStoreHost>,
    units: &[DataStoreUnit],
    work: F,
) -> Result<T, BackupError>
where
    F: FnOnce() -> Result<T, BackupError> + Send + 'static,
    T: Send + 'static,
{
    let guard = QuiesceGuard::acquire(host, units).await;

    let outcome = match tokio::task::spawn_blocking(work).await {
        Ok(outcome) => outcome,
        Err(err) => Err(BackupError::pipeline(
            "running backup worker",
            io::Error::other(err.to_string()),
        )),
    };
    if let Err(err) = &outcome {
        warn!("failed to create backup: {}", err);
    }

    guard.release().await;
    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{QuiesceGuard, run_backup_transaction};
    use crate::errors::{BackupError, HostError};
    use crate::host::{DataStoreHost, DataStoreUnit};

    #[derive(Default)]
    struct RecordingHost {
        flags: Mutex<HashMap<String, bool>>,
        calls: Mutex<Vec<String>>,
        fail_flush: bool,
        /// The first call matching this hangs until cancelled.
        stall_once: Mutex<Option<String>>,
    }

    impl RecordingHost {
        fn with_flags(flags: &[(&str, bool)]) -> Self {
            Self {
                flags: Mutex::new(flags.iter().map(|(n, f)| (n.to_string(), *f)).collect()),
                ..Default::default()
            }
        }

        fn flag(&self, name: &str) -> bool {
            self.flags.lock().unwrap()[name]
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl DataStoreHost for RecordingHost {
        async fn units(&self) -> Result<Vec<DataStoreUnit>, HostError> {
            Ok(Vec::new())
        }

        async fn autosave(&self, unit: &DataStoreUnit) -> Result<bool, HostError> {
            Ok(self.flag(&unit.name))
        }

        async fn set_autosave(&self, unit: &DataStoreUnit, enabled: bool) -> Result<(), HostError> {
            let call = format!("set {} {}", unit.name, enabled);
            self.record(call.clone());
            let stall = {
                let mut stall_once = self.stall_once.lock().unwrap();
                if stall_once.as_deref() == Some(call.as_str()) {
                    stall_once.take()
                } else {
                    None
                }
            };
            if stall.is_some() {
                std::future::pending::<()>().await;
            }
            self.flags.lock().unwrap().insert(unit.name.clone(), enabled);
            Ok(())
        }

        async fn flush_sessions(&self) -> Result<(), HostError> {
            self.record("flush sessions".to_string());
            if self.fail_flush {
                return Err(HostError::new("players locked"));
            }
            Ok(())
        }

        async fn flush_unit(&self, unit: &DataStoreUnit) -> Result<(), HostError> {
            self.record(format!("flush {}", unit.name));
            if self.fail_flush {
                return Err(HostError::new("disk full"));
            }
            Ok(())
        }

        async fn online_sessions(&self) -> Result<Vec<String>, HostError> {
            Ok(Vec::new())
        }
    }

    fn units() -> Vec<DataStoreUnit> {
        vec![
            DataStoreUnit::new("y", "/srv/y"),
            DataStoreUnit::new("x", "/srv/x"),
        ]
    }

    #[tokio::test]
    async fn flags_are_forced_on_during_work_and_restored_after() {
        let host = Arc::new(RecordingHost::with_flags(&[("x", false), ("y", true)]));
        let observer = Arc::clone(&host);

        let during = run_backup_transaction(host.clone(), &units(), move || {
            Ok((observer.flag("x"), observer.flag("y")))
        })
        .await
        .expect("transaction succeeds");

        assert_eq!(during, (true, true));
        assert!(!host.flag("x"));
        assert!(host.flag("y"));
    }

    #[tokio::test]
    async fn sessions_flush_before_units_in_name_order() {
        let host = Arc::new(RecordingHost::with_flags(&[("x", true), ("y", true)]));

        run_backup_transaction(host.clone(), &units(), || Ok(()))
            .await
            .unwrap();

        let calls = host.calls();
        assert_eq!(
            &calls[..5],
            ["flush sessions", "set x true", "flush x", "set y true", "flush y"]
        );
    }

    #[tokio::test]
    async fn failing_work_still_restores_flags() {
        let host = Arc::new(RecordingHost::with_flags(&[("x", false), ("y", true)]));

        let err = run_backup_transaction(host.clone(), &units(), || -> Result<(), BackupError> {
            Err(BackupError::pipeline(
                "archiving world/level.dat",
                std::io::Error::other("injected"),
            ))
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("injected"));
        assert!(!host.flag("x"));
        assert!(host.flag("y"));
    }

    #[tokio::test]
    async fn panicking_work_still_restores_flags() {
        let host = Arc::new(RecordingHost::with_flags(&[("x", false), ("y", false)]));

        let err = run_backup_transaction(host.clone(), &units(), || -> Result<(), BackupError> {
            panic!("worker blew up")
        })
        .await
        .unwrap_err();

        assert!(matches!(err, BackupError::Pipeline { .. }));
        assert!(!host.flag("x"));
        assert!(!host.flag("y"));
    }

    #[tokio::test]
    async fn flush_failures_do_not_abort_the_backup() {
        let host = Arc::new(RecordingHost {
            flags: Mutex::new([("x".to_string(), false), ("y".to_string(), false)].into()),
            fail_flush: true,
            ..Default::default()
        });

        let ran = run_backup_transaction(host.clone(), &units(), || Ok(true))
            .await
            .unwrap();

        assert!(ran);
        assert!(!host.flag("x"));
        assert!(!host.flag("y"));
    }

    #[tokio::test]
    async fn restoration_happens_exactly_once() {
        let host = Arc::new(RecordingHost::with_flags(&[("x", false), ("y", true)]));

        run_backup_transaction(host.clone(), &units(), || Ok(()))
            .await
            .unwrap();

        let restores = host
            .calls()
            .into_iter()
            .filter(|c| c == "set x false" || c == "set y true")
            .count();
        assert_eq!(restores, 2);
    }

    #[tokio::test]
    async fn dropped_guard_restores_in_background() {
        let host = Arc::new(RecordingHost::with_flags(&[("x", false), ("y", true)]));

        let guard = QuiesceGuard::acquire(host.clone(), &units()).await;
        assert_eq!(guard.snapshot().len(), 2);
        assert!(host.flag("x"));
        drop(guard);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!host.flag("x"));
        assert!(host.flag("y"));
    }

    #[tokio::test]
    async fn cancelled_release_leaves_remaining_units_to_drop() {
        let host = Arc::new(RecordingHost::with_flags(&[("x", false), ("y", false)]));
        *host.stall_once.lock().unwrap() = Some("set y false".to_string());

        let guard = QuiesceGuard::acquire(host.clone(), &units()).await;
        let cancelled = tokio::time::timeout(Duration::from_millis(20), guard.release()).await;
        assert!(cancelled.is_err());
        assert!(!host.flag("x"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!host.flag("y"));
        let x_restores = host.calls().into_iter().filter(|c| c == "set x false").count();
        assert_eq!(x_restores, 1);
    }
}
