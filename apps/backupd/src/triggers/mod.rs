pub mod interval;
pub mod sessions;

pub use interval::{IntervalSchedule, run_interval_backups};
pub use sessions::{SessionTriggers, watch_sessions};
