//! Backup pipeline for a live server's world directories: quiesce the host,
//! stream the worlds into one compressed artifact, then trim old artifacts.

pub mod archive;
pub mod codec;
pub mod errors;
pub mod format;
pub mod host;
pub mod naming;
pub mod pipeline;
pub mod quiesce;
pub mod retention;
pub mod service;

pub use errors::{BackupError, HostError};
pub use format::{CompressionFormat, CompressionLevels, FormatSettings};
pub use host::{DataStoreHost, DataStoreUnit, OfflineHost};
pub use pipeline::{ArtifactSummary, build_artifact};
pub use quiesce::{QuiesceGuard, run_backup_transaction};
pub use retention::{BackupArtifact, RetentionPolicy, RetentionReport};
pub use service::{BackupOutcome, BackupService, BackupSettings};
