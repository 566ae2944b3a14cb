use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a host adapter (flush, autosave toggle, session query).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("flush failed for {target}: {source}")]
    Flush {
        target: String,
        #[source]
        source: HostError,
    },

    #[error("I/O error while {context}: {source}")]
    Pipeline {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to delete backup {}: {source}", path.display())]
    RetentionDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("backup worker failed: {0}")]
    Worker(String),
}

impl BackupError {
    pub fn pipeline(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Pipeline {
            context: context.into(),
            source,
        }
    }

    pub fn flush(target: impl Into<String>, source: HostError) -> Self {
        Self::Flush {
            target: target.into(),
            source,
        }
    }
}
