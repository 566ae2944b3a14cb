use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::errors::BackupError;

pub const DEFAULT_ZSTD_LEVEL: i32 = 10;
pub const DEFAULT_GZIP_LEVEL: i32 = 6;
pub const DEFAULT_ZIP_LEVEL: i32 = 6;

/// Output format of one backup artifact.
///
/// The tar variants stream the container through a separate codec; `Zip`
/// compresses each entry itself and needs no second pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionFormat {
    TarZstd,
    TarGzip,
    Zip,
}

impl CompressionFormat {
    pub const ALL: [CompressionFormat; 3] = [Self::TarZstd, Self::TarGzip, Self::Zip];

    /// Name used in configuration files and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::TarZstd => "zstd",
            Self::TarGzip => "gzip",
            Self::Zip => "zip",
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Self::TarZstd => ".tar.zst",
            Self::TarGzip => ".tar.gz",
            Self::Zip => ".zip",
        }
    }

    pub fn level_range(self) -> RangeInclusive<i32> {
        match self {
            Self::TarZstd => 1..=22,
            Self::TarGzip | Self::Zip => 0..=9,
        }
    }

    pub fn is_self_compressing(self) -> bool {
        matches!(self, Self::Zip)
    }

    pub fn validate_level(self, level: i32) -> Result<i32, BackupError> {
        let range = self.level_range();
        if !range.contains(&level) {
            return Err(BackupError::Config(format!(
                "{} compression level must be between {} and {}, inclusive (got {})",
                self.name(),
                range.start(),
                range.end(),
                level
            )));
        }
        Ok(level)
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionFormat {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.name() == wanted)
            .ok_or_else(|| {
                BackupError::Config(format!(
                    "unknown compression format '{}' (expected one of: zstd, gzip, zip)",
                    s.trim()
                ))
            })
    }
}

/// Validated quality levels for every format. Built once from configuration
/// and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevels {
    zstd: i32,
    gzip: i32,
    zip: i32,
}

impl CompressionLevels {
    pub fn new(zstd: i32, gzip: i32, zip: i32) -> Result<Self, BackupError> {
        Ok(Self {
            zstd: CompressionFormat::TarZstd.validate_level(zstd)?,
            gzip: CompressionFormat::TarGzip.validate_level(gzip)?,
            zip: CompressionFormat::Zip.validate_level(zip)?,
        })
    }

    pub fn level(&self, format: CompressionFormat) -> i32 {
        match format {
            CompressionFormat::TarZstd => self.zstd,
            CompressionFormat::TarGzip => self.gzip,
            CompressionFormat::Zip => self.zip,
        }
    }

    pub fn settings(&self, format: CompressionFormat) -> FormatSettings {
        FormatSettings {
            format,
            level: self.level(format),
        }
    }
}

impl Default for CompressionLevels {
    fn default() -> Self {
        Self {
            zstd: DEFAULT_ZSTD_LEVEL,
            gzip: DEFAULT_GZIP_LEVEL,
            zip: DEFAULT_ZIP_LEVEL,
        }
    }
}

/// A format together with its already-validated level; this is what the
/// pipeline consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSettings {
    format: CompressionFormat,
    level: i32,
}

impl FormatSettings {
    pub fn new(format: CompressionFormat, level: i32) -> Result<Self, BackupError> {
        Ok(Self {
            format,
            level: format.validate_level(level)?,
        })
    }

    pub fn format(&self) -> CompressionFormat {
        self.format
    }

    pub fn level(&self) -> i32 {
        self.level
    }
}
