use chrono::{DateTime, Local, TimeZone};

use crate::format::CompressionFormat;

/// Fixed-width, zero-padded timestamp so file names sort by creation time.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

const DEFAULT_LABEL: &str = "backup";

pub fn format_timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// `<timestamp>--<label><suffix>`
pub fn artifact_file_name<Tz: TimeZone>(
    at: &DateTime<Tz>,
    label: &str,
    format: CompressionFormat,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}--{}{}",
        format_timestamp(at),
        sanitize_label(label),
        format.suffix()
    )
}

pub fn artifact_file_name_now(label: &str, format: CompressionFormat) -> String {
    artifact_file_name(&Local::now(), label, format)
}

/// Labels come from player names and operator input; keep them to one path component.
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_whitespace() || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        DEFAULT_LABEL.to_string()
    } else {
        cleaned
    }
}

/// True for names starting with `\d{8}T\d{6}`; anything else in the backup
/// directory is left alone by retention.
pub fn is_artifact_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < 15 {
        return false;
    }
    bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[8] == b'T'
        && bytes[9..15].iter().all(u8::is_ascii_digit)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{artifact_file_name, is_artifact_name, sanitize_label};
    use crate::format::CompressionFormat;

    #[test]
    fn names_are_timestamp_label_suffix() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 4, 5, 9).unwrap();
        assert_eq!(
            artifact_file_name(&at, "console", CompressionFormat::TarZstd),
            "20250307T040509--console.tar.zst"
        );
        assert_eq!(
            artifact_file_name(&at, "Steve-quit", CompressionFormat::Zip),
            "20250307T040509--Steve-quit.zip"
        );
    }

    #[test]
    fn same_second_different_labels_do_not_collide() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 4, 5, 9).unwrap();
        let a = artifact_file_name(&at, "alex-join", CompressionFormat::TarZstd);
        let b = artifact_file_name(&at, "autobackup", CompressionFormat::TarZstd);
        assert_ne!(a, b);
    }

    #[test]
    fn later_seconds_sort_after_earlier_ones() {
        let early = Utc.with_ymd_and_hms(2025, 9, 30, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
        let a = artifact_file_name(&early, "zzz", CompressionFormat::Zip);
        let b = artifact_file_name(&late, "aaa", CompressionFormat::Zip);
        assert!(a < b);
    }

    #[test]
    fn recognises_artifact_names() {
        assert!(is_artifact_name("20250307T040509--console.tar.zst"));
        assert!(is_artifact_name("20250307T040509"));
        assert!(!is_artifact_name(".backupd.lock"));
        assert!(!is_artifact_name("2025030T040509--x.zip"));
        assert!(!is_artifact_name("20250307-040509--x.zip"));
        assert!(!is_artifact_name("notes.txt"));
    }

    #[test]
    fn labels_stay_single_component() {
        assert_eq!(sanitize_label("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_label("two words"), "two_words");
        assert_eq!(sanitize_label("   "), "backup");
        assert_eq!(sanitize_label(".."), "backup");
    }
}
