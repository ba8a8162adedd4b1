use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::models::{FileValidationResult, IntegrityWarning, MediaType, Severity, TimestampSource};

pub const FILESYSTEM_FALLBACK_WARNING: &str =
    "No EXIF capture timestamp found; used filesystem modification time";

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("validation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Post-transfer check of a completed source/destination pair.
///
/// A missing capture timestamp is never an error; implementations fall
/// back to filesystem time and attach a warning.
#[async_trait]
pub trait IntegrityValidator: Send + Sync {
    async fn validate(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<FileValidationResult, ValidationError>;
}

/// Size check, EXIF capture time and optional BLAKE3 content comparison.
#[derive(Debug, Clone, Default)]
pub struct MediaIntegrityValidator {
    pub verify_checksums: bool,
}

impl MediaIntegrityValidator {
    pub fn new(verify_checksums: bool) -> Self {
        Self { verify_checksums }
    }
}

#[async_trait]
impl IntegrityValidator for MediaIntegrityValidator {
    async fn validate(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<FileValidationResult, ValidationError> {
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();
        let verify_checksums = self.verify_checksums;

        tokio::task::spawn_blocking(move || validate_blocking(&source, &destination, verify_checksums))
            .await?
    }
}

fn validate_blocking(
    source: &Path,
    destination: &Path,
    verify_checksums: bool,
) -> Result<FileValidationResult, ValidationError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| ValidationError::Io { path, source }
    };

    let source_meta = std::fs::metadata(source).map_err(io_err(source))?;
    let dest_meta = std::fs::metadata(destination).map_err(io_err(destination))?;

    let mut warnings = Vec::new();
    let source_size = source_meta.len();
    let dest_size = dest_meta.len();
    let size_match = source_size == dest_size;
    if !size_match {
        warnings.push(IntegrityWarning {
            message: format!(
                "Size mismatch: source is {} bytes, destination is {} bytes",
                source_size, dest_size
            ),
            severity: Severity::High,
        });
    }

    let media_type = MediaType::from_path(source);
    let exif_time = match media_type {
        Some(MediaType::Photo) => read_exif_timestamp(source),
        _ => None,
    };

    let (timestamp, timestamp_source) = match exif_time {
        Some(ts) => (ts, TimestampSource::Exif),
        None => {
            let modified = source_meta.modified().map_err(io_err(source))?;
            let severity = match media_type {
                // Video containers carry no EXIF; the fallback is expected.
                Some(MediaType::Video) => Severity::Low,
                _ => Severity::Medium,
            };
            warnings.push(IntegrityWarning {
                message: FILESYSTEM_FALLBACK_WARNING.to_string(),
                severity,
            });
            (
                DateTime::<Local>::from(modified).naive_local(),
                TimestampSource::Filesystem,
            )
        }
    };

    let checksum_match = if verify_checksums && size_match {
        let source_hash = hash_file_sync(source).map_err(io_err(source))?;
        let dest_hash = hash_file_sync(destination).map_err(io_err(destination))?;
        let matched = source_hash == dest_hash;
        if !matched {
            warnings.push(IntegrityWarning {
                message: "Checksum mismatch between source and destination".to_string(),
                severity: Severity::High,
            });
        }
        Some(matched)
    } else {
        None
    };

    debug!(
        file = %destination.display(),
        size_match,
        source = ?timestamp_source,
        warnings = warnings.len(),
        "Validated file"
    );

    Ok(FileValidationResult {
        file: destination.to_path_buf(),
        size_match,
        source_size,
        dest_size,
        timestamp,
        timestamp_source,
        checksum_match,
        warnings,
    })
}

/// Camera capture time: `DateTimeOriginal`, then `DateTime`.
fn read_exif_timestamp(path: &Path) -> Option<NaiveDateTime> {
    let file = std::fs::File::open(path).ok()?;
    let mut reader = io::BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(e) => {
            debug!(file = %path.display(), error = %e, "No readable EXIF data");
            return None;
        }
    };

    [exif::Tag::DateTimeOriginal, exif::Tag::DateTime]
        .into_iter()
        .find_map(|tag| {
            let field = exif.get_field(tag, exif::In::PRIMARY)?;
            match &field.value {
                exif::Value::Ascii(values) => values.first().and_then(|raw| parse_exif_datetime(raw)),
                _ => None,
            }
        })
}

fn parse_exif_datetime(raw: &[u8]) -> Option<NaiveDateTime> {
    let dt = exif::DateTime::from_ascii(raw).ok()?;
    NaiveDate::from_ymd_opt(dt.year.into(), dt.month.into(), dt.day.into())?.and_hms_opt(
        dt.hour.into(),
        dt.minute.into(),
        dt.second.into(),
    )
}

/// Hash a file using BLAKE3, streaming in chunks to handle large files
fn hash_file_sync(path: &Path) -> io::Result<blake3::Hash> {
    let file = std::fs::File::open(path)?;
    let mut reader = io::BufReader::with_capacity(128 * 1024, file);
    let mut hasher = blake3::Hasher::new();

    let mut buffer = vec![0u8; 128 * 1024];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pair(dir: &Path, name: &str, source: &[u8], dest: &[u8]) -> (PathBuf, PathBuf) {
        let s = dir.join("src").join(name);
        let d = dir.join("dst").join(name);
        std::fs::create_dir_all(s.parent().unwrap()).unwrap();
        std::fs::create_dir_all(d.parent().unwrap()).unwrap();
        std::fs::write(&s, source).unwrap();
        std::fs::write(&d, dest).unwrap();
        (s, d)
    }

    #[test]
    fn test_parse_exif_datetime() {
        let ts = parse_exif_datetime(b"2024:03:15 14:22:05").unwrap();
        assert_eq!(ts.to_string(), "2024-03-15 14:22:05");
        assert!(parse_exif_datetime(b"not a date").is_none());
    }

    #[tokio::test]
    async fn test_photo_without_exif_falls_back_to_filesystem() {
        let temp = tempdir().unwrap();
        let (s, d) = pair(temp.path(), "IMG_0001.JPG", b"not really a jpeg", b"not really a jpeg");

        let result = MediaIntegrityValidator::default().validate(&s, &d).await.unwrap();

        assert!(result.size_match);
        assert_eq!(result.timestamp_source, TimestampSource::Filesystem);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].message, FILESYSTEM_FALLBACK_WARNING);
        assert_eq!(result.warnings[0].severity, Severity::Medium);
        assert_eq!(result.checksum_match, None);
    }

    #[tokio::test]
    async fn test_video_fallback_is_low_severity() {
        let temp = tempdir().unwrap();
        let (s, d) = pair(temp.path(), "C0001.MP4", b"clip", b"clip");

        let result = MediaIntegrityValidator::default().validate(&s, &d).await.unwrap();
        assert_eq!(result.timestamp_source, TimestampSource::Filesystem);
        assert_eq!(result.warnings[0].severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_size_mismatch_is_high_severity() {
        let temp = tempdir().unwrap();
        let (s, d) = pair(temp.path(), "C0001.MOV", b"full content", b"full");

        let result = MediaIntegrityValidator::new(true).validate(&s, &d).await.unwrap();
        assert!(!result.size_match);
        assert_eq!(result.source_size, 12);
        assert_eq!(result.dest_size, 4);
        assert!(result.warnings.iter().any(|w| w.severity == Severity::High));
        // Hashing is skipped once sizes differ.
        assert_eq!(result.checksum_match, None);
    }

    #[tokio::test]
    async fn test_checksum_detects_corruption() {
        let temp = tempdir().unwrap();
        let (s, d) = pair(temp.path(), "C0001.MOV", b"original", b"corrupt!");

        let result = MediaIntegrityValidator::new(true).validate(&s, &d).await.unwrap();
        assert!(result.size_match);
        assert_eq!(result.checksum_match, Some(false));
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.message.contains("Checksum mismatch"))
        );
    }

    #[tokio::test]
    async fn test_checksum_match() {
        let temp = tempdir().unwrap();
        let (s, d) = pair(temp.path(), "C0001.MOV", b"same bytes", b"same bytes");

        let result = MediaIntegrityValidator::new(true).validate(&s, &d).await.unwrap();
        assert_eq!(result.checksum_match, Some(true));
    }

    #[tokio::test]
    async fn test_missing_destination_is_an_error() {
        let temp = tempdir().unwrap();
        let (s, d) = pair(temp.path(), "a.jpg", b"x", b"x");
        std::fs::remove_file(&d).unwrap();

        let result = MediaIntegrityValidator::default().validate(&s, &d).await;
        assert!(matches!(result, Err(ValidationError::Io { .. })));
    }
}
