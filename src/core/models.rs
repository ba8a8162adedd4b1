use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::failure::ErrorClassification;

/// Media category of a file found on the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
}

impl MediaType {
    /// Classify by lower-cased extension. Anything that is not a known
    /// photo or video extension is excluded.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Photo),
            "mov" | "mp4" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
        }
    }
}

/// The two destination roots for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDestinations {
    pub photos: PathBuf,
    #[serde(alias = "raw_videos")]
    pub raw_videos: PathBuf,
}

impl TransferDestinations {
    /// Root a file of the given media type is routed to.
    pub fn root_for(&self, media_type: MediaType) -> &Path {
        match media_type {
            MediaType::Photo => &self.photos,
            MediaType::Video => &self.raw_videos,
        }
    }
}

/// One file to move from the card to its destination root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTask {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size: u64,
    pub media_type: MediaType,
    pub enqueued_at: DateTime<Utc>,
}

impl TransferTask {
    /// File name used in progress events and logs.
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

/// Progress of a single file stream, as reported by a transfer engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProgress {
    pub file_name: String,
    pub bytes_transferred: u64,
    pub file_size: u64,
    pub eta_ms: Option<u64>,
}

/// Batch-level progress forwarded to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub current_file: String,
    /// 1-based index of the file being transferred.
    pub file_index: usize,
    pub files_total: usize,
    pub current_file_bytes: u64,
    pub current_file_size: u64,
    pub total_bytes_transferred: u64,
    pub total_bytes_expected: u64,
    pub percent_complete: f64,
    pub eta_seconds: Option<u64>,
}

/// Outcome of the final attempt at streaming one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransferResult {
    pub success: bool,
    pub bytes_transferred: u64,
    pub duration_ms: u64,
    pub warnings: Vec<String>,
}

/// Emitted once per successfully transferred file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCompletion {
    pub source: PathBuf,
    pub destination: PathBuf,
    #[serde(flatten)]
    pub result: FileTransferResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Where the canonical capture timestamp came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampSource {
    #[serde(rename = "EXIF")]
    Exif,
    #[serde(rename = "filesystem")]
    Filesystem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityWarning {
    pub message: String,
    pub severity: Severity,
}

/// Result of checking one completed source/destination pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileValidationResult {
    pub file: PathBuf,
    pub size_match: bool,
    pub source_size: u64,
    pub dest_size: u64,
    pub timestamp: NaiveDateTime,
    pub timestamp_source: TimestampSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_match: Option<bool>,
    pub warnings: Vec<IntegrityWarning>,
}

/// A validation warning attributed to a file, aggregated into the batch result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    pub file: PathBuf,
    pub message: String,
    pub severity: Severity,
}

/// One failed file in a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    pub file: PathBuf,
    pub code: String,
    pub message: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ErrorClassification>,
    pub card_removed: bool,
}

/// Result of a whole batch, returned to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub success: bool,
    pub files_transferred: usize,
    pub files_total: usize,
    pub bytes_transferred: u64,
    pub duration_ms: u64,
    pub validation_warnings: Vec<ValidationWarning>,
    pub errors: Vec<BatchError>,
}
