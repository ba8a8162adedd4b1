//! Classification of transfer failures into retryable and fatal categories.
//!
//! Classification is a pure function of the error value so the retry
//! coordinator can decide what to do without inspecting control flow.

use serde::{Deserialize, Serialize};
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use thiserror::Error;

use super::security::SecurityError;

/// Error returned by a single transfer attempt.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("path rejected: {0}")]
    Security(#[from] SecurityError),

    #[error("failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        TransferError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Stable error code: the errno name for I/O failures.
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Security(e) => e.code(),
            TransferError::Io { source, .. } => io_error_code(source),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorCategory {
    Transient,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub code: String,
    pub user_message: String,
    pub recovery_action: String,
}

impl ErrorClassification {
    fn new(category: ErrorCategory, code: &str, user_message: &str, recovery_action: &str) -> Self {
        Self {
            category,
            code: code.to_string(),
            user_message: user_message.to_string(),
            recovery_action: recovery_action.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.category == ErrorCategory::Transient
    }

    pub fn card_removed() -> Self {
        Self::new(
            ErrorCategory::Fatal,
            "CARD_REMOVED",
            "The memory card was removed during transfer",
            "Reinsert the card and start the transfer again",
        )
    }
}

/// Map an I/O error to its errno name, falling back on the error kind.
pub fn io_error_code(error: &io::Error) -> &'static str {
    if let Some(errno) = error.raw_os_error() {
        match errno {
            libc::ENOENT => return "ENOENT",
            libc::EBUSY => return "EBUSY",
            libc::ESTALE => return "ESTALE",
            libc::ETIMEDOUT => return "ETIMEDOUT",
            libc::EAGAIN => return "EAGAIN",
            libc::EINTR => return "EINTR",
            libc::EIO => return "EIO",
            libc::ENODEV => return "ENODEV",
            libc::ENXIO => return "ENXIO",
            libc::ENOSPC => return "ENOSPC",
            libc::EDQUOT => return "EDQUOT",
            libc::EACCES => return "EACCES",
            libc::EPERM => return "EPERM",
            libc::EROFS => return "EROFS",
            libc::EISDIR => return "EISDIR",
            libc::ENAMETOOLONG => return "ENAMETOOLONG",
            _ => {}
        }
    }

    match error.kind() {
        ErrorKind::NotFound => "ENOENT",
        ErrorKind::PermissionDenied => "EACCES",
        ErrorKind::TimedOut => "ETIMEDOUT",
        ErrorKind::Interrupted => "EINTR",
        ErrorKind::WouldBlock => "EAGAIN",
        _ => "UNKNOWN",
    }
}

/// Classify a failed attempt.
pub fn classify(error: &TransferError) -> ErrorClassification {
    use ErrorCategory::{Fatal, Transient};

    if let TransferError::Security(e) = error {
        return ErrorClassification::new(
            Fatal,
            e.code(),
            "The file path is outside the allowed folder",
            "Check the source and destination folders in the transfer settings",
        );
    }

    let code = error.code();
    match code {
        "ENOENT" => ErrorClassification::new(
            Transient,
            code,
            "The file is temporarily unavailable",
            "Retrying automatically; make sure the source is still connected",
        ),
        "EBUSY" => ErrorClassification::new(
            Transient,
            code,
            "The file is locked by another process",
            "Retrying automatically; close any application using the file",
        ),
        "ESTALE" => ErrorClassification::new(
            Transient,
            code,
            "The network file handle went stale",
            "Retrying automatically; check the network share",
        ),
        "ETIMEDOUT" => ErrorClassification::new(
            Transient,
            code,
            "The network path timed out",
            "Retrying automatically; check the network connection",
        ),
        "EAGAIN" | "EINTR" => ErrorClassification::new(
            Transient,
            code,
            "The operation was interrupted",
            "Retrying automatically",
        ),
        "EIO" | "ENODEV" | "ENXIO" => ErrorClassification::new(
            Transient,
            code,
            "A device I/O error occurred",
            "Retrying automatically; check that the card is still inserted",
        ),
        "ENOSPC" | "EDQUOT" => ErrorClassification::new(
            Fatal,
            code,
            "The destination disk is full",
            "Free up disk space",
        ),
        "EACCES" | "EPERM" => ErrorClassification::new(
            Fatal,
            code,
            "Permission denied",
            "Check the permissions of the destination folder",
        ),
        "EROFS" => ErrorClassification::new(
            Fatal,
            code,
            "The destination is read-only",
            "Remount the destination with write access",
        ),
        _ => ErrorClassification::new(
            Fatal,
            code,
            "An unexpected error occurred",
            "Check the logs for details and retry the transfer",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os_error(errno: i32) -> TransferError {
        TransferError::io("read", "/card/a.jpg", io::Error::from_raw_os_error(errno))
    }

    #[test]
    fn test_transient_codes() {
        for (errno, code) in [
            (libc::ENOENT, "ENOENT"),
            (libc::EBUSY, "EBUSY"),
            (libc::ESTALE, "ESTALE"),
            (libc::ETIMEDOUT, "ETIMEDOUT"),
        ] {
            let classification = classify(&os_error(errno));
            assert_eq!(classification.category, ErrorCategory::Transient);
            assert_eq!(classification.code, code);
        }
    }

    #[test]
    fn test_fatal_codes() {
        let full = classify(&os_error(libc::ENOSPC));
        assert_eq!(full.category, ErrorCategory::Fatal);
        assert_eq!(full.code, "ENOSPC");
        assert!(full.user_message.contains("disk is full"));
        assert_eq!(full.recovery_action, "Free up disk space");

        let denied = classify(&os_error(libc::EACCES));
        assert_eq!(denied.category, ErrorCategory::Fatal);
        assert_eq!(denied.code, "EACCES");
    }

    #[test]
    fn test_error_kind_fallback() {
        let err = TransferError::io("open", "/x", io::Error::new(ErrorKind::NotFound, "gone"));
        assert_eq!(err.code(), "ENOENT");
        assert!(classify(&err).is_transient());
    }

    #[test]
    fn test_unknown_is_fatal() {
        let err = TransferError::io("write", "/x", io::Error::other("weird"));
        let classification = classify(&err);
        assert_eq!(classification.code, "UNKNOWN");
        assert_eq!(classification.category, ErrorCategory::Fatal);
    }

    #[test]
    fn test_security_rejection_is_fatal() {
        let err = TransferError::from(SecurityError::PathTraversal {
            path: PathBuf::from("/etc/passwd"),
            allowed: PathBuf::from("/card"),
        });
        let classification = classify(&err);
        assert_eq!(classification.category, ErrorCategory::Fatal);
        assert_eq!(classification.code, "PATH_TRAVERSAL");
    }

    #[test]
    fn test_category_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&ErrorCategory::Transient).unwrap(),
            r#""TRANSIENT""#
        );
    }
}
