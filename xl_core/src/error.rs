//! Conversion Error Types
//!
//! Every failure inside a job is one of these. The job boundary turns them
//! into a single `Exception` lifecycle event (code + message + item name);
//! `Cancelled` is not a failure and maps to a `Canceled` event instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvError {
    /// Missing / unwritable / empty output, disk-space shortfall, rename failure.
    #[error("{message}")]
    File { code: &'static str, message: String },

    /// Unsupported format combination, empty selection pool, unknown key.
    #[error("{message}")]
    Generic { code: &'static str, message: String },

    /// Cooperative abort. Partial output is already cleaned up when this is raised.
    #[error("Conversion canceled")]
    Cancelled,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl ConvError {
    pub fn file(code: &'static str, message: impl Into<String>) -> Self {
        ConvError::File {
            code,
            message: message.into(),
        }
    }

    pub fn generic(code: &'static str, message: impl Into<String>) -> Self {
        ConvError::Generic {
            code,
            message: message.into(),
        }
    }

    /// Stable identifier shown in the post-batch report.
    pub fn code(&self) -> &str {
        match self {
            ConvError::File { code, .. } | ConvError::Generic { code, .. } => code,
            ConvError::Cancelled => "Canceled",
            ConvError::Io(_) => "OSError",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConvError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ConvError>;

/// Reasons a whole batch is refused before any job starts.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("File list is empty")]
    EmptyList,

    #[error("Select at least one format for Smallest Lossless")]
    EmptyFormatPool,

    #[error("A relative output path cannot be combined with keeping the folder structure")]
    RelativeDirWithStructure,

    #[error("Output directory is not accessible: {path}: {source}")]
    OutputDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(ConvError::file("F2", "missing").code(), "F2");
        assert_eq!(ConvError::generic("CF0", "anim").code(), "CF0");
        assert_eq!(ConvError::Cancelled.code(), "Canceled");

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ConvError = io.into();
        assert_eq!(err.code(), "OSError");
        assert_eq!(err.to_string(), "denied");
    }

    #[test]
    fn test_message_is_display() {
        let err = ConvError::file("S2", "No space left on device.");
        assert_eq!(err.to_string(), "No space left on device.");
        assert!(!err.is_cancelled());
        assert!(ConvError::Cancelled.is_cancelled());
    }
}
