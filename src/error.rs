use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::formats::IntegrityError;

/// Import pipeline failures.
///
/// Every variant carries the subject path so an API layer can render a
/// client-facing message without looking at pipeline internals.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("File not found: {}", .path.display())]
    FileNotFound { path: PathBuf },

    #[error("File error on {}: {reason}", .path.display())]
    FileError { path: PathBuf, reason: String },

    #[error("No matching format for {}", .path.display())]
    NoMatchingFormat { path: PathBuf },

    #[error("Archive {} could not be extracted: {reason}", .path.display())]
    Archive { path: PathBuf, reason: String },

    #[error("Image {} failed integrity check ({} error(s))", .path.display(), .errors.len())]
    ImageParsing {
        path: PathBuf,
        errors: Vec<IntegrityError>,
    },

    #[error(
        "Format conversion failed for {}{}",
        .path.display(),
        .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
    )]
    FormatConversion {
        path: PathBuf,
        reason: Option<String>,
    },
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::FileNotFound { .. } => ErrorKind::FileNotFound,
            ImportError::FileError { .. } => ErrorKind::FileError,
            ImportError::NoMatchingFormat { .. } => ErrorKind::NoMatchingFormat,
            ImportError::Archive { .. } => ErrorKind::ArchiveError,
            ImportError::ImageParsing { .. } => ErrorKind::ImageParsingProblem,
            ImportError::FormatConversion { .. } => ErrorKind::FormatConversionProblem,
        }
    }

    /// Path the failure is scoped to.
    pub fn path(&self) -> &Path {
        match self {
            ImportError::FileNotFound { path }
            | ImportError::FileError { path, .. }
            | ImportError::NoMatchingFormat { path }
            | ImportError::Archive { path, .. }
            | ImportError::ImageParsing { path, .. }
            | ImportError::FormatConversion { path, .. } => path,
        }
    }

    pub(crate) fn file_error(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ImportError::FileError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure kinds, distinguishable without matching on payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FileNotFound,
    FileError,
    NoMatchingFormat,
    ArchiveError,
    ImageParsingProblem,
    FormatConversionProblem,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FileNotFound => "file_not_found",
            ErrorKind::FileError => "file_error",
            ErrorKind::NoMatchingFormat => "no_matching_format",
            ErrorKind::ArchiveError => "archive_error",
            ErrorKind::ImageParsingProblem => "image_parsing_problem",
            ErrorKind::FormatConversionProblem => "format_conversion_problem",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
