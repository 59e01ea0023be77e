//! Import lifecycle events
//!
//! Every pipeline phase is bracketed by a start event and either an end or an
//! error event. Each run ends with exactly one terminal event:
//! [`ImportEvent::EndSuccessfulImport`] or [`ImportEvent::FileError`].
//!
//! Listeners receive events synchronously in registration order. Delivery is
//! best-effort: a listener that does not handle a kind, or fails handling it,
//! is logged and skipped.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::formats::IntegrityError;
use crate::listeners::ProjectListener;

/// Filesystem primitive that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FsOperation {
    CreateDir,
    Move,
    Copy,
    Symlink,
}

impl fmt::Display for FsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FsOperation::CreateDir => "mkdir",
            FsOperation::Move => "move",
            FsOperation::Copy => "copy",
            FsOperation::Symlink => "symlink",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ImportEvent {
    StartDataExtraction { path: PathBuf },
    EndDataExtraction { path: PathBuf },
    ErrorDataExtraction { path: PathBuf, error: String },
    FileNotFound { path: PathBuf },
    MovedPendingFile { from: PathBuf, to: PathBuf },
    FileOperationFailed { op: FsOperation, path: PathBuf, error: String },

    StartFormatDetection { path: PathBuf },
    EndFormatDetection { path: PathBuf, format: String },
    ErrorNoFormat { path: PathBuf },

    StartUnpacking { path: PathBuf },
    EndUnpacking {
        path: PathBuf,
        original: PathBuf,
        format: Option<String>,
        is_collection: bool,
    },
    ErrorUnpacking { path: PathBuf, error: String },

    StartIntegrityCheck { path: PathBuf },
    EndIntegrityCheck { path: PathBuf },
    ErrorIntegrityCheck { path: PathBuf, errors: Vec<IntegrityError> },

    StartSpatialDeploy { path: PathBuf },
    EndSpatialDeploy { path: PathBuf, spatial: PathBuf },
    ErrorSpatialDeploy { path: PathBuf, error: String },

    StartConversion { path: PathBuf, source: PathBuf },
    EndConversion { path: PathBuf },
    ErrorConversion { path: PathBuf, error: Option<String> },

    StartHistogramDeploy { path: PathBuf, image: PathBuf },
    EndHistogramDeploy { path: PathBuf },
    ErrorHistogram { path: PathBuf, error: String },

    RegisterFile { path: PathBuf, parent: PathBuf },
    FileError { path: PathBuf, error: String },
    EndSuccessfulImport { path: PathBuf, original: Option<PathBuf> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportEventKind {
    StartDataExtraction,
    EndDataExtraction,
    ErrorDataExtraction,
    FileNotFound,
    MovedPendingFile,
    FileOperationFailed,
    StartFormatDetection,
    EndFormatDetection,
    ErrorNoFormat,
    StartUnpacking,
    EndUnpacking,
    ErrorUnpacking,
    StartIntegrityCheck,
    EndIntegrityCheck,
    ErrorIntegrityCheck,
    StartSpatialDeploy,
    EndSpatialDeploy,
    ErrorSpatialDeploy,
    StartConversion,
    EndConversion,
    ErrorConversion,
    StartHistogramDeploy,
    EndHistogramDeploy,
    ErrorHistogram,
    RegisterFile,
    FileError,
    EndSuccessfulImport,
}

/// Pipeline phases with start/end/error boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    DataExtraction,
    FormatDetection,
    Unpacking,
    IntegrityCheck,
    SpatialDeploy,
    Conversion,
    HistogramDeploy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Boundary {
    Start,
    End,
    Error,
}

impl ImportEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportEventKind::StartDataExtraction => "start_data_extraction",
            ImportEventKind::EndDataExtraction => "end_data_extraction",
            ImportEventKind::ErrorDataExtraction => "error_data_extraction",
            ImportEventKind::FileNotFound => "file_not_found",
            ImportEventKind::MovedPendingFile => "moved_pending_file",
            ImportEventKind::FileOperationFailed => "file_operation_failed",
            ImportEventKind::StartFormatDetection => "start_format_detection",
            ImportEventKind::EndFormatDetection => "end_format_detection",
            ImportEventKind::ErrorNoFormat => "error_no_format",
            ImportEventKind::StartUnpacking => "start_unpacking",
            ImportEventKind::EndUnpacking => "end_unpacking",
            ImportEventKind::ErrorUnpacking => "error_unpacking",
            ImportEventKind::StartIntegrityCheck => "start_integrity_check",
            ImportEventKind::EndIntegrityCheck => "end_integrity_check",
            ImportEventKind::ErrorIntegrityCheck => "error_integrity_check",
            ImportEventKind::StartSpatialDeploy => "start_spatial_deploy",
            ImportEventKind::EndSpatialDeploy => "end_spatial_deploy",
            ImportEventKind::ErrorSpatialDeploy => "error_spatial_deploy",
            ImportEventKind::StartConversion => "start_conversion",
            ImportEventKind::EndConversion => "end_conversion",
            ImportEventKind::ErrorConversion => "error_conversion",
            ImportEventKind::StartHistogramDeploy => "start_histogram_deploy",
            ImportEventKind::EndHistogramDeploy => "end_histogram_deploy",
            ImportEventKind::ErrorHistogram => "error_histogram",
            ImportEventKind::RegisterFile => "register_file",
            ImportEventKind::FileError => "file_error",
            ImportEventKind::EndSuccessfulImport => "end_successful_import",
        }
    }

    /// Phase boundary this kind marks, if any. A missing pending file closes
    /// the data extraction phase.
    pub fn phase_boundary(&self) -> Option<(Phase, Boundary)> {
        use Boundary::*;
        use ImportEventKind as K;

        let boundary = match self {
            K::StartDataExtraction => (Phase::DataExtraction, Start),
            K::EndDataExtraction => (Phase::DataExtraction, End),
            K::ErrorDataExtraction | K::FileNotFound => (Phase::DataExtraction, Error),
            K::StartFormatDetection => (Phase::FormatDetection, Start),
            K::EndFormatDetection => (Phase::FormatDetection, End),
            K::ErrorNoFormat => (Phase::FormatDetection, Error),
            K::StartUnpacking => (Phase::Unpacking, Start),
            K::EndUnpacking => (Phase::Unpacking, End),
            K::ErrorUnpacking => (Phase::Unpacking, Error),
            K::StartIntegrityCheck => (Phase::IntegrityCheck, Start),
            K::EndIntegrityCheck => (Phase::IntegrityCheck, End),
            K::ErrorIntegrityCheck => (Phase::IntegrityCheck, Error),
            K::StartSpatialDeploy => (Phase::SpatialDeploy, Start),
            K::EndSpatialDeploy => (Phase::SpatialDeploy, End),
            K::ErrorSpatialDeploy => (Phase::SpatialDeploy, Error),
            K::StartConversion => (Phase::Conversion, Start),
            K::EndConversion => (Phase::Conversion, End),
            K::ErrorConversion => (Phase::Conversion, Error),
            K::StartHistogramDeploy => (Phase::HistogramDeploy, Start),
            K::EndHistogramDeploy => (Phase::HistogramDeploy, End),
            K::ErrorHistogram => (Phase::HistogramDeploy, Error),
            K::MovedPendingFile
            | K::FileOperationFailed
            | K::RegisterFile
            | K::FileError
            | K::EndSuccessfulImport => return None,
        };
        Some(boundary)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportEventKind::FileError | ImportEventKind::EndSuccessfulImport)
    }
}

impl fmt::Display for ImportEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ImportEvent {
    pub fn kind(&self) -> ImportEventKind {
        use ImportEvent as E;
        use ImportEventKind as K;

        match self {
            E::StartDataExtraction { .. } => K::StartDataExtraction,
            E::EndDataExtraction { .. } => K::EndDataExtraction,
            E::ErrorDataExtraction { .. } => K::ErrorDataExtraction,
            E::FileNotFound { .. } => K::FileNotFound,
            E::MovedPendingFile { .. } => K::MovedPendingFile,
            E::FileOperationFailed { .. } => K::FileOperationFailed,
            E::StartFormatDetection { .. } => K::StartFormatDetection,
            E::EndFormatDetection { .. } => K::EndFormatDetection,
            E::ErrorNoFormat { .. } => K::ErrorNoFormat,
            E::StartUnpacking { .. } => K::StartUnpacking,
            E::EndUnpacking { .. } => K::EndUnpacking,
            E::ErrorUnpacking { .. } => K::ErrorUnpacking,
            E::StartIntegrityCheck { .. } => K::StartIntegrityCheck,
            E::EndIntegrityCheck { .. } => K::EndIntegrityCheck,
            E::ErrorIntegrityCheck { .. } => K::ErrorIntegrityCheck,
            E::StartSpatialDeploy { .. } => K::StartSpatialDeploy,
            E::EndSpatialDeploy { .. } => K::EndSpatialDeploy,
            E::ErrorSpatialDeploy { .. } => K::ErrorSpatialDeploy,
            E::StartConversion { .. } => K::StartConversion,
            E::EndConversion { .. } => K::EndConversion,
            E::ErrorConversion { .. } => K::ErrorConversion,
            E::StartHistogramDeploy { .. } => K::StartHistogramDeploy,
            E::EndHistogramDeploy { .. } => K::EndHistogramDeploy,
            E::ErrorHistogram { .. } => K::ErrorHistogram,
            E::RegisterFile { .. } => K::RegisterFile,
            E::FileError { .. } => K::FileError,
            E::EndSuccessfulImport { .. } => K::EndSuccessfulImport,
        }
    }

    /// Subject path of the event.
    pub fn path(&self) -> &std::path::Path {
        use ImportEvent as E;

        match self {
            E::MovedPendingFile { to, .. } => to,
            E::StartDataExtraction { path }
            | E::EndDataExtraction { path }
            | E::ErrorDataExtraction { path, .. }
            | E::FileNotFound { path }
            | E::FileOperationFailed { path, .. }
            | E::StartFormatDetection { path }
            | E::EndFormatDetection { path, .. }
            | E::ErrorNoFormat { path }
            | E::StartUnpacking { path }
            | E::EndUnpacking { path, .. }
            | E::ErrorUnpacking { path, .. }
            | E::StartIntegrityCheck { path }
            | E::EndIntegrityCheck { path }
            | E::ErrorIntegrityCheck { path, .. }
            | E::StartSpatialDeploy { path }
            | E::EndSpatialDeploy { path, .. }
            | E::ErrorSpatialDeploy { path, .. }
            | E::StartConversion { path, .. }
            | E::EndConversion { path }
            | E::ErrorConversion { path, .. }
            | E::StartHistogramDeploy { path, .. }
            | E::EndHistogramDeploy { path }
            | E::ErrorHistogram { path, .. }
            | E::RegisterFile { path, .. }
            | E::FileError { path, .. }
            | E::EndSuccessfulImport { path, .. } => path,
        }
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listener has no handler for this kind. Tolerated.
    #[error("No handler for {0}")]
    Unhandled(ImportEventKind),

    #[error("Listener failed: {0}")]
    Failed(String),
}

/// Observer of import events.
pub trait ImportListener: Send + Sync {
    fn name(&self) -> &str;

    fn on_event(&self, event: &ImportEvent) -> Result<(), ListenerError>;

    /// Project mirroring capability, used to build child listeners during
    /// collection imports.
    fn as_project(&self) -> Option<&ProjectListener> {
        None
    }
}

/// Ordered set of listeners of one import run.
#[derive(Default)]
pub struct Listeners {
    inner: Vec<Box<dyn ImportListener>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, listener: Box<dyn ImportListener>) {
        self.inner.push(listener);
    }

    pub fn with(mut self, listener: impl ImportListener + 'static) -> Self {
        self.push(Box::new(listener));
        self
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Deliver `event` to every listener in order.
    pub fn notify(&self, event: &ImportEvent) {
        let kind = event.kind();
        for listener in &self.inner {
            match listener.on_event(event) {
                Ok(()) => {}
                Err(ListenerError::Unhandled(_)) => {
                    debug!(listener = listener.name(), event = %kind, "Event not handled");
                }
                Err(e) => {
                    warn!(listener = listener.name(), event = %kind, "Listener failed: {}", e);
                }
            }
        }
    }

    /// First listener mirroring progress into a project.
    pub fn project(&self) -> Option<&ProjectListener> {
        self.inner.iter().find_map(|l| l.as_project())
    }
}

impl From<Vec<Box<dyn ImportListener>>> for Listeners {
    fn from(inner: Vec<Box<dyn ImportListener>>) -> Self {
        Self { inner }
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.inner.iter().map(|l| l.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recording {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
        behaviour: Option<fn(ImportEventKind) -> ListenerError>,
    }

    impl ImportListener for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn on_event(&self, event: &ImportEvent) -> Result<(), ListenerError> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event.kind()));
            match self.behaviour {
                Some(fail) => Err(fail(event.kind())),
                None => Ok(()),
            }
        }
    }

    #[test]
    fn test_delivery_continues_past_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listeners = Listeners::new()
            .with(Recording {
                name: "unhandled",
                seen: seen.clone(),
                behaviour: Some(ListenerError::Unhandled),
            })
            .with(Recording {
                name: "failing",
                seen: seen.clone(),
                behaviour: Some(|_| ListenerError::Failed("boom".to_string())),
            })
            .with(Recording {
                name: "ok",
                seen: seen.clone(),
                behaviour: None,
            });

        listeners.notify(&ImportEvent::StartFormatDetection {
            path: PathBuf::from("/r/a"),
        });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "unhandled:start_format_detection",
                "failing:start_format_detection",
                "ok:start_format_detection",
            ]
        );
        assert!(listeners.project().is_none());
    }

    #[test]
    fn test_phase_boundaries() {
        assert_eq!(
            ImportEventKind::FileNotFound.phase_boundary(),
            Some((Phase::DataExtraction, Boundary::Error))
        );
        assert_eq!(
            ImportEventKind::ErrorHistogram.phase_boundary(),
            Some((Phase::HistogramDeploy, Boundary::Error))
        );
        assert_eq!(ImportEventKind::RegisterFile.phase_boundary(), None);
        assert!(ImportEventKind::FileError.is_terminal());
        assert!(ImportEventKind::EndSuccessfulImport.is_terminal());
        assert!(!ImportEventKind::EndSpatialDeploy.is_terminal());
    }

    #[test]
    fn test_event_serialization() {
        let event = ImportEvent::EndUnpacking {
            path: PathBuf::from("/r/upload-1/batch.zip"),
            original: PathBuf::from("/r/upload-1/processed/original.zip"),
            format: None,
            is_collection: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "end_unpacking");
        assert_eq!(json["is_collection"], true);
        assert_eq!(event.path(), std::path::Path::new("/r/upload-1/batch.zip"));
    }
}
