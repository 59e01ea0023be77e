//! Built-in import listeners
//!
//! - [`LogListener`]: renders every event as a tracing record
//! - [`EventLog`]: buffers events for later inspection
//! - [`ProjectListener`]: mirrors progress into an external project
//!   management system through a [`ProjectClient`]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::events::{Boundary, ImportEvent, ImportEventKind, ImportListener, ListenerError};
use crate::files;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Console
// ============================================================================

/// Logs every event, prefixed with the import name.
#[derive(Debug, Clone)]
pub struct LogListener {
    name: String,
}

impl LogListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ImportListener for LogListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &ImportEvent) -> Result<(), ListenerError> {
        let kind = event.kind();
        let path = event.path().display();
        match event {
            ImportEvent::ErrorIntegrityCheck { errors, .. } => {
                let errors: Vec<String> = errors.iter().map(ToString::to_string).collect();
                warn!("[{}] {} {}: {}", self.name, kind, path, errors.join("; "));
            }
            ImportEvent::FileOperationFailed { op, error, .. } => {
                warn!("[{}] {} failed on {}: {}", self.name, op, path, error);
            }
            ImportEvent::FileError { error, .. }
            | ImportEvent::ErrorDataExtraction { error, .. }
            | ImportEvent::ErrorUnpacking { error, .. }
            | ImportEvent::ErrorSpatialDeploy { error, .. }
            | ImportEvent::ErrorHistogram { error, .. } => {
                warn!("[{}] {} {}: {}", self.name, kind, path, error);
            }
            ImportEvent::EndFormatDetection { format, .. } => {
                info!("[{}] {} {} ({})", self.name, kind, path, format);
            }
            ImportEvent::MovedPendingFile { from, to } => {
                info!("[{}] {} {} -> {}", self.name, kind, from.display(), to.display());
            }
            _ if matches!(kind.phase_boundary(), Some((_, Boundary::Error))) => {
                warn!("[{}] {} {}", self.name, kind, path);
            }
            _ => info!("[{}] {} {}", self.name, kind, path),
        }
        Ok(())
    }
}

// ============================================================================
// Buffer
// ============================================================================

/// An event as delivered, with its delivery time.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ImportEvent,
}

/// Shared, cloneable buffer of every delivered event.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<RecordedEvent> {
        lock(&self.events).clone()
    }

    pub fn events(&self) -> Vec<ImportEvent> {
        lock(&self.events).iter().map(|r| r.event.clone()).collect()
    }

    pub fn kinds(&self) -> Vec<ImportEventKind> {
        lock(&self.events).iter().map(|r| r.event.kind()).collect()
    }
}

impl ImportListener for EventLog {
    fn name(&self) -> &str {
        "event-log"
    }

    fn on_event(&self, event: &ImportEvent) -> Result<(), ListenerError> {
        lock(&self.events).push(RecordedEvent {
            at: Utc::now(),
            event: event.clone(),
        });
        Ok(())
    }
}

// ============================================================================
// Project mirroring
// ============================================================================

pub type UploadId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Uploaded,
    DetectingFormat,
    Extracting,
    Unpacked,
    Checking,
    Converting,
    Deploying,
    Deployed,
    ErrorFormat,
    ErrorExtraction,
    ErrorCheck,
    ErrorConversion,
    ErrorDeployment,
    ErrorFile,
}

impl UploadStatus {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            UploadStatus::ErrorFormat
                | UploadStatus::ErrorExtraction
                | UploadStatus::ErrorCheck
                | UploadStatus::ErrorConversion
                | UploadStatus::ErrorDeployment
                | UploadStatus::ErrorFile
        )
    }
}

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Upload {0} rejected")]
    Rejected(String),

    #[error("Unknown upload {0}")]
    UnknownUpload(UploadId),

    #[error("{} was never registered", .0.display())]
    NotRegistered(PathBuf),

    #[error("Project backend error: {0}")]
    Backend(String),
}

/// Client of the external project management API.
pub trait ProjectClient: Send + Sync {
    fn create_upload(
        &self,
        parent: Option<UploadId>,
        name: &str,
        size: u64,
    ) -> Result<UploadId, ProjectError>;

    fn update_status(&self, upload: UploadId, status: UploadStatus) -> Result<(), ProjectError>;

    fn register_image(&self, upload: UploadId, path: &Path, format: &str)
        -> Result<(), ProjectError>;
}

#[derive(Debug, Default)]
struct ProjectState {
    status: Option<UploadStatus>,
    format: Option<String>,
    collection: bool,
}

/// Mirrors the progress of one upload into a project.
#[derive(Clone)]
pub struct ProjectListener {
    client: Arc<dyn ProjectClient>,
    upload: UploadId,
    children: Arc<Mutex<HashMap<PathBuf, UploadId>>>,
    state: Arc<Mutex<ProjectState>>,
}

impl ProjectListener {
    pub fn new(client: Arc<dyn ProjectClient>, upload: UploadId) -> Self {
        Self {
            client,
            upload,
            children: Arc::default(),
            state: Arc::default(),
        }
    }

    pub fn upload(&self) -> UploadId {
        self.upload
    }

    /// Listener for a child announced through a `RegisterFile` event.
    pub fn new_listener_from_registered_child(
        &self,
        child: &Path,
    ) -> Result<ProjectListener, ProjectError> {
        let upload = lock(&self.children)
            .get(child)
            .copied()
            .ok_or_else(|| ProjectError::NotRegistered(child.to_path_buf()))?;
        Ok(ProjectListener::new(self.client.clone(), upload))
    }

    fn set_status(&self, status: UploadStatus) -> Result<(), ListenerError> {
        self.client
            .update_status(self.upload, status)
            .map_err(|e| ListenerError::Failed(e.to_string()))?;
        lock(&self.state).status = Some(status);
        Ok(())
    }

    fn register_child(&self, child: &Path) -> Result<(), ListenerError> {
        let name = child
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = self
            .client
            .create_upload(Some(self.upload), &name, files::folder_size(child))
            .map_err(|e| ListenerError::Failed(e.to_string()))?;
        lock(&self.children).insert(child.to_path_buf(), id);
        Ok(())
    }

    fn finish(&self, path: &Path) -> Result<(), ListenerError> {
        let (format, collection) = {
            let state = lock(&self.state);
            (state.format.clone(), state.collection)
        };
        if let (Some(format), false) = (format, collection) {
            self.client
                .register_image(self.upload, path, &format)
                .map_err(|e| ListenerError::Failed(e.to_string()))?;
        }
        self.set_status(UploadStatus::Deployed)
    }
}

impl std::fmt::Debug for ProjectListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectListener")
            .field("upload", &self.upload)
            .finish()
    }
}

impl ImportListener for ProjectListener {
    fn name(&self) -> &str {
        "project"
    }

    fn on_event(&self, event: &ImportEvent) -> Result<(), ListenerError> {
        use ImportEvent as E;

        match event {
            E::StartFormatDetection { .. } => self.set_status(UploadStatus::DetectingFormat),
            E::EndFormatDetection { format, .. } => {
                lock(&self.state).format = Some(format.clone());
                Ok(())
            }
            E::ErrorNoFormat { .. } => self.set_status(UploadStatus::ErrorFormat),
            E::StartUnpacking { .. } => self.set_status(UploadStatus::Extracting),
            E::EndUnpacking {
                format,
                is_collection,
                ..
            } => {
                {
                    let mut state = lock(&self.state);
                    state.collection = *is_collection;
                    if format.is_some() {
                        state.format = format.clone();
                    }
                }
                self.set_status(UploadStatus::Unpacked)
            }
            E::ErrorUnpacking { .. } => self.set_status(UploadStatus::ErrorExtraction),
            E::StartIntegrityCheck { .. } => self.set_status(UploadStatus::Checking),
            E::ErrorIntegrityCheck { .. } => self.set_status(UploadStatus::ErrorCheck),
            E::StartConversion { .. } => self.set_status(UploadStatus::Converting),
            E::ErrorConversion { .. } => self.set_status(UploadStatus::ErrorConversion),
            E::StartSpatialDeploy { .. } | E::StartHistogramDeploy { .. } => {
                self.set_status(UploadStatus::Deploying)
            }
            E::ErrorSpatialDeploy { .. } | E::ErrorHistogram { .. } => {
                self.set_status(UploadStatus::ErrorDeployment)
            }
            E::RegisterFile { path, .. } => self.register_child(path),
            E::EndSuccessfulImport { path, .. } => self.finish(path),
            E::FileError { .. } => {
                let already_failed = lock(&self.state).status.is_some_and(|s| s.is_error());
                if already_failed {
                    Ok(())
                } else {
                    self.set_status(UploadStatus::ErrorFile)
                }
            }
            other => Err(ListenerError::Unhandled(other.kind())),
        }
    }

    fn as_project(&self) -> Option<&ProjectListener> {
        Some(self)
    }
}

// ============================================================================
// In-process project backend
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredImage {
    pub path: PathBuf,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadRecord {
    pub id: UploadId,
    pub parent: Option<UploadId>,
    pub name: String,
    pub size: u64,
    pub status: UploadStatus,
    pub images: Vec<RegisteredImage>,
}

/// Project backend kept in memory. Uploads named in `rejected` are refused.
#[derive(Debug, Default)]
pub struct MemoryProjectClient {
    uploads: Mutex<Vec<UploadRecord>>,
    rejected: HashSet<String>,
}

impl MemoryProjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            uploads: Mutex::default(),
            rejected: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        lock(&self.uploads).clone()
    }

    pub fn upload(&self, id: UploadId) -> Option<UploadRecord> {
        lock(&self.uploads).iter().find(|u| u.id == id).cloned()
    }

    pub fn children(&self, parent: UploadId) -> Vec<UploadRecord> {
        lock(&self.uploads)
            .iter()
            .filter(|u| u.parent == Some(parent))
            .cloned()
            .collect()
    }
}

impl ProjectClient for MemoryProjectClient {
    fn create_upload(
        &self,
        parent: Option<UploadId>,
        name: &str,
        size: u64,
    ) -> Result<UploadId, ProjectError> {
        if self.rejected.contains(name) {
            return Err(ProjectError::Rejected(name.to_string()));
        }
        let mut uploads = lock(&self.uploads);
        if let Some(parent) = parent {
            if !uploads.iter().any(|u| u.id == parent) {
                return Err(ProjectError::UnknownUpload(parent));
            }
        }
        let id = uploads.len() as UploadId + 1;
        uploads.push(UploadRecord {
            id,
            parent,
            name: name.to_string(),
            size,
            status: UploadStatus::Uploaded,
            images: Vec::new(),
        });
        Ok(id)
    }

    fn update_status(&self, upload: UploadId, status: UploadStatus) -> Result<(), ProjectError> {
        let mut uploads = lock(&self.uploads);
        let record = uploads
            .iter_mut()
            .find(|u| u.id == upload)
            .ok_or(ProjectError::UnknownUpload(upload))?;
        record.status = status;
        Ok(())
    }

    fn register_image(
        &self,
        upload: UploadId,
        path: &Path,
        format: &str,
    ) -> Result<(), ProjectError> {
        let mut uploads = lock(&self.uploads);
        let record = uploads
            .iter_mut()
            .find(|u| u.id == upload)
            .ok_or(ProjectError::UnknownUpload(upload))?;
        record.images.push(RegisteredImage {
            path: path.to_path_buf(),
            format: format.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Listeners;

    fn event_path() -> PathBuf {
        PathBuf::from("/r/upload-1/slide.ext")
    }

    #[test]
    fn test_event_log_buffers_in_order() {
        let log = EventLog::new();
        let listeners = Listeners::new().with(log.clone());
        listeners.notify(&ImportEvent::StartFormatDetection { path: event_path() });
        listeners.notify(&ImportEvent::ErrorNoFormat { path: event_path() });

        assert_eq!(
            log.kinds(),
            vec![ImportEventKind::StartFormatDetection, ImportEventKind::ErrorNoFormat]
        );
        assert_eq!(log.events()[1].path(), event_path());

        let recorded = log.recorded();
        assert!(recorded[0].at <= recorded[1].at);
        let json = serde_json::to_value(&recorded[0]).unwrap();
        assert_eq!(json["event"], "start_format_detection");
        assert!(json["at"].is_string());
    }

    #[test]
    fn test_project_status_follows_pipeline() {
        let client = Arc::new(MemoryProjectClient::new());
        let id = client.create_upload(None, "slide.ext", 10).unwrap();
        let listener = ProjectListener::new(client.clone(), id);

        let path = event_path();
        listener
            .on_event(&ImportEvent::StartFormatDetection { path: path.clone() })
            .unwrap();
        assert_eq!(client.upload(id).unwrap().status, UploadStatus::DetectingFormat);

        listener
            .on_event(&ImportEvent::EndFormatDetection {
                path: path.clone(),
                format: "png".to_string(),
            })
            .unwrap();
        listener
            .on_event(&ImportEvent::EndSuccessfulImport {
                path: path.clone(),
                original: None,
            })
            .unwrap();

        let record = client.upload(id).unwrap();
        assert_eq!(record.status, UploadStatus::Deployed);
        assert_eq!(record.images, vec![RegisteredImage { path, format: "png".to_string() }]);
    }

    #[test]
    fn test_file_error_keeps_specific_status() {
        let client = Arc::new(MemoryProjectClient::new());
        let id = client.create_upload(None, "notes.txt", 1).unwrap();
        let listener = ProjectListener::new(client.clone(), id);

        listener
            .on_event(&ImportEvent::ErrorNoFormat { path: event_path() })
            .unwrap();
        listener
            .on_event(&ImportEvent::FileError {
                path: event_path(),
                error: "no format".to_string(),
            })
            .unwrap();
        assert_eq!(client.upload(id).unwrap().status, UploadStatus::ErrorFormat);
    }

    #[test]
    fn test_registered_child_listener() {
        let client = Arc::new(MemoryProjectClient::rejecting(["bad.png"]));
        let id = client.create_upload(None, "batch.zip", 100).unwrap();
        let listener = ProjectListener::new(client.clone(), id);

        let good = PathBuf::from("/r/upload-1/processed/extracted/good.png");
        let bad = PathBuf::from("/r/upload-1/processed/extracted/bad.png");
        for child in [&good, &bad] {
            let _ = listener.on_event(&ImportEvent::RegisterFile {
                path: child.clone(),
                parent: event_path(),
            });
        }

        let child_listener = listener.new_listener_from_registered_child(&good).unwrap();
        assert_eq!(client.upload(child_listener.upload()).unwrap().parent, Some(id));
        assert!(matches!(
            listener.new_listener_from_registered_child(&bad),
            Err(ProjectError::NotRegistered(_))
        ));
        assert_eq!(client.children(id).len(), 1);
    }

    #[test]
    fn test_unhandled_kinds_are_reported() {
        let client = Arc::new(MemoryProjectClient::new());
        let id = client.create_upload(None, "x", 0).unwrap();
        let listener = ProjectListener::new(client, id);
        let result = listener.on_event(&ImportEvent::EndIntegrityCheck { path: event_path() });
        assert!(matches!(
            result,
            Err(ListenerError::Unhandled(ImportEventKind::EndIntegrityCheck))
        ));
    }
}
