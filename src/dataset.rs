//! Dataset import
//!
//! A dataset directory holds one sub-directory per image under `images/`.
//! Each is registered with the project backend and imported in place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::context::ImportContext;
use crate::error::ImportError;
use crate::events::Listeners;
use crate::files;
use crate::importer::FileImporter;
use crate::listeners::{LogListener, ProjectClient, ProjectError, ProjectListener, UploadId};
use crate::metrics::MetricsListener;

pub const DATASET_IMAGES_DIR: &str = "images";

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Cannot list {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Import(#[from] ImportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetImage {
    pub upload: UploadId,
    pub name: String,
    pub source: PathBuf,
    pub upload_path: PathBuf,
}

/// Import every image directory of `dataset`, in name order.
pub fn import_dataset(
    ctx: &ImportContext,
    dataset: &Path,
    client: Arc<dyn ProjectClient>,
) -> Result<Vec<DatasetImage>, DatasetError> {
    let images_dir = dataset.join(DATASET_IMAGES_DIR);
    let entries = fs::read_dir(&images_dir).map_err(|source| DatasetError::Io {
        path: images_dir.clone(),
        source,
    })?;

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    let mut imported = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let upload = client.create_upload(None, &name, files::folder_size(&dir))?;

        let listeners = Listeners::new()
            .with(LogListener::new(name.clone()))
            .with(MetricsListener::new(ctx.metrics().clone()))
            .with(ProjectListener::new(client.clone(), upload));
        let upload_path =
            FileImporter::new(ctx, &dir, Some(name.clone()), listeners).import_in_place()?;

        info!("Imported dataset image {} as upload {}", name, upload);
        imported.push(DatasetImage {
            upload,
            name,
            source: dir,
            upload_path,
        });
    }

    Ok(imported)
}
