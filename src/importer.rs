//! File import pipeline
//!
//! Takes one pending file into the managed store:
//!
//! ```text
//! DATA_EXTRACTION -> FORMAT_DETECTION -> [UNPACKING] -> INTEGRITY_CHECK
//!     -> SPATIAL_DEPLOY -> HISTOGRAM_DEPLOY -> DONE
//! ```
//!
//! Every phase is bracketed by start and end/error events. Any failure ends
//! the run with a single [`ImportEvent::FileError`]; partially built upload
//! directories are left in place.
//!
//! An archive whose content is not itself an image is a collection: its
//! children are imported independently (see [`crate::collection`]) and the
//! run stops after unpacking.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::collection;
use crate::context::ImportContext;
use crate::error::{ImportError, Result};
use crate::events::{FsOperation, ImportEvent, Listeners};
use crate::files::{
    self, Role, EXTRACTED_DIR, HISTOGRAM_STEM, ORIGINAL_STEM, PROCESSED_DIR, SPATIAL_STEM,
};
use crate::formats::Format;
use crate::histogram::{self, Histogram};
use crate::image::Image;

/// How the pending file enters the upload directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intake {
    Move,
    Copy,
    /// In-place import: the upload is a link to the untouched source.
    Link,
}

enum Unpacked {
    /// The archive held a single (multi-file) image, now at `original`.
    Image {
        format: Arc<dyn Format>,
        original: PathBuf,
    },
    /// The archive was a collection; children were imported.
    Collection { imported: Vec<PathBuf> },
}

/// Runtime state of one import. Paths are positions in the managed tree.
#[derive(Debug, Default, Clone)]
pub struct ImportUnit {
    pub upload_dir: Option<PathBuf>,
    pub processed_dir: Option<PathBuf>,
    pub extracted_dir: Option<PathBuf>,
    pub upload_path: Option<PathBuf>,
    pub original_path: Option<PathBuf>,
    pub spatial_path: Option<PathBuf>,
    pub histogram_path: Option<PathBuf>,
    pub original: Option<Image>,
    pub spatial: Option<Image>,
    pub histogram: Option<Histogram>,
}

pub struct FileImporter<'a> {
    ctx: &'a ImportContext,
    listeners: Listeners,
    pending_file: PathBuf,
    pending_name: Option<String>,
    unit: ImportUnit,
}

impl<'a> FileImporter<'a> {
    /// `pending_name` replaces the file name of `pending_file` in the store.
    pub fn new(
        ctx: &'a ImportContext,
        pending_file: impl Into<PathBuf>,
        pending_name: Option<String>,
        listeners: Listeners,
    ) -> Self {
        Self {
            ctx,
            listeners,
            pending_file: pending_file.into(),
            pending_name,
            unit: ImportUnit::default(),
        }
    }

    pub fn unit(&self) -> &ImportUnit {
        &self.unit
    }

    /// Import the pending file.
    ///
    /// The pending file is moved into the store, or copied when `prefer_copy`
    /// is set. Returns the upload path of the imported image, or the upload
    /// paths of every imported child for a collection.
    pub fn run(&mut self, prefer_copy: bool) -> Result<Vec<PathBuf>> {
        let intake = if prefer_copy { Intake::Copy } else { Intake::Move };
        self.guarded(|importer| importer.import(intake))
    }

    /// Import a path that must stay where it is.
    ///
    /// No pending-area check is made, the upload is a link to the source and
    /// archives are not unpacked. Returns the upload path.
    pub fn import_in_place(&mut self) -> Result<PathBuf> {
        let imported = self.guarded(|importer| importer.import(Intake::Link))?;
        imported
            .into_iter()
            .next()
            .ok_or_else(|| ImportError::file_error(&self.pending_file, "nothing was imported"))
    }

    fn notify(&self, event: ImportEvent) {
        self.listeners.notify(&event);
    }

    /// Emit the terminal file error of a failed run.
    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = f(self);
        if let Err(e) = &result {
            let path = self
                .unit
                .upload_path
                .clone()
                .unwrap_or_else(|| self.pending_file.clone());
            self.notify(ImportEvent::FileError {
                path,
                error: e.to_string(),
            });
        }
        result
    }

    fn import(&mut self, intake: Intake) -> Result<Vec<PathBuf>> {
        let upload_path = self.extract_data(intake)?;
        let detected = self.detect_format(&upload_path, intake != Intake::Link)?;

        let upload_dir = self.upload_dir()?;
        let processed_dir = upload_dir.join(PROCESSED_DIR);
        self.mkdir(&processed_dir)?;
        self.unit.processed_dir = Some(processed_dir.clone());

        let (format, original_path) = if detected.is_archive() {
            match self.unpack(&detected, &upload_path, &processed_dir, intake == Intake::Copy)? {
                Unpacked::Image { format, original } => {
                    self.unit.upload_path = Some(original.clone());
                    (format, original)
                }
                Unpacked::Collection { imported } => {
                    self.notify(ImportEvent::EndSuccessfulImport {
                        path: upload_path,
                        original: self.unit.original_path.clone(),
                    });
                    return Ok(imported);
                }
            }
        } else {
            let original_path =
                processed_dir.join(files::role_file_name(ORIGINAL_STEM, detected.identifier()));
            self.symlink(&upload_path, &original_path)?;
            (detected, original_path)
        };
        ensure_role(&original_path, Role::Original)?;
        self.unit.original_path = Some(original_path.clone());

        let original = Image::new(&original_path, format.clone());
        self.check_integrity(&original)?;
        self.unit.original = Some(original.clone());

        if !format.is_spatial() {
            return Err(ImportError::FormatConversion {
                path: original_path,
                reason: Some(format!("{} has no spatial representation", format.identifier())),
            });
        }

        let spatial = self.deploy_spatial(&original, &processed_dir)?;
        self.deploy_histogram(&spatial, &processed_dir)?;

        let upload_path = self.unit.upload_path.clone().unwrap_or(upload_path);
        self.notify(ImportEvent::EndSuccessfulImport {
            path: upload_path.clone(),
            original: Some(original_path),
        });
        Ok(vec![upload_path])
    }

    fn upload_dir(&self) -> Result<PathBuf> {
        self.unit
            .upload_dir
            .clone()
            .ok_or_else(|| ImportError::file_error(&self.pending_file, "no upload directory"))
    }

    // ========================================================================
    // Phases
    // ========================================================================

    fn extract_data(&mut self, intake: Intake) -> Result<PathBuf> {
        // compared against the absolute storage paths of the config
        let pending = std::path::absolute(&self.pending_file)
            .unwrap_or_else(|_| self.pending_file.clone());
        self.notify(ImportEvent::StartDataExtraction {
            path: pending.clone(),
        });

        let reachable = match intake {
            Intake::Link => fs::symlink_metadata(&pending).is_ok(),
            Intake::Move | Intake::Copy => {
                self.ctx.config().is_sanctioned_source(&pending) && pending.exists()
            }
        };
        if !reachable {
            self.notify(ImportEvent::FileNotFound {
                path: pending.clone(),
            });
            return Err(ImportError::FileNotFound { path: pending });
        }

        match self.relocate(&pending, intake) {
            Ok(upload_path) => {
                self.notify(ImportEvent::MovedPendingFile {
                    from: pending,
                    to: upload_path.clone(),
                });
                self.notify(ImportEvent::EndDataExtraction {
                    path: upload_path.clone(),
                });
                Ok(upload_path)
            }
            Err(e) => {
                self.notify(ImportEvent::ErrorDataExtraction {
                    path: pending,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn relocate(&mut self, pending: &Path, intake: Intake) -> Result<PathBuf> {
        let ctx = self.ctx;
        let root = &ctx.config().root;
        let upload_dir = root.join(files::upload_dir_name());
        self.mkdir(&upload_dir)?;
        self.unit.upload_dir = Some(upload_dir.clone());

        let name = match &self.pending_name {
            Some(name) => name.clone(),
            None => pending
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| ImportError::file_error(pending, "pending file has no name"))?,
        };
        let upload_path = upload_dir.join(name);

        match intake {
            Intake::Move => {
                self.move_path(pending, &upload_path)?;
                if files::is_extracted(root, pending) {
                    // provenance back to the parent archive
                    self.symlink(&upload_path, pending)?;
                }
            }
            Intake::Copy => self.copy_path(pending, &upload_path)?,
            Intake::Link => {
                let absolute = std::path::absolute(pending);
                let source = self.fs_op(FsOperation::Symlink, pending, absolute)?;
                self.symlink(&source, &upload_path)?;
            }
        }

        self.unit.upload_path = Some(upload_path.clone());
        Ok(upload_path)
    }

    fn detect_format(&self, path: &Path, archives: bool) -> Result<Arc<dyn Format>> {
        self.notify(ImportEvent::StartFormatDetection {
            path: path.to_path_buf(),
        });

        let formats = self.ctx.formats();
        let format = formats
            .match_importable(path)
            .or_else(|| archives.then(|| formats.match_archive(path)).flatten());

        match format {
            Some(format) => {
                self.notify(ImportEvent::EndFormatDetection {
                    path: path.to_path_buf(),
                    format: format.identifier().to_string(),
                });
                Ok(format)
            }
            None => {
                self.notify(ImportEvent::ErrorNoFormat {
                    path: path.to_path_buf(),
                });
                Err(ImportError::NoMatchingFormat {
                    path: path.to_path_buf(),
                })
            }
        }
    }

    fn unpack(
        &mut self,
        archive: &Arc<dyn Format>,
        upload_path: &Path,
        processed_dir: &Path,
        prefer_copy: bool,
    ) -> Result<Unpacked> {
        self.notify(ImportEvent::StartUnpacking {
            path: upload_path.to_path_buf(),
        });
        let result = self.unpack_inner(archive, upload_path, processed_dir, prefer_copy);
        if let Err(e) = &result {
            self.notify(ImportEvent::ErrorUnpacking {
                path: upload_path.to_path_buf(),
                error: e.to_string(),
            });
        }
        result
    }

    fn unpack_inner(
        &mut self,
        archive: &Arc<dyn Format>,
        upload_path: &Path,
        processed_dir: &Path,
        prefer_copy: bool,
    ) -> Result<Unpacked> {
        let extraction =
            processed_dir.join(files::role_file_name(ORIGINAL_STEM, archive.identifier()));
        archive
            .extract(upload_path, &extraction)
            .map_err(|e| ImportError::Archive {
                path: upload_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        self.unit.original_path = Some(extraction.clone());

        if let Some(format) = self.ctx.formats().match_importable(&extraction) {
            let original =
                processed_dir.join(files::role_file_name(ORIGINAL_STEM, format.identifier()));
            if original != extraction {
                self.move_path(&extraction, &original)?;
            }
            self.notify(ImportEvent::EndUnpacking {
                path: upload_path.to_path_buf(),
                original: original.clone(),
                format: Some(format.identifier().to_string()),
                is_collection: false,
            });
            return Ok(Unpacked::Image { format, original });
        }

        let extracted_dir = processed_dir.join(EXTRACTED_DIR);
        self.symlink(&extraction, &extracted_dir)?;
        self.unit.extracted_dir = Some(extracted_dir.clone());
        debug!("{} is a collection", upload_path.display());

        let imported = collection::import_collection(
            self.ctx,
            &self.listeners,
            &extracted_dir,
            upload_path,
            prefer_copy,
        );
        self.notify(ImportEvent::EndUnpacking {
            path: upload_path.to_path_buf(),
            original: extraction,
            format: None,
            is_collection: true,
        });
        Ok(Unpacked::Collection { imported })
    }

    fn check_integrity(&self, image: &Image) -> Result<()> {
        let path = image.path().to_path_buf();
        self.notify(ImportEvent::StartIntegrityCheck { path: path.clone() });

        let errors = image.check_integrity(true);
        if !errors.is_empty() {
            self.notify(ImportEvent::ErrorIntegrityCheck {
                path: path.clone(),
                errors: errors.clone(),
            });
            return Err(ImportError::ImageParsing { path, errors });
        }

        self.notify(ImportEvent::EndIntegrityCheck { path });
        Ok(())
    }

    /// Deploy the representation used for region reads.
    fn deploy_spatial(&mut self, original: &Image, processed_dir: &Path) -> Result<Image> {
        let path = original.path().to_path_buf();
        self.notify(ImportEvent::StartSpatialDeploy { path: path.clone() });

        match self.deploy_spatial_inner(original, processed_dir) {
            Ok(spatial) => {
                self.notify(ImportEvent::EndSpatialDeploy {
                    path,
                    spatial: spatial.path().to_path_buf(),
                });
                Ok(spatial)
            }
            Err(e) => {
                self.notify(ImportEvent::ErrorSpatialDeploy {
                    path,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn deploy_spatial_inner(&mut self, original: &Image, processed_dir: &Path) -> Result<Image> {
        let format = original.format();

        let spatial = match format.conversion_identifier() {
            Some(target) => {
                let spatial_path =
                    processed_dir.join(files::role_file_name(SPATIAL_STEM, target));
                self.unit.spatial_path = Some(spatial_path.clone());
                self.convert(original, &spatial_path)?;

                let spatial_format = self.detect_spatial_format(&spatial_path)?;
                let spatial = Image::new(&spatial_path, spatial_format);
                self.check_integrity(&spatial)?;
                spatial
            }
            None => {
                let spatial_path =
                    processed_dir.join(files::role_file_name(SPATIAL_STEM, format.identifier()));
                self.unit.spatial_path = Some(spatial_path.clone());
                self.symlink(original.path(), &spatial_path)?;
                Image::new(&spatial_path, format.clone())
            }
        };

        ensure_role(spatial.path(), Role::Spatial)?;
        self.unit.spatial = Some(spatial.clone());
        Ok(spatial)
    }

    fn convert(&self, original: &Image, spatial_path: &Path) -> Result<()> {
        let source = self
            .unit
            .upload_path
            .clone()
            .unwrap_or_else(|| original.path().to_path_buf());
        self.notify(ImportEvent::StartConversion {
            path: spatial_path.to_path_buf(),
            source,
        });

        let failure = match original.format().convert(original.path(), spatial_path) {
            Ok(true) if spatial_path.exists() => None,
            Ok(_) => Some(None),
            Err(e) => Some(Some(e.to_string())),
        };

        if let Some(reason) = failure {
            self.notify(ImportEvent::ErrorConversion {
                path: spatial_path.to_path_buf(),
                error: reason.clone(),
            });
            return Err(ImportError::FormatConversion {
                path: spatial_path.to_path_buf(),
                reason,
            });
        }

        self.notify(ImportEvent::EndConversion {
            path: spatial_path.to_path_buf(),
        });
        Ok(())
    }

    /// Format detection on a converted file; only directly readable formats
    /// qualify.
    fn detect_spatial_format(&self, path: &Path) -> Result<Arc<dyn Format>> {
        self.notify(ImportEvent::StartFormatDetection {
            path: path.to_path_buf(),
        });

        match self.ctx.formats().match_spatial_readable(path) {
            Some(format) => {
                self.notify(ImportEvent::EndFormatDetection {
                    path: path.to_path_buf(),
                    format: format.identifier().to_string(),
                });
                Ok(format)
            }
            None => {
                self.notify(ImportEvent::ErrorNoFormat {
                    path: path.to_path_buf(),
                });
                Err(ImportError::NoMatchingFormat {
                    path: path.to_path_buf(),
                })
            }
        }
    }

    fn deploy_histogram(&mut self, spatial: &Image, processed_dir: &Path) -> Result<()> {
        let histogram_path = processed_dir.join(HISTOGRAM_STEM);
        self.unit.histogram_path = Some(histogram_path.clone());
        self.notify(ImportEvent::StartHistogramDeploy {
            path: histogram_path.clone(),
            image: spatial.path().to_path_buf(),
        });

        let kind = self.ctx.config().histogram;
        let built = histogram::build_histogram_file(spatial, &histogram_path, kind)
            .map_err(|e| ImportError::file_error(&histogram_path, e))
            .and_then(|histogram| {
                ensure_role(&histogram.path, Role::Histogram)?;
                Ok(histogram)
            });

        match built {
            Ok(histogram) => {
                self.unit.histogram = Some(histogram);
                self.notify(ImportEvent::EndHistogramDeploy {
                    path: histogram_path,
                });
                Ok(())
            }
            Err(e) => {
                self.notify(ImportEvent::ErrorHistogram {
                    path: histogram_path,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    // ========================================================================
    // Filesystem primitives
    // ========================================================================

    fn fs_op<T>(&self, op: FsOperation, path: &Path, result: io::Result<T>) -> Result<T> {
        result.map_err(|e| {
            self.notify(ImportEvent::FileOperationFailed {
                op,
                path: path.to_path_buf(),
                error: e.to_string(),
            });
            ImportError::file_error(path, format!("{op} failed: {e}"))
        })
    }

    fn mkdir(&self, dir: &Path) -> Result<()> {
        self.fs_op(FsOperation::CreateDir, dir, fs::create_dir(dir))
    }

    fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        self.fs_op(FsOperation::Move, from, files::move_path(from, to))
    }

    fn copy_path(&self, from: &Path, to: &Path) -> Result<()> {
        self.fs_op(FsOperation::Copy, from, files::copy_path(from, to))
    }

    /// Create `link` pointing at `target`.
    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        self.fs_op(FsOperation::Symlink, link, files::symlink(target, link))
    }
}

fn ensure_role(path: &Path, role: Role) -> Result<()> {
    if files::has_role(path, role) {
        Ok(())
    } else {
        Err(ImportError::file_error(
            path,
            format!("does not carry the {role:?} role"),
        ))
    }
}
