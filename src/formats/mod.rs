//! Format registry
//!
//! Formats are stateless descriptors. The registry answers "which format is
//! this path?" and each format knows how to check, convert and (for archives)
//! extract a path of its kind.
//!
//! ## Built-in formats
//!
//! | Identifier | Kind | Spatial access |
//! |------------|------|----------------|
//! | `stack` | multi-file directory | direct |
//! | `tiff`, `png`, `jpeg` | single-file raster | direct |
//! | `bmp`, `gif`, `webp` | single-file raster | converted to `tiff` |
//! | `zip`, `tar`, `tgz` | archive | extracted first |

mod raster;
mod stack;

pub use raster::RasterFormat;
pub use stack::{StackFormat, StackManifest, STACK_MANIFEST};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::{ArchiveError, ArchiveFormat};

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("{0} is not supported by this format")]
    Unsupported(&'static str),
}

/// One problem found while checking an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityError {
    pub attribute: String,
    pub message: String,
}

impl IntegrityError {
    pub fn new(attribute: impl Into<String>, message: impl ToString) -> Self {
        Self {
            attribute: attribute.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.attribute, self.message)
    }
}

/// Capability contract of a file format.
pub trait Format: fmt::Debug + Send + Sync {
    /// Short identifier, also used as the extension of role files.
    fn identifier(&self) -> &str;

    fn matches(&self, path: &Path) -> bool;

    /// Whether the format has a spatial (region readable) representation.
    fn is_spatial(&self) -> bool {
        true
    }

    fn is_archive(&self) -> bool {
        false
    }

    /// Identifier of the format `convert` produces, if conversion is needed.
    fn conversion_identifier(&self) -> Option<&str> {
        None
    }

    fn needs_conversion(&self) -> bool {
        self.conversion_identifier().is_some()
    }

    /// Convert `source` into `target`. `Ok(false)` means the conversion ran
    /// but reported failure.
    fn convert(&self, _source: &Path, _target: &Path) -> Result<bool, FormatError> {
        Err(FormatError::Unsupported("conversion"))
    }

    fn extract(&self, _source: &Path, _dest: &Path) -> Result<(), ArchiveError> {
        Err(ArchiveError::NotAnArchive)
    }

    /// Problems found in `path`; empty when the image is sound.
    /// `check_metadata` also decodes the pixel data and validates the
    /// detected format against the header.
    fn check_integrity(&self, path: &Path, check_metadata: bool) -> Vec<IntegrityError>;

    /// Files holding the pixel data of `path`.
    fn pixel_sources(&self, path: &Path) -> Result<Vec<PathBuf>, FormatError>;
}

pub struct FormatRegistry {
    formats: Vec<Arc<dyn Format>>,
    archives: Vec<Arc<dyn Format>>,
}

impl FormatRegistry {
    /// Registry without any format.
    pub fn empty() -> Self {
        Self {
            formats: Vec::new(),
            archives: Vec::new(),
        }
    }

    /// Registry with every built-in format.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(StackFormat));
        for format in RasterFormat::builtin() {
            registry.register(Arc::new(format));
        }
        for archive in ArchiveFormat::builtin() {
            registry.register(Arc::new(archive));
        }
        registry
    }

    /// Add a format. Formats registered first win when several match.
    pub fn register(&mut self, format: Arc<dyn Format>) {
        if format.is_archive() {
            self.archives.push(format);
        } else {
            self.formats.push(format);
        }
    }

    /// First image format (single or multi-file) matching `path`.
    pub fn match_importable(&self, path: &Path) -> Option<Arc<dyn Format>> {
        self.formats.iter().find(|f| f.matches(path)).cloned()
    }

    /// First format matching `path` that can serve spatial reads as is.
    pub fn match_spatial_readable(&self, path: &Path) -> Option<Arc<dyn Format>> {
        self.formats
            .iter()
            .filter(|f| f.is_spatial() && !f.needs_conversion())
            .find(|f| f.matches(path))
            .cloned()
    }

    pub fn match_archive(&self, path: &Path) -> Option<Arc<dyn Format>> {
        self.archives.iter().find(|f| f.matches(path)).cloned()
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn Format>> {
        self.formats
            .iter()
            .chain(self.archives.iter())
            .find(|f| f.identifier() == identifier)
            .cloned()
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.formats
            .iter()
            .chain(self.archives.iter())
            .map(|f| f.identifier().to_string())
            .collect()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("formats", &self.identifiers())
            .finish()
    }
}
