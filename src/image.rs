//! Images in the managed store

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::files::{self, Representation, Role};
use crate::formats::{Format, FormatError, IntegrityError};

/// A path together with the format it was detected as.
#[derive(Clone)]
pub struct Image {
    path: PathBuf,
    format: Arc<dyn Format>,
}

impl Image {
    pub fn new(path: impl Into<PathBuf>, format: Arc<dyn Format>) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> &Arc<dyn Format> {
        &self.format
    }

    pub fn identifier(&self) -> &str {
        self.format.identifier()
    }

    pub fn check_integrity(&self, check_metadata: bool) -> Vec<IntegrityError> {
        self.format.check_integrity(&self.path, check_metadata)
    }

    pub fn pixel_sources(&self) -> Result<Vec<PathBuf>, FormatError> {
        self.format.pixel_sources(&self.path)
    }

    /// Width and height of the first plane.
    pub fn dimensions(&self) -> Result<(u32, u32), FormatError> {
        let sources = self.pixel_sources()?;
        let first = sources
            .first()
            .ok_or_else(|| FormatError::Manifest("image has no plane".to_string()))?;
        Ok(image::image_dimensions(first)?)
    }

    pub fn representation(&self) -> Representation {
        Representation::from_path(&self.path)
    }

    pub fn has_role(&self, role: Role) -> bool {
        files::has_role(&self.path, role) || self.representation().has_role(role)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("path", &self.path)
            .field("format", &self.format.identifier())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::RasterFormat;
    use ::image::{ImageFormat, Rgb, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_roles_follow_links() {
        let tmp = TempDir::new().unwrap();
        let processed = tmp.path().join(files::PROCESSED_DIR);
        fs::create_dir(&processed).unwrap();
        let upload = tmp.path().join("slide.ext");
        RgbImage::from_pixel(6, 4, Rgb([1, 2, 3]))
            .save_with_format(&upload, ImageFormat::Png)
            .unwrap();

        let original_path = processed.join("original.png");
        files::symlink(&upload, &original_path).unwrap();
        let original = Image::new(&original_path, Arc::new(RasterFormat::png()));
        assert!(original.has_role(Role::Original));
        assert!(!original.has_role(Role::Spatial));

        files::symlink(&original_path, &processed.join("spatial.png")).unwrap();
        assert!(original.has_role(Role::Spatial));
        assert_eq!(original.dimensions().unwrap(), (6, 4));
        assert_eq!(original.identifier(), "png");
        assert!(original.check_integrity(true).is_empty());
    }
}
