//! Single-file raster formats
//!
//! Detection sniffs magic bytes with `infer`; checking, conversion and pixel
//! access go through the `image` crate.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, ImageReader};
use tracing::debug;

use super::{Format, FormatError, IntegrityError};

#[derive(Debug, Clone, Copy)]
pub struct RasterFormat {
    identifier: &'static str,
    mime_type: &'static str,
    image_format: ImageFormat,
    /// Target of the spatial conversion, if the format needs one.
    converts_to: Option<(&'static str, ImageFormat)>,
}

impl RasterFormat {
    pub const fn tiff() -> Self {
        Self::direct("tiff", "image/tiff", ImageFormat::Tiff)
    }

    pub const fn png() -> Self {
        Self::direct("png", "image/png", ImageFormat::Png)
    }

    pub const fn jpeg() -> Self {
        Self::direct("jpeg", "image/jpeg", ImageFormat::Jpeg)
    }

    pub const fn bmp() -> Self {
        Self::to_tiff("bmp", "image/bmp", ImageFormat::Bmp)
    }

    pub const fn gif() -> Self {
        Self::to_tiff("gif", "image/gif", ImageFormat::Gif)
    }

    pub const fn webp() -> Self {
        Self::to_tiff("webp", "image/webp", ImageFormat::WebP)
    }

    pub fn builtin() -> Vec<Self> {
        vec![
            Self::tiff(),
            Self::png(),
            Self::jpeg(),
            Self::bmp(),
            Self::gif(),
            Self::webp(),
        ]
    }

    const fn direct(
        identifier: &'static str,
        mime_type: &'static str,
        image_format: ImageFormat,
    ) -> Self {
        Self {
            identifier,
            mime_type,
            image_format,
            converts_to: None,
        }
    }

    const fn to_tiff(
        identifier: &'static str,
        mime_type: &'static str,
        image_format: ImageFormat,
    ) -> Self {
        Self {
            identifier,
            mime_type,
            image_format,
            converts_to: Some(("tiff", ImageFormat::Tiff)),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }
}

/// Reader that trusts the content over the (often meaningless) extension.
pub(crate) fn open_reader(path: &Path) -> std::io::Result<ImageReader<BufReader<File>>> {
    ImageReader::open(path)?.with_guessed_format()
}

pub(crate) fn decode(path: &Path) -> Result<DynamicImage, FormatError> {
    Ok(open_reader(path)?.decode()?)
}

impl Format for RasterFormat {
    fn identifier(&self) -> &str {
        self.identifier
    }

    fn matches(&self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        match infer::get_from_path(path) {
            Ok(Some(kind)) => kind.mime_type() == self.mime_type,
            Ok(None) => false,
            Err(e) => {
                debug!("Could not sniff {}: {}", path.display(), e);
                false
            }
        }
    }

    fn conversion_identifier(&self) -> Option<&str> {
        self.converts_to.map(|(identifier, _)| identifier)
    }

    fn convert(&self, source: &Path, target: &Path) -> Result<bool, FormatError> {
        let Some((_, target_format)) = self.converts_to else {
            return Err(FormatError::Unsupported("conversion"));
        };
        let img = decode(source)?;
        img.save_with_format(target, target_format)?;
        Ok(true)
    }

    fn check_integrity(&self, path: &Path, check_metadata: bool) -> Vec<IntegrityError> {
        let mut errors = Vec::new();

        let reader = match open_reader(path) {
            Ok(reader) => reader,
            Err(e) => return vec![IntegrityError::new("file", e)],
        };

        if check_metadata && reader.format() != Some(self.image_format) {
            errors.push(IntegrityError::new(
                "format",
                format!("header does not describe a {} image", self.identifier),
            ));
        }

        match reader.into_dimensions() {
            Ok((width, height)) if width == 0 || height == 0 => {
                errors.push(IntegrityError::new(
                    "dimensions",
                    format!("empty image ({width}x{height})"),
                ));
            }
            Ok(_) => {}
            Err(e) => {
                errors.push(IntegrityError::new("header", e));
                return errors;
            }
        }

        if check_metadata {
            if let Err(e) = decode(path) {
                errors.push(IntegrityError::new("pixels", e));
            }
        }

        errors
    }

    fn pixel_sources(&self, path: &Path) -> Result<Vec<PathBuf>, FormatError> {
        Ok(vec![path.to_path_buf()])
    }
}
