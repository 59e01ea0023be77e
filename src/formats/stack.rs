//! Multi-file plane stacks
//!
//! A stack is a directory with a `stack.json` manifest listing its image
//! planes (z-slices, channels, timepoints flattened in manifest order). All
//! planes must share the same dimensions.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::raster::open_reader;
use super::{raster, Format, FormatError, IntegrityError};

pub const STACK_MANIFEST: &str = "stack.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackManifest {
    #[serde(default)]
    pub name: Option<String>,
    /// Plane files, relative to the stack directory.
    pub planes: Vec<PathBuf>,
}

impl StackManifest {
    pub fn read(dir: &Path) -> Result<Self, FormatError> {
        let raw = fs::read(dir.join(STACK_MANIFEST))?;
        let manifest: Self =
            serde_json::from_slice(&raw).map_err(|e| FormatError::Manifest(e.to_string()))?;
        if manifest.planes.is_empty() {
            return Err(FormatError::Manifest("no planes listed".to_string()));
        }
        if manifest.planes.iter().any(|p| p.is_absolute() || escapes(p)) {
            return Err(FormatError::Manifest("plane outside of the stack".to_string()));
        }
        Ok(manifest)
    }
}

fn escapes(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StackFormat;

impl Format for StackFormat {
    fn identifier(&self) -> &str {
        "stack"
    }

    fn matches(&self, path: &Path) -> bool {
        path.is_dir() && path.join(STACK_MANIFEST).is_file()
    }

    fn check_integrity(&self, path: &Path, check_metadata: bool) -> Vec<IntegrityError> {
        let manifest = match StackManifest::read(path) {
            Ok(manifest) => manifest,
            Err(e) => return vec![IntegrityError::new("manifest", e)],
        };

        let mut errors = Vec::new();
        let mut expected: Option<(u32, u32)> = None;

        for plane in &manifest.planes {
            let plane_path = path.join(plane);
            let label = format!("plane {}", plane.display());

            let dimensions = open_reader(&plane_path)
                .map_err(|e| e.to_string())
                .and_then(|reader| reader.into_dimensions().map_err(|e| e.to_string()));
            let dimensions = match dimensions {
                Ok(dimensions) => dimensions,
                Err(e) => {
                    errors.push(IntegrityError::new(label, e));
                    continue;
                }
            };

            match expected {
                None => expected = Some(dimensions),
                Some(first) if first != dimensions => {
                    errors.push(IntegrityError::new(
                        label.as_str(),
                        format!(
                            "{}x{} differs from first plane {}x{}",
                            dimensions.0, dimensions.1, first.0, first.1
                        ),
                    ));
                }
                Some(_) => {}
            }

            if check_metadata {
                if let Err(e) = raster::decode(&plane_path) {
                    errors.push(IntegrityError::new(format!("{label} pixels"), e));
                }
            }
        }

        errors
    }

    fn pixel_sources(&self, path: &Path) -> Result<Vec<PathBuf>, FormatError> {
        let manifest = StackManifest::read(path)?;
        Ok(manifest.planes.iter().map(|p| path.join(p)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma};
    use tempfile::TempDir;

    fn write_stack(dir: &Path, sizes: &[(u32, u32)]) {
        fs::create_dir_all(dir).unwrap();
        let mut planes = Vec::new();
        for (i, (w, h)) in sizes.iter().enumerate() {
            let name = format!("z{i}.png");
            GrayImage::from_pixel(*w, *h, Luma([i as u8]))
                .save_with_format(dir.join(&name), ImageFormat::Png)
                .unwrap();
            planes.push(PathBuf::from(name));
        }
        let manifest = StackManifest { name: None, planes };
        fs::write(dir.join(STACK_MANIFEST), serde_json::to_vec(&manifest).unwrap()).unwrap();
    }

    #[test]
    fn test_stack_matches_directory_only() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("stack");
        write_stack(&dir, &[(4, 4), (4, 4)]);

        assert!(StackFormat.matches(&dir));
        assert!(!StackFormat.matches(&dir.join("z0.png")));
        assert!(!StackFormat.matches(tmp.path()));
    }

    #[test]
    fn test_sound_stack() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("stack");
        write_stack(&dir, &[(4, 3), (4, 3), (4, 3)]);

        assert!(StackFormat.check_integrity(&dir, true).is_empty());
        let sources = StackFormat.pixel_sources(&dir).unwrap();
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[2], dir.join("z2.png"));
    }

    #[test]
    fn test_mismatched_planes() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("stack");
        write_stack(&dir, &[(4, 4), (8, 4)]);

        let errors = StackFormat.check_integrity(&dir, false);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].attribute, "plane z1.png");
    }

    #[test]
    fn test_mismatched_planes_with_pixel_check() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("stack");
        write_stack(&dir, &[(4, 4), (8, 4), (4, 4)]);

        let errors = StackFormat.check_integrity(&dir, true);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].attribute, "plane z1.png");
        assert!(errors[0].message.contains("differs from first plane"));
    }

    #[test]
    fn test_missing_plane_and_bad_manifest() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("stack");
        write_stack(&dir, &[(4, 4)]);
        fs::remove_file(dir.join("z0.png")).unwrap();
        assert_eq!(StackFormat.check_integrity(&dir, false).len(), 1);

        fs::write(dir.join(STACK_MANIFEST), br#"{"planes": ["../escape.png"]}"#).unwrap();
        let errors = StackFormat.check_integrity(&dir, false);
        assert_eq!(errors[0].attribute, "manifest");
    }
}
