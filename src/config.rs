//! Importer configuration
//!
//! Built once at process start (TOML file, then CLI/env overrides) and shared
//! with every import through [`ImportContext`](crate::ImportContext).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files;
use crate::histogram::HistogramType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    /// Managed storage root. Must exist; upload directories are created in it.
    pub root: PathBuf,
    /// Staging area for completed uploads.
    pub pending_path: PathBuf,
    /// Area where uploads are still being written.
    pub writing_path: PathBuf,
    /// Dispatch collection children to the worker pool instead of running
    /// them in-process one after the other.
    pub task_queue_enabled: bool,
    /// Worker pool size (0 = one thread per CPU).
    pub worker_threads: usize,
    /// Histogram strategy for deployed images.
    pub histogram: HistogramType,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/data/soma/images"),
            pending_path: PathBuf::from("/data/soma/pending"),
            writing_path: PathBuf::from("/data/soma/writing"),
            task_queue_enabled: false,
            worker_threads: 0,
            histogram: HistogramType::Fast,
        }
    }
}

impl ImporterConfig {
    /// Config rooted at `root` with pending/writing areas next to it.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let base = root.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            pending_path: base.join("pending"),
            writing_path: base.join("writing"),
            root,
            ..Self::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// The same config with root, pending and writing areas made absolute
    /// against the current directory. Links written into the store must
    /// resolve from anywhere.
    pub fn absolutized(mut self) -> Self {
        for path in [&mut self.root, &mut self.pending_path, &mut self.writing_path] {
            if let Ok(absolute) = std::path::absolute(&*path) {
                *path = absolute;
            }
        }
        self
    }

    /// Whether `path` may enter the pipeline: it sits directly in the pending
    /// or writing area, or was extracted from an archive under the root.
    pub fn is_sanctioned_source(&self, path: &Path) -> bool {
        if files::has_parent_component(path) {
            return false;
        }
        if files::is_extracted(&self.root, path) {
            return true;
        }
        match path.parent() {
            Some(parent) => parent == self.pending_path || parent == self.writing_path,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ImporterConfig::from_toml_str(
            r#"
            root = "/srv/images"
            task_queue_enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.root, PathBuf::from("/srv/images"));
        assert!(config.task_queue_enabled);
        assert_eq!(config.worker_threads, 0);
        assert_eq!(config.histogram, HistogramType::Fast);
        assert_eq!(config.pending_path, ImporterConfig::default().pending_path);
    }

    #[test]
    fn test_histogram_type_from_toml() {
        let config = ImporterConfig::from_toml_str("histogram = \"complete\"").unwrap();
        assert_eq!(config.histogram, HistogramType::Complete);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(ImporterConfig::from_toml_str("worker_threads = \"many\"").is_err());
    }

    #[test]
    fn test_sanctioned_sources() {
        let config = ImporterConfig::with_root("/srv/soma/images");
        assert_eq!(config.pending_path, PathBuf::from("/srv/soma/pending"));

        assert!(config.is_sanctioned_source(Path::new("/srv/soma/pending/slide.svs")));
        assert!(config.is_sanctioned_source(Path::new("/srv/soma/writing/slide.svs")));
        assert!(config.is_sanctioned_source(Path::new(
            "/srv/soma/images/upload-1/processed/extracted/a.png"
        )));

        assert!(!config.is_sanctioned_source(Path::new("/srv/soma/pending/nested/slide.svs")));
        assert!(!config.is_sanctioned_source(Path::new("/etc/passwd")));
        assert!(!config.is_sanctioned_source(Path::new("/srv/soma/images/upload-1/slide.svs")));
    }

    #[test]
    fn test_absolutized_paths() {
        let config = ImporterConfig::from_toml_str(
            r#"
            root = "store/images"
            pending_path = "/srv/soma/pending"
            "#,
        )
        .unwrap()
        .absolutized();

        let cwd = std::env::current_dir().unwrap();
        assert_eq!(config.root, cwd.join("store/images"));
        assert_eq!(config.pending_path, PathBuf::from("/srv/soma/pending"));
        assert!(config.writing_path.is_absolute());
    }

    #[test]
    fn test_parent_components_are_never_sanctioned() {
        let config = ImporterConfig::with_root("/srv/soma/images");

        assert!(!config.is_sanctioned_source(Path::new(
            "/srv/soma/images/upload-1/processed/extracted/../../../../private.png"
        )));
        assert!(!config.is_sanctioned_source(Path::new("/srv/soma/pending/../secret.png")));
        assert!(!config.is_sanctioned_source(Path::new("/srv/soma/pending/sub/..")));
    }
}
