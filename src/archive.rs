//! Container archives
//!
//! Archives are formats without pixels of their own: they are extracted into
//! a directory which is then identified again (one multi-file image, or a
//! collection of independent images).

use std::fs::{self, File};
use std::io::{Read, Seek};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::EntryType;
use thiserror::Error;
use tracing::debug;

use crate::formats::{Format, FormatError, IntegrityError};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Not an archive")]
    NotAnArchive,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid archive entry {}: {reason}", .entry.display())]
    InvalidEntry { entry: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

#[derive(Debug, Clone, Copy)]
pub struct ArchiveFormat {
    kind: ArchiveKind,
}

impl ArchiveFormat {
    pub const fn new(kind: ArchiveKind) -> Self {
        Self { kind }
    }

    pub fn builtin() -> Vec<Self> {
        vec![
            Self::new(ArchiveKind::Zip),
            Self::new(ArchiveKind::Tar),
            Self::new(ArchiveKind::TarGz),
        ]
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    fn mime_type(&self) -> &'static str {
        match self.kind {
            ArchiveKind::Zip => "application/zip",
            ArchiveKind::Tar => "application/x-tar",
            ArchiveKind::TarGz => "application/gzip",
        }
    }
}

impl Format for ArchiveFormat {
    fn identifier(&self) -> &str {
        match self.kind {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Tar => "tar",
            ArchiveKind::TarGz => "tgz",
        }
    }

    fn matches(&self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        matches!(
            infer::get_from_path(path),
            Ok(Some(kind)) if kind.mime_type() == self.mime_type()
        )
    }

    fn is_spatial(&self) -> bool {
        false
    }

    fn is_archive(&self) -> bool {
        true
    }

    fn extract(&self, source: &Path, dest: &Path) -> Result<(), ArchiveError> {
        fs::create_dir_all(dest)?;
        let file = File::open(source)?;
        match self.kind {
            ArchiveKind::Zip => extract_zip(file, dest),
            ArchiveKind::Tar => extract_tar(file, dest),
            ArchiveKind::TarGz => extract_tar(GzDecoder::new(file), dest),
        }
    }

    fn check_integrity(&self, path: &Path, _check_metadata: bool) -> Vec<IntegrityError> {
        let listed = File::open(path).map_err(ArchiveError::from).and_then(|file| match self.kind {
            ArchiveKind::Zip => zip::ZipArchive::new(file)
                .map(|a| a.len())
                .map_err(ArchiveError::from),
            ArchiveKind::Tar => count_tar_entries(file),
            ArchiveKind::TarGz => count_tar_entries(GzDecoder::new(file)),
        });
        match listed {
            Ok(0) => vec![IntegrityError::new("entries", "archive is empty")],
            Ok(_) => Vec::new(),
            Err(e) => vec![IntegrityError::new("entries", e)],
        }
    }

    fn pixel_sources(&self, _path: &Path) -> Result<Vec<PathBuf>, FormatError> {
        Err(FormatError::Unsupported("pixel access"))
    }
}

fn count_tar_entries<R: Read>(reader: R) -> Result<usize, ArchiveError> {
    let mut archive = tar::Archive::new(reader);
    let mut count = 0;
    for entry in archive.entries()? {
        entry?;
        count += 1;
    }
    Ok(count)
}

fn validate_relative(entry: &Path) -> Result<(), ArchiveError> {
    let escapes = entry
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ArchiveError::InvalidEntry {
            entry: entry.to_path_buf(),
            reason: "path escapes the extraction directory".to_string(),
        });
    }
    Ok(())
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<(), ArchiveError> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        validate_relative(&path)?;

        let entry_type = entry.header().entry_type();
        match entry_type {
            EntryType::Directory => {
                fs::create_dir_all(dest.join(&path))?;
            }
            EntryType::Regular | EntryType::GNUSparse => {
                let target = dest.join(&path);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                entry.unpack(&target)?;
            }
            // pax/GNU metadata entries are consumed by the tar reader itself
            EntryType::XGlobalHeader | EntryType::XHeader => {}
            other => {
                return Err(ArchiveError::InvalidEntry {
                    entry: path,
                    reason: format!("unsupported entry type {other:?}"),
                });
            }
        }
    }
    Ok(())
}

fn extract_zip<R: Read + Seek>(reader: R, dest: &Path) -> Result<(), ArchiveError> {
    let mut archive = zip::ZipArchive::new(reader)?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let Some(relative) = file.enclosed_name().map(Path::to_path_buf) else {
            return Err(ArchiveError::InvalidEntry {
                entry: PathBuf::from(file.name()),
                reason: "path escapes the extraction directory".to_string(),
            });
        };

        let target = dest.join(&relative);
        if file.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut file, &mut out)?;
        debug!("Extracted {}", relative.display());
    }
    Ok(())
}
