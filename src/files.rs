//! Managed storage layout
//!
//! Each import owns one upload directory under the root:
//!
//! ```text
//! <root>/upload-<uid>/
//!     <name>                  relocated upload
//!     processed/
//!         original.<ext>      original role (link or extracted tree)
//!         spatial.<ext>       spatial role (link to original, or converted)
//!         histogram           histogram role
//!         extracted           link to the extracted tree of a collection
//! ```
//!
//! Roles are decided from names alone, so they can be checked after the fact
//! without any import state.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

pub const UPLOAD_DIR_PREFIX: &str = "upload-";
pub const PROCESSED_DIR: &str = "processed";
pub const EXTRACTED_DIR: &str = "extracted";
pub const ORIGINAL_STEM: &str = "original";
pub const SPATIAL_STEM: &str = "spatial";
pub const HISTOGRAM_STEM: &str = "histogram";

/// Collision-free name for new storage entries.
pub fn unique_name() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn upload_dir_name() -> String {
    format!("{UPLOAD_DIR_PREFIX}{}", unique_name())
}

/// `<stem>.<identifier>`, the file name of an original or spatial role.
pub fn role_file_name(stem: &str, identifier: &str) -> String {
    format!("{stem}.{identifier}")
}

// ============================================================================
// Roles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Original,
    Spatial,
    Histogram,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Original, Role::Spatial, Role::Histogram];

    pub fn stem(&self) -> &'static str {
        match self {
            Role::Original => ORIGINAL_STEM,
            Role::Spatial => SPATIAL_STEM,
            Role::Histogram => HISTOGRAM_STEM,
        }
    }
}

/// Whether the name of `path` encodes `role`.
pub fn has_role(path: &Path, role: Role) -> bool {
    let in_processed = path
        .parent()
        .and_then(Path::file_name)
        .is_some_and(|name| name == PROCESSED_DIR);
    if !in_processed {
        return false;
    }

    match role {
        Role::Histogram => path.file_name().is_some_and(|name| name == HISTOGRAM_STEM),
        Role::Original | Role::Spatial => {
            let stem_matches = path.file_stem().is_some_and(|stem| stem == role.stem());
            let has_extension = path.extension().is_some_and(|ext| !ext.is_empty());
            stem_matches && has_extension
        }
    }
}

/// A path and every role it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Representation {
    pub path: PathBuf,
    pub roles: Vec<Role>,
}

impl Representation {
    /// Roles of `path`: the one its name encodes, plus the roles of sibling
    /// role entries resolving to the same location (a spatial link to the
    /// original makes the original carry the spatial role as well).
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut roles: Vec<Role> = Role::ALL
            .into_iter()
            .filter(|role| has_role(&path, *role))
            .collect();

        if let (Some(parent), Ok(resolved)) = (path.parent(), fs::canonicalize(&path)) {
            if let Ok(entries) = fs::read_dir(parent) {
                for entry in entries.flatten() {
                    let sibling = entry.path();
                    if sibling == path {
                        continue;
                    }
                    let same_target = fs::canonicalize(&sibling).is_ok_and(|t| t == resolved);
                    if !same_target {
                        continue;
                    }
                    for role in Role::ALL {
                        if !roles.contains(&role) && has_role(&sibling, role) {
                            roles.push(role);
                        }
                    }
                }
            }
        }

        Self { path, roles }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Whether `path` climbs out of a directory through a `..` component.
pub fn has_parent_component(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Whether `path` was produced by extracting an archive under `root`.
/// Paths with `..` components never qualify.
pub fn is_extracted(root: &Path, path: &Path) -> bool {
    if has_parent_component(path) {
        return false;
    }
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative
        .components()
        .any(|c| matches!(c, Component::Normal(name) if name == EXTRACTED_DIR))
}

// ============================================================================
// Traversal
// ============================================================================

/// Lazy walk over the importable units of an extracted tree.
///
/// Files are yielded as they come. Directories are descended into unless
/// `stop` accepts them, in which case the directory itself is yielded as one
/// unit. Hidden entries are skipped.
pub struct ExtractedChildren<F> {
    walker: walkdir::IntoIter,
    stop: F,
}

impl<F> Iterator for ExtractedChildren<F>
where
    F: FnMut(&Path) -> bool,
{
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable extracted entry: {}", e);
                    continue;
                }
            };

            if is_hidden(entry.file_name()) {
                if entry.file_type().is_dir() {
                    self.walker.skip_current_dir();
                }
                continue;
            }

            if entry.file_type().is_dir() {
                if (self.stop)(entry.path()) {
                    self.walker.skip_current_dir();
                    return Some(entry.into_path());
                }
                continue;
            }

            return Some(entry.into_path());
        }
    }
}

pub fn extracted_children<F>(dir: &Path, stop: F) -> ExtractedChildren<F>
where
    F: FnMut(&Path) -> bool,
{
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();
    ExtractedChildren { walker, stop }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || name == "__MACOSX"
}

/// Total size in bytes of a file or of every file below a directory.
pub fn folder_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

// ============================================================================
// Filesystem primitives
// ============================================================================

fn ensure_vacant(dest: &Path) -> io::Result<()> {
    if fs::symlink_metadata(dest).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", dest.display()),
        ));
    }
    Ok(())
}

/// Move a file or directory, falling back to copy + remove across devices.
pub fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    ensure_vacant(to)?;
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            copy_path(from, to)?;
            if fs::symlink_metadata(from)?.is_dir() {
                fs::remove_dir_all(from)
            } else {
                fs::remove_file(from)
            }
        }
        Err(e) => Err(e),
    }
}

/// Copy a file, or a directory recursively.
pub fn copy_path(from: &Path, to: &Path) -> io::Result<()> {
    ensure_vacant(to)?;
    if !from.is_dir() {
        fs::copy(from, to)?;
        return Ok(());
    }

    for entry in WalkDir::new(from).follow_links(true) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let dest = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Create `link` pointing at `target`.
pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}
