//! Resolved resource manifests and file selection.
//!
//! # Overview
//!
//! - [`ResourceManifest`] - Immutable description of one resolved resource
//! - [`FileEntry`] - One file inside a manifest, indexed in manifest order
//! - [`FileSelector`] - Which file(s) of a manifest a fetch targets
//! - [`Selection`] - A selector resolved against a manifest
//!
//! Selector resolution ([`FileSelector::resolve`]) is the single place that
//! turns a selector into concrete file indices. Admission sizing, the fetch
//! session and the publish ledger all go through it, so the three can never
//! disagree about which files a category covers.

mod selector;

pub use selector::{FileCategory, FileSelector, Selection, SelectorError};

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::ResolvedMetadata;
use crate::locator::{Locator, ResourceId};

/// A manifest name that would resolve outside the download root.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("path '{path}' does not stay inside the download root")]
pub struct UnsafePath {
    /// The offending name as reported by the engine.
    pub path: String,
}

/// Appends the `/`-separated `relative` to `base`, one plain name per
/// segment. Empty, `.`, `..`, rooted and drive-prefixed segments are refused.
fn join_confined(base: PathBuf, relative: &str) -> Result<PathBuf, UnsafePath> {
    let unsafe_path = || UnsafePath {
        path: relative.to_string(),
    };
    let mut path = base;
    for segment in relative.split('/') {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => path.push(name),
            _ => return Err(unsafe_path()),
        }
    }
    Ok(path)
}

/// One file of a resolved resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Position in manifest order, starting at 0.
    pub index: usize,
    /// Path relative to the resource root, `/`-separated.
    pub path: String,
    /// File length in bytes.
    pub bytes: u64,
}

/// Immutable description of a resolved resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManifest {
    /// Content-addressed key.
    pub resource_id: ResourceId,
    /// Resource name as reported by the engine.
    pub display_name: String,
    /// Sum of all file lengths.
    pub total_bytes: u64,
    /// True when the resource is a directory of files rather than one file.
    pub is_container: bool,
    /// Locator the manifest was resolved from, used to re-attach for transfer.
    pub locator: String,
    /// Files in manifest order; never empty.
    pub files: Vec<FileEntry>,
}

impl ResourceManifest {
    /// Builds a manifest from engine metadata, assigning sequential indices.
    ///
    /// A single-file resource (no file list) becomes one entry named after
    /// the resource, so every manifest has at least one file.
    #[must_use]
    pub fn from_resolved(locator: &Locator, metadata: ResolvedMetadata) -> Self {
        let is_container = !metadata.files.is_empty();
        let files: Vec<FileEntry> = if is_container {
            metadata
                .files
                .into_iter()
                .enumerate()
                .map(|(index, file)| FileEntry {
                    index,
                    path: file.path,
                    bytes: file.bytes,
                })
                .collect()
        } else {
            vec![FileEntry {
                index: 0,
                path: metadata.name.clone(),
                bytes: metadata.total_bytes,
            }]
        };

        Self {
            resource_id: locator.resource_id().clone(),
            display_name: metadata.name,
            total_bytes: metadata.total_bytes,
            is_container,
            locator: locator.as_str().to_string(),
            files,
        }
    }

    /// Returns the file at `index`, if any.
    #[must_use]
    pub fn file(&self, index: usize) -> Option<&FileEntry> {
        self.files.get(index)
    }

    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True for a manifest without files (never produced by resolution).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Directory (or single file) the resource occupies under `download_root`.
    ///
    /// # Errors
    ///
    /// Returns [`UnsafePath`] when the resource name is not one plain path
    /// segment.
    pub fn resource_path(&self, download_root: &Path) -> Result<PathBuf, UnsafePath> {
        if self.display_name.contains('/') {
            return Err(UnsafePath {
                path: self.display_name.clone(),
            });
        }
        join_confined(download_root.to_path_buf(), &self.display_name)
    }

    /// Where the transfer engine leaves `file` under `download_root`.
    ///
    /// Container resources live in a directory named after the resource;
    /// single-file resources are the file itself. Names come from untrusted
    /// metadata, so the result is always confined to `download_root`.
    ///
    /// # Errors
    ///
    /// Returns [`UnsafePath`] when the resource name or the file path would
    /// leave `download_root`.
    pub fn local_path(&self, download_root: &Path, file: &FileEntry) -> Result<PathBuf, UnsafePath> {
        let base = self.resource_path(download_root)?;
        if self.is_container {
            join_confined(base, &file.path)
        } else {
            Ok(base)
        }
    }
}
