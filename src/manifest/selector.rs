//! File selectors and their resolution against a manifest.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ResourceManifest;

/// Extensions classified as images (compared lowercase).
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "ico", "svg",
];

/// Extensions classified as videos (compared lowercase).
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm"];

/// Errors produced when a selector cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    /// The wire form was not recognised.
    #[error("unrecognised file selector '{input}'\n  Suggestion: Use a file number, 'all', 'images' or 'videos'")]
    Unparseable {
        /// Offending input.
        input: String,
    },

    /// The index is past the end of the manifest.
    #[error("file index {index} is out of range (resource has {len} files)")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of files in the manifest.
        len: usize,
    },

    /// A category matched no file of the manifest.
    #[error("resource has no files matching '{selector}'")]
    EmptyCategory {
        /// The category selector.
        selector: FileSelector,
    },
}

/// Media categories recognised by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    Image,
    Video,
}

impl FileCategory {
    /// Classifies `path` by its final extension, case-insensitively.
    #[must_use]
    pub fn classify(path: &str) -> Option<Self> {
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())?
            .to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
            Some(Self::Video)
        } else {
            None
        }
    }
}

/// Identifies which file(s) of a manifest a fetch targets.
///
/// Together with a resource id this names one fetch unit: it keys the task
/// registry and the publish ledger's comment flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FileSelector {
    /// One file by manifest index.
    Index(usize),
    /// Every file.
    All,
    /// Every image file.
    Images,
    /// Every video file.
    Videos,
}

impl FileSelector {
    /// Stable wire form, also used as the ledger's selector column.
    #[must_use]
    pub fn as_wire(&self) -> String {
        self.to_string()
    }

    fn category(self) -> Option<FileCategory> {
        match self {
            Self::Images => Some(FileCategory::Image),
            Self::Videos => Some(FileCategory::Video),
            Self::Index(_) | Self::All => None,
        }
    }

    /// Resolves this selector to concrete file indices of `manifest`.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError::IndexOutOfRange`] for an index past the end
    /// and [`SelectorError::EmptyCategory`] when a category matches nothing.
    pub fn resolve(&self, manifest: &ResourceManifest) -> Result<Selection, SelectorError> {
        let (indices, label): (Vec<usize>, String) = match *self {
            Self::Index(index) => {
                let file = manifest.file(index).ok_or(SelectorError::IndexOutOfRange {
                    index,
                    len: manifest.len(),
                })?;
                (vec![file.index], file.path.clone())
            }
            Self::All => (
                manifest.files.iter().map(|f| f.index).collect(),
                "All files".to_string(),
            ),
            Self::Images | Self::Videos => {
                let wanted = self.category();
                let indices: Vec<usize> = manifest
                    .files
                    .iter()
                    .filter(|f| FileCategory::classify(&f.path) == wanted)
                    .map(|f| f.index)
                    .collect();
                if indices.is_empty() {
                    return Err(SelectorError::EmptyCategory { selector: *self });
                }
                let label = if *self == Self::Images {
                    "All images"
                } else {
                    "All videos"
                };
                (indices, label.to_string())
            }
        };

        let total_bytes = indices
            .iter()
            .filter_map(|&i| manifest.file(i))
            .map(|f| f.bytes)
            .sum();

        Ok(Selection {
            selector: *self,
            indices,
            total_bytes,
            label,
        })
    }
}

impl fmt::Display for FileSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::All => f.write_str("all"),
            Self::Images => f.write_str("images"),
            Self::Videos => f.write_str("videos"),
        }
    }
}

impl FromStr for FileSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase();
        match token.as_str() {
            "all" | "-1" => Ok(Self::All),
            "images" | "-2" => Ok(Self::Images),
            "videos" | "-3" => Ok(Self::Videos),
            other => other
                .parse::<usize>()
                .map(Self::Index)
                .map_err(|_| SelectorError::Unparseable {
                    input: s.to_string(),
                }),
        }
    }
}

impl TryFrom<String> for FileSelector {
    type Error = SelectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FileSelector> for String {
    fn from(value: FileSelector) -> Self {
        value.to_string()
    }
}

/// A selector resolved against one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Selector this selection came from.
    pub selector: FileSelector,
    /// Selected file indices in manifest order.
    pub indices: Vec<usize>,
    /// Sum of the selected files' lengths.
    pub total_bytes: u64,
    /// Human label: the file path, or "All files"/"All images"/"All videos".
    pub label: String,
}

impl Selection {
    /// True when `index` is part of the selection.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }
}
