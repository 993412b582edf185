//! Document and annotation data model
//!
//! Entities are addressed by `ItemId` within the process and by
//! `(LibraryId, ItemKey)` across process boundaries (sync, notifications
//! from other surfaces).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LibraryId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

/// Stable, human-opaque entity key.
///
/// Unlike `ItemId`, keys survive export/import and are what the rendering
/// capability sees.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Epub,
    Snapshot,
}

/// The content entity a view instance renders.
///
/// `last_page_index` / `last_position` are the authoritative last-reading
/// position, independent of the per-document sidecar state file. They are
/// updated by sync and by other surfaces, which is why state restoration
/// treats them as a second source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: ItemId,
    pub library: LibraryId,
    pub key: ItemKey,
    pub kind: DocumentKind,
    pub title: String,
    /// Structural parent (e.g. the bibliographic item this attachment
    /// belongs to). Deleting or trashing the parent closes the viewer.
    pub parent: Option<ItemId>,
    pub content_path: Option<PathBuf>,
    pub editable: bool,
    pub deleted: bool,
    pub trashed: bool,
    pub last_page_index: Option<u32>,
    pub last_position: Option<String>,
    /// Unix timestamp, seconds.
    pub date_modified: i64,
    pub last_processed: Option<i64>,
}

impl Document {
    pub fn filename(&self) -> Option<String> {
        self.content_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Highlight,
    Underline,
    Note,
    Ink,
    Area,
}

/// A user-created markup entity owned by a `Document`.
///
/// `position` is an opaque JSON payload interpreted only by the rendering
/// capability; the core never parses it beyond validity checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: ItemId,
    pub key: ItemKey,
    pub document: ItemId,
    pub kind: AnnotationKind,
    pub color: Option<String>,
    pub position: String,
    pub sort_index: String,
    pub author: Option<String>,
    pub comment: Option<String>,
    pub tags: Vec<String>,
    pub date_modified: i64,
}

pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
