//! The rendering capability boundary.
//!
//! The capability is opaque: the core hands it one initialization payload
//! and a fixed command set, and receives a fixed event set back. There is no
//! dynamic property forwarding across this seam.

use folio_state::ViewState;
use folio_store::{Annotation, AnnotationKind, ItemKey};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Annotation in view-ready form: position decoded, editability resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewAnnotation {
    pub key: ItemKey,
    pub kind: AnnotationKind,
    pub color: Option<String>,
    pub position: Value,
    pub sort_index: String,
    pub author: Option<String>,
    pub comment: Option<String>,
    pub tags: Vec<String>,
    pub read_only: bool,
}

impl ViewAnnotation {
    /// Convert a store annotation. Malformed position payloads yield `None`;
    /// the caller logs and skips them rather than failing the batch.
    pub fn from_entity(annotation: &Annotation, read_only: bool) -> Option<Self> {
        let position = serde_json::from_str(&annotation.position).ok()?;
        Some(Self {
            key: annotation.key.clone(),
            kind: annotation.kind,
            color: annotation.color.clone(),
            position,
            sort_index: annotation.sort_index.clone(),
            author: annotation.author.clone(),
            comment: annotation.comment.clone(),
            tags: annotation.tags.clone(),
            read_only,
        })
    }
}

/// An annotation edit arriving from the rendering capability.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationEdit {
    pub key: ItemKey,
    pub kind: AnnotationKind,
    pub color: Option<String>,
    /// JSON position payload, opaque to the core beyond validity.
    pub position: String,
    pub sort_index: String,
    pub comment: Option<String>,
    pub tags: Vec<String>,
    /// Rendered image for area/ink annotations, persisted to the image
    /// cache alongside the entity.
    pub image: Option<Vec<u8>>,
}

/// Navigation target forwarded into an already-open instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Page(u32),
    Cfi(String),
    Annotation(ItemKey),
}

/// Registry-level layout defaults applied to new instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutPrefs {
    pub sidebar_width: u32,
    pub sidebar_open: bool,
    pub bottom_placeholder_height: u32,
}

impl Default for LayoutPrefs {
    fn default() -> Self {
        Self { sidebar_width: 240, sidebar_open: true, bottom_placeholder_height: 0 }
    }
}

/// Everything the rendering capability needs to start showing content.
#[derive(Debug, Clone)]
pub struct InitPayload {
    pub content_path: PathBuf,
    pub annotations: Vec<ViewAnnotation>,
    pub state: ViewState,
    pub locale: BTreeMap<String, String>,
    pub read_only: bool,
    pub layout: LayoutPrefs,
}

/// Commands the core issues to the rendering capability.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    SetAnnotations(Vec<ViewAnnotation>),
    UnsetAnnotations(Vec<ItemKey>),
    Navigate(Location),
    SetTitle(String),
    SetReadOnly(bool),
    SetSidebarWidth(u32),
    SetSidebarOpen(bool),
    SetBottomPlaceholderHeight(u32),
    Focus,
}

/// Events the rendering capability emits; processed in arrival order.
#[derive(Debug, Clone)]
pub enum RendererEvent {
    SaveAnnotations(Vec<AnnotationEdit>),
    DeleteAnnotations(Vec<ItemKey>),
    ChangeViewState { state: ViewState, is_primary: bool },
    OpenContextMenu { params: Value },
    OpenTagPopup { key: ItemKey, params: Value },
    OpenLink { url: String },
    ExportImage { key: ItemKey, data: Vec<u8> },
    RotatePages { pages: Vec<u32>, degrees: i32 },
    DeletePages { pages: Vec<u32> },
}

pub trait Renderer: Send + Sync {
    fn init(&self, payload: InitPayload);
    fn command(&self, command: RenderCommand);
}

/// Performs destructive structural edits on the content file (page
/// rotate/delete). External capability; the instance stays suspended for
/// the duration so no annotation write can race unstable page indices.
pub trait StructuralEditor: Send + Sync {
    fn rotate_pages(&self, content: &std::path::Path, pages: &[u32], degrees: i32)
        -> std::io::Result<()>;
    fn delete_pages(&self, content: &std::path::Path, pages: &[u32]) -> std::io::Result<()>;
}
