//! Per-document view state: the sidecar file format, read-side merging with
//! the entity's authoritative position, and the debounced writer.
//!
//! State is persisted per document, not per instance: two tabs showing the
//! same document share one sidecar file.

mod writer;

pub use writer::StateWriter;

use folio_store::DocumentKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Fixed sidecar filename inside the document's storage directory.
pub const STATE_FILE: &str = "view-state.json";

/// Legacy sidecar name, consulted read-only for pdf documents when the
/// primary file is absent or unparseable.
pub const LEGACY_PDF_STATE_FILE: &str = "pdf-state.json";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Positional view state plus free-form fields the rendering capability
/// stores alongside them (tool selections, sidebar view, …).
///
/// Which positional fields are populated depends on the document kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_left: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_top: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_y_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ViewState {
    pub fn with_page_index(page_index: u32) -> Self {
        Self { page_index: Some(page_index), ..Self::default() }
    }
}

/// The entity's own authoritative last-reading position, independent of the
/// sidecar. Updated by sync and by other surfaces.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityPosition {
    Page(u32),
    Cfi(String),
    ScrollPercent(f64),
}

pub fn state_path(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE)
}

pub fn legacy_state_path(dir: &Path) -> PathBuf {
    dir.join(LEGACY_PDF_STATE_FILE)
}

/// Persist `state` into `dir` (created if absent).
///
/// The file content is serialized fully up front and lands in a single
/// structured write; there is no write-then-rename step, so overlapping
/// writers on slow storage never contend over temp files and no reader
/// observes a partially written sidecar.
pub fn write_state(dir: &Path, state: &ViewState) -> Result<(), StateError> {
    fs::create_dir_all(dir)?;
    let bytes = serde_json::to_vec(state)?;
    fs::write(state_path(dir), bytes)?;
    Ok(())
}

/// Restore state for a document.
///
/// Sidecar first (legacy fallback for pdf), then the entity position is
/// merged in: for pdf a differing entity page index wins and stale
/// pixel-offset fields are dropped; for epub/snapshot the entity field
/// always overwrites. With neither source, a minimal state is synthesized
/// from the entity field alone.
pub fn read_state(dir: &Path, kind: DocumentKind, entity: Option<EntityPosition>) -> ViewState {
    let sidecar = load_sidecar(dir, kind);
    merge_entity_position(sidecar.unwrap_or_default(), kind, entity)
}

fn load_sidecar(dir: &Path, kind: DocumentKind) -> Option<ViewState> {
    if let Some(state) = parse_state_file(&state_path(dir)) {
        return Some(state);
    }
    if kind == DocumentKind::Pdf {
        return parse_state_file(&legacy_state_path(dir));
    }
    None
}

fn parse_state_file(path: &Path) -> Option<ViewState> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
        Err(err) => {
            log::warn!("failed to read view state {}: {err}", path.display());
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(state) => Some(state),
        Err(err) => {
            log::warn!("discarding unparseable view state {}: {err}", path.display());
            None
        }
    }
}

fn merge_entity_position(
    mut state: ViewState,
    kind: DocumentKind,
    entity: Option<EntityPosition>,
) -> ViewState {
    match (kind, entity) {
        (DocumentKind::Pdf, Some(EntityPosition::Page(page_index))) => {
            if state.page_index != Some(page_index) {
                state.page_index = Some(page_index);
                // Pixel offsets belong to the sidecar's page; they are stale
                // once the entity disagrees about which page that is.
                state.scroll_left = None;
                state.scroll_top = None;
            }
        }
        (DocumentKind::Epub, Some(EntityPosition::Cfi(cfi))) => {
            state.cfi = Some(cfi);
        }
        (DocumentKind::Snapshot, Some(EntityPosition::ScrollPercent(percent))) => {
            state.scroll_y_percent = Some(percent);
        }
        _ => {}
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_page_index_wins_and_drops_pixel_offsets() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let state = ViewState {
            page_index: Some(3),
            scroll_left: Some(12.0),
            scroll_top: Some(480.0),
            zoom: Some(1.25),
            ..ViewState::default()
        };
        write_state(temp.path(), &state).expect("write should succeed");

        let restored = read_state(temp.path(), DocumentKind::Pdf, Some(EntityPosition::Page(5)));

        assert_eq!(restored.page_index, Some(5));
        assert_eq!(restored.scroll_left, None);
        assert_eq!(restored.scroll_top, None);
        assert_eq!(restored.zoom, Some(1.25));
    }

    #[test]
    fn matching_entity_page_index_keeps_pixel_offsets() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let state = ViewState {
            page_index: Some(3),
            scroll_top: Some(480.0),
            ..ViewState::default()
        };
        write_state(temp.path(), &state).expect("write should succeed");

        let restored = read_state(temp.path(), DocumentKind::Pdf, Some(EntityPosition::Page(3)));

        assert_eq!(restored.page_index, Some(3));
        assert_eq!(restored.scroll_top, Some(480.0));
    }

    #[test]
    fn entity_cfi_always_overwrites_sidecar() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let state = ViewState { cfi: Some("epubcfi(/6/4!/2)".to_owned()), ..ViewState::default() };
        write_state(temp.path(), &state).expect("write should succeed");

        let restored = read_state(
            temp.path(),
            DocumentKind::Epub,
            Some(EntityPosition::Cfi("epubcfi(/6/8!/4)".to_owned())),
        );

        assert_eq!(restored.cfi.as_deref(), Some("epubcfi(/6/8!/4)"));
    }

    #[test]
    fn snapshot_scroll_percent_overwrites_sidecar() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let state = ViewState { scroll_y_percent: Some(10.0), ..ViewState::default() };
        write_state(temp.path(), &state).expect("write should succeed");

        let restored = read_state(
            temp.path(),
            DocumentKind::Snapshot,
            Some(EntityPosition::ScrollPercent(62.5)),
        );

        assert_eq!(restored.scroll_y_percent, Some(62.5));
    }

    #[test]
    fn missing_sidecar_synthesizes_state_from_entity() {
        let temp = tempfile::tempdir().expect("temp dir should be created");

        let restored = read_state(temp.path(), DocumentKind::Pdf, Some(EntityPosition::Page(7)));

        assert_eq!(restored, ViewState::with_page_index(7));
    }

    #[test]
    fn legacy_sidecar_is_used_for_pdf_only() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let legacy = ViewState { page_index: Some(2), ..ViewState::default() };
        fs::create_dir_all(temp.path()).unwrap();
        fs::write(
            legacy_state_path(temp.path()),
            serde_json::to_vec(&legacy).unwrap(),
        )
        .unwrap();

        let pdf = read_state(temp.path(), DocumentKind::Pdf, None);
        assert_eq!(pdf.page_index, Some(2));

        let epub = read_state(temp.path(), DocumentKind::Epub, None);
        assert_eq!(epub, ViewState::default());
    }

    #[test]
    fn corrupt_primary_falls_back_to_legacy() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        fs::create_dir_all(temp.path()).unwrap();
        fs::write(state_path(temp.path()), b"{not json").unwrap();
        let legacy = ViewState { page_index: Some(4), ..ViewState::default() };
        fs::write(
            legacy_state_path(temp.path()),
            serde_json::to_vec(&legacy).unwrap(),
        )
        .unwrap();

        let restored = read_state(temp.path(), DocumentKind::Pdf, None);
        assert_eq!(restored.page_index, Some(4));
    }

    #[test]
    fn free_form_fields_round_trip() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut state = ViewState::with_page_index(1);
        state.extra.insert("sidebarView".to_owned(), json!("annotations"));

        write_state(temp.path(), &state).expect("write should succeed");
        let restored = read_state(temp.path(), DocumentKind::Pdf, None);

        assert_eq!(restored.extra.get("sidebarView"), Some(&json!("annotations")));
    }
}
