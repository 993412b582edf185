//! The `DocumentStore` trait consumed by the reader core.
//!
//! The core never mutates entities directly; all writes go through
//! `transact`, which scopes a batch of edits to one transaction and one
//! coalesced notification.

use crate::events::{StoreEvent, WriteTag};
use crate::model::{Annotation, AnnotationKind, Document, ItemId, ItemKey, LibraryId};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("item not found: {0:?}")]
    NotFound(ItemId),
    #[error("no item with key {1} in library {0:?}")]
    KeyNotFound(LibraryId, ItemKey),
    #[error("library {0:?} is not available")]
    LibraryUnavailable(LibraryId),
    #[error("item {0:?} is not an annotation of the expected document")]
    WrongParent(ItemId),
    #[error("transaction failed: {0}")]
    Transaction(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Field set for creating or updating an annotation in one transaction.
#[derive(Debug, Clone)]
pub struct AnnotationUpsert {
    pub key: ItemKey,
    pub kind: AnnotationKind,
    pub color: Option<String>,
    pub position: String,
    pub sort_index: String,
    pub comment: Option<String>,
    pub tags: Vec<String>,
}

/// Operations available inside a transaction closure.
pub trait StoreTx {
    /// Create or update an annotation under `document`, bumping its
    /// modification time.
    fn upsert_annotation(
        &mut self,
        document: ItemId,
        edit: AnnotationUpsert,
    ) -> StoreResult<Annotation>;

    /// Remove an annotation entirely.
    fn erase_annotation(&mut self, id: ItemId) -> StoreResult<()>;

    /// Metadata-only color rewrite. Does not bump the modification time;
    /// used by the legacy color migration so migrated annotations do not
    /// look freshly edited to sync.
    fn update_annotation_color(&mut self, id: ItemId, color: &str) -> StoreResult<()>;
}

/// Shared persistent document store.
///
/// Lookup methods return owned snapshots; the store's interior state may be
/// mutated by external actors (import, sync, other surfaces) between calls.
pub trait DocumentStore: Send + Sync {
    fn document(&self, id: ItemId) -> Option<Document>;
    fn document_by_key(&self, library: LibraryId, key: &ItemKey) -> Option<Document>;
    fn annotation(&self, id: ItemId) -> Option<Annotation>;
    fn annotation_by_key(&self, library: LibraryId, key: &ItemKey) -> Option<Annotation>;
    fn annotations_for(&self, document: ItemId) -> Vec<Annotation>;

    /// Block until the owning library has finished loading.
    fn ensure_library_loaded(&self, library: LibraryId) -> StoreResult<()>;

    /// Best-effort request to re-check the document for importable embedded
    /// annotations. Never blocks the caller.
    fn queue_import_check(&self, document: ItemId) -> StoreResult<()>;

    /// Per-document storage directory; created on demand by callers that
    /// write into it.
    fn storage_dir(&self, document: ItemId) -> StoreResult<PathBuf>;

    /// Run `f` against a transaction scope. All mutations performed by `f`
    /// are announced as one coalesced event batch once the transaction
    /// closes. Closure of the transaction is unconditional: if `f` errors,
    /// mutations applied before the failure are still announced and the
    /// error is returned to the caller afterwards.
    fn transact(
        &self,
        tag: Option<WriteTag>,
        f: &mut dyn FnMut(&mut dyn StoreTx) -> StoreResult<()>,
    ) -> StoreResult<()>;

    /// Persist a rendered annotation image into the content-addressed cache.
    /// The sole permitted mutation for annotations of non-editable documents.
    fn cache_image(&self, annotation: &Annotation, bytes: &[u8]) -> StoreResult<PathBuf>;

    /// Drain queued change events. The embedder pumps these into the
    /// registry's reconciliation entrypoint.
    fn take_events(&self) -> Vec<StoreEvent>;
}
