//! In-memory reference implementation of `DocumentStore`.
//!
//! Backs the core's test suite and embedders that do not bring their own
//! store. Interior state lives behind a mutex; change events queue up until
//! the embedder drains them into the registry.

use crate::events::{DeletedEntry, StoreEvent, WriteTag};
use crate::image_cache::ImageCache;
use crate::model::{
    unix_now, Annotation, Document, DocumentKind, ItemId, ItemKey, LibraryId,
};
use crate::store::{AnnotationUpsert, DocumentStore, StoreError, StoreResult, StoreTx};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

/// Field set for registering a document with the store.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub library: LibraryId,
    pub key: ItemKey,
    pub kind: DocumentKind,
    pub title: String,
    pub parent: Option<ItemId>,
    pub content_path: Option<PathBuf>,
    pub editable: bool,
}

impl NewDocument {
    pub fn new(
        library: LibraryId,
        key: impl Into<ItemKey>,
        kind: DocumentKind,
        title: impl Into<String>,
    ) -> Self {
        Self {
            library,
            key: key.into(),
            kind,
            title: title.into(),
            parent: None,
            content_path: None,
            editable: true,
        }
    }
}

pub struct MemoryStore {
    root: PathBuf,
    cache: ImageCache,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    documents: BTreeMap<ItemId, Document>,
    annotations: BTreeMap<ItemId, Annotation>,
    by_key: HashMap<(LibraryId, ItemKey), ItemId>,
    unloaded_libraries: HashSet<LibraryId>,
    import_checks: Vec<ItemId>,
    events: VecDeque<StoreEvent>,
    next_id: u64,
}

impl Inner {
    fn next_id(&mut self) -> ItemId {
        self.next_id += 1;
        ItemId(self.next_id)
    }
}

impl MemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let cache = ImageCache::new(root.join("image-cache"));
        Self { root, cache, inner: Mutex::new(Inner::default()) }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Register a document. Emits no event; bootstrap only.
    pub fn add_document(&self, new: NewDocument) -> Document {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        let doc = Document {
            id,
            library: new.library,
            key: new.key.clone(),
            kind: new.kind,
            title: new.title,
            parent: new.parent,
            content_path: new.content_path,
            editable: new.editable,
            deleted: false,
            trashed: false,
            last_page_index: None,
            last_position: None,
            date_modified: unix_now(),
            last_processed: None,
        };
        inner.by_key.insert((new.library, new.key), id);
        inner.documents.insert(id, doc.clone());
        doc
    }

    /// Register an annotation. Emits no event; bootstrap only.
    pub fn add_annotation(
        &self,
        document: ItemId,
        edit: AnnotationUpsert,
        author: Option<&str>,
    ) -> StoreResult<Annotation> {
        let mut inner = self.inner.lock().unwrap();
        let library = inner
            .documents
            .get(&document)
            .ok_or(StoreError::NotFound(document))?
            .library;
        let id = inner.next_id();
        let annotation = Annotation {
            id,
            key: edit.key.clone(),
            document,
            kind: edit.kind,
            color: edit.color,
            position: edit.position,
            sort_index: edit.sort_index,
            author: author.map(str::to_owned),
            comment: edit.comment,
            tags: edit.tags,
            date_modified: unix_now(),
        };
        inner.by_key.insert((library, edit.key), id);
        inner.annotations.insert(id, annotation.clone());
        Ok(annotation)
    }

    /// Update a document's authoritative last-position fields, as sync or
    /// another surface would. Emits `Modified`.
    pub fn set_document_position(
        &self,
        id: ItemId,
        last_page_index: Option<u32>,
        last_position: Option<String>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let doc = inner.documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        doc.last_page_index = last_page_index;
        doc.last_position = last_position;
        doc.date_modified = unix_now();
        inner
            .events
            .push_back(StoreEvent::Modified { ids: vec![id], write_tags: HashMap::new() });
        Ok(())
    }

    /// Retitle a document, as an external edit would. Emits `Modified`.
    pub fn rename_document(&self, id: ItemId, title: impl Into<String>) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let doc = inner.documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        doc.title = title.into();
        doc.date_modified = unix_now();
        inner
            .events
            .push_back(StoreEvent::Modified { ids: vec![id], write_tags: HashMap::new() });
        Ok(())
    }

    /// Move a document to the trash. Emits `Trashed`.
    pub fn trash_document(&self, id: ItemId) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let doc = inner.documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        doc.trashed = true;
        inner.events.push_back(StoreEvent::Trashed { ids: vec![id] });
        Ok(())
    }

    /// Erase a document or annotation outright, as sync would after a remote
    /// delete. Erasing a document also erases its annotations. Emits one
    /// `Deleted` event covering everything removed.
    pub fn erase_item(&self, id: ItemId) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut entries = Vec::new();

        if let Some(doc) = inner.documents.remove(&id) {
            let owned: Vec<ItemId> = inner
                .annotations
                .values()
                .filter(|a| a.document == id)
                .map(|a| a.id)
                .collect();
            for ann_id in owned {
                if let Some(ann) = inner.annotations.remove(&ann_id) {
                    inner.by_key.remove(&(doc.library, ann.key.clone()));
                    entries.push(DeletedEntry {
                        id: ann.id,
                        key: ann.key,
                        library: doc.library,
                        parent: Some(id),
                    });
                }
            }
            inner.by_key.remove(&(doc.library, doc.key.clone()));
            entries.push(DeletedEntry {
                id,
                key: doc.key,
                library: doc.library,
                parent: doc.parent,
            });
        } else if let Some(ann) = inner.annotations.remove(&id) {
            let library = inner
                .documents
                .get(&ann.document)
                .map(|d| d.library)
                .unwrap_or(LibraryId(0));
            inner.by_key.remove(&(library, ann.key.clone()));
            entries.push(DeletedEntry {
                id,
                key: ann.key,
                library,
                parent: Some(ann.document),
            });
        } else {
            return Err(StoreError::NotFound(id));
        }

        inner.events.push_back(StoreEvent::Deleted { entries });
        Ok(())
    }

    /// Mark a library as still loading; `ensure_library_loaded` completes
    /// the load. Test control.
    pub fn set_library_loading(&self, library: LibraryId) {
        self.inner.lock().unwrap().unloaded_libraries.insert(library);
    }

    /// Import checks requested so far, in request order.
    pub fn pending_import_checks(&self) -> Vec<ItemId> {
        self.inner.lock().unwrap().import_checks.clone()
    }
}

struct MemTx<'a> {
    inner: &'a mut Inner,
    added: Vec<ItemId>,
    modified: Vec<ItemId>,
    deleted: Vec<DeletedEntry>,
}

impl StoreTx for MemTx<'_> {
    fn upsert_annotation(
        &mut self,
        document: ItemId,
        edit: AnnotationUpsert,
    ) -> StoreResult<Annotation> {
        let library = self
            .inner
            .documents
            .get(&document)
            .ok_or(StoreError::NotFound(document))?
            .library;

        match self.inner.by_key.get(&(library, edit.key.clone())).copied() {
            Some(id) => {
                let existing = self
                    .inner
                    .annotations
                    .get_mut(&id)
                    .ok_or(StoreError::NotFound(id))?;
                if existing.document != document {
                    return Err(StoreError::WrongParent(id));
                }
                existing.kind = edit.kind;
                existing.color = edit.color;
                existing.position = edit.position;
                existing.sort_index = edit.sort_index;
                existing.comment = edit.comment;
                existing.tags = edit.tags;
                existing.date_modified = unix_now();
                self.modified.push(id);
                Ok(existing.clone())
            }
            None => {
                let id = self.inner.next_id();
                let annotation = Annotation {
                    id,
                    key: edit.key.clone(),
                    document,
                    kind: edit.kind,
                    color: edit.color,
                    position: edit.position,
                    sort_index: edit.sort_index,
                    author: None,
                    comment: edit.comment,
                    tags: edit.tags,
                    date_modified: unix_now(),
                };
                self.inner.by_key.insert((library, edit.key), id);
                self.inner.annotations.insert(id, annotation.clone());
                self.added.push(id);
                Ok(annotation)
            }
        }
    }

    fn erase_annotation(&mut self, id: ItemId) -> StoreResult<()> {
        let ann = self
            .inner
            .annotations
            .remove(&id)
            .ok_or(StoreError::NotFound(id))?;
        let library = self
            .inner
            .documents
            .get(&ann.document)
            .map(|d| d.library)
            .unwrap_or(LibraryId(0));
        self.inner.by_key.remove(&(library, ann.key.clone()));
        self.deleted.push(DeletedEntry {
            id,
            key: ann.key,
            library,
            parent: Some(ann.document),
        });
        Ok(())
    }

    fn update_annotation_color(&mut self, id: ItemId, color: &str) -> StoreResult<()> {
        let ann = self
            .inner
            .annotations
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        ann.color = Some(color.to_owned());
        // No date_modified bump: metadata-only rewrite.
        self.modified.push(id);
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn document(&self, id: ItemId) -> Option<Document> {
        self.inner.lock().unwrap().documents.get(&id).cloned()
    }

    fn document_by_key(&self, library: LibraryId, key: &ItemKey) -> Option<Document> {
        let inner = self.inner.lock().unwrap();
        let id = inner.by_key.get(&(library, key.clone()))?;
        inner.documents.get(id).cloned()
    }

    fn annotation(&self, id: ItemId) -> Option<Annotation> {
        self.inner.lock().unwrap().annotations.get(&id).cloned()
    }

    fn annotation_by_key(&self, library: LibraryId, key: &ItemKey) -> Option<Annotation> {
        let inner = self.inner.lock().unwrap();
        let id = inner.by_key.get(&(library, key.clone()))?;
        inner.annotations.get(id).cloned()
    }

    fn annotations_for(&self, document: ItemId) -> Vec<Annotation> {
        self.inner
            .lock()
            .unwrap()
            .annotations
            .values()
            .filter(|a| a.document == document)
            .cloned()
            .collect()
    }

    fn ensure_library_loaded(&self, library: LibraryId) -> StoreResult<()> {
        // Loading completes synchronously here; a real store would await its
        // schema and data load.
        self.inner.lock().unwrap().unloaded_libraries.remove(&library);
        Ok(())
    }

    fn queue_import_check(&self, document: ItemId) -> StoreResult<()> {
        self.inner.lock().unwrap().import_checks.push(document);
        Ok(())
    }

    fn storage_dir(&self, document: ItemId) -> StoreResult<PathBuf> {
        let inner = self.inner.lock().unwrap();
        let doc = inner
            .documents
            .get(&document)
            .ok_or(StoreError::NotFound(document))?;
        Ok(self.root.join("storage").join(doc.key.as_str()))
    }

    fn transact(
        &self,
        tag: Option<WriteTag>,
        f: &mut dyn FnMut(&mut dyn StoreTx) -> StoreResult<()>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut tx =
            MemTx { inner: &mut inner, added: Vec::new(), modified: Vec::new(), deleted: Vec::new() };

        let result = f(&mut tx);

        let MemTx { added, modified, deleted, .. } = tx;
        let tag_map = |ids: &[ItemId]| -> HashMap<ItemId, WriteTag> {
            match tag {
                Some(tag) => ids.iter().map(|id| (*id, tag)).collect(),
                None => HashMap::new(),
            }
        };

        // The transaction closes unconditionally: whatever was applied
        // before a failure is still announced as one coalesced batch.
        if !added.is_empty() {
            let write_tags = tag_map(&added);
            inner.events.push_back(StoreEvent::Added { ids: added, write_tags });
        }
        if !modified.is_empty() {
            let write_tags = tag_map(&modified);
            inner.events.push_back(StoreEvent::Modified { ids: modified, write_tags });
        }
        if !deleted.is_empty() {
            inner.events.push_back(StoreEvent::Deleted { entries: deleted });
        }

        result
    }

    fn cache_image(&self, annotation: &Annotation, bytes: &[u8]) -> StoreResult<PathBuf> {
        let library = {
            let inner = self.inner.lock().unwrap();
            inner
                .documents
                .get(&annotation.document)
                .ok_or(StoreError::NotFound(annotation.document))?
                .library
        };
        Ok(self.cache.write(library, &annotation.key, bytes)?)
    }

    fn take_events(&self) -> Vec<StoreEvent> {
        self.inner.lock().unwrap().events.drain(..).collect()
    }
}
