//! One open rendering session bound to a document and a host surface.
//!
//! The instance bridges the domain model and the rendering capability:
//! edits flow store-ward through transactions tagged with the instance's
//! write-tag, and store notifications flow view-ward through the
//! reconciliation methods the registry drives.

use crate::error::{ReaderError, ReaderResult};
use crate::migrate::migrate_legacy_colors;
use crate::registry::RegistryConfig;
use crate::renderer::{
    AnnotationEdit, InitPayload, LayoutPrefs, Location, RenderCommand, Renderer, RendererEvent,
    StructuralEditor, ViewAnnotation,
};
use crate::surface::{HostSurface, SurfaceKind};
use folio_state::{read_state, EntityPosition, StateError, StateWriter, ViewState};
use folio_store::{
    Annotation, AnnotationUpsert, DeletedEntry, Document, DocumentKind, DocumentStore, ItemId,
    ItemKey, LibraryId, StoreError, WriteTag,
};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// Process-unique random instance identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Constructed,
    Opening,
    Initialized,
    Active,
    Suspended,
    Closed,
}

struct InstanceState {
    phase: Phase,
    title: String,
    read_only: bool,
    layout: LayoutPrefs,
    annotation_ids: BTreeSet<ItemId>,
    writer: StateWriter,
    /// Transient state forwarded by a secondary (split) surface; never
    /// persisted.
    transient_state: Option<ViewState>,
}

pub struct ViewInstance {
    id: InstanceId,
    document: ItemId,
    library: LibraryId,
    parent: Option<ItemId>,
    kind: DocumentKind,
    surface_kind: SurfaceKind,
    write_tag: WriteTag,
    content_path: PathBuf,
    storage_dir: PathBuf,
    store: Arc<dyn DocumentStore>,
    surface: Arc<dyn HostSurface>,
    renderer: Arc<dyn Renderer>,
    state: Mutex<InstanceState>,
}

impl ViewInstance {
    /// Construct and run the full open sequence against an allocated
    /// surface. On error the caller discards the instance; it is never
    /// registered.
    pub(crate) fn open(
        store: Arc<dyn DocumentStore>,
        surface: Arc<dyn HostSurface>,
        config: &RegistryConfig,
        document: ItemId,
    ) -> ReaderResult<Arc<Self>> {
        let doc = store.document(document).ok_or(ReaderError::NotFound(document))?;
        let content_path =
            doc.content_path.clone().ok_or(ReaderError::MissingContent(document))?;

        // Reject content the platform cannot address rather than risk a
        // range failure deep inside the rendering capability.
        let size = fs::metadata(&content_path)?.len();
        if size > config.max_content_bytes {
            return Err(ReaderError::OversizedContent {
                size,
                limit: config.max_content_bytes,
            });
        }

        let storage_dir = store.storage_dir(document)?;
        let renderer = surface.renderer();
        let surface_kind = surface.kind();

        let instance = Arc::new(Self {
            id: InstanceId::new(),
            document,
            library: doc.library,
            parent: doc.parent,
            kind: doc.kind,
            surface_kind,
            write_tag: Uuid::new_v4(),
            content_path,
            storage_dir,
            store,
            surface,
            renderer,
            state: Mutex::new(InstanceState {
                phase: Phase::Constructed,
                title: String::new(),
                read_only: !doc.editable,
                layout: config.defaults,
                annotation_ids: BTreeSet::new(),
                writer: StateWriter::new(config.debounce_delay),
                transient_state: None,
            }),
        });

        instance.run_open(&doc, config)?;
        Ok(instance)
    }

    fn run_open(&self, doc: &Document, config: &RegistryConfig) -> ReaderResult<()> {
        self.set_phase(Phase::Opening);

        // Migration failures degrade to the unmigrated colors; never fatal.
        match migrate_legacy_colors(self.store.as_ref(), self.document) {
            Ok(0) => {}
            Ok(n) => log::debug!("{}: migrated {n} legacy annotation colors", self.id),
            Err(err) => log::warn!("{}: legacy color migration failed: {err}", self.id),
        }

        // Re-fetch after migration so the renderer never sees legacy colors.
        let read_only = self.is_read_only();
        let entities = self.store.annotations_for(self.document);
        let annotations = convert_annotations(&entities, read_only);
        {
            let mut state = self.state.lock().unwrap();
            state.annotation_ids = entities.iter().map(|a| a.id).collect();
        }

        let view_state = read_state(&self.storage_dir, self.kind, entity_position(doc));

        // Bounded wait for the surface's one-shot readiness latch.
        let latch = self.surface.ready();
        let mut attempts = 0;
        while !latch.is_ready() {
            if attempts >= config.ready_poll_attempts {
                return Err(ReaderError::TimedOut);
            }
            attempts += 1;
            std::thread::sleep(config.ready_poll_interval);
        }

        self.set_phase(Phase::Initialized);

        let title = display_title(self.store.as_ref(), doc);
        let layout = {
            let mut state = self.state.lock().unwrap();
            state.title = title.clone();
            state.layout
        };
        self.surface.set_title(&title);
        self.renderer.init(InitPayload {
            content_path: self.content_path.clone(),
            annotations,
            state: view_state,
            locale: config.locale.clone(),
            read_only,
            layout,
        });

        self.set_phase(Phase::Active);
        Ok(())
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn document(&self) -> ItemId {
        self.document
    }

    pub fn parent(&self) -> Option<ItemId> {
        self.parent
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn surface_kind(&self) -> SurfaceKind {
        self.surface_kind
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().unwrap().phase
    }

    pub fn title(&self) -> String {
        self.state.lock().unwrap().title.clone()
    }

    pub fn is_read_only(&self) -> bool {
        self.state.lock().unwrap().read_only
    }

    /// Known annotation ids as of the last reconciliation.
    pub fn known_annotation_ids(&self) -> Vec<ItemId> {
        self.state.lock().unwrap().annotation_ids.iter().copied().collect()
    }

    /// Last transient state forwarded by a secondary surface, if any.
    pub fn transient_state(&self) -> Option<ViewState> {
        self.state.lock().unwrap().transient_state.clone()
    }

    pub(crate) fn navigate(&self, location: Location) {
        self.renderer.command(RenderCommand::Navigate(location));
    }

    pub(crate) fn focus(&self) {
        self.surface.activate();
        self.renderer.command(RenderCommand::Focus);
    }

    /// Route one rendering-capability event. Menu/link/tag-popup requests
    /// are handled at registry level; this covers the store-facing ones.
    pub(crate) fn handle_event(
        &self,
        event: &RendererEvent,
        editor: Option<&Arc<dyn StructuralEditor>>,
    ) -> ReaderResult<()> {
        match event {
            RendererEvent::SaveAnnotations(edits) => self.save_annotations(edits),
            RendererEvent::DeleteAnnotations(keys) => self.delete_annotations(keys),
            RendererEvent::ChangeViewState { state, is_primary } => {
                self.change_view_state(state.clone(), *is_primary);
                Ok(())
            }
            RendererEvent::ExportImage { key, data } => self.export_image(key, data),
            RendererEvent::RotatePages { pages, degrees } => {
                self.structural_edit(editor, |e| {
                    e.rotate_pages(&self.content_path, pages, *degrees)
                })
            }
            RendererEvent::DeletePages { pages } => {
                self.structural_edit(editor, |e| e.delete_pages(&self.content_path, pages))
            }
            _ => Ok(()),
        }
    }

    /// Persist a batch of annotation edits in one transaction.
    ///
    /// Read-only instances and non-editable documents accept exactly one
    /// mutation: caching the rendered image of an existing annotation.
    /// Malformed edits are logged and skipped. Any transaction or image-cache
    /// failure flips the instance read-only and re-raises once the
    /// transaction has closed.
    pub fn save_annotations(&self, edits: &[AnnotationEdit]) -> ReaderResult<()> {
        self.check_not_suspended()?;

        let document_editable = self
            .store
            .document(self.document)
            .map(|d| d.editable)
            .unwrap_or(false);
        let can_mutate = document_editable && !self.is_read_only();

        // Resolve against the store before entering the transaction; the
        // transaction scope only carries mutations.
        let mut image_only: Vec<(Annotation, Vec<u8>)> = Vec::new();
        let mut upserts: Vec<(AnnotationUpsert, Option<Vec<u8>>)> = Vec::new();

        for edit in edits {
            if edit.key.as_str().is_empty()
                || serde_json::from_str::<serde_json::Value>(&edit.position).is_err()
            {
                log::warn!("{}: skipping malformed annotation edit {}", self.id, edit.key);
                continue;
            }

            let existing = self.store.annotation_by_key(self.library, &edit.key);
            match (existing, can_mutate) {
                (Some(existing), false) => {
                    // The one write still permitted without entity mutation
                    // rights.
                    if let Some(image) = &edit.image {
                        image_only.push((existing, image.clone()));
                    } else {
                        log::debug!(
                            "{}: dropping edit {} for non-editable document",
                            self.id,
                            edit.key
                        );
                    }
                }
                (None, false) => return Err(ReaderError::ReadOnly),
                _ => upserts.push((
                    AnnotationUpsert {
                        key: edit.key.clone(),
                        kind: edit.kind,
                        color: edit.color.clone(),
                        position: edit.position.clone(),
                        sort_index: edit.sort_index.clone(),
                        comment: edit.comment.clone(),
                        tags: edit.tags.clone(),
                    },
                    edit.image.clone(),
                )),
            }
        }

        let mut saved: Vec<(Annotation, Option<Vec<u8>>)> = Vec::new();
        if !upserts.is_empty() {
            let result = self.store.transact(Some(self.write_tag), &mut |tx| {
                for (edit, image) in &upserts {
                    let annotation = tx.upsert_annotation(self.document, edit.clone())?;
                    saved.push((annotation, image.clone()));
                }
                Ok(())
            });

            if let Err(err) = result {
                self.enter_read_only(&err);
                return Err(ReaderError::Save(err));
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            for (annotation, _) in &saved {
                state.annotation_ids.insert(annotation.id);
            }
        }

        for (annotation, image) in &saved {
            if let Some(image) = image {
                self.write_image(annotation, image)?;
            }
        }
        for (annotation, image) in &image_only {
            self.write_image(annotation, image)?;
        }

        Ok(())
    }

    fn write_image(&self, annotation: &Annotation, bytes: &[u8]) -> ReaderResult<()> {
        if let Err(err) = self.store.cache_image(annotation, bytes) {
            self.enter_read_only(&err);
            return Err(ReaderError::Save(err));
        }
        Ok(())
    }

    /// Erase a batch of this document's annotations in one transaction.
    pub fn delete_annotations(&self, keys: &[ItemKey]) -> ReaderResult<()> {
        self.check_writable()?;

        let mut ids = Vec::new();
        for key in keys {
            let annotation = match self.store.annotation_by_key(self.library, key) {
                Some(a) => a,
                None => {
                    let err = StoreError::KeyNotFound(self.library, key.clone());
                    self.enter_read_only(&err);
                    return Err(ReaderError::Save(err));
                }
            };
            if annotation.document != self.document {
                let err = StoreError::WrongParent(annotation.id);
                self.enter_read_only(&err);
                return Err(ReaderError::Save(err));
            }
            ids.push(annotation.id);
        }

        let result = self.store.transact(Some(self.write_tag), &mut |tx| {
            for id in &ids {
                tx.erase_annotation(*id)?;
            }
            Ok(())
        });

        if let Err(err) = result {
            // The cached id set keeps the un-erased ids; the coalesced
            // deletion event reconciles whatever did commit.
            self.enter_read_only(&err);
            return Err(ReaderError::Save(err));
        }

        {
            let mut state = self.state.lock().unwrap();
            for id in &ids {
                state.annotation_ids.remove(id);
            }
        }
        Ok(())
    }

    /// Primary surfaces persist via the debounced writer; secondary (split)
    /// surfaces only forward transient state to their owning tab.
    pub fn change_view_state(&self, state: ViewState, is_primary: bool) {
        let mut inner = self.state.lock().unwrap();
        if is_primary {
            inner.writer.schedule(self.storage_dir.clone(), state);
        } else {
            inner.transient_state = Some(state);
        }
    }

    fn export_image(&self, key: &ItemKey, data: &[u8]) -> ReaderResult<()> {
        let annotation = self
            .store
            .annotation_by_key(self.library, key)
            .ok_or_else(|| StoreError::KeyNotFound(self.library, key.clone()))?;
        self.store.cache_image(&annotation, data)?;
        Ok(())
    }

    /// Suspend around a destructive structural edit so no annotation write
    /// can land while page indices are unstable. Returns to Active on
    /// completion or failure alike.
    fn structural_edit(
        &self,
        editor: Option<&Arc<dyn StructuralEditor>>,
        f: impl FnOnce(&dyn StructuralEditor) -> std::io::Result<()>,
    ) -> ReaderResult<()> {
        let Some(editor) = editor else {
            log::debug!("{}: no structural editor configured; ignoring page edit", self.id);
            return Ok(());
        };

        self.set_phase(Phase::Suspended);
        let result = f(editor.as_ref());
        self.set_phase(Phase::Active);
        result.map_err(ReaderError::from)
    }

    /// Reconcile an entity-deletion notification: diff previously-known ids
    /// against the deletion set and unset the removed annotations in the
    /// view.
    pub(crate) fn apply_deletions(&self, entries: &[DeletedEntry]) {
        let mut removed = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            for entry in entries {
                if state.annotation_ids.remove(&entry.id) {
                    removed.push(entry.key.clone());
                }
            }
        }
        if !removed.is_empty() {
            self.renderer.command(RenderCommand::UnsetAnnotations(removed));
        }
    }

    /// Reconcile an update/add notification. The cached id set is always
    /// recomputed; the upsert command excludes ids whose last write carried
    /// this instance's own tag (echo suppression).
    pub(crate) fn apply_upserts(&self, ids: &[ItemId], write_tags: &HashMap<ItemId, WriteTag>) {
        let entities = self.store.annotations_for(self.document);
        {
            let mut state = self.state.lock().unwrap();
            state.annotation_ids = entities.iter().map(|a| a.id).collect();
        }

        let read_only = self.is_read_only();
        let subset: Vec<ViewAnnotation> = entities
            .iter()
            .filter(|a| ids.contains(&a.id))
            .filter(|a| write_tags.get(&a.id) != Some(&self.write_tag))
            .filter_map(|a| {
                let converted = ViewAnnotation::from_entity(a, read_only);
                if converted.is_none() {
                    log::warn!("{}: skipping malformed annotation {}", self.id, a.key);
                }
                converted
            })
            .collect();

        if !subset.is_empty() {
            self.renderer.command(RenderCommand::SetAnnotations(subset));
        }
    }

    /// Recompute and reapply the display title after an update touching the
    /// bound document or its parent.
    pub(crate) fn refresh_title(&self) {
        let Some(doc) = self.store.document(self.document) else {
            return;
        };
        let title = display_title(self.store.as_ref(), &doc);
        {
            let mut state = self.state.lock().unwrap();
            if state.title == title {
                return;
            }
            state.title = title.clone();
        }
        self.surface.set_title(&title);
        self.renderer.command(RenderCommand::SetTitle(title));
    }

    /// Apply registry-level layout defaults (tab instances only; the
    /// registry enforces that scoping).
    pub(crate) fn apply_layout(&self, layout: LayoutPrefs) {
        {
            let mut state = self.state.lock().unwrap();
            state.layout = layout;
        }
        self.renderer.command(RenderCommand::SetSidebarWidth(layout.sidebar_width));
        self.renderer.command(RenderCommand::SetSidebarOpen(layout.sidebar_open));
        self.renderer.command(RenderCommand::SetBottomPlaceholderHeight(
            layout.bottom_placeholder_height,
        ));
    }

    pub(crate) fn poll_writer(&self, now: Instant) -> Result<bool, StateError> {
        self.state.lock().unwrap().writer.poll(now)
    }

    /// Flush any pending state write, cancel the timer, detach from the
    /// surface. Idempotent.
    pub(crate) fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.phase == Phase::Closed {
                return;
            }
            if let Err(err) = state.writer.flush() {
                log::warn!("{}: final state flush failed: {err}", self.id);
            }
            state.writer.cancel();
            state.phase = Phase::Closed;
        }
        self.surface.close();
    }

    fn check_not_suspended(&self) -> ReaderResult<()> {
        if self.state.lock().unwrap().phase == Phase::Suspended {
            return Err(ReaderError::Suspended);
        }
        Ok(())
    }

    fn check_writable(&self) -> ReaderResult<()> {
        self.check_not_suspended()?;
        if self.state.lock().unwrap().read_only {
            return Err(ReaderError::ReadOnly);
        }
        Ok(())
    }

    fn enter_read_only(&self, err: &StoreError) {
        {
            let mut state = self.state.lock().unwrap();
            state.read_only = true;
        }
        log::error!("{}: annotation write failed, entering read-only mode: {err}", self.id);
        self.renderer.command(RenderCommand::SetReadOnly(true));
    }

    fn set_phase(&self, phase: Phase) {
        self.state.lock().unwrap().phase = phase;
    }
}

fn convert_annotations(entities: &[Annotation], read_only: bool) -> Vec<ViewAnnotation> {
    entities
        .iter()
        .filter_map(|a| {
            let converted = ViewAnnotation::from_entity(a, read_only);
            if converted.is_none() {
                log::warn!("skipping malformed annotation {}", a.key);
            }
            converted
        })
        .collect()
}

/// Display title: parent title when present, else the document title, else
/// the content filename, else the key.
pub(crate) fn display_title(store: &dyn DocumentStore, doc: &Document) -> String {
    if let Some(parent) = doc.parent.and_then(|id| store.document(id)) {
        if !parent.title.is_empty() {
            return parent.title;
        }
    }
    if !doc.title.is_empty() {
        return doc.title.clone();
    }
    doc.filename().unwrap_or_else(|| doc.key.to_string())
}

fn entity_position(doc: &Document) -> Option<EntityPosition> {
    match doc.kind {
        DocumentKind::Pdf => doc.last_page_index.map(EntityPosition::Page),
        DocumentKind::Epub => doc.last_position.clone().map(EntityPosition::Cfi),
        DocumentKind::Snapshot => {
            let raw = doc.last_position.as_deref()?;
            match raw.parse::<f64>() {
                Ok(percent) => Some(EntityPosition::ScrollPercent(percent)),
                Err(_) => {
                    log::warn!("unparseable snapshot position {raw:?} on {}", doc.key);
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_store::{MemoryStore, NewDocument};

    fn pdf(title: &str) -> NewDocument {
        NewDocument::new(LibraryId(1), ItemKey::new("DOC1"), DocumentKind::Pdf, title)
    }

    #[test]
    fn title_falls_back_from_parent_to_title_to_filename_to_key() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = MemoryStore::new(temp.path());

        let mut new = pdf("");
        new.content_path = Some(PathBuf::from("/storage/DOC1/paper.pdf"));
        let doc = store.add_document(new);
        assert_eq!(display_title(&store, &doc), "paper.pdf");

        let bare = store.add_document(NewDocument::new(
            LibraryId(1),
            ItemKey::new("DOC2"),
            DocumentKind::Pdf,
            "",
        ));
        assert_eq!(display_title(&store, &bare), "DOC2");

        let parent = store.add_document(NewDocument::new(
            LibraryId(1),
            ItemKey::new("PAR1"),
            DocumentKind::Pdf,
            "Parent Item",
        ));
        let mut child = NewDocument::new(
            LibraryId(1),
            ItemKey::new("DOC3"),
            DocumentKind::Pdf,
            "child.pdf",
        );
        child.parent = Some(parent.id);
        let child = store.add_document(child);
        assert_eq!(display_title(&store, &child), "Parent Item");
    }

    #[test]
    fn entity_position_follows_the_document_kind() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = MemoryStore::new(temp.path());
        let mut doc = store.add_document(pdf("Paper"));

        doc.last_page_index = Some(12);
        assert_eq!(entity_position(&doc), Some(EntityPosition::Page(12)));

        doc.kind = DocumentKind::Epub;
        doc.last_position = Some("epubcfi(/6/4!/2)".to_owned());
        assert_eq!(
            entity_position(&doc),
            Some(EntityPosition::Cfi("epubcfi(/6/4!/2)".to_owned()))
        );

        doc.kind = DocumentKind::Snapshot;
        doc.last_position = Some("37.5".to_owned());
        assert_eq!(entity_position(&doc), Some(EntityPosition::ScrollPercent(37.5)));

        doc.last_position = Some("not-a-number".to_owned());
        assert_eq!(entity_position(&doc), None);
    }
}
