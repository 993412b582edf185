//! Shared doubles for the integration tests: a recording renderer, an
//! in-process host surface, and a surface provider with controllable
//! dormant surfaces.

use folio_reader::{
    HostSurface, InitPayload, ReadyLatch, RenderCommand, Renderer, SurfaceKind, SurfaceProvider,
};
use folio_state::{write_state, ViewState};
use folio_store::{DocumentKind, ItemId, ItemKey, LibraryId, MemoryStore, NewDocument};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct RecordingRenderer {
    init: Mutex<Option<InitPayload>>,
    commands: Mutex<Vec<RenderCommand>>,
}

impl RecordingRenderer {
    pub fn init_payload(&self) -> Option<InitPayload> {
        self.init.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<RenderCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().unwrap().clear();
    }
}

impl Renderer for RecordingRenderer {
    fn init(&self, payload: InitPayload) {
        *self.init.lock().unwrap() = Some(payload);
    }

    fn command(&self, command: RenderCommand) {
        self.commands.lock().unwrap().push(command);
    }
}

pub struct TestSurface {
    kind: SurfaceKind,
    latch: ReadyLatch,
    bound: Mutex<Option<ItemId>>,
    closing: AtomicBool,
    closed: AtomicBool,
    activations: AtomicUsize,
    titles: Mutex<Vec<String>>,
    renderer: Arc<RecordingRenderer>,
}

impl TestSurface {
    pub fn new(kind: SurfaceKind) -> Self {
        let latch = ReadyLatch::new();
        // Content is "loaded" immediately in tests unless a test holds the
        // latch back on purpose.
        latch.signal();
        Self {
            kind,
            latch,
            bound: Mutex::new(None),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            activations: AtomicUsize::new(0),
            titles: Mutex::new(Vec::new()),
            renderer: Arc::new(RecordingRenderer::default()),
        }
    }

    pub fn unready(kind: SurfaceKind) -> Self {
        let mut surface = Self::new(kind);
        surface.latch = ReadyLatch::new();
        surface
    }

    pub fn recorder(&self) -> &RecordingRenderer {
        &self.renderer
    }

    pub fn set_closing(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().unwrap().clone()
    }
}

impl HostSurface for TestSurface {
    fn kind(&self) -> SurfaceKind {
        self.kind
    }

    fn activate(&self) {
        self.activations.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn set_title(&self, title: &str) {
        self.titles.lock().unwrap().push(title.to_owned());
    }

    fn ready(&self) -> ReadyLatch {
        self.latch.clone()
    }

    fn bind_document(&self, document: ItemId) {
        *self.bound.lock().unwrap() = Some(document);
    }

    fn bound_document(&self) -> Option<ItemId> {
        *self.bound.lock().unwrap()
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn renderer(&self) -> Arc<dyn Renderer> {
        self.renderer.clone()
    }
}

#[derive(Default)]
pub struct TestProvider {
    allocated: Mutex<Vec<Arc<TestSurface>>>,
    dormant: Mutex<Vec<Arc<TestSurface>>>,
}

impl TestProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a dormant surface, as session restore would leave behind.
    pub fn add_dormant(&self, surface: Arc<TestSurface>) {
        self.dormant.lock().unwrap().push(surface);
    }

    pub fn allocation_count(&self) -> usize {
        self.allocated.lock().unwrap().len()
    }

    pub fn last_allocated(&self) -> Arc<TestSurface> {
        self.allocated.lock().unwrap().last().expect("a surface was allocated").clone()
    }
}

impl SurfaceProvider for TestProvider {
    fn allocate(&self, kind: SurfaceKind, _background: bool) -> Arc<dyn HostSurface> {
        let surface = Arc::new(TestSurface::new(kind));
        self.allocated.lock().unwrap().push(surface.clone());
        surface
    }

    fn find_dormant(&self, document: ItemId) -> Option<Arc<dyn HostSurface>> {
        self.dormant
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.bound_document() == Some(document))
            .cloned()
            .map(|s| s as Arc<dyn HostSurface>)
    }
}

/// A pdf document whose content file actually exists on disk.
pub fn add_pdf(store: &MemoryStore, dir: &Path, key: &str, title: &str) -> folio_store::Document {
    let content = dir.join(format!("{key}.pdf"));
    fs::write(&content, b"%PDF-1.7 test fixture").expect("content file should be written");
    let mut new = NewDocument::new(LibraryId(1), ItemKey::new(key), DocumentKind::Pdf, title);
    new.content_path = Some(content);
    store.add_document(new)
}

/// Like `add_pdf`, but the document is not editable (e.g. a group library
/// without write access).
pub fn add_locked_pdf(
    store: &MemoryStore,
    dir: &Path,
    key: &str,
    title: &str,
) -> folio_store::Document {
    let content = dir.join(format!("{key}.pdf"));
    fs::write(&content, b"%PDF-1.7 test fixture").expect("content file should be written");
    let mut new = NewDocument::new(LibraryId(1), ItemKey::new(key), DocumentKind::Pdf, title);
    new.content_path = Some(content);
    new.editable = false;
    store.add_document(new)
}

/// Pre-write a view-state sidecar for `document`'s storage directory.
pub fn seed_sidecar(store: &MemoryStore, document: ItemId, state: &ViewState) {
    use folio_store::DocumentStore;
    let dir = store.storage_dir(document).expect("storage dir should resolve");
    write_state(&dir, state).expect("sidecar should be written");
}
