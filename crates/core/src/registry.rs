//! The process-wide instance registry.
//!
//! The registry owns every live view instance, enforces the one-instance-
//! per-document policy, fans store notifications out to the instances they
//! concern, and drives the cooperative timers (debounced state writers) from
//! the embedder's loop.

use crate::error::{ReaderError, ReaderResult};
use crate::events::{EventDispatcher, EventHandler, ExtensionEvent, ListenerId};
use crate::instance::{InstanceId, ViewInstance};
use crate::renderer::{LayoutPrefs, Location, RendererEvent, StructuralEditor};
use crate::surface::{SurfaceKind, SurfaceProvider};
use folio_store::{DocumentStore, ItemId, StoreEvent};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Content files larger than this are rejected at open.
    pub max_content_bytes: u64,
    /// Debounce delay for view-state sidecar writes.
    pub debounce_delay: Duration,
    pub ready_poll_attempts: u32,
    pub ready_poll_interval: Duration,
    /// Layout defaults applied to newly opened tab instances.
    pub defaults: LayoutPrefs,
    pub locale: BTreeMap<String, String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_content_bytes: u64::MAX / 2,
            debounce_delay: Duration::from_secs(5),
            ready_poll_attempts: 600,
            ready_poll_interval: Duration::from_millis(50),
            defaults: LayoutPrefs::default(),
            locale: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub kind: SurfaceKind,
    /// Open a second instance even when the document is already showing.
    pub allow_duplicate: bool,
    /// Allocate the surface without stealing focus.
    pub background: bool,
    pub location: Option<Location>,
}

/// How an open request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new instance was constructed on a freshly allocated surface.
    Opened(InstanceId),
    /// A new instance was constructed on a dormant surface left over from a
    /// restored session.
    ActivatedDormant(InstanceId),
    /// An existing instance was focused instead of opening a duplicate.
    Focused(InstanceId),
}

impl OpenOutcome {
    pub fn instance(&self) -> InstanceId {
        match self {
            OpenOutcome::Opened(id)
            | OpenOutcome::ActivatedDormant(id)
            | OpenOutcome::Focused(id) => *id,
        }
    }
}

/// What the embedding shell should do with a renderer event the core cannot
/// finish on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum EventResponse {
    Handled,
    /// Context-menu contributions collected from extension listeners; the
    /// shell presents the menu.
    MenuContributions(Vec<Value>),
    /// The shell opens this URL in the system browser.
    OpenExternal(String),
}

/// Live instances in registration order.
#[derive(Default)]
struct InstanceMap {
    ordered: Vec<Arc<ViewInstance>>,
}

impl InstanceMap {
    fn insert(&mut self, instance: Arc<ViewInstance>) {
        self.ordered.push(instance);
    }

    fn remove(&mut self, id: InstanceId) -> Option<Arc<ViewInstance>> {
        let index = self.ordered.iter().position(|i| i.id() == id)?;
        Some(self.ordered.remove(index))
    }

    fn get(&self, id: InstanceId) -> Option<Arc<ViewInstance>> {
        self.ordered.iter().find(|i| i.id() == id).cloned()
    }

    fn for_document(&self, document: ItemId) -> Option<Arc<ViewInstance>> {
        self.ordered.iter().find(|i| i.document() == document).cloned()
    }

    fn for_document_kind(
        &self,
        document: ItemId,
        kind: SurfaceKind,
    ) -> Option<Arc<ViewInstance>> {
        self.ordered
            .iter()
            .find(|i| i.document() == document && i.surface_kind() == kind)
            .cloned()
    }

    fn snapshot(&self) -> Vec<Arc<ViewInstance>> {
        self.ordered.clone()
    }
}

pub struct ReaderRegistry {
    store: Arc<dyn DocumentStore>,
    provider: Arc<dyn SurfaceProvider>,
    editor: Option<Arc<dyn StructuralEditor>>,
    config: Mutex<RegistryConfig>,
    instances: Mutex<InstanceMap>,
    dispatcher: Mutex<EventDispatcher>,
}

impl ReaderRegistry {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn SurfaceProvider>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            store,
            provider,
            editor: None,
            config: Mutex::new(config),
            instances: Mutex::new(InstanceMap::default()),
            dispatcher: Mutex::new(EventDispatcher::new()),
        }
    }

    /// Attach the structural-edit capability (page rotate/delete). Without
    /// it, page-edit requests are ignored.
    pub fn with_structural_editor(mut self, editor: Arc<dyn StructuralEditor>) -> Self {
        self.editor = Some(editor);
        self
    }

    /// Open `document`, or focus the instance already showing it.
    ///
    /// Unless duplication is requested, at most one instance exists per
    /// document: a second open activates the existing surface and forwards
    /// the navigation target. New instances prefer a dormant surface already
    /// bound to the document (session restore) over allocating a fresh one,
    /// skipping surfaces that are mid-teardown.
    pub fn open(&self, document: ItemId, options: OpenOptions) -> ReaderResult<OpenOutcome> {
        let doc = self.store.document(document).ok_or(ReaderError::NotFound(document))?;
        self.store.ensure_library_loaded(doc.library)?;

        // Best effort; a failed import re-check never blocks opening.
        if let Err(err) = self.store.queue_import_check(document) {
            log::warn!("import re-check not queued for {document:?}: {err}");
        }

        if !options.allow_duplicate {
            let existing = self
                .instances
                .lock()
                .unwrap()
                .for_document_kind(document, options.kind);
            if let Some(existing) = existing {
                if let Some(location) = &options.location {
                    existing.navigate(location.clone());
                }
                if !options.background {
                    existing.focus();
                }
                return Ok(OpenOutcome::Focused(existing.id()));
            }
        }

        // Dormant surfaces are only candidates while no instance at all is
        // showing the document, regardless of surface kind.
        let any_live = self.instances.lock().unwrap().for_document(document).is_some();
        let dormant = if options.allow_duplicate || any_live {
            None
        } else {
            self.provider
                .find_dormant(document)
                .filter(|surface| !surface.is_closing() && surface.kind() == options.kind)
        };
        let reused_dormant = dormant.is_some();
        let surface = match dormant {
            Some(surface) => surface,
            None => {
                let surface = self.provider.allocate(options.kind, options.background);
                surface.bind_document(document);
                surface
            }
        };

        let config = self.config.lock().unwrap().clone();
        let instance =
            match ViewInstance::open(self.store.clone(), surface.clone(), &config, document) {
                Ok(instance) => instance,
                Err(err) => {
                    // Release the surface so a failed open leaves no orphaned
                    // tab or window behind in the shell.
                    surface.close();
                    return Err(err);
                }
            };
        let id = instance.id();

        if let Some(location) = &options.location {
            instance.navigate(location.clone());
        }
        if !options.background {
            instance.focus();
        }

        self.instances.lock().unwrap().insert(instance);
        log::info!("opened {id} for document {document:?}");

        Ok(if reused_dormant {
            OpenOutcome::ActivatedDormant(id)
        } else {
            OpenOutcome::Opened(id)
        })
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances.lock().unwrap().ordered.iter().map(|i| i.id()).collect()
    }

    pub fn instance_for_document(&self, document: ItemId) -> Option<InstanceId> {
        self.instances.lock().unwrap().for_document(document).map(|i| i.id())
    }

    pub fn is_read_only(&self, id: InstanceId) -> ReaderResult<bool> {
        Ok(self.get(id)?.is_read_only())
    }

    pub fn title(&self, id: InstanceId) -> ReaderResult<String> {
        Ok(self.get(id)?.title())
    }

    /// Annotation ids the instance knows of as of its last reconciliation.
    pub fn known_annotation_ids(&self, id: InstanceId) -> ReaderResult<Vec<ItemId>> {
        Ok(self.get(id)?.known_annotation_ids())
    }

    pub fn navigate(&self, id: InstanceId, location: Location) -> ReaderResult<()> {
        self.get(id)?.navigate(location);
        Ok(())
    }

    pub fn focus(&self, id: InstanceId) -> ReaderResult<()> {
        self.get(id)?.focus();
        Ok(())
    }

    /// Flush pending state, tear the instance down, release its surface.
    pub fn close(&self, id: InstanceId) -> ReaderResult<()> {
        let instance = self
            .instances
            .lock()
            .unwrap()
            .remove(id)
            .ok_or(ReaderError::UnknownInstance(id))?;
        instance.close();
        log::info!("closed {id}");
        Ok(())
    }

    pub fn close_all(&self) {
        let drained = {
            let mut instances = self.instances.lock().unwrap();
            std::mem::take(&mut instances.ordered)
        };
        for instance in drained {
            instance.close();
        }
    }

    /// Route one renderer event from the shell's event loop.
    pub fn handle_event(
        &self,
        id: InstanceId,
        event: RendererEvent,
    ) -> ReaderResult<EventResponse> {
        let instance = self.get(id)?;
        match &event {
            RendererEvent::OpenLink { url } => Ok(EventResponse::OpenExternal(url.clone())),
            RendererEvent::OpenContextMenu { params } => {
                let contributions = self.dispatch(
                    ExtensionEvent::CreateViewContextMenu,
                    id,
                    params,
                );
                Ok(EventResponse::MenuContributions(contributions))
            }
            RendererEvent::OpenTagPopup { params, .. } => {
                let contributions = self.dispatch(
                    ExtensionEvent::RenderSidebarAnnotationHeader,
                    id,
                    params,
                );
                Ok(EventResponse::MenuContributions(contributions))
            }
            _ => {
                instance.handle_event(&event, self.editor.as_ref())?;
                Ok(EventResponse::Handled)
            }
        }
    }

    /// Drain the store's queued events and reconcile every instance against
    /// them. The embedder calls this from its loop after any store activity.
    pub fn pump(&self) {
        let events = self.store.take_events();
        if !events.is_empty() {
            self.notify(&events);
        }
    }

    /// Reconcile instances against a batch of store events, in registration
    /// order.
    pub fn notify(&self, events: &[StoreEvent]) {
        let instances = self.instances.lock().unwrap().snapshot();
        for event in events {
            match event {
                StoreEvent::Deleted { entries } => {
                    for instance in &instances {
                        instance.apply_deletions(entries);
                        let gone = entries.iter().any(|e| {
                            e.id == instance.document() || Some(e.id) == instance.parent()
                        });
                        if gone {
                            log::info!(
                                "document behind {} was deleted, closing",
                                instance.id()
                            );
                            let _ = self.close(instance.id());
                        }
                    }
                }
                StoreEvent::Trashed { ids } => {
                    for instance in &instances {
                        let gone = ids.iter().any(|id| {
                            *id == instance.document() || Some(*id) == instance.parent()
                        });
                        if gone {
                            log::info!(
                                "document behind {} was trashed, closing",
                                instance.id()
                            );
                            let _ = self.close(instance.id());
                        }
                    }
                }
                StoreEvent::Added { ids, write_tags }
                | StoreEvent::Modified { ids, write_tags } => {
                    for instance in &instances {
                        instance.apply_upserts(ids, write_tags);
                        let touches_identity = ids.iter().any(|id| {
                            *id == instance.document() || Some(*id) == instance.parent()
                        });
                        if touches_identity {
                            instance.refresh_title();
                        }
                    }
                }
            }
        }
    }

    /// Run due debounced state writes. The embedder calls this on a timer
    /// tick; there are no background threads.
    pub fn poll(&self, now: Instant) {
        let instances = self.instances.lock().unwrap().snapshot();
        for instance in instances {
            if let Err(err) = instance.poll_writer(now) {
                log::warn!("{}: deferred state write failed: {err}", instance.id());
            }
        }
    }

    /// Replace the layout defaults and push them to live tab instances.
    /// Window instances keep their own layout.
    pub fn set_defaults(&self, defaults: LayoutPrefs) {
        {
            let mut config = self.config.lock().unwrap();
            config.defaults = defaults;
        }
        let instances = self.instances.lock().unwrap().snapshot();
        for instance in instances {
            if instance.surface_kind() == SurfaceKind::Tab {
                instance.apply_layout(defaults);
            }
        }
    }

    pub fn add_listener(
        &self,
        event: ExtensionEvent,
        handler: EventHandler,
        owner: Option<&str>,
    ) -> ListenerId {
        self.dispatcher.lock().unwrap().register(event, handler, owner)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.dispatcher.lock().unwrap().unregister(id)
    }

    pub fn remove_listeners_for(&self, owner: &str) -> usize {
        self.dispatcher.lock().unwrap().unregister_by_owner(owner)
    }

    pub fn dispatch(
        &self,
        event: ExtensionEvent,
        instance: InstanceId,
        params: &Value,
    ) -> Vec<Value> {
        self.dispatcher.lock().unwrap().dispatch(event, instance, params)
    }

    fn get(&self, id: InstanceId) -> ReaderResult<Arc<ViewInstance>> {
        self.instances
            .lock()
            .unwrap()
            .get(id)
            .ok_or(ReaderError::UnknownInstance(id))
    }
}
