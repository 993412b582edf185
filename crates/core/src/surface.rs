//! Host surface boundary: the tab or floating window a view instance
//! renders into, allocated and owned by the embedding shell.

use crate::renderer::Renderer;
use folio_store::ItemId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SurfaceKind {
    #[default]
    Tab,
    Window,
}

/// One-shot content-readiness signal.
///
/// The surface signals once when the rendering capability has loaded; every
/// waiter polling the latch releases together. Signalling again is a no-op.
#[derive(Debug, Clone, Default)]
pub struct ReadyLatch {
    set: Arc<AtomicBool>,
}

impl ReadyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.set.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }
}

/// A tab or window allocated by the shell.
pub trait HostSurface: Send + Sync {
    fn kind(&self) -> SurfaceKind;
    fn activate(&self);
    fn close(&self);
    fn set_title(&self, title: &str);
    fn ready(&self) -> ReadyLatch;

    /// Document binding, used to find dormant surfaces left over from a
    /// restored session that have not constructed an instance yet.
    fn bind_document(&self, document: ItemId);
    fn bound_document(&self) -> Option<ItemId>;

    /// True while the surface is tearing down. A dormant surface that is
    /// concurrently closing must not be re-activated.
    fn is_closing(&self) -> bool;

    fn renderer(&self) -> Arc<dyn Renderer>;
}

pub trait SurfaceProvider: Send + Sync {
    fn allocate(&self, kind: SurfaceKind, background: bool) -> Arc<dyn HostSurface>;

    /// A surface already bound to `document` but without a live instance.
    fn find_dormant(&self, document: ItemId) -> Option<Arc<dyn HostSurface>>;
}
