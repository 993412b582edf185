//! Coordination core for the document viewer: the instance registry, the
//! annotation sync protocol between the store and the rendering capability,
//! debounced view-state persistence, and store-notification reconciliation.
//!
//! The embedding shell supplies the surfaces (tabs, windows) and the
//! rendering capability; the store supplies entities and change events. The
//! core owns everything in between.

mod error;
mod events;
mod instance;
mod migrate;
mod registry;
mod renderer;
mod surface;

pub use error::{ReaderError, ReaderResult};
pub use events::{EventContext, EventDispatcher, EventHandler, ExtensionEvent, ListenerId};
pub use instance::{InstanceId, Phase, ViewInstance};
pub use migrate::{canonical_color, migrate_legacy_colors, LEGACY_COLOR_MAP};
pub use registry::{EventResponse, OpenOptions, OpenOutcome, ReaderRegistry, RegistryConfig};
pub use renderer::{
    AnnotationEdit, InitPayload, LayoutPrefs, Location, RenderCommand, Renderer, RendererEvent,
    StructuralEditor, ViewAnnotation,
};
pub use surface::{HostSurface, ReadyLatch, SurfaceKind, SurfaceProvider};
