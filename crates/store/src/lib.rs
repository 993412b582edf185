//! Shared persistent document store: data model, the `DocumentStore` trait
//! the reader core consumes, an in-memory reference implementation, and the
//! annotation image cache.

mod events;
mod image_cache;
mod memory;
mod model;
mod store;

pub use events::{DeletedEntry, StoreEvent, WriteTag};
pub use image_cache::ImageCache;
pub use memory::{MemoryStore, NewDocument};
pub use model::{
    Annotation, AnnotationKind, Document, DocumentKind, ItemId, ItemKey, LibraryId,
};
pub use store::{AnnotationUpsert, DocumentStore, StoreError, StoreResult, StoreTx};
