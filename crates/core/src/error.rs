use crate::instance::InstanceId;
use folio_state::StateError;
use folio_store::{ItemId, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("document not found: {0:?}")]
    NotFound(ItemId),
    #[error("document {0:?} has no content file")]
    MissingContent(ItemId),
    #[error("content length {size} exceeds addressable ceiling {limit}")]
    OversizedContent { size: u64, limit: u64 },
    #[error("host surface never signalled content readiness")]
    TimedOut,
    #[error("no instance registered under {0}")]
    UnknownInstance(InstanceId),
    #[error("instance is read-only")]
    ReadOnly,
    #[error("instance is suspended during a structural edit")]
    Suspended,
    #[error("annotation save failed: {0}")]
    Save(#[source] StoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ReaderResult<T> = Result<T, ReaderError>;
