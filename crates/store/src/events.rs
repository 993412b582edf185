//! Coalesced change notifications emitted by the store.
//!
//! One `StoreEvent` covers everything a single transaction touched, so a
//! batch of annotation edits reaches observers as one event instead of one
//! per edit.

use crate::model::{ItemId, ItemKey, LibraryId};
use std::collections::HashMap;
use uuid::Uuid;

/// Opaque tag identifying the writer of a mutation.
///
/// Instances attach their own tag to transactions they start; during
/// reconciliation they skip ids whose last write carried that tag (echo
/// suppression).
pub type WriteTag = Uuid;

/// Identity retained for an erased entity.
///
/// The entity itself is gone by the time observers run, so the event has to
/// carry enough to translate ids back to keys and owning documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedEntry {
    pub id: ItemId,
    pub key: ItemKey,
    pub library: LibraryId,
    pub parent: Option<ItemId>,
}

#[derive(Debug, Clone)]
pub enum StoreEvent {
    Added {
        ids: Vec<ItemId>,
        write_tags: HashMap<ItemId, WriteTag>,
    },
    Modified {
        ids: Vec<ItemId>,
        write_tags: HashMap<ItemId, WriteTag>,
    },
    Deleted {
        entries: Vec<DeletedEntry>,
    },
    Trashed {
        ids: Vec<ItemId>,
    },
}

impl StoreEvent {
    /// Ids touched by this event, regardless of variant.
    pub fn ids(&self) -> Vec<ItemId> {
        match self {
            StoreEvent::Added { ids, .. } | StoreEvent::Modified { ids, .. } => ids.clone(),
            StoreEvent::Deleted { entries } => entries.iter().map(|e| e.id).collect(),
            StoreEvent::Trashed { ids } => ids.clone(),
        }
    }
}
