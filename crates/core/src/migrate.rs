//! One-shot legacy highlight color migration.
//!
//! Early releases stored pure-RGB highlight colors; the canonical palette
//! replaced them. Matching annotations are rewritten metadata-only (no
//! modification-timestamp bump, so sync does not see them as fresh edits)
//! inside one batched transaction. Runs on every open and is idempotent:
//! a pass with zero matches opens no transaction at all.

use crate::error::ReaderResult;
use folio_store::{DocumentStore, ItemId};

pub const LEGACY_COLOR_MAP: [(&str, &str); 5] = [
    ("#ffff00", "#ffd400"),
    ("#ff0000", "#ff6666"),
    ("#00ff00", "#5fb236"),
    ("#0000ff", "#2ea8e5"),
    ("#ff00ff", "#a28ae5"),
];

pub fn canonical_color(color: &str) -> Option<&'static str> {
    let lowered = color.to_ascii_lowercase();
    LEGACY_COLOR_MAP
        .iter()
        .find(|(legacy, _)| *legacy == lowered)
        .map(|(_, canonical)| *canonical)
}

/// Rewrite legacy colors on `document`'s annotations. Returns how many were
/// migrated.
pub fn migrate_legacy_colors(
    store: &dyn DocumentStore,
    document: ItemId,
) -> ReaderResult<usize> {
    let matches: Vec<(ItemId, &'static str)> = store
        .annotations_for(document)
        .iter()
        .filter_map(|a| {
            let color = a.color.as_deref()?;
            canonical_color(color).map(|canonical| (a.id, canonical))
        })
        .collect();

    if matches.is_empty() {
        return Ok(0);
    }

    store.transact(None, &mut |tx| {
        for (id, color) in &matches {
            tx.update_annotation_color(*id, color)?;
        }
        Ok(())
    })?;

    Ok(matches.len())
}
