//! # Merge Rules
//!
//! Pure decisions taken by the pull reconciler and the disaster recovery
//! path. Nothing here touches storage.
//!
//! ## Last-Writer-Wins With Field Defense
//! ```text
//! local (updated_at = T1)        remote (updated_at = T2)
//!          │                              │
//!          └──────────────┬───────────────┘
//!                         ▼
//!                  T2 >= T1 ?
//!              ┌──────┴───────┐
//!             yes             no
//!              │               │
//!              ▼               ▼
//!     take remote fields    keep local,
//!     except code/barcode   push it back
//!     when remote value is
//!     blank or owned by
//!     another local item
//! ```

use std::collections::HashMap;

use crate::identity::CatalogIndex;
use crate::types::CatalogItem;

// =============================================================================
// Last-Writer-Wins
// =============================================================================

/// Outcome of comparing a matched local item with its remote counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// Write this merged item over the local row.
    ApplyRemote {
        merged: CatalogItem,
        defended: FieldDefense,
    },
    /// Local is newer; mark it dirty so the pusher overwrites the remote.
    KeepLocal,
}

/// Identifier fields that kept their local value during a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldDefense {
    pub code_kept: bool,
    pub barcode_kept: bool,
}

impl FieldDefense {
    pub fn any(&self) -> bool {
        self.code_kept || self.barcode_kept
    }
}

/// Remote wins ties so that repeated pulls converge.
pub fn remote_wins(local: &CatalogItem, remote: &CatalogItem) -> bool {
    remote.updated_at >= local.updated_at
}

/// Applies last-writer-wins between `local` and `remote`.
///
/// `index` must reflect local state, including records merged earlier in
/// the same pull.
pub fn merge(local: &CatalogItem, remote: &CatalogItem, index: &CatalogIndex) -> MergeDecision {
    if !remote_wins(local, remote) {
        return MergeDecision::KeepLocal;
    }
    let (merged, defended) = defend_identifiers(local, remote, index);
    MergeDecision::ApplyRemote { merged, defended }
}

/// Builds the remote version of `local`, protecting its code and barcode.
///
/// A remote identifier is rejected when it is blank or already owned by a
/// different local item.
pub fn defend_identifiers(
    local: &CatalogItem,
    remote: &CatalogItem,
    index: &CatalogIndex,
) -> (CatalogItem, FieldDefense) {
    let mut merged = remote.clone();
    merged.id = local.id;
    let mut defended = FieldDefense::default();

    match remote.normalized_code() {
        Some(code) if index.code_owner_other_than(code, local.id).is_none() => {
            merged.code = Some(code.to_string());
        }
        _ => {
            merged.code = local.code.clone();
            defended.code_kept = merged.code != remote.code;
        }
    }

    match remote.normalized_barcode() {
        Some(barcode) if index.barcode_owner_other_than(barcode, local.id).is_none() => {
            merged.barcode = Some(barcode.to_string());
        }
        _ => {
            merged.barcode = local.barcode.clone();
            defended.barcode_kept = merged.barcode != remote.barcode;
        }
    }

    (merged, defended)
}

// =============================================================================
// Snapshot Deduplication
// =============================================================================

/// A remote snapshot reduced to records that can coexist locally.
#[derive(Debug, Clone, Default)]
pub struct DedupedSnapshot {
    /// Kept records, newest first.
    pub records: Vec<CatalogItem>,
    /// Records dropped because a newer one shared their identity key.
    pub duplicates_dropped: usize,
    /// Barcodes cleared on older records that still collided.
    pub barcodes_cleared: usize,
}

/// Identity key used to collapse duplicates: case-folded code, else
/// barcode, else id, else lowercase name.
pub fn identity_key(record: &CatalogItem) -> String {
    if let Some(code) = record.normalized_code() {
        return format!("code:{}", code.to_lowercase());
    }
    if let Some(barcode) = record.normalized_barcode() {
        return format!("barcode:{}", barcode.to_lowercase());
    }
    if record.id > 0 {
        return format!("id:{}", record.id);
    }
    format!("name:{}", record.name.trim().to_lowercase())
}

/// Collapses a remote snapshot so that it satisfies the local uniqueness
/// constraints.
///
/// Newest `updated_at` wins per identity key; among equals the record seen
/// first is kept.
pub fn dedupe_snapshot(records: Vec<CatalogItem>) -> DedupedSnapshot {
    let total = records.len();
    let mut by_key: HashMap<String, CatalogItem> = HashMap::with_capacity(total);
    let mut order: Vec<String> = Vec::with_capacity(total);

    for record in records {
        let key = identity_key(&record);
        match by_key.get(&key) {
            Some(kept) if kept.updated_at >= record.updated_at => {}
            Some(_) => {
                by_key.insert(key, record);
            }
            None => {
                order.push(key.clone());
                by_key.insert(key, record);
            }
        }
    }

    let mut kept: Vec<CatalogItem> = order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect();
    // stable sort keeps input order among equal timestamps
    kept.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    let mut seen_barcodes = std::collections::HashSet::new();
    let mut barcodes_cleared = 0;
    for record in kept.iter_mut() {
        if let Some(barcode) = record.normalized_barcode().map(str::to_lowercase) {
            if !seen_barcodes.insert(barcode) {
                record.barcode = None;
                barcodes_cleared += 1;
            }
        }
    }

    DedupedSnapshot {
        duplicates_dropped: total - kept.len(),
        records: kept,
        barcodes_cleared,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn at(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn item(id: i64, code: &str, barcode: &str, hour: u32) -> CatalogItem {
        let mut it = CatalogItem::new(format!("item {}", id)).with_updated_at(at(hour));
        it.id = id;
        it.code = Some(code.to_string()).filter(|c| !c.is_empty());
        it.barcode = Some(barcode.to_string()).filter(|b| !b.is_empty());
        it
    }

    #[test]
    fn test_newer_remote_wins_and_ties_go_remote() {
        let local = item(1, "A", "111", 10);
        let index = CatalogIndex::from_items([local.clone()]);

        let mut remote = item(1, "A", "111", 10).with_quantity(9);
        assert!(matches!(
            merge(&local, &remote, &index),
            MergeDecision::ApplyRemote { .. }
        ));

        remote.updated_at = at(9);
        assert_eq!(merge(&local, &remote, &index), MergeDecision::KeepLocal);
    }

    #[test]
    fn test_blank_remote_identifiers_keep_local_values() {
        let local = item(1, "A", "111", 10);
        let index = CatalogIndex::from_items([local.clone()]);
        let remote = item(1, "", "", 11);

        let (merged, defended) = defend_identifiers(&local, &remote, &index);
        assert_eq!(merged.code.as_deref(), Some("A"));
        assert_eq!(merged.barcode.as_deref(), Some("111"));
        assert!(defended.code_kept && defended.barcode_kept);
    }

    #[test]
    fn test_identifier_owned_by_other_item_is_defended() {
        let local = item(1, "A", "111", 10);
        let other = item(2, "B", "222", 10);
        let index = CatalogIndex::from_items([local.clone(), other]);

        let remote = item(1, "B", "333", 11).with_quantity(4);
        let (merged, defended) = defend_identifiers(&local, &remote, &index);

        assert_eq!(merged.code.as_deref(), Some("A"));
        assert_eq!(merged.barcode.as_deref(), Some("333"));
        assert_eq!(merged.quantity, 4);
        assert!(defended.code_kept);
        assert!(!defended.barcode_kept);
    }

    #[test]
    fn test_case_variant_of_other_items_code_is_defended() {
        let local = item(1, "ABC000001", "111", 10);
        let other = item(2, "ABC000002", "222", 10);
        let index = CatalogIndex::from_items([local.clone(), other]);

        let remote = item(1, "abc000002", "111", 11);
        let (merged, defended) = defend_identifiers(&local, &remote, &index);
        assert_eq!(merged.code.as_deref(), Some("ABC000001"));
        assert!(defended.code_kept);

        // a case change of its own code is not a conflict
        let remote = item(1, "abc000001", "111", 11);
        let (merged, defended) = defend_identifiers(&local, &remote, &index);
        assert_eq!(merged.code.as_deref(), Some("abc000001"));
        assert!(!defended.any());
    }

    #[test]
    fn test_dedupe_keeps_newest_per_case_folded_code() {
        let snapshot = vec![
            item(1, "ABC001", "111", 8),
            item(2, "abc001", "112", 12),
            item(3, "XYZ", "113", 9),
        ];
        let out = dedupe_snapshot(snapshot);

        assert_eq!(out.duplicates_dropped, 1);
        let ids: Vec<i64> = out.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_dedupe_clears_colliding_barcode_on_older_record() {
        let snapshot = vec![item(1, "A", "777", 8), item(2, "B", "777", 9)];
        let out = dedupe_snapshot(snapshot);

        assert_eq!(out.barcodes_cleared, 1);
        let older = out.records.iter().find(|r| r.id == 1).unwrap();
        let newer = out.records.iter().find(|r| r.id == 2).unwrap();
        assert_eq!(older.barcode, None);
        assert_eq!(newer.barcode.as_deref(), Some("777"));
    }

    #[test]
    fn test_identity_key_fallbacks() {
        let mut it = CatalogItem::new("  Green Tea ");
        assert_eq!(identity_key(&it), "name:green tea");
        it.id = 5;
        assert_eq!(identity_key(&it), "id:5");
        it.barcode = Some("Bc".into());
        assert_eq!(identity_key(&it), "barcode:bc");
        it.code = Some(" Cd ".into());
        assert_eq!(identity_key(&it), "code:cd");

        let later = it.clone().with_updated_at(it.updated_at + Duration::seconds(1));
        assert!(remote_wins(&it, &later));
    }
}
