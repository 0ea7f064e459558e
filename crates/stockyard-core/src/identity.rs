//! # Identity Resolution
//!
//! In-memory lookup of catalog items by id, barcode and code, plus the pure
//! half of SKU allocation.
//!
//! ## Resolution Order
//! ```text
//! remote record
//!      │
//!      ├── id matches a local item? ── both barcodes set and different? ──┐
//!      │         │ no                                                     │ yes
//!      │         ▼                                                        ▼
//!      │     MATCH (Id)                                   same id allocated
//!      │                                                  independently on
//!      ├── barcode matches? ─────────► MATCH (Barcode)    two devices: skip
//!      │                                                  to barcode / code
//!      ├── code matches? ────────────► MATCH (Code)
//!      │
//!      └── none ─────────────────────► insert as new
//! ```
//!
//! Codes and barcodes are compared ASCII case-insensitively, the same way
//! the `NOCASE` unique indexes of the store compare them, so every clash
//! the store would reject is visible here first.

use std::collections::HashMap;

use crate::types::CatalogItem;

// =============================================================================
// Catalog Index
// =============================================================================

/// Which identifier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    Id,
    Barcode,
    Code,
}

/// Lookup key for a code or barcode.
fn fold(identifier: &str) -> String {
    identifier.to_ascii_lowercase()
}

/// Items indexed by each of their identifiers.
#[derive(Debug, Default, Clone)]
pub struct CatalogIndex {
    by_id: HashMap<i64, CatalogItem>,
    by_barcode: HashMap<String, i64>,
    by_code: HashMap<String, i64>,
}

impl CatalogIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        let mut index = Self::new();
        for item in items {
            index.upsert(item);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&CatalogItem> {
        self.by_id.get(&id)
    }

    pub fn by_barcode(&self, barcode: &str) -> Option<&CatalogItem> {
        self.by_barcode.get(&fold(barcode)).and_then(|id| self.by_id.get(id))
    }

    pub fn by_code(&self, code: &str) -> Option<&CatalogItem> {
        self.by_code.get(&fold(code)).and_then(|id| self.by_id.get(id))
    }

    /// Finds the local item `record` refers to.
    ///
    /// ## Returns
    /// The matched item and the identifier that matched, or `None` when the
    /// record is new.
    pub fn resolve(&self, record: &CatalogItem) -> Option<(&CatalogItem, MatchedBy)> {
        if record.id > 0 {
            if let Some(local) = self.by_id.get(&record.id) {
                let conflicting = matches!(
                    (local.normalized_barcode(), record.normalized_barcode()),
                    (Some(a), Some(b)) if !a.eq_ignore_ascii_case(b)
                );
                if !conflicting {
                    return Some((local, MatchedBy::Id));
                }
            }
        }

        if let Some(local) = record.normalized_barcode().and_then(|b| self.by_barcode(b)) {
            return Some((local, MatchedBy::Barcode));
        }

        record
            .normalized_code()
            .and_then(|c| self.by_code(c))
            .map(|local| (local, MatchedBy::Code))
    }

    /// Inserts or replaces an item, dropping keys it no longer owns.
    pub fn upsert(&mut self, item: CatalogItem) {
        self.remove(item.id);
        if let Some(barcode) = item.normalized_barcode() {
            self.by_barcode.insert(fold(barcode), item.id);
        }
        if let Some(code) = item.normalized_code() {
            self.by_code.insert(fold(code), item.id);
        }
        self.by_id.insert(item.id, item);
    }

    pub fn remove(&mut self, id: i64) -> Option<CatalogItem> {
        let old = self.by_id.remove(&id)?;
        if let Some(barcode) = old.normalized_barcode().map(fold) {
            if self.by_barcode.get(&barcode) == Some(&id) {
                self.by_barcode.remove(&barcode);
            }
        }
        if let Some(code) = old.normalized_code().map(fold) {
            if self.by_code.get(&code) == Some(&id) {
                self.by_code.remove(&code);
            }
        }
        Some(old)
    }

    /// Id of another item that already owns `barcode`.
    pub fn barcode_owner_other_than(&self, barcode: &str, id: i64) -> Option<i64> {
        self.by_barcode.get(&fold(barcode)).copied().filter(|owner| *owner != id)
    }

    /// Id of another item that already owns `code`.
    pub fn code_owner_other_than(&self, code: &str, id: i64) -> Option<i64> {
        self.by_code.get(&fold(code)).copied().filter(|owner| *owner != id)
    }
}

// =============================================================================
// SKU Helpers
// =============================================================================

/// Prefix used when neither the tenant nor the store name yields one.
pub const FALLBACK_SKU_PREFIX: &str = "SKU";

/// Cleans a configured prefix: uppercase alphanumerics, at most 6.
///
/// ## Returns
/// `None` when fewer than 3 characters survive.
///
/// ```rust
/// use stockyard_core::identity::normalize_sku_prefix;
///
/// assert_eq!(normalize_sku_prefix(" ab-c12 "), Some("ABC12".to_string()));
/// assert_eq!(normalize_sku_prefix("a-b"), None);
/// ```
pub fn normalize_sku_prefix(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .take(6)
        .collect();
    (cleaned.len() >= 3).then_some(cleaned)
}

/// First three alphanumerics of the store name, padded with `X`.
pub fn derive_sku_prefix(store_name: &str) -> String {
    let mut prefix: String = store_name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .take(3)
        .collect();
    while prefix.len() < 3 {
        prefix.push('X');
    }
    prefix
}

/// Picks the prefix from the configured value, else the store name.
pub fn resolve_sku_prefix(configured: Option<&str>, store_name: Option<&str>) -> String {
    configured
        .and_then(normalize_sku_prefix)
        .or_else(|| store_name.filter(|s| !s.trim().is_empty()).map(derive_sku_prefix))
        .unwrap_or_else(|| FALLBACK_SKU_PREFIX.to_string())
}

/// `{prefix}{sequence zero-padded to width}`.
pub fn format_sku(prefix: &str, sequence: u64, width: usize) -> String {
    format!("{}{:0width$}", prefix, sequence, width = width)
}

/// Prefix and width used when allocating codes for new items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkuFormat {
    pub prefix: String,
    pub width: usize,
}

impl SkuFormat {
    pub fn new(prefix: impl Into<String>, width: usize) -> Self {
        Self {
            prefix: prefix.into(),
            width,
        }
    }

    pub fn format(&self, sequence: u64) -> String {
        format_sku(&self.prefix, sequence, self.width)
    }
}

impl Default for SkuFormat {
    fn default() -> Self {
        Self::new(FALLBACK_SKU_PREFIX, crate::DEFAULT_SKU_WIDTH)
    }
}

/// Sequence number of `code` when it is `prefix` followed by digits only.
pub fn sku_sequence(code: &str, prefix: &str) -> Option<u64> {
    let digits = code.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, code: Option<&str>, barcode: Option<&str>) -> CatalogItem {
        let mut it = CatalogItem::new(format!("item {}", id));
        it.id = id;
        it.code = code.map(str::to_string);
        it.barcode = barcode.map(str::to_string);
        it
    }

    #[test]
    fn test_resolution_precedence() {
        let index = CatalogIndex::from_items([
            item(1, Some("A1"), Some("111")),
            item(2, Some("B2"), Some("222")),
            item(3, Some("C3"), Some("333")),
        ]);

        // id wins over barcode and code of other items
        let remote = item(1, Some("C3"), Some("111"));
        let (found, via) = index.resolve(&remote).unwrap();
        assert_eq!((found.id, via), (1, MatchedBy::Id));

        // unknown id falls through to barcode before code
        let remote = item(99, Some("C3"), Some("222"));
        let (found, via) = index.resolve(&remote).unwrap();
        assert_eq!((found.id, via), (2, MatchedBy::Barcode));

        let remote = item(99, Some("C3"), None);
        let (found, via) = index.resolve(&remote).unwrap();
        assert_eq!((found.id, via), (3, MatchedBy::Code));

        assert!(index.resolve(&item(99, Some("Z"), Some("999"))).is_none());
    }

    #[test]
    fn test_id_match_rejected_on_barcode_conflict() {
        let index = CatalogIndex::from_items([
            item(1, Some("A1"), Some("111")),
            item(2, Some("B2"), Some("222")),
        ]);

        let remote = item(1, Some("B2"), Some("222"));
        let (found, via) = index.resolve(&remote).unwrap();
        assert_eq!((found.id, via), (2, MatchedBy::Barcode));

        let stranger = item(1, None, Some("555"));
        assert!(index.resolve(&stranger).is_none());
    }

    #[test]
    fn test_upsert_drops_stale_keys() {
        let mut index = CatalogIndex::from_items([item(1, Some("OLD"), Some("111"))]);
        index.upsert(item(1, Some("NEW"), Some("111")));

        assert!(index.by_code("OLD").is_none());
        assert_eq!(index.by_code("NEW").map(|i| i.id), Some(1));
        assert_eq!(index.code_owner_other_than("NEW", 2), Some(1));
        assert_eq!(index.code_owner_other_than("NEW", 1), None);

        index.remove(1);
        assert!(index.is_empty());
        assert!(index.by_barcode("111").is_none());
    }

    #[test]
    fn test_lookup_ignores_ascii_case() {
        let index = CatalogIndex::from_items([
            item(1, Some("ABC001"), Some("77A1")),
            item(2, Some("ABC002"), None),
        ]);

        let (found, via) = index.resolve(&item(0, None, Some("77a1"))).unwrap();
        assert_eq!((found.id, via), (1, MatchedBy::Barcode));
        let (found, via) = index.resolve(&item(0, Some("abc002"), None)).unwrap();
        assert_eq!((found.id, via), (2, MatchedBy::Code));

        assert_eq!(index.code_owner_other_than("Abc002", 1), Some(2));
        assert_eq!(index.code_owner_other_than("abc001", 1), None);

        // removal drops the folded key too
        let mut index = index;
        index.remove(2);
        assert!(index.by_code("ABC002").is_none());
    }

    #[test]
    fn test_sku_prefix_rules() {
        assert_eq!(normalize_sku_prefix("tienda-norte"), Some("TIENDA".to_string()));
        assert_eq!(normalize_sku_prefix("ab"), None);
        assert_eq!(derive_sku_prefix("La Esquina"), "LAE");
        assert_eq!(derive_sku_prefix("Q"), "QXX");
        assert_eq!(resolve_sku_prefix(Some("x"), Some("Corner Shop")), "COR");
        assert_eq!(resolve_sku_prefix(None, None), FALLBACK_SKU_PREFIX);
    }

    #[test]
    fn test_sku_format_and_sequence() {
        assert_eq!(format_sku("ABC", 7, 6), "ABC000007");
        assert_eq!(format_sku("ABC", 1_234_567, 6), "ABC1234567");
        assert_eq!(sku_sequence("ABC000042", "ABC"), Some(42));
        assert_eq!(sku_sequence("ABC00004X", "ABC"), None);
        assert_eq!(sku_sequence("ABC", "ABC"), None);
        assert_eq!(sku_sequence("XYZ000001", "ABC"), None);
    }
}
