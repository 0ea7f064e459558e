//! # Bulk Import
//!
//! Applies parsed import rows to the catalog in one unit of work.
//!
//! ## Row Handling
//! ```text
//! rows ──► for each row (savepoint per row)
//!            │
//!            ├── code already seen in this file? ──► "Line N: code "X" duplicated in file"
//!            ├── invalid row? ─────────────────────► "Line N: <reason>"
//!            ├── match: barcode → code → name
//!            ├── row code owned by another item? ──► "Line N: code "X" already exists."
//!            │
//!            ├── no match ──► insert + CSV_IMPORT movement (+qty)
//!            └── match ─────► Append: qty + max(0, row qty)
//!                             Replace: max(0, row qty)
//!                             CSV_IMPORT movement for the delta
//! ```
//!
//! A failing row rolls back to its savepoint and the import carries on;
//! the report lists one message per rejected row. Line numbers count the
//! header, so the first row is line 2.

use std::collections::HashSet;

use sqlx::SqliteConnection;
use stockyard_core::validation::validate_import_row;
use stockyard_core::{
    apply_auto_pricing, import_line_number, CatalogItem, EntityType, ImportReport, ImportRow,
    ImportStrategy, MovementReason, PricingCalculator, SkuFormat,
};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::repository::catalog::{self, CatalogRepository};
use crate::unit_of_work::{Committed, UnitOfWork};

/// Why a single row was rejected.
enum RowError {
    /// Message already carries its line prefix.
    Reported(String),
    Failed(DbError),
}

impl From<DbError> for RowError {
    fn from(err: DbError) -> Self {
        RowError::Failed(err)
    }
}

enum RowOutcome {
    Inserted,
    Updated,
}

impl CatalogRepository {
    /// Imports `rows` with the given quantity strategy.
    ///
    /// ## Returns
    /// Counts of inserted and updated items plus the per-row errors. Rows
    /// that fail leave no trace; the others commit together.
    pub async fn import_items(
        &self,
        rows: &[ImportRow],
        strategy: ImportStrategy,
        sku: &SkuFormat,
        pricing: &dyn PricingCalculator,
    ) -> DbResult<Committed<ImportReport>> {
        let mut uow = UnitOfWork::begin(self.pool()).await?;
        let mut report = ImportReport::default();
        let mut seen_codes: HashSet<String> = HashSet::new();

        for (idx, row) in rows.iter().enumerate() {
            let line = import_line_number(idx);

            if let Some(code) = row.normalized_code() {
                if !seen_codes.insert(code.to_lowercase()) {
                    report
                        .errors
                        .push(format!("Line {}: code \"{}\" duplicated in file", line, code));
                    continue;
                }
            }

            let savepoint = uow.savepoint().await?;
            match import_row(&mut uow, row, line, strategy, sku, pricing).await {
                Ok(RowOutcome::Inserted) => {
                    uow.release(savepoint).await?;
                    report.inserted += 1;
                }
                Ok(RowOutcome::Updated) => {
                    uow.release(savepoint).await?;
                    report.updated += 1;
                }
                Err(err) => {
                    uow.rollback_to(savepoint).await?;
                    let message = match err {
                        RowError::Reported(message) => message,
                        RowError::Failed(err) => format!("Line {}: {}", line, err),
                    };
                    debug!(line, error = %message, "Import row rejected");
                    report.errors.push(message);
                }
            }
        }

        if !report.errors.is_empty() {
            warn!(errors = report.errors.len(), "Import finished with rejected rows");
        }
        info!(
            inserted = report.inserted,
            updated = report.updated,
            strategy = strategy.as_str(),
            "Import committed"
        );
        uow.commit(report).await
    }
}

async fn import_row(
    uow: &mut UnitOfWork,
    row: &ImportRow,
    line: usize,
    strategy: ImportStrategy,
    sku: &SkuFormat,
    pricing: &dyn PricingCalculator,
) -> Result<RowOutcome, RowError> {
    validate_import_row(row).map_err(DbError::from)?;

    let code = row.normalized_code();
    let existing = find_existing(uow.conn(), row).await?;

    if let Some(code) = code {
        if let Some(owner) = catalog::fetch_by_code(uow.conn(), code).await? {
            if existing.as_ref().map_or(true, |e| e.id != owner.id) {
                return Err(RowError::Reported(format!(
                    "Line {}: code \"{}\" already exists.",
                    line, code
                )));
            }
        }
    }

    match existing {
        None => {
            let mut item = new_item_from_row(row);
            item.updated_at = uow.now();
            let item = apply_auto_pricing(item, None, false, pricing);
            let item = catalog::ensure_auto_codes(uow.conn(), item, sku).await?;
            catalog::ensure_identifiers_available(uow.conn(), &item, None).await?;

            let id = catalog::insert_item(uow.conn(), &item, 0).await?;
            if item.quantity != 0 {
                uow.record_movement(
                    id,
                    item.quantity,
                    MovementReason::CsvImport,
                    Some("File import (new)"),
                )
                .await?;
            }
            uow.mark_dirty(EntityType::Product, id).await?;
            Ok(RowOutcome::Inserted)
        }
        Some(current) => {
            let new_quantity = match strategy {
                ImportStrategy::Append => current.quantity.saturating_add(row.quantity.max(0)),
                ImportStrategy::Replace => row.quantity.max(0),
            };

            let mut merged = merge_row(&current, row, new_quantity);
            merged.updated_at = uow.now();
            let merged = apply_auto_pricing(merged, Some(&current), false, pricing);
            catalog::ensure_identifiers_available(uow.conn(), &merged, Some(current.id)).await?;
            catalog::update_item_row(uow.conn(), &merged).await?;

            let delta = new_quantity - current.quantity;
            if delta != 0 {
                let note = format!("File import ({})", strategy.as_str());
                uow.record_movement(current.id, delta, MovementReason::CsvImport, Some(&note))
                    .await?;
            }
            uow.mark_dirty(EntityType::Product, current.id).await?;
            Ok(RowOutcome::Updated)
        }
    }
}

/// Barcode first, then code; the name is only used for rows carrying
/// neither identifier.
async fn find_existing(
    conn: &mut SqliteConnection,
    row: &ImportRow,
) -> DbResult<Option<CatalogItem>> {
    if let Some(barcode) = row.normalized_barcode() {
        if let Some(item) = catalog::fetch_by_barcode(&mut *conn, barcode).await? {
            return Ok(Some(item));
        }
    }
    if let Some(code) = row.normalized_code() {
        if let Some(item) = catalog::fetch_by_code(&mut *conn, code).await? {
            return Ok(Some(item));
        }
    }
    if row.normalized_barcode().is_none() && row.normalized_code().is_none() {
        return catalog::fetch_by_name(conn, &row.name).await;
    }
    Ok(None)
}

fn new_item_from_row(row: &ImportRow) -> CatalogItem {
    let mut item = CatalogItem::new(row.name.trim());
    item.code = row.normalized_code().map(str::to_string);
    item.barcode = row.normalized_barcode().map(str::to_string);
    item.quantity = row.quantity.max(0);
    item.price = row.price;
    item.purchase_price = row.purchase_price;
    item.list_price = row.list_price;
    item.cash_price = row.cash_price;
    item.transfer_price = row.transfer_price;
    item.transfer_net_price = row.transfer_net_price;
    item.ml_price = row.ml_price;
    item.ml3c_price = row.ml3c_price;
    item.ml6c_price = row.ml6c_price;
    item.auto_pricing = false;
    item.description = row.description.clone();
    item.category = row.category.clone();
    item.provider_name = row.provider_name.clone();
    item.provider_sku = row.provider_sku.clone();
    item.min_stock = row.min_stock.map(|m| m.max(0));
    item
}

/// Row values win where present; everything else stays as stored.
fn merge_row(current: &CatalogItem, row: &ImportRow, quantity: i64) -> CatalogItem {
    let name = row.name.trim();
    CatalogItem {
        id: current.id,
        code: row
            .normalized_code()
            .map(str::to_string)
            .or_else(|| current.code.clone()),
        barcode: row
            .normalized_barcode()
            .map(str::to_string)
            .or_else(|| current.barcode.clone()),
        name: if name.is_empty() {
            current.name.clone()
        } else {
            name.to_string()
        },
        quantity,
        price: row.price.or(current.price),
        purchase_price: row.purchase_price.or(current.purchase_price),
        list_price: row.list_price.or(current.list_price),
        cash_price: row.cash_price.or(current.cash_price),
        transfer_price: row.transfer_price.or(current.transfer_price),
        transfer_net_price: row.transfer_net_price.or(current.transfer_net_price),
        ml_price: row.ml_price.or(current.ml_price),
        ml3c_price: row.ml3c_price.or(current.ml3c_price),
        ml6c_price: row.ml6c_price.or(current.ml6c_price),
        auto_pricing: current.auto_pricing,
        description: row.description.clone().or_else(|| current.description.clone()),
        category: row.category.clone().or_else(|| current.category.clone()),
        provider_name: row.provider_name.clone().or_else(|| current.provider_name.clone()),
        provider_sku: row.provider_sku.clone().or_else(|| current.provider_sku.clone()),
        min_stock: row.min_stock.or(current.min_stock),
        updated_at: current.updated_at,
    }
}

// =============================================================================
// Dry Run
// =============================================================================

/// Predicts what [`CatalogRepository::import_items`] would report for
/// `rows` against `existing`, without touching storage.
///
/// Identifier collisions are judged the same way the store judges them:
/// ignoring letter case.
pub fn simulate_import(rows: &[ImportRow], existing: &[CatalogItem]) -> ImportReport {
    struct Known {
        key: usize,
        code: Option<String>,
        barcode: Option<String>,
        name: String,
    }

    let fold = |s: &str| s.to_lowercase();
    let mut known: Vec<Known> = existing
        .iter()
        .enumerate()
        .map(|(key, item)| Known {
            key,
            code: item.normalized_code().map(fold),
            barcode: item.normalized_barcode().map(fold),
            name: fold(item.name.trim()),
        })
        .collect();

    let mut report = ImportReport::default();
    let mut seen_codes: HashSet<String> = HashSet::new();

    for (idx, row) in rows.iter().enumerate() {
        let line = import_line_number(idx);
        let code = row.normalized_code();
        let code_key = code.map(fold);
        let barcode_key = row.normalized_barcode().map(fold);

        if let (Some(code), Some(key)) = (code, code_key.as_ref()) {
            if !seen_codes.insert(key.clone()) {
                report
                    .errors
                    .push(format!("Line {}: code \"{}\" duplicated in file", line, code));
                continue;
            }
        }

        if let Err(err) = validate_import_row(row) {
            report.errors.push(format!("Line {}: {}", line, err));
            continue;
        }

        let matched = barcode_key
            .as_ref()
            .and_then(|b| known.iter().find(|k| k.barcode.as_ref() == Some(b)))
            .or_else(|| {
                code_key
                    .as_ref()
                    .and_then(|c| known.iter().find(|k| k.code.as_ref() == Some(c)))
            })
            .or_else(|| {
                if barcode_key.is_none() && code_key.is_none() {
                    let name = fold(row.name.trim());
                    known.iter().find(|k| k.name == name)
                } else {
                    None
                }
            })
            .map(|k| k.key);

        if let (Some(code), Some(key)) = (code, code_key.as_ref()) {
            let owner = known.iter().find(|k| k.code.as_ref() == Some(key)).map(|k| k.key);
            if owner.is_some() && owner != matched {
                report
                    .errors
                    .push(format!("Line {}: code \"{}\" already exists.", line, code));
                continue;
            }
        }

        match matched {
            Some(key) => {
                if let Some(k) = known.iter_mut().find(|k| k.key == key) {
                    if code_key.is_some() {
                        k.code = code_key;
                    }
                    if barcode_key.is_some() {
                        k.barcode = barcode_key;
                    }
                }
                report.updated += 1;
            }
            None => {
                known.push(Known {
                    key: existing.len() + idx,
                    code: code_key,
                    barcode: barcode_key,
                    name: fold(row.name.trim()),
                });
                report.inserted += 1;
            }
        }
    }

    report
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use stockyard_core::{DirtyKey, TieredMarkupCalculator};

    use crate::pool::{Database, DbConfig};

    fn row(code: Option<&str>, barcode: Option<&str>, name: &str, qty: i64) -> ImportRow {
        ImportRow {
            code: code.map(str::to_string),
            barcode: barcode.map(str::to_string),
            ..ImportRow::new(name, qty)
        }
    }

    #[tokio::test]
    async fn test_duplicate_code_in_file_rejects_second_row() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let pricing = TieredMarkupCalculator::default();
        let rows = vec![
            row(Some("X1"), None, "first", 2),
            row(Some("X1"), None, "second", 3),
        ];

        let committed = db
            .catalog()
            .import_items(&rows, ImportStrategy::Append, &SkuFormat::default(), &pricing)
            .await
            .unwrap();
        let report = committed.value;

        assert_eq!(report.inserted, 1);
        assert_eq!(report.updated, 0);
        assert_eq!(report.errors, vec!["Line 3: code \"X1\" duplicated in file".to_string()]);

        let item = db.catalog().get_by_code("X1").await.unwrap().unwrap();
        assert_eq!(item.name, "first");
        assert_eq!(committed.dirty.len(), 1);
        assert!(committed.dirty.contains(&DirtyKey::product(item.id)));
    }

    #[tokio::test]
    async fn test_append_and_replace_strategies() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let pricing = TieredMarkupCalculator::default();
        let sku = SkuFormat::default();
        let seed = vec![row(Some("A1"), Some("111"), "Apple", 5)];
        db.catalog()
            .import_items(&seed, ImportStrategy::Append, &sku, &pricing)
            .await
            .unwrap();

        let append = vec![row(None, Some("111"), "Apple", 3)];
        let report = db
            .catalog()
            .import_items(&append, ImportStrategy::Append, &sku, &pricing)
            .await
            .unwrap()
            .value;
        assert_eq!(report.updated, 1);
        let item = db.catalog().get_by_barcode("111").await.unwrap().unwrap();
        assert_eq!(item.quantity, 8);
        assert_eq!(item.code.as_deref(), Some("A1"));

        let replace = vec![row(Some("A1"), None, "Apple", -4)];
        db.catalog()
            .import_items(&replace, ImportStrategy::Replace, &sku, &pricing)
            .await
            .unwrap();
        let item = db.catalog().get(item.id).await.unwrap().unwrap();
        assert_eq!(item.quantity, 0);

        let history = db.ledger().history(item.id, 10).await.unwrap();
        assert_eq!(history[0].delta, -8);
        assert_eq!(history[0].note.as_deref(), Some("File import (replace)"));
        assert!(history.iter().all(|m| m.reason == MovementReason::CsvImport));
        assert!(db.ledger().conservation_violations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_saturates_quantity() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let pricing = TieredMarkupCalculator::default();
        let sku = SkuFormat::default();
        let seed = vec![row(Some("A1"), Some("111"), "Apple", 5)];
        db.catalog()
            .import_items(&seed, ImportStrategy::Append, &sku, &pricing)
            .await
            .unwrap();

        let huge = vec![row(Some("A1"), None, "Apple", i64::MAX)];
        let report = db
            .catalog()
            .import_items(&huge, ImportStrategy::Append, &sku, &pricing)
            .await
            .unwrap()
            .value;
        assert_eq!(report.updated, 1);
        let item = db.catalog().get_by_code("A1").await.unwrap().unwrap();
        assert_eq!(item.quantity, i64::MAX);
    }

    #[tokio::test]
    async fn test_code_owned_by_other_item_is_row_error() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let pricing = TieredMarkupCalculator::default();
        let sku = SkuFormat::default();
        let seed = vec![
            row(Some("A1"), Some("111"), "Apple", 1),
            row(Some("B1"), Some("222"), "Banana", 1),
        ];
        db.catalog()
            .import_items(&seed, ImportStrategy::Append, &sku, &pricing)
            .await
            .unwrap();

        // barcode matches Banana but the code belongs to Apple
        let rows = vec![row(Some("A1"), Some("222"), "Banana", 9), row(None, None, "Cherry", 1)];
        let report = db
            .catalog()
            .import_items(&rows, ImportStrategy::Append, &sku, &pricing)
            .await
            .unwrap()
            .value;

        assert_eq!(report.errors, vec!["Line 2: code \"A1\" already exists.".to_string()]);
        assert_eq!(report.inserted, 1);
        let banana = db.catalog().get_by_barcode("222").await.unwrap().unwrap();
        assert_eq!(banana.quantity, 1);
    }

    #[tokio::test]
    async fn test_invalid_row_rolls_back_alone() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let pricing = TieredMarkupCalculator::default();
        let rows = vec![row(Some("OK1"), None, "Fine", 1), row(Some("BAD1"), None, "  ", 1)];

        let report = db
            .catalog()
            .import_items(&rows, ImportStrategy::Append, &SkuFormat::default(), &pricing)
            .await
            .unwrap()
            .value;

        assert_eq!(report.inserted, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Line 3: "));
        assert!(db.catalog().get_by_code("BAD1").await.unwrap().is_none());
        assert_eq!(db.outbox().count_pending().await.unwrap(), 1);
    }

    #[test]
    fn test_simulation_matches_import_rules() {
        let existing = vec![CatalogItem::new("Apple").with_code("A1").with_barcode("111")];
        let rows = vec![
            row(None, Some("111"), "Apple", 1),
            row(Some("a1"), Some("999"), "Other", 1),
            row(Some("N1"), None, "New", 1),
            row(Some("N1"), None, "New again", 1),
            row(None, None, "new", 1),
        ];

        let report = simulate_import(&rows, &existing);

        assert_eq!(report.updated, 3);
        assert_eq!(report.inserted, 1);
        assert_eq!(
            report.errors,
            vec!["Line 5: code \"N1\" duplicated in file".to_string()]
        );
    }
}
