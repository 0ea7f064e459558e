//! # Catalog Repository
//!
//! Catalog reads plus every local mutation path that touches an item.
//!
//! ## Mutation Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_item / update_item / adjust_stock / delete_item / recalc        │
//! │                                                                         │
//! │  UnitOfWork::begin                                                      │
//! │       │                                                                 │
//! │       ├── validate + normalise identifiers                              │
//! │       ├── identifier availability (NOCASE unique indexes)               │
//! │       ├── auto pricing                                                  │
//! │       ├── row write                                                     │
//! │       ├── record_movement   (only when quantity changed)                │
//! │       └── mark_dirty(PRODUCT, id)                                       │
//! │       ▼                                                                 │
//! │  commit → Committed { value, dirty }                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The free functions under "Row Helpers" take a raw connection so the
//! import path and the sync crate can compose them inside their own unit of
//! work.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use stockyard_core::identity::sku_sequence;
use stockyard_core::pricing::same_prices;
use stockyard_core::validation::{validate_item, validate_search_query};
use stockyard_core::{
    apply_auto_pricing, CatalogItem, EntityType, ItemPage, MovementReason, PricingCalculator,
    SkuFormat,
};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::ledger;
use crate::unit_of_work::{Committed, UnitOfWork};

const ITEM_COLUMNS: &str = "id, code, barcode, name, quantity, price, purchase_price, \
     list_price, cash_price, transfer_price, transfer_net_price, ml_price, ml3c_price, \
     ml6c_price, auto_pricing, description, category, provider_name, provider_sku, \
     min_stock, updated_at";

/// Upper bound on candidates tried by one SKU allocation.
const MAX_SKU_ATTEMPTS: u64 = 10_000;

/// Repository for catalog item operations.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, id: i64) -> DbResult<Option<CatalogItem>> {
        let mut conn = self.pool.acquire().await?;
        fetch_item(&mut conn, id).await
    }

    /// Looks up an item by code, ignoring letter case.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<CatalogItem>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_code(&mut conn, code.trim()).await
    }

    /// Looks up an item by barcode, ignoring letter case.
    pub async fn get_by_barcode(&self, barcode: &str) -> DbResult<Option<CatalogItem>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_barcode(&mut conn, barcode.trim()).await
    }

    /// Every item ordered by name.
    pub async fn list_all(&self) -> DbResult<Vec<CatalogItem>> {
        let mut conn = self.pool.acquire().await?;
        fetch_all(&mut conn).await
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM catalog_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// One page of items whose name, code or barcode contains `query`.
    ///
    /// ## Arguments
    /// * `query` - Search text; blank lists everything
    /// * `offset` - Rows to skip
    /// * `limit` - Page size
    pub async fn search_page(&self, query: &str, offset: i64, limit: i64) -> DbResult<ItemPage> {
        let query = validate_search_query(query)?;
        let pattern = format!("%{}%", query);
        let offset = offset.max(0);
        let limit = limit.clamp(1, 500);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM catalog_items
            WHERE ?1 = '' OR name LIKE ?2 OR code LIKE ?2 OR barcode LIKE ?2
            "#,
        )
        .bind(&query)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, CatalogItem>(&format!(
            r#"
            SELECT {} FROM catalog_items
            WHERE ?1 = '' OR name LIKE ?2 OR code LIKE ?2 OR barcode LIKE ?2
            ORDER BY name COLLATE NOCASE, id
            LIMIT ?3 OFFSET ?4
            "#,
            ITEM_COLUMNS
        ))
        .bind(&query)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(ItemPage {
            items,
            total,
            offset,
            limit,
        })
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Creates an item, allocating a code (and barcode) when missing.
    ///
    /// ## Returns
    /// The new item id.
    pub async fn create_item(
        &self,
        item: CatalogItem,
        sku: &SkuFormat,
        pricing: &dyn PricingCalculator,
    ) -> DbResult<Committed<i64>> {
        let mut item = normalize_identifiers(item);
        validate_item(&item)?;

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        item.id = 0;
        item.updated_at = uow.now();

        ensure_identifiers_available(uow.conn(), &item, None).await?;
        let item = apply_auto_pricing(item, None, false, pricing);
        let item = ensure_auto_codes(uow.conn(), item, sku).await?;
        ensure_identifiers_available(uow.conn(), &item, None).await?;

        let id = insert_item(uow.conn(), &item, 0).await?;
        if item.quantity != 0 {
            uow.record_movement(
                id,
                item.quantity,
                MovementReason::ProductCreate,
                Some("Product created"),
            )
            .await?;
        }
        uow.mark_dirty(EntityType::Product, id).await?;

        info!(id, code = ?item.code, "Item created");
        uow.commit(id).await
    }

    /// Writes an edited item over the stored one.
    ///
    /// A blank code or barcode keeps the stored value. Changing the purchase
    /// price of an auto-priced item recomputes its prices.
    pub async fn update_item(
        &self,
        item: CatalogItem,
        pricing: &dyn PricingCalculator,
    ) -> DbResult<Committed<CatalogItem>> {
        let mut item = normalize_identifiers(item);
        validate_item(&item)?;

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let current = fetch_item(uow.conn(), item.id)
            .await?
            .ok_or_else(|| DbError::not_found("Item", item.id))?;

        if item.code.is_none() {
            item.code = current.code.clone();
        }
        if item.barcode.is_none() {
            item.barcode = current.barcode.clone().or_else(|| item.code.clone());
        }
        ensure_identifiers_available(uow.conn(), &item, Some(item.id)).await?;

        let force = current.auto_pricing && item.purchase_price != current.purchase_price;
        let mut item = apply_auto_pricing(item, Some(&current), force, pricing);
        item.updated_at = uow.now();

        update_item_row(uow.conn(), &item).await?;

        let delta = item.quantity - current.quantity;
        if delta != 0 {
            uow.record_movement(item.id, delta, MovementReason::ProductUpdate, Some("Manual edit"))
                .await?;
        }
        uow.mark_dirty(EntityType::Product, item.id).await?;

        debug!(id = item.id, delta, force, "Item updated");
        uow.commit(item).await
    }

    /// Changes the quantity of an item by `delta`, flooring at zero.
    ///
    /// ## Returns
    /// The delta actually applied, which is smaller than requested when the
    /// stock would have gone negative.
    pub async fn adjust_stock(
        &self,
        id: i64,
        delta: i64,
        reason: MovementReason,
        note: Option<&str>,
    ) -> DbResult<Committed<i64>> {
        if delta == 0 {
            return Ok(Committed {
                value: 0,
                dirty: Default::default(),
            });
        }

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let item = fetch_item(uow.conn(), id)
            .await?
            .ok_or_else(|| DbError::not_found("Item", id))?;

        let applied = apply_adjustment(&mut uow, item, delta, reason, note).await?;
        uow.commit(applied).await
    }

    /// Scanner adjustment: finds the item by barcode and records a
    /// `SCAN_ADJUST` movement.
    pub async fn adjust_stock_by_barcode(
        &self,
        barcode: &str,
        delta: i64,
    ) -> DbResult<Committed<i64>> {
        let barcode = barcode.trim();
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let item = fetch_by_barcode(uow.conn(), barcode)
            .await?
            .ok_or_else(|| DbError::not_found("Item", barcode))?;

        if delta == 0 {
            return uow.commit(0).await;
        }

        let note = format!("Scan adjust ({})", barcode);
        let applied =
            apply_adjustment(&mut uow, item, delta, MovementReason::ScanAdjust, Some(&note)).await?;
        uow.commit(applied).await
    }

    /// Deletes an item. Remaining stock is written off first so the ledger
    /// keeps balancing, and the id stays queued so the remote copy goes too.
    pub async fn delete_item(&self, id: i64) -> DbResult<Committed<()>> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let item = fetch_item(uow.conn(), id)
            .await?
            .ok_or_else(|| DbError::not_found("Item", id))?;

        if item.quantity != 0 {
            uow.record_movement(
                id,
                -item.quantity,
                MovementReason::ManualAdjust,
                Some("Product deleted"),
            )
            .await?;
        }
        delete_item_row(uow.conn(), id).await?;
        uow.mark_dirty(EntityType::Product, id).await?;

        info!(id, "Item deleted");
        uow.commit(()).await
    }

    /// Re-prices every auto-priced item that has a purchase price.
    ///
    /// ## Returns
    /// Number of items whose prices changed.
    pub async fn recalculate_auto_pricing(
        &self,
        pricing: &dyn PricingCalculator,
    ) -> DbResult<Committed<usize>> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;

        let candidates = sqlx::query_as::<_, CatalogItem>(&format!(
            "SELECT {} FROM catalog_items WHERE auto_pricing = 1 AND purchase_price IS NOT NULL ORDER BY id",
            ITEM_COLUMNS
        ))
        .fetch_all(&mut *uow.conn())
        .await?;

        let mut changed = 0;
        for current in candidates {
            let mut repriced = apply_auto_pricing(current.clone(), Some(&current), true, pricing);
            if same_prices(&repriced, &current) {
                continue;
            }
            repriced.updated_at = uow.now();
            update_item_row(uow.conn(), &repriced).await?;
            uow.record_movement(
                repriced.id,
                0,
                MovementReason::PriceRecalculation,
                Some("Auto pricing recalculated"),
            )
            .await?;
            uow.mark_dirty(EntityType::Product, repriced.id).await?;
            changed += 1;
        }

        info!(changed, "Auto pricing recalculated");
        uow.commit(changed).await
    }
}

async fn apply_adjustment(
    uow: &mut UnitOfWork,
    mut item: CatalogItem,
    delta: i64,
    reason: MovementReason,
    note: Option<&str>,
) -> DbResult<i64> {
    let new_quantity = item.quantity.saturating_add(delta).max(0);
    let applied = new_quantity - item.quantity;

    item.quantity = new_quantity;
    item.updated_at = uow.now();
    update_item_row(uow.conn(), &item).await?;

    if applied != 0 {
        uow.record_movement(item.id, applied, reason, note).await?;
    }
    uow.mark_dirty(EntityType::Product, item.id).await?;

    debug!(id = item.id, requested = delta, applied, "Stock adjusted");
    Ok(applied)
}

/// Trims identifiers and turns blanks into `None`.
pub fn normalize_identifiers(mut item: CatalogItem) -> CatalogItem {
    item.code = item.normalized_code().map(str::to_string);
    item.barcode = item.normalized_barcode().map(str::to_string);
    item.name = item.name.trim().to_string();
    item
}

// =============================================================================
// Row Helpers
// =============================================================================

pub async fn fetch_item(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<CatalogItem>> {
    let item = sqlx::query_as::<_, CatalogItem>(&format!(
        "SELECT {} FROM catalog_items WHERE id = ?1",
        ITEM_COLUMNS
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(item)
}

pub async fn fetch_by_code(
    conn: &mut SqliteConnection,
    code: &str,
) -> DbResult<Option<CatalogItem>> {
    let item = sqlx::query_as::<_, CatalogItem>(&format!(
        "SELECT {} FROM catalog_items WHERE code = ?1",
        ITEM_COLUMNS
    ))
    .bind(code)
    .fetch_optional(conn)
    .await?;
    Ok(item)
}

pub async fn fetch_by_barcode(
    conn: &mut SqliteConnection,
    barcode: &str,
) -> DbResult<Option<CatalogItem>> {
    let item = sqlx::query_as::<_, CatalogItem>(&format!(
        "SELECT {} FROM catalog_items WHERE barcode = ?1",
        ITEM_COLUMNS
    ))
    .bind(barcode)
    .fetch_optional(conn)
    .await?;
    Ok(item)
}

/// First item (lowest id) whose name matches, ignoring case.
pub async fn fetch_by_name(
    conn: &mut SqliteConnection,
    name: &str,
) -> DbResult<Option<CatalogItem>> {
    let item = sqlx::query_as::<_, CatalogItem>(&format!(
        "SELECT {} FROM catalog_items WHERE name = ?1 COLLATE NOCASE ORDER BY id LIMIT 1",
        ITEM_COLUMNS
    ))
    .bind(name.trim())
    .fetch_optional(conn)
    .await?;
    Ok(item)
}

pub async fn fetch_all(conn: &mut SqliteConnection) -> DbResult<Vec<CatalogItem>> {
    let items = sqlx::query_as::<_, CatalogItem>(&format!(
        "SELECT {} FROM catalog_items ORDER BY name COLLATE NOCASE, id",
        ITEM_COLUMNS
    ))
    .fetch_all(conn)
    .await?;
    Ok(items)
}

/// Inserts an item. A positive `item.id` is kept, otherwise SQLite picks
/// one.
///
/// ## Arguments
/// * `opening_quantity` - Quantity not explained by any ledger row
pub async fn insert_item(
    conn: &mut SqliteConnection,
    item: &CatalogItem,
    opening_quantity: i64,
) -> DbResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO catalog_items (
            id, code, barcode, name, quantity, opening_quantity,
            price, purchase_price, list_price, cash_price, transfer_price,
            transfer_net_price, ml_price, ml3c_price, ml6c_price, auto_pricing,
            description, category, provider_name, provider_sku, min_stock, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10, ?11,
            ?12, ?13, ?14, ?15, ?16,
            ?17, ?18, ?19, ?20, ?21, ?22
        )
        "#,
    )
    .bind((item.id > 0).then_some(item.id))
    .bind(item.code.as_deref())
    .bind(item.barcode.as_deref())
    .bind(&item.name)
    .bind(item.quantity)
    .bind(opening_quantity)
    .bind(item.price)
    .bind(item.purchase_price)
    .bind(item.list_price)
    .bind(item.cash_price)
    .bind(item.transfer_price)
    .bind(item.transfer_net_price)
    .bind(item.ml_price)
    .bind(item.ml3c_price)
    .bind(item.ml6c_price)
    .bind(item.auto_pricing)
    .bind(item.description.as_deref())
    .bind(item.category.as_deref())
    .bind(item.provider_name.as_deref())
    .bind(item.provider_sku.as_deref())
    .bind(item.min_stock)
    .bind(item.updated_at)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Inserts an item whose quantity comes from outside this store, seeding
/// the opening quantity so that any history already recorded under the
/// same id still balances.
pub async fn insert_seeded(conn: &mut SqliteConnection, item: &CatalogItem) -> DbResult<i64> {
    let id = insert_item(&mut *conn, item, item.quantity).await?;
    let history = ledger::delta_sum(&mut *conn, id).await?;
    if history != 0 {
        sqlx::query("UPDATE catalog_items SET opening_quantity = ?1 WHERE id = ?2")
            .bind(item.quantity - history)
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(id)
}

/// Overwrites every column of an existing row except `opening_quantity`.
pub async fn update_item_row(conn: &mut SqliteConnection, item: &CatalogItem) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE catalog_items SET
            code = ?2, barcode = ?3, name = ?4, quantity = ?5,
            price = ?6, purchase_price = ?7, list_price = ?8, cash_price = ?9,
            transfer_price = ?10, transfer_net_price = ?11, ml_price = ?12,
            ml3c_price = ?13, ml6c_price = ?14, auto_pricing = ?15,
            description = ?16, category = ?17, provider_name = ?18,
            provider_sku = ?19, min_stock = ?20, updated_at = ?21
        WHERE id = ?1
        "#,
    )
    .bind(item.id)
    .bind(item.code.as_deref())
    .bind(item.barcode.as_deref())
    .bind(&item.name)
    .bind(item.quantity)
    .bind(item.price)
    .bind(item.purchase_price)
    .bind(item.list_price)
    .bind(item.cash_price)
    .bind(item.transfer_price)
    .bind(item.transfer_net_price)
    .bind(item.ml_price)
    .bind(item.ml3c_price)
    .bind(item.ml6c_price)
    .bind(item.auto_pricing)
    .bind(item.description.as_deref())
    .bind(item.category.as_deref())
    .bind(item.provider_name.as_deref())
    .bind(item.provider_sku.as_deref())
    .bind(item.min_stock)
    .bind(item.updated_at)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Item", item.id));
    }
    Ok(())
}

pub async fn delete_item_row(conn: &mut SqliteConnection, id: i64) -> DbResult<()> {
    sqlx::query("DELETE FROM catalog_items WHERE id = ?1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Empties the catalog. Ledger rows stay.
pub async fn delete_all_items(conn: &mut SqliteConnection) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM catalog_items")
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn id_taken(conn: &mut SqliteConnection, id: i64) -> DbResult<bool> {
    let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM catalog_items WHERE id = ?1)")
        .bind(id)
        .fetch_one(conn)
        .await?;
    Ok(taken)
}

/// True when another item (not `except_id`) owns `code`, ignoring case.
pub async fn code_taken(
    conn: &mut SqliteConnection,
    code: &str,
    except_id: Option<i64>,
) -> DbResult<bool> {
    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM catalog_items WHERE code = ?1 AND id <> ?2)",
    )
    .bind(code)
    .bind(except_id.unwrap_or(0))
    .fetch_one(conn)
    .await?;
    Ok(taken)
}

/// True when another item (not `except_id`) owns `barcode`, ignoring case.
pub async fn barcode_taken(
    conn: &mut SqliteConnection,
    barcode: &str,
    except_id: Option<i64>,
) -> DbResult<bool> {
    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM catalog_items WHERE barcode = ?1 AND id <> ?2)",
    )
    .bind(barcode)
    .bind(except_id.unwrap_or(0))
    .fetch_one(conn)
    .await?;
    Ok(taken)
}

/// Fails with `UniqueViolation` when the item's code or barcode belongs to
/// another item.
pub async fn ensure_identifiers_available(
    conn: &mut SqliteConnection,
    item: &CatalogItem,
    except_id: Option<i64>,
) -> DbResult<()> {
    if let Some(code) = item.normalized_code() {
        if code_taken(&mut *conn, code, except_id).await? {
            return Err(DbError::duplicate("code", code));
        }
    }
    if let Some(barcode) = item.normalized_barcode() {
        if barcode_taken(&mut *conn, barcode, except_id).await? {
            return Err(DbError::duplicate("barcode", barcode));
        }
    }
    Ok(())
}

/// Highest sequence among codes shaped `{prefix}{digits}`.
pub async fn max_sku_sequence(conn: &mut SqliteConnection, prefix: &str) -> DbResult<u64> {
    let codes: Vec<String> = sqlx::query_scalar(
        "SELECT code FROM catalog_items WHERE code IS NOT NULL AND substr(code, 1, length(?1)) = ?1",
    )
    .bind(prefix)
    .fetch_all(conn)
    .await?;

    Ok(codes
        .iter()
        .filter_map(|code| sku_sequence(code, prefix))
        .max()
        .unwrap_or(0))
}

/// Next free SKU after the highest existing one. Gaps are never refilled.
///
/// Each candidate is re-checked against both codes and barcodes, since a
/// barcode may have been typed in that looks like a SKU.
pub async fn allocate_sku(conn: &mut SqliteConnection, sku: &SkuFormat) -> DbResult<String> {
    let start = max_sku_sequence(&mut *conn, &sku.prefix).await? + 1;

    for sequence in start..start + MAX_SKU_ATTEMPTS {
        let candidate = sku.format(sequence);
        if !code_taken(&mut *conn, &candidate, None).await?
            && !barcode_taken(&mut *conn, &candidate, None).await?
        {
            debug!(code = %candidate, "SKU allocated");
            return Ok(candidate);
        }
    }

    Err(DbError::Internal(format!(
        "no free SKU for prefix {} after {} attempts",
        sku.prefix, MAX_SKU_ATTEMPTS
    )))
}

/// Allocates a missing code and defaults a missing barcode to the code.
pub async fn ensure_auto_codes(
    conn: &mut SqliteConnection,
    mut item: CatalogItem,
    sku: &SkuFormat,
) -> DbResult<CatalogItem> {
    if item.normalized_code().is_none() {
        item.code = Some(allocate_sku(&mut *conn, sku).await?);
    }
    if item.normalized_barcode().is_none() {
        item.barcode = item.code.clone();
    }
    Ok(item)
}

/// Takes `quantity` units if that many are on hand.
///
/// ## Returns
/// * `NotFound` - No such item
/// * `InsufficientStock` - Fewer units than requested
pub async fn decrement_if_enough(
    conn: &mut SqliteConnection,
    item_id: i64,
    quantity: i64,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE catalog_items
        SET quantity = quantity - ?2, updated_at = ?3
        WHERE id = ?1 AND quantity >= ?2
        "#,
    )
    .bind(item_id)
    .bind(quantity)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let available: Option<i64> =
        sqlx::query_scalar("SELECT quantity FROM catalog_items WHERE id = ?1")
            .bind(item_id)
            .fetch_optional(&mut *conn)
            .await?;

    match available {
        None => Err(DbError::not_found("Item", item_id)),
        Some(available) => Err(DbError::InsufficientStock {
            item_id,
            available,
            requested: quantity,
        }),
    }
}

/// Adds `quantity` units back, e.g. when a sale is cancelled.
pub async fn increment(
    conn: &mut SqliteConnection,
    item_id: i64,
    quantity: i64,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE catalog_items SET quantity = quantity + ?2, updated_at = ?3 WHERE id = ?1",
    )
    .bind(item_id)
    .bind(quantity)
    .bind(now)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Item", item_id));
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
