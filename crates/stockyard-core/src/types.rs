//! # Domain Types
//!
//! Core domain types shared by the local store and the sync engine.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐        │
//! │  │  CatalogItem    │   │  StockMovement  │   │  OutboxEntry    │        │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │        │
//! │  │  id (local i64) │◄──│  item_id        │   │  entity_type    │        │
//! │  │  code (SKU)     │   │  delta (signed) │   │  entity_id      │        │
//! │  │  barcode        │   │  reason         │   │  revision       │        │
//! │  │  quantity       │   │  ts, note       │   │  last_error     │        │
//! │  │  prices (cents) │   └─────────────────┘   └─────────────────┘        │
//! │  │  updated_at     │                                                    │
//! │  └─────────────────┘   ┌─────────────────┐   ┌─────────────────┐        │
//! │                        │    Invoice      │   │    DirtySet     │        │
//! │                        │  ─────────────  │   │  ─────────────  │        │
//! │                        │  status         │   │ (type, id) keys │        │
//! │                        │  lines → items  │   │ touched by one  │        │
//! │                        └─────────────────┘   │ unit of work    │        │
//! │                                              └─────────────────┘        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Items carry three identifiers. `id` is the local row id (0 until
//! persisted), `code` is the tenant-scoped SKU and `barcode` is the scanned
//! label. Any of the three can be used to match a remote record.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Catalog Item
// =============================================================================

/// A product in the tenant catalog.
///
/// Every price is an independently nullable amount in cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CatalogItem {
    /// Local row id, 0 until persisted.
    pub id: i64,

    /// Tenant-scoped SKU.
    pub code: Option<String>,

    /// Scanned label; defaults to the code when absent.
    pub barcode: Option<String>,

    pub name: String,

    /// On-hand units, never negative.
    pub quantity: i64,

    /// Legacy single price shown at the counter.
    pub price: Option<i64>,
    pub purchase_price: Option<i64>,
    pub list_price: Option<i64>,
    pub cash_price: Option<i64>,
    pub transfer_price: Option<i64>,
    pub transfer_net_price: Option<i64>,
    pub ml_price: Option<i64>,
    pub ml3c_price: Option<i64>,
    pub ml6c_price: Option<i64>,

    /// Prices are derived from `purchase_price` by the pricing calculator.
    pub auto_pricing: bool,

    pub description: Option<String>,
    pub category: Option<String>,
    pub provider_name: Option<String>,
    pub provider_sku: Option<String>,
    pub min_stock: Option<i64>,

    /// Merge clock for last-writer-wins.
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl CatalogItem {
    /// A fresh, unpersisted item with every optional field empty.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            code: None,
            barcode: None,
            name: name.into(),
            quantity: 0,
            price: None,
            purchase_price: None,
            list_price: None,
            cash_price: None,
            transfer_price: None,
            transfer_net_price: None,
            ml_price: None,
            ml3c_price: None,
            ml6c_price: None,
            auto_pricing: false,
            description: None,
            category: None,
            provider_name: None,
            provider_sku: None,
            min_stock: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_barcode(mut self, barcode: impl Into<String>) -> Self {
        self.barcode = Some(barcode.into());
        self
    }

    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_purchase_price(mut self, cents: i64) -> Self {
        self.purchase_price = Some(cents);
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// True when any hand-entered selling price is present.
    pub fn has_manual_prices(&self) -> bool {
        self.list_price.is_some()
            || self.cash_price.is_some()
            || self.transfer_price.is_some()
            || self.price.is_some()
    }

    /// Unit price charged at sale: the counter price, else the list price.
    pub fn sale_price(&self) -> Option<Money> {
        self.price.or(self.list_price).map(Money::from_cents)
    }

    pub fn is_low_stock(&self) -> bool {
        self.min_stock.map_or(false, |min| self.quantity <= min)
    }

    /// Trimmed, non-blank code.
    pub fn normalized_code(&self) -> Option<&str> {
        self.code.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    /// Trimmed, non-blank barcode.
    pub fn normalized_barcode(&self) -> Option<&str> {
        self.barcode.as_deref().map(str::trim).filter(|b| !b.is_empty())
    }
}

/// One page of a catalog search.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ItemPage {
    pub items: Vec<CatalogItem>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

// =============================================================================
// Stock Movements
// =============================================================================

/// Why a quantity changed.
///
/// Stored as its SCREAMING_SNAKE_CASE tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementReason {
    ProductCreate,
    ProductUpdate,
    ManualAdjust,
    InventoryCount,
    Damage,
    ManualReceive,
    CsvImport,
    QuickOrderReceived,
    ScanAdjust,
    Sale,
    SaleCancel,
    /// Zero-delta trace left when auto pricing rewrote an item.
    PriceRecalculation,
    /// Quantity applied from a remote merge.
    RemoteSync,
}

impl MovementReason {
    pub const ALL: [MovementReason; 13] = [
        MovementReason::ProductCreate,
        MovementReason::ProductUpdate,
        MovementReason::ManualAdjust,
        MovementReason::InventoryCount,
        MovementReason::Damage,
        MovementReason::ManualReceive,
        MovementReason::CsvImport,
        MovementReason::QuickOrderReceived,
        MovementReason::ScanAdjust,
        MovementReason::Sale,
        MovementReason::SaleCancel,
        MovementReason::PriceRecalculation,
        MovementReason::RemoteSync,
    ];

    /// The persisted tag.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MovementReason::ProductCreate => "PRODUCT_CREATE",
            MovementReason::ProductUpdate => "PRODUCT_UPDATE",
            MovementReason::ManualAdjust => "MANUAL_ADJUST",
            MovementReason::InventoryCount => "INVENTORY_COUNT",
            MovementReason::Damage => "DAMAGE",
            MovementReason::ManualReceive => "MANUAL_RECEIVE",
            MovementReason::CsvImport => "CSV_IMPORT",
            MovementReason::QuickOrderReceived => "QUICK_ORDER_RECEIVED",
            MovementReason::ScanAdjust => "SCAN_ADJUST",
            MovementReason::Sale => "SALE",
            MovementReason::SaleCancel => "SALE_CANCEL",
            MovementReason::PriceRecalculation => "PRICE_RECALCULATION",
            MovementReason::RemoteSync => "REMOTE_SYNC",
        }
    }

    /// Human-readable label for history screens.
    pub const fn label(&self) -> &'static str {
        match self {
            MovementReason::ProductCreate => "Product created",
            MovementReason::ProductUpdate => "Product edited",
            MovementReason::ManualAdjust => "Manual adjustment",
            MovementReason::InventoryCount => "Inventory count",
            MovementReason::Damage => "Damage / loss",
            MovementReason::ManualReceive => "Goods received",
            MovementReason::CsvImport => "File import",
            MovementReason::QuickOrderReceived => "Quick order received",
            MovementReason::ScanAdjust => "Scan adjustment",
            MovementReason::Sale => "Sale",
            MovementReason::SaleCancel => "Sale cancelled",
            MovementReason::PriceRecalculation => "Price recalculation",
            MovementReason::RemoteSync => "Remote sync",
        }
    }
}

impl fmt::Display for MovementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementReason::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown movement reason: {}", s))
    }
}

/// Reasons offered by the manual stock adjustment screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockAdjustmentReason {
    Inventory,
    Damage,
    Received,
    Other,
}

impl StockAdjustmentReason {
    pub const fn movement_reason(&self) -> MovementReason {
        match self {
            StockAdjustmentReason::Inventory => MovementReason::InventoryCount,
            StockAdjustmentReason::Damage => MovementReason::Damage,
            StockAdjustmentReason::Received => MovementReason::ManualReceive,
            StockAdjustmentReason::Other => MovementReason::ManualAdjust,
        }
    }
}

impl From<StockAdjustmentReason> for MovementReason {
    fn from(reason: StockAdjustmentReason) -> Self {
        reason.movement_reason()
    }
}

/// One immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    pub id: i64,
    pub item_id: i64,
    pub delta: i64,
    pub reason: MovementReason,
    #[ts(as = "String")]
    pub ts: DateTime<Utc>,
    pub note: Option<String>,
    pub user_name: Option<String>,
}

/// A ledger row joined with its item name (absent once the item is deleted).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct MovementWithItem {
    pub id: i64,
    pub item_id: i64,
    pub item_name: Option<String>,
    pub delta: i64,
    pub reason: MovementReason,
    #[ts(as = "String")]
    pub ts: DateTime<Utc>,
    pub note: Option<String>,
    pub user_name: Option<String>,
}

/// An item whose live quantity disagrees with its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct LedgerMismatch {
    pub item_id: i64,
    pub quantity: i64,
    pub expected: i64,
}

// =============================================================================
// Outbox
// =============================================================================

/// Kinds of entity tracked by the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Product,
    Invoice,
}

impl EntityType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityType::Product => "PRODUCT",
            EntityType::Invoice => "INVOICE",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending push for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OutboxEntry {
    pub entity_type: EntityType,
    pub entity_id: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Bumped on every re-mark; a push clears only the revision it observed.
    pub revision: i64,
}

impl OutboxEntry {
    pub fn key(&self) -> DirtyKey {
        DirtyKey::new(self.entity_type, self.entity_id)
    }
}

/// Per-entity sync state shown next to items and invoices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Synced,
    Pending,
    Error,
}

impl SyncState {
    /// No entry means synced; an entry with a recorded error means error.
    pub fn from_entry(entry: Option<&OutboxEntry>) -> Self {
        match entry {
            None => SyncState::Synced,
            Some(e) if e.last_error.is_some() => SyncState::Error,
            Some(_) => SyncState::Pending,
        }
    }
}

// =============================================================================
// Dirty Set
// =============================================================================

/// One `(entity_type, entity_id)` outbox key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DirtyKey {
    pub entity_type: EntityType,
    pub entity_id: i64,
}

impl DirtyKey {
    pub const fn new(entity_type: EntityType, entity_id: i64) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }

    pub const fn product(id: i64) -> Self {
        Self::new(EntityType::Product, id)
    }

    pub const fn invoice(id: i64) -> Self {
        Self::new(EntityType::Invoice, id)
    }
}

/// Keys marked dirty inside one unit of work, handed to the push queue
/// after commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtySet(BTreeSet<DirtyKey>);

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: DirtyKey) -> bool {
        self.0.insert(key)
    }

    pub fn extend(&mut self, other: DirtySet) {
        self.0.extend(other.0);
    }

    pub fn contains(&self, key: &DirtyKey) -> bool {
        self.0.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirtyKey> {
        self.0.iter()
    }

    /// Ids of one entity type, ascending.
    pub fn ids_of(&self, entity_type: EntityType) -> Vec<i64> {
        self.0
            .iter()
            .filter(|k| k.entity_type == entity_type)
            .map(|k| k.entity_id)
            .collect()
    }
}

impl FromIterator<DirtyKey> for DirtySet {
    fn from_iter<I: IntoIterator<Item = DirtyKey>>(iter: I) -> Self {
        DirtySet(iter.into_iter().collect())
    }
}

impl IntoIterator for DirtySet {
    type Item = DirtyKey;
    type IntoIter = std::collections::btree_set::IntoIter<DirtyKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// =============================================================================
// Invoices
// =============================================================================

/// Lifecycle of a sales invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Issued,
    Cancelled,
}

impl InvoiceStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Issued => "ISSUED",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        InvoiceStatus::Issued
    }
}

/// Payment method recorded when a draft leaves it blank.
pub const DEFAULT_PAYMENT_METHOD: &str = "CASH";

/// A confirmed sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Invoice {
    pub id: i64,
    #[ts(as = "String")]
    pub issued_at: DateTime<Utc>,
    pub customer_name: Option<String>,
    pub subtotal: i64,
    pub taxes: i64,
    pub discount: i64,
    pub surcharge: i64,
    pub total: i64,
    pub payment_method: String,
    pub payment_notes: Option<String>,
    pub status: InvoiceStatus,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
}

impl Invoice {
    /// Display number, e.g. `F-00000042`.
    pub fn number(&self) -> String {
        invoice_number(self.id)
    }
}

/// Formats an invoice id as its display number.
pub fn invoice_number(id: i64) -> String {
    format!("F-{:08}", id)
}

/// One persisted invoice line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InvoiceItem {
    pub id: i64,
    pub invoice_id: i64,
    pub item_id: i64,
    pub item_name: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub line_total: i64,
}

/// A line of a draft sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceLine {
    pub item_id: i64,
    pub item_name: String,
    pub quantity: i64,
    pub unit_price: i64,
}

impl InvoiceLine {
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.unit_price).multiply_quantity(self.quantity)
    }
}

/// A sale about to be confirmed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceDraft {
    pub customer_name: Option<String>,
    pub lines: Vec<InvoiceLine>,
    pub taxes: i64,
    pub discount: i64,
    pub surcharge: i64,
    pub payment_method: Option<String>,
    pub payment_notes: Option<String>,
}

impl InvoiceDraft {
    pub fn subtotal(&self) -> Money {
        self.lines.iter().map(InvoiceLine::line_total).sum()
    }

    /// subtotal + taxes - discount + surcharge
    pub fn total(&self) -> Money {
        self.subtotal() + Money::from_cents(self.taxes) - Money::from_cents(self.discount)
            + Money::from_cents(self.surcharge)
    }

    /// Blank methods fall back to [`DEFAULT_PAYMENT_METHOD`].
    pub fn resolved_payment_method(&self) -> String {
        self.payment_method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_PAYMENT_METHOD)
            .to_string()
    }
}

/// What `confirm_invoice` hands back to the checkout screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceReceipt {
    pub invoice_id: i64,
    pub invoice_number: String,
}

/// Invoice with its lines and outbox state.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    pub sync_state: SyncState,
}

// =============================================================================
// Bulk Import
// =============================================================================

/// How an import treats quantities of items that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ImportStrategy {
    /// Add the row quantity to the current stock.
    Append,
    /// Overwrite the current stock with the row quantity.
    Replace,
}

impl ImportStrategy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ImportStrategy::Append => "append",
            ImportStrategy::Replace => "replace",
        }
    }
}

/// One parsed row of an import file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ImportRow {
    pub code: Option<String>,
    pub barcode: Option<String>,
    pub name: String,
    pub quantity: i64,
    pub price: Option<i64>,
    pub purchase_price: Option<i64>,
    pub list_price: Option<i64>,
    pub cash_price: Option<i64>,
    pub transfer_price: Option<i64>,
    pub transfer_net_price: Option<i64>,
    pub ml_price: Option<i64>,
    pub ml3c_price: Option<i64>,
    pub ml6c_price: Option<i64>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub provider_name: Option<String>,
    pub provider_sku: Option<String>,
    pub min_stock: Option<i64>,
}

impl ImportRow {
    pub fn new(name: impl Into<String>, quantity: i64) -> Self {
        Self {
            name: name.into(),
            quantity,
            ..Default::default()
        }
    }

    /// Trimmed, non-blank code.
    pub fn normalized_code(&self) -> Option<&str> {
        self.code.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    /// Trimmed, non-blank barcode.
    pub fn normalized_barcode(&self) -> Option<&str> {
        self.barcode.as_deref().map(str::trim).filter(|b| !b.is_empty())
    }
}

/// Outcome of an import or a dry run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
    /// One message per rejected row, prefixed with its file line.
    pub errors: Vec<String>,
}

/// File line of a data row: row 0 sits under the header on line 2.
pub const fn import_line_number(index: usize) -> usize {
    index + 2
}

// =============================================================================
// Tenant SKU Config
// =============================================================================

/// Locally cached tenant settings used for SKU allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct TenantSkuConfig {
    pub tenant_id: String,
    pub store_name: Option<String>,
    pub sku_prefix: String,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================
