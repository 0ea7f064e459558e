//! # Remote Document Shapes
//!
//! Mapping between local records and the camelCase documents kept in the
//! remote store. Amounts are integer cents. Fields the remote carries but
//! this engine does not model (images, brand, sizes...) are ignored on read
//! and left untouched by merge writes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stockyard_core::{CatalogItem, Invoice, InvoiceItem, InvoiceStatus};
use stockyard_db::repository::catalog::normalize_identifiers;

use crate::error::{SyncError, SyncResult};
use crate::remote::Document;

// =============================================================================
// Conversions
// =============================================================================

/// Serializes `value` into a document body.
pub fn to_document<T: Serialize>(value: &T) -> SyncResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::SerializationFailed(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Reads a document body into `T`, naming the document on failure.
pub fn from_document<T: DeserializeOwned>(path: &str, doc: Document) -> SyncResult<T> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| SyncError::InvalidDocument {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Accepts RFC 3339 timestamps and bare `yyyy-MM-dd` dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

// =============================================================================
// Product Document
// =============================================================================

/// `tenants/{tenant}/products/{id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDocument {
    #[serde(default)]
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub purchase_price: Option<i64>,
    #[serde(default)]
    pub list_price: Option<i64>,
    #[serde(default)]
    pub cash_price: Option<i64>,
    #[serde(default)]
    pub transfer_price: Option<i64>,
    #[serde(default)]
    pub transfer_net_price: Option<i64>,
    #[serde(default)]
    pub ml_price: Option<i64>,
    #[serde(default)]
    pub ml3c_price: Option<i64>,
    #[serde(default)]
    pub ml6c_price: Option<i64>,
    #[serde(default)]
    pub auto_pricing: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub provider_sku: Option<String>,
    #[serde(default)]
    pub min_stock: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<String>,
    /// Device that wrote the document last.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl ItemDocument {
    pub fn from_item(item: &CatalogItem, tenant_id: &str, device_id: &str) -> Self {
        ItemDocument {
            id: item.id,
            tenant_id: Some(tenant_id.to_string()),
            code: item.code.clone(),
            barcode: item.barcode.clone(),
            name: item.name.clone(),
            quantity: item.quantity,
            price: item.price,
            purchase_price: item.purchase_price,
            list_price: item.list_price,
            cash_price: item.cash_price,
            transfer_price: item.transfer_price,
            transfer_net_price: item.transfer_net_price,
            ml_price: item.ml_price,
            ml3c_price: item.ml3c_price,
            ml6c_price: item.ml6c_price,
            auto_pricing: item.auto_pricing,
            description: item.description.clone(),
            category: item.category.clone(),
            provider_name: item.provider_name.clone(),
            provider_sku: item.provider_sku.clone(),
            min_stock: item.min_stock,
            updated_at: Some(item.updated_at.to_rfc3339()),
            device_id: Some(device_id.to_string()),
        }
    }

    /// Builds the local view of a remote document.
    ///
    /// A numeric document id becomes the item id; anything else yields id
    /// 0 and the item is inserted under a fresh local id. Negative
    /// quantities are floored at zero and a missing `updatedAt` reads as
    /// `now`. Code and barcode are trimmed, blanks become `None`.
    ///
    /// ## Errors
    /// `InvalidDocument` when `updatedAt` is present but unreadable.
    pub fn into_item(self, path: &str, doc_id: &str, now: DateTime<Utc>) -> SyncResult<CatalogItem> {
        let updated_at = match self.updated_at.as_deref() {
            None => now,
            Some(raw) => parse_timestamp(raw).ok_or_else(|| SyncError::InvalidDocument {
                path: path.to_string(),
                reason: format!("unreadable updatedAt '{}'", raw),
            })?,
        };

        Ok(normalize_identifiers(CatalogItem {
            id: doc_id.parse::<i64>().ok().filter(|id| *id > 0).unwrap_or(0),
            code: self.code,
            barcode: self.barcode,
            name: self.name,
            quantity: self.quantity.max(0),
            price: self.price,
            purchase_price: self.purchase_price,
            list_price: self.list_price,
            cash_price: self.cash_price,
            transfer_price: self.transfer_price,
            transfer_net_price: self.transfer_net_price,
            ml_price: self.ml_price,
            ml3c_price: self.ml3c_price,
            ml6c_price: self.ml6c_price,
            auto_pricing: self.auto_pricing,
            description: self.description,
            category: self.category,
            provider_name: self.provider_name,
            provider_sku: self.provider_sku,
            min_stock: self.min_stock,
            updated_at,
        }))
    }
}

// =============================================================================
// Deletion Tombstone
// =============================================================================

/// `tenants/{tenant}/product_deletions/{id}`: keeps other devices from
/// resurrecting a deleted item on their next pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionTombstone {
    pub product_id: i64,
    pub deleted_at_epoch_ms: i64,
    #[serde(default)]
    pub purge_backup: bool,
}

impl DeletionTombstone {
    pub fn new(product_id: i64, deleted_at: DateTime<Utc>) -> Self {
        DeletionTombstone {
            product_id,
            deleted_at_epoch_ms: deleted_at.timestamp_millis(),
            purge_backup: true,
        }
    }
}

// =============================================================================
// Invoice Document
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLineDocument {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub line_total: i64,
}

/// `tenants/{tenant}/invoices/{id}`, lines embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDocument {
    pub id: i64,
    pub tenant_id: String,
    pub number: String,
    pub issued_at: String,
    pub customer_name: Option<String>,
    pub subtotal: i64,
    pub taxes: i64,
    pub discount: i64,
    pub surcharge: i64,
    pub total: i64,
    pub payment_method: String,
    pub payment_notes: Option<String>,
    pub status: InvoiceStatus,
    pub cancelled_at: Option<String>,
    pub cancel_reason: Option<String>,
    pub items: Vec<InvoiceLineDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl InvoiceDocument {
    pub fn from_invoice(
        invoice: &Invoice,
        items: &[InvoiceItem],
        tenant_id: &str,
        device_id: &str,
    ) -> Self {
        InvoiceDocument {
            id: invoice.id,
            tenant_id: tenant_id.to_string(),
            number: invoice.number(),
            issued_at: invoice.issued_at.to_rfc3339(),
            customer_name: invoice.customer_name.clone(),
            subtotal: invoice.subtotal,
            taxes: invoice.taxes,
            discount: invoice.discount,
            surcharge: invoice.surcharge,
            total: invoice.total,
            payment_method: invoice.payment_method.clone(),
            payment_notes: invoice.payment_notes.clone(),
            status: invoice.status,
            cancelled_at: invoice.cancelled_at.map(|t| t.to_rfc3339()),
            cancel_reason: invoice.cancel_reason.clone(),
            items: items
                .iter()
                .map(|line| InvoiceLineDocument {
                    product_id: line.item_id,
                    product_name: line.item_name.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    line_total: line.line_total,
                })
                .collect(),
            device_id: Some(device_id.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_item_document_uses_camel_case() {
        let mut item = CatalogItem::new("Cola 1L")
            .with_code("ABC000001")
            .with_quantity(4)
            .with_purchase_price(1_000);
        item.id = 12;
        item.ml3c_price = Some(1_900);

        let doc = to_document(&ItemDocument::from_item(&item, "t1", "dev-1")).unwrap();
        assert_eq!(doc["purchasePrice"], json!(1_000));
        assert_eq!(doc["ml3cPrice"], json!(1_900));
        assert_eq!(doc["tenantId"], json!("t1"));
        assert!(doc.contains_key("updatedAt"));
        assert!(!doc.contains_key("purchase_price"));
    }

    #[test]
    fn test_into_item_reads_legacy_documents() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let raw = json!({
            "name": "Yerba 1kg",
            "code": "ABC000002",
            "quantity": -3,
            "updatedAt": "2024-05-30",
            "imageUrls": ["a.png"]
        });
        let Value::Object(body) = raw else { unreachable!() };

        let doc: ItemDocument = from_document("tenants/t1/products/44", body).unwrap();
        let item = doc.into_item("tenants/t1/products/44", "44", now).unwrap();

        assert_eq!(item.id, 44);
        assert_eq!(item.quantity, 0);
        assert_eq!(item.updated_at, Utc.with_ymd_and_hms(2024, 5, 30, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_into_item_edge_cases() {
        let now = Utc::now();

        let doc = ItemDocument {
            name: "No clock".into(),
            ..Default::default()
        };
        let item = doc.into_item("p", "not-a-number", now).unwrap();
        assert_eq!(item.id, 0);
        assert_eq!(item.updated_at, now);

        let doc = ItemDocument {
            updated_at: Some("yesterday".into()),
            ..Default::default()
        };
        assert!(matches!(
            doc.into_item("p", "1", now),
            Err(SyncError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn test_into_item_normalizes_identifiers() {
        let doc = ItemDocument {
            code: Some("".into()),
            barcode: Some("  779123 ".into()),
            name: "Padded".into(),
            ..Default::default()
        };
        let item = doc.into_item("p", "3", Utc::now()).unwrap();
        assert_eq!(item.code, None);
        assert_eq!(item.barcode.as_deref(), Some("779123"));

        let doc = ItemDocument {
            code: Some("   ".into()),
            barcode: Some("".into()),
            ..Default::default()
        };
        let item = doc.into_item("p", "4", Utc::now()).unwrap();
        assert_eq!((item.code, item.barcode), (None, None));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let ts = parse_timestamp("2024-05-01T10:30:00-03:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 5, 1, 13, 30, 0).unwrap());
        assert!(parse_timestamp("01/05/2024").is_none());
    }
}
