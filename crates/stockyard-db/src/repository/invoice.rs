//! # Invoice Repository
//!
//! Sales invoices and their lines.
//!
//! ## Invoice Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Invoice Lifecycle                                 │
//! │                                                                         │
//! │  confirm_invoice(draft)                                                 │
//! │     ├── INSERT invoices + invoice_items                                 │
//! │     ├── per line: decrement if enough   (else whole sale rolls back)    │
//! │     ├── per line: SALE movement  -qty                                   │
//! │     └── mark INVOICE + touched PRODUCTs dirty                           │
//! │            │                                                            │
//! │            ▼                                                            │
//! │        ISSUED ──── cancel_invoice(id, reason) ────► CANCELLED           │
//! │                    ├── per line: stock back                             │
//! │                    ├── per line: SALE_CANCEL movement  +qty             │
//! │                    └── mark INVOICE + touched PRODUCTs dirty            │
//! │                                                                         │
//! │  CANCELLED is terminal; cancelling again is InvalidState.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::{SqliteConnection, SqlitePool};
use stockyard_core::validation::{validate_cancel_reason, validate_invoice_draft};
use stockyard_core::{
    invoice_number, CoreError, EntityType, Invoice, InvoiceDetail, InvoiceDraft, InvoiceItem,
    InvoiceReceipt, InvoiceStatus, MovementReason, SyncState,
};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::{catalog, outbox};
use crate::unit_of_work::{Committed, UnitOfWork};

const INVOICE_COLUMNS: &str = "id, issued_at, customer_name, subtotal, taxes, discount, \
     surcharge, total, payment_method, payment_notes, status, cancelled_at, cancel_reason";

/// Repository for invoice database operations.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    /// Creates a new InvoiceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceRepository { pool }
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<Invoice>> {
        let mut conn = self.pool.acquire().await?;
        fetch_invoice(&mut conn, id).await
    }

    /// Lines of an invoice in entry order.
    pub async fn items(&self, invoice_id: i64) -> DbResult<Vec<InvoiceItem>> {
        let mut conn = self.pool.acquire().await?;
        fetch_items(&mut conn, invoice_id).await
    }

    /// Invoice, lines and outbox state in one read.
    pub async fn detail(&self, id: i64) -> DbResult<Option<InvoiceDetail>> {
        let mut conn = self.pool.acquire().await?;
        let Some(invoice) = fetch_invoice(&mut conn, id).await? else {
            return Ok(None);
        };
        let items = fetch_items(&mut conn, id).await?;
        let entry = outbox::fetch_entry(&mut conn, EntityType::Invoice, id).await?;

        Ok(Some(InvoiceDetail {
            invoice,
            items,
            sync_state: SyncState::from_entry(entry.as_ref()),
        }))
    }

    /// Most recent invoices, newest first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<Invoice>> {
        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices ORDER BY id DESC LIMIT ?1",
            INVOICE_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(invoices)
    }

    /// Records a sale and takes its stock.
    ///
    /// ## Returns
    /// * `Ok` - Receipt with the new id and display number
    /// * `Err(InsufficientStock | NotFound)` - A line could not be served;
    ///   nothing was written
    pub async fn confirm_invoice(&self, draft: &InvoiceDraft) -> DbResult<Committed<InvoiceReceipt>> {
        validate_invoice_draft(draft)?;

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let now = uow.now();
        let subtotal = draft.subtotal().cents();
        let total = draft.total().cents();

        let invoice_id = sqlx::query(
            r#"
            INSERT INTO invoices (
                issued_at, customer_name, subtotal, taxes, discount, surcharge,
                total, payment_method, payment_notes, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(now)
        .bind(draft.customer_name.as_deref())
        .bind(subtotal)
        .bind(draft.taxes)
        .bind(draft.discount)
        .bind(draft.surcharge)
        .bind(total)
        .bind(draft.resolved_payment_method())
        .bind(draft.payment_notes.as_deref())
        .bind(InvoiceStatus::Issued)
        .execute(&mut *uow.conn())
        .await?
        .last_insert_rowid();

        for line in &draft.lines {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (invoice_id, item_id, item_name, quantity, unit_price, line_total)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(invoice_id)
            .bind(line.item_id)
            .bind(&line.item_name)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.line_total().cents())
            .execute(&mut *uow.conn())
            .await?;

            catalog::decrement_if_enough(uow.conn(), line.item_id, line.quantity, now).await?;
            uow.record_movement(line.item_id, -line.quantity, MovementReason::Sale, None)
                .await?;
            uow.mark_dirty(EntityType::Product, line.item_id).await?;
        }
        uow.mark_dirty(EntityType::Invoice, invoice_id).await?;

        let receipt = InvoiceReceipt {
            invoice_id,
            invoice_number: invoice_number(invoice_id),
        };
        info!(
            invoice = %receipt.invoice_number,
            lines = draft.lines.len(),
            total,
            "Invoice confirmed"
        );
        uow.commit(receipt).await
    }

    /// Cancels an issued invoice and returns its stock.
    pub async fn cancel_invoice(&self, id: i64, reason: &str) -> DbResult<Committed<Invoice>> {
        let reason = reason.trim();
        validate_cancel_reason(reason)?;

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let now = uow.now();
        let mut invoice = fetch_invoice(uow.conn(), id)
            .await?
            .ok_or_else(|| DbError::not_found("Invoice", id))?;

        if invoice.status != InvoiceStatus::Issued {
            return Err(CoreError::InvalidState {
                entity: "Invoice",
                id,
                state: invoice.status.as_str().to_string(),
                operation: "cancel",
            }
            .into());
        }

        sqlx::query(
            "UPDATE invoices SET status = ?2, cancelled_at = ?3, cancel_reason = ?4 WHERE id = ?1",
        )
        .bind(id)
        .bind(InvoiceStatus::Cancelled)
        .bind(now)
        .bind(reason)
        .execute(&mut *uow.conn())
        .await?;

        let items = fetch_items(uow.conn(), id).await?;
        for line in &items {
            catalog::increment(uow.conn(), line.item_id, line.quantity, now).await?;
            uow.record_movement(line.item_id, line.quantity, MovementReason::SaleCancel, None)
                .await?;
            uow.mark_dirty(EntityType::Product, line.item_id).await?;
        }
        uow.mark_dirty(EntityType::Invoice, id).await?;

        invoice.status = InvoiceStatus::Cancelled;
        invoice.cancelled_at = Some(now);
        invoice.cancel_reason = Some(reason.to_string());

        debug!(id, lines = items.len(), "Invoice cancelled");
        uow.commit(invoice).await
    }
}

// =============================================================================
// Row Helpers
// =============================================================================

pub async fn fetch_invoice(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Invoice>> {
    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {} FROM invoices WHERE id = ?1",
        INVOICE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(invoice)
}

pub async fn fetch_items(conn: &mut SqliteConnection, invoice_id: i64) -> DbResult<Vec<InvoiceItem>> {
    let items = sqlx::query_as::<_, InvoiceItem>(
        r#"
        SELECT id, invoice_id, item_id, item_name, quantity, unit_price, line_total
        FROM invoice_items
        WHERE invoice_id = ?1
        ORDER BY id
        "#,
    )
    .bind(invoice_id)
    .fetch_all(conn)
    .await?;
    Ok(items)
}

// =============================================================================
// Unit Tests
// =============================================================================
