//! # Document Numbers
//!
//! Per-tenant counters for human-facing document numbers. A number is
//! claimed inside the operation's transaction, so a rolled-back operation
//! never uses one up.
//!
//! ```text
//! JE-000001   journal transaction
//! SAL-000001  sale
//! PO-000001   purchase order
//! GR-000001   goods receipt
//! ADJ-000001  stock adjustment
//! TRF-000001  store-to-store transfer
//! INV-000001  customer invoice
//! ```
//!
//! The counter is bumped inside the caller's database transaction, so a
//! rolled-back operation gives its number back.

use sqlx::SqliteConnection;

use crate::error::DbResult;

/// Document number prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Journal,
    Sale,
    PurchaseOrder,
    GoodsReceipt,
    Adjustment,
    Transfer,
    Invoice,
}

impl DocumentKind {
    pub const fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Journal => "JE",
            DocumentKind::Sale => "SAL",
            DocumentKind::PurchaseOrder => "PO",
            DocumentKind::GoodsReceipt => "GR",
            DocumentKind::Adjustment => "ADJ",
            DocumentKind::Transfer => "TRF",
            DocumentKind::Invoice => "INV",
        }
    }
}

/// Claims the next number for `kind`, e.g. `SAL-000042`.
pub async fn next_number(conn: &mut SqliteConnection, tenant_id: &str, kind: DocumentKind) -> DbResult<String> {
    let value: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO document_sequences (tenant_id, prefix, next_value)
        VALUES (?, ?, 1)
        ON CONFLICT (tenant_id, prefix) DO UPDATE SET next_value = next_value + 1
        RETURNING next_value
        "#,
    )
    .bind(tenant_id)
    .bind(kind.prefix())
    .fetch_one(&mut *conn)
    .await?;

    Ok(format!("{}-{:06}", kind.prefix(), value))
}
