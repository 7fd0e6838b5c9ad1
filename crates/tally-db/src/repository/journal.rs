//! # Journal Repository
//!
//! Transactions and their entries.
//!
//! A transaction is always loaded together with its entries, ordered by
//! `line_number`. Saving writes the header with a version check, then syncs
//! the entry rows to the in-memory list.

use sqlx::types::Json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::{ensure_updated, prune_children};
use tally_core::journal::{Transaction, TransactionEntry};

/// Repository for journal reads.
#[derive(Debug, Clone)]
pub struct JournalRepository {
    pool: SqlitePool,
}

impl JournalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        JournalRepository { pool }
    }

    /// Gets a transaction with its entries.
    pub async fn get(&self, id: &str) -> DbResult<Option<Transaction>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    /// Gets a transaction by its number, e.g. `JE-000007`.
    pub async fn get_by_number(&self, tenant_id: &str, number: &str) -> DbResult<Option<Transaction>> {
        let mut conn = self.pool.acquire().await?;
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM transactions WHERE tenant_id = ?1 AND transaction_number = ?2",
        )
        .bind(tenant_id)
        .bind(number)
        .fetch_optional(&mut *conn)
        .await?;

        match id {
            Some(id) => fetch(&mut conn, &id).await,
            None => Ok(None),
        }
    }

    /// Transactions touching an account, oldest first.
    pub async fn list_by_account(&self, account_id: &str) -> DbResult<Vec<Transaction>> {
        let mut conn = self.pool.acquire().await?;
        let mut transactions = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE id IN (SELECT transaction_id FROM transaction_entries WHERE account_id = ?1)
            ORDER BY transaction_date, transaction_number
            "#,
        )
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?;

        for txn in &mut transactions {
            txn.entries = fetch_entries(&mut conn, &txn.id).await?;
        }
        Ok(transactions)
    }

    /// Transactions generated by a business document (sale, receipt, ...).
    pub async fn list_by_reference(&self, reference_type: &str, reference_id: &str) -> DbResult<Vec<Transaction>> {
        let mut conn = self.pool.acquire().await?;
        let mut transactions = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE reference_type = ?1 AND reference_id = ?2
            ORDER BY created_at, transaction_number
            "#,
        )
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&mut *conn)
        .await?;

        for txn in &mut transactions {
            txn.entries = fetch_entries(&mut conn, &txn.id).await?;
        }
        Ok(transactions)
    }
}

// =============================================================================
// Connection-level operations
// =============================================================================

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Transaction>> {
    let txn = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match txn {
        Some(mut txn) => {
            txn.entries = fetch_entries(conn, id).await?;
            Ok(Some(txn))
        }
        None => Ok(None),
    }
}

async fn fetch_entries(conn: &mut SqliteConnection, transaction_id: &str) -> DbResult<Vec<TransactionEntry>> {
    let entries = sqlx::query_as::<_, TransactionEntry>(
        "SELECT * FROM transaction_entries WHERE transaction_id = ?1 ORDER BY line_number",
    )
    .bind(transaction_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(entries)
}

pub(crate) async fn insert(conn: &mut SqliteConnection, txn: &Transaction) -> DbResult<()> {
    debug!(id = %txn.id, number = %txn.transaction_number, "Inserting transaction");

    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, tenant_id, transaction_number, transaction_type, transaction_date,
            description, notes, reference_type, reference_id, reference_number,
            status, total_debit, total_credit, is_reconciled,
            posted_by, posted_at, reverses_transaction_id, reversed_by_transaction_id,
            reversal_reason, metadata, created_at, updated_at, version
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14,
            ?15, ?16, ?17, ?18,
            ?19, ?20, ?21, ?22, ?23
        )
        "#,
    )
    .bind(&txn.id)
    .bind(&txn.tenant_id)
    .bind(&txn.transaction_number)
    .bind(txn.transaction_type)
    .bind(txn.transaction_date)
    .bind(&txn.description)
    .bind(&txn.notes)
    .bind(&txn.reference_type)
    .bind(&txn.reference_id)
    .bind(&txn.reference_number)
    .bind(txn.status)
    .bind(txn.total_debit)
    .bind(txn.total_credit)
    .bind(txn.is_reconciled)
    .bind(&txn.posted_by)
    .bind(txn.posted_at)
    .bind(&txn.reverses_transaction_id)
    .bind(&txn.reversed_by_transaction_id)
    .bind(&txn.reversal_reason)
    .bind(Json(&txn.metadata))
    .bind(txn.created_at)
    .bind(txn.updated_at)
    .bind(txn.version)
    .execute(&mut *conn)
    .await?;

    save_entries(conn, txn).await
}

/// Versioned header update plus entry sync.
pub(crate) async fn update(conn: &mut SqliteConnection, txn: &mut Transaction) -> DbResult<()> {
    debug!(id = %txn.id, status = %txn.status, "Updating transaction");

    let result = sqlx::query(
        r#"
        UPDATE transactions SET
            transaction_date = ?1,
            description = ?2,
            notes = ?3,
            status = ?4,
            total_debit = ?5,
            total_credit = ?6,
            is_reconciled = ?7,
            posted_by = ?8,
            posted_at = ?9,
            reversed_by_transaction_id = ?10,
            reversal_reason = ?11,
            metadata = ?12,
            updated_at = ?13,
            version = version + 1
        WHERE id = ?14 AND version = ?15
        "#,
    )
    .bind(txn.transaction_date)
    .bind(&txn.description)
    .bind(&txn.notes)
    .bind(txn.status)
    .bind(txn.total_debit)
    .bind(txn.total_credit)
    .bind(txn.is_reconciled)
    .bind(&txn.posted_by)
    .bind(txn.posted_at)
    .bind(&txn.reversed_by_transaction_id)
    .bind(&txn.reversal_reason)
    .bind(Json(&txn.metadata))
    .bind(txn.updated_at)
    .bind(&txn.id)
    .bind(txn.version)
    .execute(&mut *conn)
    .await?;

    ensure_updated(result, "Transaction", &txn.id)?;
    txn.version += 1;

    save_entries(conn, txn).await
}

async fn save_entries(conn: &mut SqliteConnection, txn: &Transaction) -> DbResult<()> {
    prune_children(
        conn,
        "transaction_entries",
        "transaction_id",
        &txn.id,
        txn.entries.iter().map(|e| e.id.as_str()),
    )
    .await?;

    for entry in &txn.entries {
        sqlx::query(
            r#"
            INSERT INTO transaction_entries (
                id, transaction_id, account_id, line_number, debit, credit,
                description, is_reconciled, reconciled_at, reconciled_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (id) DO UPDATE SET
                description = excluded.description,
                is_reconciled = excluded.is_reconciled,
                reconciled_at = excluded.reconciled_at,
                reconciled_by = excluded.reconciled_by
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.transaction_id)
        .bind(&entry.account_id)
        .bind(entry.line_number)
        .bind(entry.debit)
        .bind(entry.credit)
        .bind(&entry.description)
        .bind(entry.is_reconciled)
        .bind(entry.reconciled_at)
        .bind(&entry.reconciled_by)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
