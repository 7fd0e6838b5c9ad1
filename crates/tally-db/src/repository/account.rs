//! # Account Repository
//!
//! Chart of accounts persistence and balance queries.
//!
//! ## Stored vs Recomputed Balance
//! ```text
//! accounts.current_balance     maintained by posting, read in O(1)
//!
//! opening_balance
//!   + Σ balance_effect(entry)  over entries of posted/reversed transactions
//!   = recomputed_balance       must equal current_balance
//! ```
//!
//! Reversed transactions stay in the sum: their reversal is itself a posted
//! transaction carrying the opposite amounts.

use chrono::NaiveDate;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::ensure_updated;
use tally_core::accounts::{Account, ChartOfAccounts, PostedAmount};
use tally_core::Money;

/// Repository for account reads.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pool: SqlitePool,
}

impl AccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AccountRepository { pool }
    }

    /// Gets an account by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<Account>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    /// Gets an account by its business number.
    pub async fn get_by_number(&self, tenant_id: &str, number: &str) -> DbResult<Option<Account>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_number(&mut conn, tenant_id, number).await
    }

    /// Lists the tenant's accounts that are not soft-deleted, by number.
    pub async fn list(&self, tenant_id: &str) -> DbResult<Vec<Account>> {
        let accounts = sqlx::query_as::<_, Account>(
            r#"
            SELECT * FROM accounts
            WHERE tenant_id = ?1 AND is_deleted = 0
            ORDER BY account_number
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }

    /// Loads the whole chart for hierarchy queries.
    pub async fn chart(&self, tenant_id: &str) -> DbResult<ChartOfAccounts> {
        Ok(ChartOfAccounts::from_accounts(self.list(tenant_id).await?))
    }

    /// Balance as of the end of `as_of`, from posted lines.
    pub async fn balance_as_of(&self, id: &str, as_of: NaiveDate) -> DbResult<Money> {
        let mut conn = self.pool.acquire().await?;
        let account = fetch(&mut conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Account", id))?;
        let lines = posted_amounts(&mut conn, id).await?;

        Ok(account.balance_from_lines(&lines, Some(as_of)))
    }

    /// Balance rebuilt from every posted line, for checking `current_balance`.
    pub async fn recomputed_balance(&self, id: &str) -> DbResult<Money> {
        let mut conn = self.pool.acquire().await?;
        let account = fetch(&mut conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Account", id))?;
        let lines = posted_amounts(&mut conn, id).await?;

        Ok(account.balance_from_lines(&lines, None))
    }
}

// =============================================================================
// Connection-level operations
// =============================================================================

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Account>> {
    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(account)
}

pub(crate) async fn fetch_by_number(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    number: &str,
) -> DbResult<Option<Account>> {
    let account = sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts WHERE tenant_id = ?1 AND account_number = ?2",
    )
    .bind(tenant_id)
    .bind(number)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(account)
}

/// Loads the given accounts into a chart. Missing ids are simply absent.
pub(crate) async fn fetch_chart<'a>(
    conn: &mut SqliteConnection,
    ids: impl IntoIterator<Item = &'a String>,
) -> DbResult<ChartOfAccounts> {
    let mut chart = ChartOfAccounts::new();
    for id in ids {
        if let Some(account) = fetch(conn, id).await? {
            chart.insert(account);
        }
    }
    Ok(chart)
}

/// Loads the tenant's full chart, soft-deleted accounts included.
pub(crate) async fn fetch_tenant_chart(conn: &mut SqliteConnection, tenant_id: &str) -> DbResult<ChartOfAccounts> {
    let accounts = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE tenant_id = ?1")
        .bind(tenant_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(ChartOfAccounts::from_accounts(accounts))
}

pub(crate) async fn insert(conn: &mut SqliteConnection, account: &Account) -> DbResult<()> {
    debug!(id = %account.id, number = %account.account_number, "Inserting account");

    sqlx::query(
        r#"
        INSERT INTO accounts (
            id, tenant_id, account_number, account_name, account_type,
            account_subtype, description, parent_account_id,
            current_balance, opening_balance,
            is_system_account, is_header_account, allow_manual_entries,
            is_active, is_deleted, created_at, updated_at, version
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8,
            ?9, ?10,
            ?11, ?12, ?13,
            ?14, ?15, ?16, ?17, ?18
        )
        "#,
    )
    .bind(&account.id)
    .bind(&account.tenant_id)
    .bind(&account.account_number)
    .bind(&account.account_name)
    .bind(account.account_type)
    .bind(account.account_subtype)
    .bind(&account.description)
    .bind(&account.parent_account_id)
    .bind(account.current_balance)
    .bind(account.opening_balance)
    .bind(account.is_system_account)
    .bind(account.is_header_account)
    .bind(account.allow_manual_entries)
    .bind(account.is_active)
    .bind(account.is_deleted)
    .bind(account.created_at)
    .bind(account.updated_at)
    .bind(account.version)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Versioned update of every mutable column.
pub(crate) async fn update(conn: &mut SqliteConnection, account: &mut Account) -> DbResult<()> {
    debug!(id = %account.id, balance = %account.current_balance, "Updating account");

    let result = sqlx::query(
        r#"
        UPDATE accounts SET
            account_name = ?1,
            account_subtype = ?2,
            description = ?3,
            parent_account_id = ?4,
            current_balance = ?5,
            is_header_account = ?6,
            allow_manual_entries = ?7,
            is_active = ?8,
            is_deleted = ?9,
            updated_at = ?10,
            version = version + 1
        WHERE id = ?11 AND version = ?12
        "#,
    )
    .bind(&account.account_name)
    .bind(account.account_subtype)
    .bind(&account.description)
    .bind(&account.parent_account_id)
    .bind(account.current_balance)
    .bind(account.is_header_account)
    .bind(account.allow_manual_entries)
    .bind(account.is_active)
    .bind(account.is_deleted)
    .bind(account.updated_at)
    .bind(&account.id)
    .bind(account.version)
    .execute(&mut *conn)
    .await?;

    ensure_updated(result, "Account", &account.id)?;
    account.version += 1;
    Ok(())
}

/// Whether any journal line (draft or not) points at the account.
pub(crate) async fn has_entries(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM transaction_entries WHERE account_id = ?1 LIMIT 1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(found.is_some())
}

async fn posted_amounts(conn: &mut SqliteConnection, id: &str) -> DbResult<Vec<PostedAmount>> {
    let lines = sqlx::query_as::<_, PostedAmount>(
        r#"
        SELECT t.transaction_date, e.debit, e.credit
        FROM transaction_entries e
        JOIN transactions t ON t.id = e.transaction_id
        WHERE e.account_id = ?1 AND t.status IN ('posted', 'reversed')
        ORDER BY t.transaction_date, e.line_number
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Utc;
    use tally_core::accounts::AccountType;

    #[tokio::test]
    async fn test_insert_and_versioned_update() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        let mut account = Account::new("t1", "1000", "Cash", AccountType::Asset, Utc::now());
        insert(&mut conn, &account).await.unwrap();

        let mut stale = account.clone();
        account.account_name = "Cash on Hand".into();
        update(&mut conn, &mut account).await.unwrap();
        assert_eq!(account.version, 1);

        stale.account_name = "Petty Cash".into();
        let err = update(&mut conn, &mut stale).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict { entity: "Account", .. }));

        let loaded = fetch_by_number(&mut conn, "t1", "1000").await.unwrap().unwrap();
        assert_eq!(loaded.account_name, "Cash on Hand");
        assert!(!has_entries(&mut conn, &loaded.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_number_is_unique_violation() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        let first = Account::new("t1", "1000", "Cash", AccountType::Asset, Utc::now());
        let second = Account::new("t1", "1000", "Also Cash", AccountType::Asset, Utc::now());
        insert(&mut conn, &first).await.unwrap();

        let err = insert(&mut conn, &second).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }
}
