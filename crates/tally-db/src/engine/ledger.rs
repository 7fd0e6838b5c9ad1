//! # Ledger Operations
//!
//! Chart-of-accounts setup and the manual journal lifecycle.
//!
//! ```text
//! open_transaction ──► add_entry* ──► post_transaction ──► reverse_transaction
//!      (draft)          (draft)          (posted)              (reversed)
//!                                           │
//!                                           └──► reconcile_transaction / reconcile_entry
//! ```
//!
//! Posting and reversal move account balances in the same database
//! transaction that writes the journal rows.

use chrono::NaiveDate;
use tracing::info;

use super::{Engine, Posting, Reversal};
use crate::error::{DbError, DbResult};
use crate::repository::account;
use crate::repository::journal;
use crate::repository::sequence::DocumentKind;
use tally_core::accounts::Account;
use tally_core::journal::{Transaction, TransactionType};
use tally_core::{AuditStamp, CoreError, DocumentRef, Money};

impl Engine {
    // =========================================================================
    // Accounts
    // =========================================================================

    /// Adds an account to the chart. A parent must exist and share its type.
    pub async fn create_account(&self, account: Account) -> DbResult<Account> {
        self.with_retry("create_account", || self.create_account_once(account.clone()))
            .await
    }

    async fn create_account_once(&self, mut account: Account) -> DbResult<Account> {
        account.validate()?;
        account.tenant_id = self.tenant_id.clone();

        let mut tx = self.db.pool().begin().await?;

        if let Some(parent_id) = account.parent_account_id.clone() {
            let mut chart = account::fetch_tenant_chart(&mut *tx, &self.tenant_id).await?;
            chart.insert(account.clone());
            chart.validate_parent(&account.id, &parent_id)?;
        }

        account::insert(&mut *tx, &account).await?;
        tx.commit().await?;

        info!(id = %account.id, number = %account.account_number, kind = %account.account_type, "Account created");
        Ok(account)
    }

    /// Soft-deletes an account that was never posted to and has no children.
    pub async fn delete_account(&self, account_id: &str, stamp: &AuditStamp) -> DbResult<Account> {
        self.with_retry("delete_account", || self.delete_account_once(account_id, stamp))
            .await
    }

    async fn delete_account_once(&self, account_id: &str, stamp: &AuditStamp) -> DbResult<Account> {
        let mut tx = self.db.pool().begin().await?;

        let mut chart = account::fetch_tenant_chart(&mut *tx, &self.tenant_id).await?;
        if !chart.contains(account_id) {
            return Err(CoreError::AccountNotFound(account_id.to_string()).into());
        }
        let has_entries = account::has_entries(&mut *tx, account_id).await?;
        chart.soft_delete(account_id, has_entries, stamp.at)?;

        let deleted = chart
            .get_mut(account_id)
            .ok_or_else(|| CoreError::AccountNotFound(account_id.to_string()))?;
        account::update(&mut *tx, deleted).await?;
        let deleted = deleted.clone();
        tx.commit().await?;

        info!(id = %account_id, actor = %stamp.actor, "Account deleted");
        Ok(deleted)
    }

    // =========================================================================
    // Journal
    // =========================================================================

    /// Opens an empty draft with the next `JE-` number.
    pub async fn open_transaction(
        &self,
        transaction_type: TransactionType,
        date: NaiveDate,
        description: &str,
        reference: Option<&DocumentRef>,
        stamp: &AuditStamp,
    ) -> DbResult<Transaction> {
        self.with_retry("open_transaction", || {
            self.open_transaction_once(transaction_type, date, description, reference, stamp)
        })
        .await
    }

    async fn open_transaction_once(
        &self,
        transaction_type: TransactionType,
        date: NaiveDate,
        description: &str,
        reference: Option<&DocumentRef>,
        stamp: &AuditStamp,
    ) -> DbResult<Transaction> {
        let mut tx = self.db.pool().begin().await?;

        let number = self.next_number(&mut *tx, DocumentKind::Journal).await?;
        let mut txn = Transaction::open(&self.tenant_id, number, transaction_type, date, description, stamp.at);
        if let Some(reference) = reference {
            txn = txn.with_reference(reference);
        }

        journal::insert(&mut *tx, &txn).await?;
        tx.commit().await?;

        info!(id = %txn.id, number = %txn.transaction_number, kind = %transaction_type, "Journal draft opened");
        Ok(txn)
    }

    /// Appends a line to a draft. The account must exist.
    pub async fn add_entry(
        &self,
        transaction_id: &str,
        account_id: &str,
        debit: Money,
        credit: Money,
        description: Option<&str>,
        stamp: &AuditStamp,
    ) -> DbResult<Transaction> {
        self.with_retry("add_entry", || {
            self.add_entry_once(transaction_id, account_id, debit, credit, description, stamp)
        })
        .await
    }

    async fn add_entry_once(
        &self,
        transaction_id: &str,
        account_id: &str,
        debit: Money,
        credit: Money,
        description: Option<&str>,
        stamp: &AuditStamp,
    ) -> DbResult<Transaction> {
        let mut tx = self.db.pool().begin().await?;

        let mut txn = self.load_transaction(&mut *tx, transaction_id).await?;
        if account::fetch(&mut *tx, account_id).await?.is_none() {
            return Err(CoreError::AccountNotFound(account_id.to_string()).into());
        }

        txn.add_entry(account_id, debit, credit, description.map(str::to_string))?;
        txn.updated_at = stamp.at;

        journal::update(&mut *tx, &mut txn).await?;
        tx.commit().await?;
        Ok(txn)
    }

    /// Posts a balanced draft and moves every account it touches.
    pub async fn post_transaction(&self, transaction_id: &str, stamp: &AuditStamp) -> DbResult<Posting> {
        self.with_retry("post_transaction", || self.post_transaction_once(transaction_id, stamp))
            .await
    }

    async fn post_transaction_once(&self, transaction_id: &str, stamp: &AuditStamp) -> DbResult<Posting> {
        let mut tx = self.db.pool().begin().await?;

        let mut txn = self.load_transaction(&mut *tx, transaction_id).await?;
        let changes = self.apply_posting(&mut *tx, &mut txn, stamp).await?;
        journal::update(&mut *tx, &mut txn).await?;
        tx.commit().await?;

        info!(
            id = %txn.id,
            number = %txn.transaction_number,
            total = %txn.total_debit,
            accounts = changes.len(),
            "Transaction posted"
        );
        Ok(Posting {
            transaction: txn,
            changes,
        })
    }

    /// Posts a mirror of a posted transaction and marks the original reversed.
    pub async fn reverse_transaction(
        &self,
        transaction_id: &str,
        reason: &str,
        stamp: &AuditStamp,
    ) -> DbResult<Reversal> {
        self.with_retry("reverse_transaction", || {
            self.reverse_transaction_once(transaction_id, reason, stamp)
        })
        .await
    }

    async fn reverse_transaction_once(
        &self,
        transaction_id: &str,
        reason: &str,
        stamp: &AuditStamp,
    ) -> DbResult<Reversal> {
        let mut tx = self.db.pool().begin().await?;

        let mut original = self.load_transaction(&mut *tx, transaction_id).await?;
        let number = self.next_number(&mut *tx, DocumentKind::Journal).await?;

        let mut chart = account::fetch_chart(&mut *tx, &original.account_ids()).await?;
        let (reversal, changes) = original.reverse(number, reason, &mut chart, stamp)?;

        for change in &changes {
            let acct = chart
                .get_mut(&change.account_id)
                .ok_or_else(|| DbError::Internal(format!("reversed account {} not loaded", change.account_id)))?;
            account::update(&mut *tx, acct).await?;
        }

        // the original's reversed_by column references the reversal row
        journal::insert(&mut *tx, &reversal).await?;
        journal::update(&mut *tx, &mut original).await?;
        tx.commit().await?;

        info!(
            id = %original.id,
            number = %original.transaction_number,
            reversal = %reversal.transaction_number,
            actor = %stamp.actor,
            "Transaction reversed"
        );
        Ok(Reversal {
            original,
            reversal,
            changes,
        })
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Marks every line of a posted transaction reconciled.
    pub async fn reconcile_transaction(&self, transaction_id: &str, stamp: &AuditStamp) -> DbResult<Transaction> {
        self.with_retry("reconcile_transaction", || async move {
            let mut tx = self.db.pool().begin().await?;
            let mut txn = self.load_transaction(&mut *tx, transaction_id).await?;
            txn.reconcile(stamp)?;
            journal::update(&mut *tx, &mut txn).await?;
            tx.commit().await?;
            Ok(txn)
        })
        .await
    }

    pub async fn reconcile_entry(
        &self,
        transaction_id: &str,
        entry_id: &str,
        stamp: &AuditStamp,
    ) -> DbResult<Transaction> {
        self.with_retry("reconcile_entry", || async move {
            let mut tx = self.db.pool().begin().await?;
            let mut txn = self.load_transaction(&mut *tx, transaction_id).await?;
            txn.reconcile_entry(entry_id, stamp)?;
            journal::update(&mut *tx, &mut txn).await?;
            tx.commit().await?;
            Ok(txn)
        })
        .await
    }

    pub async fn unreconcile_entry(
        &self,
        transaction_id: &str,
        entry_id: &str,
        stamp: &AuditStamp,
    ) -> DbResult<Transaction> {
        self.with_retry("unreconcile_entry", || async move {
            let mut tx = self.db.pool().begin().await?;
            let mut txn = self.load_transaction(&mut *tx, transaction_id).await?;
            txn.unreconcile_entry(entry_id, stamp.at)?;
            journal::update(&mut *tx, &mut txn).await?;
            tx.commit().await?;
            Ok(txn)
        })
        .await
    }

    async fn load_transaction(&self, conn: &mut sqlx::SqliteConnection, id: &str) -> DbResult<Transaction> {
        journal::fetch(conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Transaction", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::pool::{Database, DbConfig};
    use chrono::{Duration, Utc};
    use tally_core::accounts::AccountType;
    use tally_core::journal::TransactionStatus;

    async fn engine() -> Engine {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Engine::new(db, EngineConfig::default()).unwrap()
    }

    fn stamp() -> AuditStamp {
        AuditStamp::new("clerk", Utc::now())
    }

    async fn account(engine: &Engine, number: &str, kind: AccountType) -> Account {
        engine
            .create_account(Account::new("ignored", number, format!("Account {}", number), kind, Utc::now()))
            .await
            .unwrap()
    }

    async fn posted(engine: &Engine, debit: &Account, credit: &Account, cents: i64) -> Transaction {
        let s = stamp();
        let txn = engine
            .open_transaction(TransactionType::JournalEntry, s.at.date_naive(), "Owner investment", None, &s)
            .await
            .unwrap();
        engine
            .add_entry(&txn.id, &debit.id, Money::from_cents(cents), Money::zero(), None, &s)
            .await
            .unwrap();
        engine
            .add_entry(&txn.id, &credit.id, Money::zero(), Money::from_cents(cents), None, &s)
            .await
            .unwrap();
        engine.post_transaction(&txn.id, &s).await.unwrap().transaction
    }

    #[tokio::test]
    async fn test_post_moves_balances() {
        let engine = engine().await;
        let cash = account(&engine, "1000", AccountType::Asset).await;
        let equity = account(&engine, "3000", AccountType::Equity).await;

        let txn = posted(&engine, &cash, &equity, 50_000).await;
        assert_eq!(txn.status, TransactionStatus::Posted);
        assert_eq!(txn.transaction_number, "JE-000001");

        let accounts = engine.db().accounts();
        assert_eq!(accounts.get(&cash.id).await.unwrap().unwrap().current_balance, Money::from_cents(50_000));
        assert_eq!(accounts.get(&equity.id).await.unwrap().unwrap().current_balance, Money::from_cents(50_000));
    }

    #[tokio::test]
    async fn test_unbalanced_post_changes_nothing() {
        let engine = engine().await;
        let cash = account(&engine, "1000", AccountType::Asset).await;
        let s = stamp();

        let txn = engine
            .open_transaction(TransactionType::JournalEntry, s.at.date_naive(), "Half entry", None, &s)
            .await
            .unwrap();
        engine
            .add_entry(&txn.id, &cash.id, Money::from_cents(100), Money::zero(), None, &s)
            .await
            .unwrap();

        let err = engine.post_transaction(&txn.id, &s).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::Unbalanced { .. })));

        let stored = engine.db().journal().get(&txn.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Draft);
        let cash = engine.db().accounts().get(&cash.id).await.unwrap().unwrap();
        assert_eq!(cash.current_balance, Money::zero());
    }

    #[tokio::test]
    async fn test_entry_against_unknown_account_fails() {
        let engine = engine().await;
        let s = stamp();
        let txn = engine
            .open_transaction(TransactionType::JournalEntry, s.at.date_naive(), "Bad", None, &s)
            .await
            .unwrap();

        let err = engine
            .add_entry(&txn.id, "missing", Money::from_cents(1), Money::zero(), None, &s)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn test_reverse_nets_to_zero_and_links() {
        let engine = engine().await;
        let cash = account(&engine, "1000", AccountType::Asset).await;
        let equity = account(&engine, "3000", AccountType::Equity).await;
        let txn = posted(&engine, &cash, &equity, 12_345).await;

        let reversal = engine.reverse_transaction(&txn.id, "Entered twice", &stamp()).await.unwrap();
        assert_eq!(reversal.original.status, TransactionStatus::Reversed);
        assert_eq!(reversal.original.reversed_by_transaction_id.as_deref(), Some(reversal.reversal.id.as_str()));
        assert_eq!(reversal.reversal.reverses_transaction_id.as_deref(), Some(txn.id.as_str()));

        let accounts = engine.db().accounts();
        assert_eq!(accounts.get(&cash.id).await.unwrap().unwrap().current_balance, Money::zero());
        assert_eq!(accounts.get(&equity.id).await.unwrap().unwrap().current_balance, Money::zero());

        let err = engine.reverse_transaction(&txn.id, "Again", &stamp()).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::AlreadyReversed { .. })));
    }

    #[tokio::test]
    async fn test_reconciled_transaction_cannot_be_reversed() {
        let engine = engine().await;
        let cash = account(&engine, "1000", AccountType::Asset).await;
        let equity = account(&engine, "3000", AccountType::Equity).await;
        let txn = posted(&engine, &cash, &equity, 100).await;

        let entry_id = txn.entries[0].id.clone();
        let partial = engine.reconcile_entry(&txn.id, &entry_id, &stamp()).await.unwrap();
        assert!(!partial.is_reconciled);

        let full = engine.reconcile_transaction(&txn.id, &stamp()).await.unwrap();
        assert!(full.is_reconciled);

        let err = engine.reverse_transaction(&txn.id, "Oops", &stamp()).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::Reconciled { .. })));

        let reopened = engine.unreconcile_entry(&txn.id, &entry_id, &stamp()).await.unwrap();
        assert!(!reopened.is_reconciled);
    }

    #[tokio::test]
    async fn test_balance_as_of_excludes_later_postings() {
        let engine = engine().await;
        let cash = account(&engine, "1000", AccountType::Asset).await;
        let equity = account(&engine, "3000", AccountType::Equity).await;
        posted(&engine, &cash, &equity, 700).await;

        let accounts = engine.db().accounts();
        let yesterday = (Utc::now() - Duration::days(1)).date_naive();
        assert_eq!(accounts.balance_as_of(&cash.id, yesterday).await.unwrap(), Money::zero());
        assert_eq!(accounts.recomputed_balance(&cash.id).await.unwrap(), Money::from_cents(700));
    }

    #[tokio::test]
    async fn test_parent_must_share_type() {
        let engine = engine().await;
        let assets = account(&engine, "1000", AccountType::Asset).await;

        let child = Account::new("t", "2100", "Loan", AccountType::Liability, Utc::now()).with_parent(&assets.id);
        let err = engine.create_account(child).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_posted_account_cannot_be_deleted() {
        let engine = engine().await;
        let cash = account(&engine, "1000", AccountType::Asset).await;
        let equity = account(&engine, "3000", AccountType::Equity).await;
        let spare = account(&engine, "1900", AccountType::Asset).await;
        posted(&engine, &cash, &equity, 100).await;

        let err = engine.delete_account(&cash.id, &stamp()).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::CannotDelete { .. })));

        let deleted = engine.delete_account(&spare.id, &stamp()).await.unwrap();
        assert!(deleted.is_deleted);
    }
}
