//! # Journal
//!
//! Transactions (journal entry headers), their lines, and the poster.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   open() ──► DRAFT ──add_entry()──► DRAFT                              │
//! │                 │                                                       │
//! │                 │ post()   Σdebit == Σcredit (exact, in cents)         │
//! │                 ▼                                                       │
//! │              POSTED ──reverse()──► REVERSED                            │
//! │                 │                      │                                │
//! │                 │                      └── linked both ways to T'      │
//! │                 │                                                       │
//! │                 └── reconcile() / reconcile_entry()                     │
//! │                                                                         │
//! │   T' = new transaction with every line's debit/credit swapped,         │
//! │        posted through the same post() path. T's lines never change.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Atomicity in memory
//! `post` checks every line's account before it touches a single balance.
//! Either all balances move and the status flips, or nothing changes. The
//! storage layer wraps the same call in one database transaction.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::accounts::ChartOfAccounts;
use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{new_id, AuditStamp, DocumentRef};

// =============================================================================
// Enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Sale,
    Purchase,
    Payment,
    Receipt,
    JournalEntry,
    Adjustment,
    OpeningBalance,
    ClosingEntry,
}

text_enum!(TransactionType {
    Sale => "sale",
    Purchase => "purchase",
    Payment => "payment",
    Receipt => "receipt",
    JournalEntry => "journal_entry",
    Adjustment => "adjustment",
    OpeningBalance => "opening_balance",
    ClosingEntry => "closing_entry",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Draft,
    Posted,
    Reversed,
}

text_enum!(TransactionStatus {
    Draft => "draft",
    Posted => "posted",
    Reversed => "reversed",
});

// =============================================================================
// Transaction Entry
// =============================================================================

/// One journal line. Exactly one of `debit` / `credit` is non-zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct TransactionEntry {
    pub id: String,
    pub transaction_id: String,
    pub account_id: String,
    pub line_number: i64,
    pub debit: Money,
    pub credit: Money,
    pub description: Option<String>,
    pub is_reconciled: bool,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub reconciled_by: Option<String>,
}

impl TransactionEntry {
    /// Debit minus credit.
    #[inline]
    pub fn net(&self) -> Money {
        self.debit - self.credit
    }
}

/// Checks the debit-XOR-credit rule for one line.
fn check_entry_amounts(debit: Money, credit: Money) -> CoreResult<()> {
    let invalid = |reason: &str| {
        Err(CoreError::InvalidEntry {
            reason: reason.to_string(),
        })
    };

    if debit.is_negative() || credit.is_negative() {
        return invalid("amounts must not be negative");
    }
    if !debit.is_zero() && !credit.is_zero() {
        return invalid("a line cannot carry both a debit and a credit");
    }
    if debit.is_zero() && credit.is_zero() {
        return invalid("a line must carry a debit or a credit");
    }
    Ok(())
}

// =============================================================================
// Balance Change
// =============================================================================

/// One account's balance before and after a posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub account_id: String,
    pub before: Money,
    pub after: Money,
}

// =============================================================================
// Transaction
// =============================================================================

/// A journal transaction and its lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Transaction {
    pub id: String,
    pub tenant_id: String,
    /// Business key, e.g. `JE-000042`.
    pub transaction_number: String,
    pub transaction_type: TransactionType,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub notes: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub reference_number: Option<String>,
    pub status: TransactionStatus,
    pub total_debit: Money,
    pub total_credit: Money,
    pub is_reconciled: bool,
    pub posted_by: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    /// Set on a reversal: the transaction it negates.
    pub reverses_transaction_id: Option<String>,
    /// Set on a reversed original: the reversal that negates it.
    pub reversed_by_transaction_id: Option<String>,
    pub reversal_reason: Option<String>,
    /// Free-form caller data (terminal id, import batch, ...).
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub entries: Vec<TransactionEntry>,
}

impl Transaction {
    /// Opens a new draft.
    pub fn open(
        tenant_id: impl Into<String>,
        transaction_number: impl Into<String>,
        transaction_type: TransactionType,
        transaction_date: NaiveDate,
        description: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Transaction {
            id: new_id(),
            tenant_id: tenant_id.into(),
            transaction_number: transaction_number.into(),
            transaction_type,
            transaction_date,
            description: description.into(),
            notes: None,
            reference_type: None,
            reference_id: None,
            reference_number: None,
            status: TransactionStatus::Draft,
            total_debit: Money::zero(),
            total_credit: Money::zero(),
            is_reconciled: false,
            posted_by: None,
            posted_at: None,
            reverses_transaction_id: None,
            reversed_by_transaction_id: None,
            reversal_reason: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            created_at: at,
            updated_at: at,
            version: 0,
            entries: Vec::new(),
        }
    }

    /// Links the transaction to the business document that caused it.
    pub fn with_reference(mut self, reference: &DocumentRef) -> Self {
        self.reference_type = Some(reference.kind.clone());
        self.reference_id = Some(reference.id.clone());
        self.reference_number = Some(reference.number.clone());
        self
    }

    fn ensure_draft(&self) -> CoreResult<()> {
        if self.status != TransactionStatus::Draft {
            return Err(CoreError::NotDraft {
                entity: "Transaction",
                id: self.transaction_number.clone(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    /// Appends a line and recomputes totals.
    pub fn add_entry(
        &mut self,
        account_id: impl Into<String>,
        debit: Money,
        credit: Money,
        description: Option<String>,
    ) -> CoreResult<&TransactionEntry> {
        check_entry_amounts(debit, credit)?;
        self.ensure_draft()?;

        let line_number = self.entries.len() as i64 + 1;
        self.entries.push(TransactionEntry {
            id: new_id(),
            transaction_id: self.id.clone(),
            account_id: account_id.into(),
            line_number,
            debit,
            credit,
            description,
            is_reconciled: false,
            reconciled_at: None,
            reconciled_by: None,
        });
        self.recompute_totals();

        let last = self.entries.len() - 1;
        Ok(&self.entries[last])
    }

    pub fn debit(&mut self, account_id: impl Into<String>, amount: Money, description: Option<String>) -> CoreResult<()> {
        self.add_entry(account_id, amount, Money::zero(), description).map(|_| ())
    }

    pub fn credit(&mut self, account_id: impl Into<String>, amount: Money, description: Option<String>) -> CoreResult<()> {
        self.add_entry(account_id, Money::zero(), amount, description).map(|_| ())
    }

    /// Totals are always the column sums of the lines.
    pub fn recompute_totals(&mut self) {
        self.total_debit = self.entries.iter().map(|e| e.debit).sum();
        self.total_credit = self.entries.iter().map(|e| e.credit).sum();
    }

    /// Exact equality at the cent. No tolerance.
    #[inline]
    pub fn is_balanced(&self) -> bool {
        self.total_debit == self.total_credit
    }

    /// Distinct accounts referenced by the lines, ascending.
    pub fn account_ids(&self) -> BTreeSet<String> {
        self.entries.iter().map(|e| e.account_id.clone()).collect()
    }

    /// Posts the draft against `chart`.
    ///
    /// ## Steps
    /// 1. status must be draft, there must be lines, totals must balance
    /// 2. every referenced account must exist and accept this transaction type
    /// 3. balances move in ascending account-id order
    /// 4. status becomes posted with actor and timestamp
    ///
    /// Steps 1 and 2 finish before step 3 starts, so a failure leaves both
    /// the chart and the transaction untouched.
    pub fn post(&mut self, chart: &mut ChartOfAccounts, stamp: &AuditStamp) -> CoreResult<Vec<BalanceChange>> {
        self.ensure_draft()?;
        if self.entries.is_empty() {
            return Err(CoreError::EmptyTransaction {
                id: self.transaction_number.clone(),
            });
        }
        self.recompute_totals();
        if !self.is_balanced() {
            return Err(CoreError::Unbalanced {
                id: self.transaction_number.clone(),
                total_debit: self.total_debit,
                total_credit: self.total_credit,
            });
        }

        // net debit/credit per account, ascending id
        let mut per_account: BTreeMap<&str, (Money, Money)> = BTreeMap::new();
        for entry in &self.entries {
            let slot = per_account
                .entry(entry.account_id.as_str())
                .or_insert((Money::zero(), Money::zero()));
            slot.0 += entry.debit;
            slot.1 += entry.credit;
        }

        for account_id in per_account.keys() {
            let account = chart
                .get(account_id)
                .ok_or_else(|| CoreError::AccountNotFound(account_id.to_string()))?;
            account.accepts_posting(self.transaction_type)?;
        }

        let mut changes = Vec::with_capacity(per_account.len());
        for (account_id, (debit, credit)) in per_account {
            let account = chart
                .get_mut(account_id)
                .ok_or_else(|| CoreError::AccountNotFound(account_id.to_string()))?;
            let before = account.current_balance;
            account.apply_posting(debit, credit, stamp.at);
            changes.push(BalanceChange {
                account_id: account_id.to_string(),
                before,
                after: account.current_balance,
            });
        }

        self.status = TransactionStatus::Posted;
        self.posted_by = Some(stamp.actor.clone());
        self.posted_at = Some(stamp.at);
        self.updated_at = stamp.at;
        Ok(changes)
    }

    fn has_reconciled_entries(&self) -> bool {
        self.is_reconciled || self.entries.iter().any(|e| e.is_reconciled)
    }

    /// Posted, not yet reversed, nothing reconciled.
    pub fn can_be_reversed(&self) -> bool {
        self.status == TransactionStatus::Posted
            && self.reversed_by_transaction_id.is_none()
            && !self.has_reconciled_entries()
    }

    fn ensure_reversible(&self) -> CoreResult<()> {
        match self.status {
            TransactionStatus::Posted => {}
            TransactionStatus::Reversed => {
                return Err(CoreError::AlreadyReversed {
                    id: self.transaction_number.clone(),
                })
            }
            TransactionStatus::Draft => {
                return Err(CoreError::NotPosted {
                    id: self.transaction_number.clone(),
                    status: self.status.to_string(),
                })
            }
        }
        if self.reversed_by_transaction_id.is_some() {
            return Err(CoreError::AlreadyReversed {
                id: self.transaction_number.clone(),
            });
        }
        if self.has_reconciled_entries() {
            return Err(CoreError::Reconciled {
                id: self.transaction_number.clone(),
            });
        }
        Ok(())
    }

    /// Reverses a posted transaction.
    ///
    /// Builds `T'` with every line's sides swapped, posts it through
    /// [`Transaction::post`], then links `self` and `T'`. Returns the posted
    /// reversal and its balance changes. `self.entries` are not modified.
    pub fn reverse(
        &mut self,
        reversal_number: impl Into<String>,
        reason: &str,
        chart: &mut ChartOfAccounts,
        stamp: &AuditStamp,
    ) -> CoreResult<(Transaction, Vec<BalanceChange>)> {
        self.ensure_reversible()?;

        let mut reversal = Transaction::open(
            self.tenant_id.clone(),
            reversal_number,
            self.transaction_type,
            stamp.at.date_naive(),
            format!("Reversal of {}: {}", self.transaction_number, reason),
            stamp.at,
        );
        reversal.reference_type = self.reference_type.clone();
        reversal.reference_id = self.reference_id.clone();
        reversal.reference_number = Some(format!("REV-{}", self.transaction_number));
        reversal.reverses_transaction_id = Some(self.id.clone());
        reversal.reversal_reason = Some(reason.to_string());

        for entry in &self.entries {
            let description = entry
                .description
                .as_ref()
                .map(|d| format!("Reversal: {}", d));
            reversal.add_entry(entry.account_id.clone(), entry.credit, entry.debit, description)?;
        }

        let changes = reversal.post(chart, stamp)?;

        self.status = TransactionStatus::Reversed;
        self.reversed_by_transaction_id = Some(reversal.id.clone());
        self.reversal_reason = Some(reason.to_string());
        self.updated_at = stamp.at;

        Ok((reversal, changes))
    }

    fn ensure_posted(&self) -> CoreResult<()> {
        if self.status != TransactionStatus::Posted {
            return Err(CoreError::NotPosted {
                id: self.transaction_number.clone(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    /// Marks one line as matched against a bank or supplier statement.
    pub fn reconcile_entry(&mut self, entry_id: &str, stamp: &AuditStamp) -> CoreResult<()> {
        self.ensure_posted()?;
        let entry = self.entry_mut(entry_id)?;
        entry.is_reconciled = true;
        entry.reconciled_at = Some(stamp.at);
        entry.reconciled_by = Some(stamp.actor.clone());
        self.is_reconciled = self.entries.iter().all(|e| e.is_reconciled);
        self.updated_at = stamp.at;
        Ok(())
    }

    pub fn unreconcile_entry(&mut self, entry_id: &str, at: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_posted()?;
        let entry = self.entry_mut(entry_id)?;
        entry.is_reconciled = false;
        entry.reconciled_at = None;
        entry.reconciled_by = None;
        self.is_reconciled = false;
        self.updated_at = at;
        Ok(())
    }

    /// Reconciles every line.
    pub fn reconcile(&mut self, stamp: &AuditStamp) -> CoreResult<()> {
        self.ensure_posted()?;
        for entry in &mut self.entries {
            if !entry.is_reconciled {
                entry.is_reconciled = true;
                entry.reconciled_at = Some(stamp.at);
                entry.reconciled_by = Some(stamp.actor.clone());
            }
        }
        self.is_reconciled = true;
        self.updated_at = stamp.at;
        Ok(())
    }

    fn entry_mut(&mut self, entry_id: &str) -> CoreResult<&mut TransactionEntry> {
        let document_id = self.transaction_number.clone();
        self.entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| CoreError::LineNotFound {
                document_id,
                line_id: entry_id.to_string(),
            })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
