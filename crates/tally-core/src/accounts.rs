//! # Chart of Accounts
//!
//! Account records and the arena that holds the account tree.
//!
//! ## Normal Balances
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Type        Normal side    Debit effect    Credit effect              │
//! │  ──────────  ─────────────  ──────────────  ──────────────             │
//! │  Asset       Debit          +               -                          │
//! │  Expense     Debit          +               -                          │
//! │  Liability   Credit         -               +                          │
//! │  Equity      Credit         -               +                          │
//! │  Revenue     Credit         -               +                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tree Shape
//! ```text
//! 1000 Assets (header)
//!  ├── 1100 Cash
//!  ├── 1200 Accounts Receivable
//!  └── 1300 Inventory
//! ```
//! Parents are plain ids inside a [`ChartOfAccounts`] arena. Every walk over
//! the tree is iterative and carries a visited set, so a corrupted parent
//! chain ends the walk instead of looping forever.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::journal::TransactionType;
use crate::money::Money;
use crate::types::new_id;
use crate::validation::{validate_account_number, validate_name};

// =============================================================================
// Account Type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

text_enum!(AccountType {
    Asset => "asset",
    Liability => "liability",
    Equity => "equity",
    Revenue => "revenue",
    Expense => "expense",
});

impl AccountType {
    /// Asset and expense accounts grow on the debit side.
    #[inline]
    pub const fn is_debit_normal(&self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }
}

/// Finer classification used by reports and posting rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum AccountSubtype {
    CurrentAsset,
    FixedAsset,
    Inventory,
    AccountsReceivable,
    Cash,
    Bank,
    CurrentLiability,
    LongTermLiability,
    AccountsPayable,
    CreditCard,
    OwnersEquity,
    RetainedEarnings,
    SalesRevenue,
    ServiceRevenue,
    OtherRevenue,
    CostOfGoodsSold,
    OperatingExpense,
    OtherExpense,
}

text_enum!(AccountSubtype {
    CurrentAsset => "current_asset",
    FixedAsset => "fixed_asset",
    Inventory => "inventory",
    AccountsReceivable => "accounts_receivable",
    Cash => "cash",
    Bank => "bank",
    CurrentLiability => "current_liability",
    LongTermLiability => "long_term_liability",
    AccountsPayable => "accounts_payable",
    CreditCard => "credit_card",
    OwnersEquity => "owners_equity",
    RetainedEarnings => "retained_earnings",
    SalesRevenue => "sales_revenue",
    ServiceRevenue => "service_revenue",
    OtherRevenue => "other_revenue",
    CostOfGoodsSold => "cost_of_goods_sold",
    OperatingExpense => "operating_expense",
    OtherExpense => "other_expense",
});

impl AccountSubtype {
    /// The account type this subtype belongs under.
    pub const fn account_type(&self) -> AccountType {
        use AccountSubtype::*;
        match self {
            CurrentAsset | FixedAsset | Inventory | AccountsReceivable | Cash | Bank => {
                AccountType::Asset
            }
            CurrentLiability | LongTermLiability | AccountsPayable | CreditCard => {
                AccountType::Liability
            }
            OwnersEquity | RetainedEarnings => AccountType::Equity,
            SalesRevenue | ServiceRevenue | OtherRevenue => AccountType::Revenue,
            CostOfGoodsSold | OperatingExpense | OtherExpense => AccountType::Expense,
        }
    }
}

// =============================================================================
// Account
// =============================================================================

/// A node in the chart of accounts.
///
/// `current_balance` is only ever changed by [`Account::apply_posting`],
/// which the journal poster calls while posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Account {
    pub id: String,
    pub tenant_id: String,
    /// Business key, unique per tenant.
    pub account_number: String,
    pub account_name: String,
    pub account_type: AccountType,
    pub account_subtype: Option<AccountSubtype>,
    pub description: Option<String>,
    pub parent_account_id: Option<String>,
    pub current_balance: Money,
    pub opening_balance: Money,
    /// Seeded by setup; refuses manual journal entries.
    pub is_system_account: bool,
    /// Grouping node; its balance is the roll-up of its children.
    pub is_header_account: bool,
    pub allow_manual_entries: bool,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
}

impl Account {
    /// Creates an active, postable account with a zero balance.
    pub fn new(
        tenant_id: impl Into<String>,
        account_number: impl Into<String>,
        account_name: impl Into<String>,
        account_type: AccountType,
        at: DateTime<Utc>,
    ) -> Self {
        Account {
            id: new_id(),
            tenant_id: tenant_id.into(),
            account_number: account_number.into(),
            account_name: account_name.into(),
            account_type,
            account_subtype: None,
            description: None,
            parent_account_id: None,
            current_balance: Money::zero(),
            opening_balance: Money::zero(),
            is_system_account: false,
            is_header_account: false,
            allow_manual_entries: true,
            is_active: true,
            is_deleted: false,
            created_at: at,
            updated_at: at,
            version: 0,
        }
    }

    pub fn with_subtype(mut self, subtype: AccountSubtype) -> Self {
        self.account_subtype = Some(subtype);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_account_id = Some(parent_id.into());
        self
    }

    /// Marks the account as system-seeded. System accounts take automatic
    /// postings only.
    pub fn system(mut self) -> Self {
        self.is_system_account = true;
        self.allow_manual_entries = false;
        self
    }

    pub fn header(mut self) -> Self {
        self.is_header_account = true;
        self.allow_manual_entries = false;
        self
    }

    /// Sets both opening and current balance. Only meaningful before any
    /// posting has touched the account.
    pub fn with_opening_balance(mut self, amount: Money) -> Self {
        self.opening_balance = amount;
        self.current_balance = amount;
        self
    }

    /// Checks name, number and subtype consistency.
    pub fn validate(&self) -> CoreResult<()> {
        validate_account_number(&self.account_number)?;
        validate_name("account_name", &self.account_name)?;
        if let Some(subtype) = self.account_subtype {
            if subtype.account_type() != self.account_type {
                return Err(ValidationError::InvalidFormat {
                    field: "account_subtype".to_string(),
                    reason: format!(
                        "{} does not belong under {}",
                        subtype, self.account_type
                    ),
                }
                .into());
            }
        }
        Ok(())
    }

    #[inline]
    pub fn is_debit_normal(&self) -> bool {
        self.account_type.is_debit_normal()
    }

    /// The signed effect of a debit/credit pair on this account's balance.
    pub fn balance_effect(&self, debit: Money, credit: Money) -> Money {
        if self.is_debit_normal() {
            debit - credit
        } else {
            credit - debit
        }
    }

    /// Applies a posting to the running balance.
    pub fn apply_posting(&mut self, debit: Money, credit: Money, at: DateTime<Utc>) {
        self.current_balance += self.balance_effect(debit, credit);
        self.updated_at = at;
    }

    /// Whether a transaction of `transaction_type` may post to this account.
    pub fn accepts_posting(&self, transaction_type: TransactionType) -> CoreResult<()> {
        let refuse = |reason: &str| {
            Err(CoreError::PostingNotAllowed {
                account_id: self.id.clone(),
                reason: reason.to_string(),
            })
        };

        if !self.is_active || self.is_deleted {
            return refuse("account is inactive");
        }
        if self.is_header_account {
            return refuse("header accounts take their balance from child accounts");
        }
        if transaction_type == TransactionType::JournalEntry {
            if self.is_system_account {
                return refuse("system accounts only take automatic postings");
            }
            if !self.allow_manual_entries {
                return refuse("manual entries are disabled");
            }
        }
        Ok(())
    }

    /// Recomputes the balance from scratch.
    ///
    /// `opening_balance` plus the signed sum of every posted line dated on or
    /// before `as_of` (all lines when `as_of` is `None`). Used for as-of
    /// reporting and for cross-checking `current_balance`.
    pub fn balance_from_lines(&self, lines: &[PostedAmount], as_of: Option<NaiveDate>) -> Money {
        lines
            .iter()
            .filter(|line| as_of.map_or(true, |date| line.transaction_date <= date))
            .map(|line| self.balance_effect(line.debit, line.credit))
            .sum::<Money>()
            + self.opening_balance
    }
}

/// One posted journal line as seen from a single account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PostedAmount {
    pub transaction_date: NaiveDate,
    pub debit: Money,
    pub credit: Money,
}

// =============================================================================
// Chart of Accounts
// =============================================================================

/// Arena of accounts keyed by id.
///
/// A `BTreeMap` keeps iteration in ascending id order, which is also the
/// order the poster writes balances in.
#[derive(Debug, Clone, Default)]
pub struct ChartOfAccounts {
    accounts: BTreeMap<String, Account>,
}

impl ChartOfAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        ChartOfAccounts {
            accounts: accounts.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    pub fn insert(&mut self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    pub fn get(&self, id: &str) -> Option<&Account> {
        self.accounts.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Account> {
        self.accounts.get_mut(id)
    }

    pub fn find_by_number(&self, number: &str) -> Option<&Account> {
        self.accounts.values().find(|a| a.account_number == number)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.accounts.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Accounts in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn into_accounts(self) -> Vec<Account> {
        self.accounts.into_values().collect()
    }

    /// Live direct children of `id`.
    pub fn children(&self, id: &str) -> Vec<&Account> {
        self.accounts
            .values()
            .filter(|a| a.parent_account_id.as_deref() == Some(id))
            .filter(|a| a.is_active && !a.is_deleted)
            .collect()
    }

    /// All live descendants of `id`, depth first.
    pub fn descendants(&self, id: &str) -> Vec<&Account> {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(id);
        let mut stack: Vec<&str> = vec![id];
        let mut out = Vec::new();

        while let Some(current) = stack.pop() {
            for child in self.children(current) {
                if visited.insert(child.id.as_str()) {
                    out.push(child);
                    stack.push(child.id.as_str());
                }
            }
        }
        out
    }

    /// Parent chain from the root down to `id`.
    fn lineage(&self, id: &str) -> Vec<&Account> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut chain = Vec::new();
        let mut cursor = self.accounts.get(id);

        while let Some(account) = cursor {
            if !visited.insert(account.id.as_str()) {
                break;
            }
            chain.push(account);
            cursor = account
                .parent_account_id
                .as_deref()
                .and_then(|p| self.accounts.get(p));
        }
        chain.reverse();
        chain
    }

    /// "Assets > Current Assets > Cash".
    pub fn full_name(&self, id: &str) -> Option<String> {
        let chain = self.lineage(id);
        if chain.is_empty() {
            return None;
        }
        Some(
            chain
                .iter()
                .map(|a| a.account_name.as_str())
                .collect::<Vec<_>>()
                .join(" > "),
        )
    }

    /// Rejects parent assignments that would create a loop or cross types.
    pub fn validate_parent(&self, account_id: &str, parent_id: &str) -> CoreResult<()> {
        let parent = self
            .accounts
            .get(parent_id)
            .ok_or_else(|| CoreError::AccountNotFound(parent_id.to_string()))?;

        let cycle = || ValidationError::Cycle {
            account_id: account_id.to_string(),
            parent_id: parent_id.to_string(),
        };

        if account_id == parent_id {
            return Err(cycle().into());
        }
        if self.lineage(parent_id).iter().any(|a| a.id == account_id) {
            return Err(cycle().into());
        }
        if let Some(account) = self.accounts.get(account_id) {
            if account.account_type != parent.account_type {
                return Err(ValidationError::InvalidFormat {
                    field: "parent_account_id".to_string(),
                    reason: format!(
                        "{} account cannot sit under a {} account",
                        account.account_type, parent.account_type
                    ),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Balance of `id` plus every live descendant.
    pub fn rollup_balance(&self, id: &str) -> Option<Money> {
        let own = self.accounts.get(id)?.current_balance;
        Some(own + self.descendants(id).iter().map(|a| a.current_balance).sum::<Money>())
    }

    /// An account can go only when it is not system-seeded, has never been
    /// posted to, and has no live children.
    pub fn can_be_deleted(&self, id: &str, has_entries: bool) -> CoreResult<()> {
        let account = self
            .accounts
            .get(id)
            .ok_or_else(|| CoreError::AccountNotFound(id.to_string()))?;

        let refuse = |reason: &str| {
            Err(CoreError::CannotDelete {
                account_id: id.to_string(),
                reason: reason.to_string(),
            })
        };

        if account.is_system_account {
            return refuse("system account");
        }
        if has_entries {
            return refuse("account has journal entries");
        }
        if !self.children(id).is_empty() {
            return refuse("account has child accounts");
        }
        Ok(())
    }

    /// Soft-deletes after [`Self::can_be_deleted`] agrees.
    pub fn soft_delete(&mut self, id: &str, has_entries: bool, at: DateTime<Utc>) -> CoreResult<()> {
        self.can_be_deleted(id, has_entries)?;
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| CoreError::AccountNotFound(id.to_string()))?;
        account.is_deleted = true;
        account.is_active = false;
        account.updated_at = at;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn account(number: &str, name: &str, kind: AccountType) -> Account {
        Account::new("t1", number, name, kind, now())
    }

    #[test]
    fn test_balance_rule() {
        let mut cash = account("1100", "Cash", AccountType::Asset);
        cash.apply_posting(Money::from_cents(1000), Money::zero(), now());
        cash.apply_posting(Money::zero(), Money::from_cents(300), now());
        assert_eq!(cash.current_balance.cents(), 700);

        let mut revenue = account("4000", "Sales", AccountType::Revenue);
        revenue.apply_posting(Money::zero(), Money::from_cents(1000), now());
        revenue.apply_posting(Money::from_cents(250), Money::zero(), now());
        assert_eq!(revenue.current_balance.cents(), 750);
    }

    #[test]
    fn test_header_account_refuses_postings() {
        let assets = account("1000", "Assets", AccountType::Asset).header();
        let err = assets.accepts_posting(TransactionType::Sale).unwrap_err();
        assert!(matches!(err, CoreError::PostingNotAllowed { .. }));
    }

    #[test]
    fn test_system_account_refuses_manual_entries_only() {
        let cash = account("1100", "Cash", AccountType::Asset).system();
        assert!(cash.accepts_posting(TransactionType::Sale).is_ok());
        assert!(cash.accepts_posting(TransactionType::JournalEntry).is_err());

        let mut locked = account("6100", "Rent", AccountType::Expense);
        locked.allow_manual_entries = false;
        assert!(locked.accepts_posting(TransactionType::JournalEntry).is_err());
        assert!(locked.accepts_posting(TransactionType::Purchase).is_ok());
    }

    #[test]
    fn test_subtype_must_match_type() {
        let ok = account("1300", "Inventory", AccountType::Asset).with_subtype(AccountSubtype::Inventory);
        assert!(ok.validate().is_ok());

        let bad = account("1300", "Inventory", AccountType::Expense).with_subtype(AccountSubtype::Inventory);
        assert!(bad.validate().is_err());
    }

    fn sample_chart() -> (ChartOfAccounts, String, String, String) {
        let assets = account("1000", "Assets", AccountType::Asset).header();
        let current = account("1050", "Current Assets", AccountType::Asset)
            .header()
            .with_parent(assets.id.clone());
        let cash = account("1100", "Cash", AccountType::Asset)
            .with_parent(current.id.clone())
            .with_opening_balance(Money::from_cents(5000));
        let ids = (assets.id.clone(), current.id.clone(), cash.id.clone());
        let chart = ChartOfAccounts::from_accounts([assets, current, cash]);
        (chart, ids.0, ids.1, ids.2)
    }

    #[test]
    fn test_descendants_and_full_name() {
        let (chart, assets, current, cash) = sample_chart();
        let ids: Vec<&str> = chart.descendants(&assets).iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&current.as_str()));
        assert!(ids.contains(&cash.as_str()));
        assert_eq!(
            chart.full_name(&cash).unwrap(),
            "Assets > Current Assets > Cash"
        );
    }

    #[test]
    fn test_descendants_survive_cycle() {
        let mut a = account("1", "A", AccountType::Asset);
        let mut b = account("2", "B", AccountType::Asset);
        a.parent_account_id = Some(b.id.clone());
        b.parent_account_id = Some(a.id.clone());
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        let chart = ChartOfAccounts::from_accounts([a, b]);

        let found = chart.descendants(&a_id);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, b_id);
        assert!(chart.full_name(&a_id).is_some());
    }

    #[test]
    fn test_validate_parent_rejects_cycles() {
        let (chart, assets, _current, cash) = sample_chart();
        assert!(chart.validate_parent(&assets, &cash).is_err());
        assert!(chart.validate_parent(&cash, &cash).is_err());
        assert!(chart.validate_parent(&cash, &assets).is_ok());
    }

    #[test]
    fn test_rollup_balance() {
        let (chart, assets, _, _) = sample_chart();
        assert_eq!(chart.rollup_balance(&assets).unwrap().cents(), 5000);
    }

    #[test]
    fn test_can_be_deleted() {
        let (mut chart, assets, _current, cash) = sample_chart();
        assert!(chart.can_be_deleted(&assets, false).is_err());
        assert!(chart.can_be_deleted(&cash, true).is_err());
        assert!(chart.soft_delete(&cash, false, now()).is_ok());
        assert!(chart.get(&cash).unwrap().is_deleted);

        let system = account("2100", "Payable", AccountType::Liability).system();
        let id = system.id.clone();
        chart.insert(system);
        assert!(chart.can_be_deleted(&id, false).is_err());
    }

    #[test]
    fn test_balance_from_lines_as_of() {
        let cash = account("1100", "Cash", AccountType::Asset).with_opening_balance(Money::from_cents(100));
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();
        let lines = [
            PostedAmount { transaction_date: d1, debit: Money::from_cents(500), credit: Money::zero() },
            PostedAmount { transaction_date: d2, debit: Money::zero(), credit: Money::from_cents(200) },
        ];
        assert_eq!(cash.balance_from_lines(&lines, None).cents(), 400);
        assert_eq!(cash.balance_from_lines(&lines, Some(d1)).cents(), 600);
    }
}
