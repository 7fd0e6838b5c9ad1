//! # Error Types
//!
//! Domain error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule failures, grouped by ErrorKind   │
//! │  └── ValidationError  - Malformed input                                │
//! │                                                                         │
//! │  tally-db errors (separate crate)                                      │
//! │  └── DbError          - Storage failures + wrapped CoreError           │
//! │                                                                         │
//! │  ErrorKind            HTTP mapping done by the caller                  │
//! │  ─────────────────    ──────────────────────────────────               │
//! │  Validation           400                                              │
//! │  StateConflict        409                                              │
//! │  InsufficientResource 409 / 422                                        │
//! │  NotFound             404                                              │
//! │  IntegrityViolation   500 + alert (the core should have prevented it)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! None of these are retryable: a business rule gives the same answer on the
//! second attempt. Only storage contention (see `tally-db`) is retried.

use thiserror::Error;

use crate::money::{Money, Quantity};

// =============================================================================
// Error Kind
// =============================================================================

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    StateConflict,
    InsufficientResource,
    IntegrityViolation,
    NotFound,
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    // =========================================================================
    // Validation
    // =========================================================================
    /// A journal line must carry exactly one positive amount.
    #[error("Invalid journal entry: {reason}")]
    InvalidEntry { reason: String },

    /// A draft transaction with no lines cannot be posted.
    #[error("Transaction {id} has no entries")]
    EmptyTransaction { id: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // State Conflicts
    // =========================================================================
    /// Operation requires a draft document.
    #[error("{entity} {id} is {status}, expected draft")]
    NotDraft {
        entity: &'static str,
        id: String,
        status: String,
    },

    /// Operation requires a posted transaction.
    #[error("Transaction {id} is {status}, expected posted")]
    NotPosted { id: String, status: String },

    #[error("Transaction {id} has already been reversed")]
    AlreadyReversed { id: String },

    /// Reconciled entries are locked against reversal.
    #[error("Transaction {id} has reconciled entries")]
    Reconciled { id: String },

    #[error("Stock adjustment {id} has already been applied")]
    AlreadyApplied { id: String },

    #[error("Stock adjustment {id} has not been approved")]
    NotApproved { id: String },

    /// A goods receipt would push a purchase order line past its ordered quantity.
    #[error("Line {line_id}: ordered {ordered}, already received {received}, receiving {requested}")]
    OverReceive {
        line_id: String,
        ordered: Quantity,
        received: Quantity,
        requested: Quantity,
    },

    #[error("Inventory item {item_id}: reserved {reserved}, release requested {requested}")]
    OverRelease {
        item_id: String,
        reserved: Quantity,
        requested: Quantity,
    },

    #[error("Sale {sale_id} still has {amount_due} due")]
    NotFullyPaid { sale_id: String, amount_due: Money },

    /// Points redeemed beyond what the sale still owes.
    #[error("Sale {sale_id} has {amount_due} due, {requested} of points offered")]
    ExceedsAmountDue {
        sale_id: String,
        amount_due: Money,
        requested: Money,
    },

    #[error("Sale {id} is already completed")]
    AlreadyCompleted { id: String },

    #[error("Sale {id} is {status}, expected completed")]
    NotCompleted { id: String, status: String },

    #[error("Refund of {requested} exceeds refundable {refundable} on sale {sale_id}")]
    ExceedsRefundable {
        sale_id: String,
        refundable: Money,
        requested: Money,
    },

    #[error("Payment of {requested} exceeds balance due {balance_due} on invoice {invoice_id}")]
    ExceedsBalanceDue {
        invoice_id: String,
        balance_due: Money,
        requested: Money,
    },

    /// Generic lifecycle guard for transitions without a dedicated variant.
    #[error("{entity} {id} is {status}, cannot {operation}")]
    InvalidStatus {
        entity: &'static str,
        id: String,
        status: String,
        operation: &'static str,
    },

    /// The account refuses this posting (header, system or manual-entry lock).
    #[error("Account {account_id} does not accept this posting: {reason}")]
    PostingNotAllowed { account_id: String, reason: String },

    #[error("Account {account_id} cannot be deleted: {reason}")]
    CannotDelete { account_id: String, reason: String },

    // =========================================================================
    // Insufficient Resources
    // =========================================================================
    #[error("Inventory item {item_id}: available {available}, requested {requested}")]
    InsufficientAvailable {
        item_id: String,
        available: Quantity,
        requested: Quantity,
    },

    #[error("Inventory item {item_id}: on hand {on_hand}, requested {requested}")]
    InsufficientOnHand {
        item_id: String,
        on_hand: Quantity,
        requested: Quantity,
    },

    /// Setting on-hand below what is already promised to open reservations.
    #[error("Inventory item {item_id}: {reserved} reserved, cannot set on hand to {requested}")]
    BelowReserved {
        item_id: String,
        reserved: Quantity,
        requested: Quantity,
    },

    #[error("Customer {customer_id} has {available} loyalty points, {requested} requested")]
    InsufficientLoyaltyPoints {
        customer_id: String,
        available: i64,
        requested: i64,
    },

    /// Charging the customer's account would pass their credit limit.
    #[error("Customer {customer_id} has {available} credit available, {requested} requested")]
    CreditLimitExceeded {
        customer_id: String,
        available: Money,
        requested: Money,
    },

    // =========================================================================
    // Integrity
    // =========================================================================
    #[error("Transaction {id} is unbalanced: debits {total_debit}, credits {total_credit}")]
    Unbalanced {
        id: String,
        total_debit: Money,
        total_credit: Money,
    },

    /// An invariant the core maintains was found broken.
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    // =========================================================================
    // Not Found
    // =========================================================================
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Inventory item not found: {0}")]
    InventoryItemNotFound(String),

    #[error("Line {line_id} not found on {document_id}")]
    LineNotFound { document_id: String, line_id: String },
}

impl CoreError {
    /// Classifies the error for the caller.
    pub fn kind(&self) -> ErrorKind {
        use CoreError::*;
        match self {
            InvalidEntry { .. } | EmptyTransaction { .. } | Validation(_) => ErrorKind::Validation,

            NotDraft { .. }
            | NotPosted { .. }
            | AlreadyReversed { .. }
            | Reconciled { .. }
            | AlreadyApplied { .. }
            | NotApproved { .. }
            | OverReceive { .. }
            | OverRelease { .. }
            | NotFullyPaid { .. }
            | ExceedsAmountDue { .. }
            | AlreadyCompleted { .. }
            | NotCompleted { .. }
            | ExceedsRefundable { .. }
            | ExceedsBalanceDue { .. }
            | InvalidStatus { .. }
            | PostingNotAllowed { .. }
            | CannotDelete { .. } => ErrorKind::StateConflict,

            InsufficientAvailable { .. }
            | InsufficientOnHand { .. }
            | BelowReserved { .. }
            | InsufficientLoyaltyPoints { .. }
            | CreditLimitExceeded { .. } => ErrorKind::InsufficientResource,

            Unbalanced { .. } | IntegrityViolation(_) => ErrorKind::IntegrityViolation,

            AccountNotFound(_) | InventoryItemNotFound(_) | LineNotFound { .. } => {
                ErrorKind::NotFound
            }
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Parent assignment would create a loop in the account tree.
    #[error("Account {account_id} cannot sit under {parent_id}: cycle")]
    Cycle { account_id: String, parent_id: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
