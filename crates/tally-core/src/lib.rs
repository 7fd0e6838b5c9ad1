//! # tally-core: Pure Ledger & Inventory Logic
//!
//! Double-entry bookkeeping and stock valuation as pure, synchronous code.
//! Nothing here touches a database, the network, or the system clock.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 API layer / reports (external)                  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            tally-db Engine (one DB transaction per op)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ load → mutate → save                   │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   LEDGER                          STOCK                         │   │
//! │  │   ┌───────────┐ ┌───────────┐     ┌───────────┐ ┌───────────┐  │   │
//! │  │   │ accounts  │ │  journal  │     │ inventory │ │   sale    │  │   │
//! │  │   │ Chart     │ │ post      │     │ reserve   │ │ purchase  │  │   │
//! │  │   │ balances  │ │ reverse   │     │ receive   │ │ adjustment│  │   │
//! │  │   └───────────┘ └───────────┘     │ issue     │ └───────────┘  │   │
//! │  │         ▲                         └───────────┘                 │   │
//! │  │         └──── postings (document → balanced journal draft)      │   │
//! │  │                                                                 │   │
//! │  │   money: Money / Quantity / UnitCost (integer fixed point)      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The ledger and the inventory never call each other. A business operation
//! (sale completion, goods receipt, stock adjustment) drives the inventory and
//! then hands a balanced journal draft to the poster. Invoices touch only the
//! customer's account and the ledger.
//!
//! ## Modules
//!
//! - [`money`] - `Money`, `Quantity`, `UnitCost`
//! - [`accounts`] - Account records and the chart-of-accounts arena
//! - [`journal`] - Transactions, posting, reversal, reconciliation
//! - [`inventory`] - Stock records and movements
//! - [`sale`] - Sale settlement
//! - [`purchase`] - Purchase orders and goods receipts
//! - [`adjustment`] - Stock adjustments
//! - [`invoice`] - Customer invoices (accounts receivable)
//! - [`customer`] - Customer loyalty, history and credit; supplier history
//! - [`postings`] - Journal drafts for business events
//! - [`error`] / [`validation`]
//!
//! ## Example
//!
//! ```rust
//! use tally_core::money::{Quantity, UnitCost};
//! use tally_core::inventory::InventoryItem;
//! use chrono::Utc;
//!
//! let now = Utc::now();
//! let mut item = InventoryItem::new("tenant", "store-1", "prod-1", None, now);
//! item.receive(Quantity::from_units(10), UnitCost::from_cents(200), now).unwrap();
//! item.receive(Quantity::from_units(10), UnitCost::from_cents(300), now).unwrap();
//! assert_eq!(item.unit_cost, UnitCost::from_cents(250));
//! ```

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum stored as
/// snake_case text.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::error::ValidationError::InvalidFormat {
                        field: stringify!($name).to_string(),
                        reason: format!("unknown value '{}'", other),
                    }),
                }
            }
        }
    };
}

// =============================================================================
// Module Declarations
// =============================================================================

pub mod accounts;
pub mod adjustment;
pub mod customer;
pub mod error;
pub mod inventory;
pub mod invoice;
pub mod journal;
pub mod money;
pub mod postings;
pub mod purchase;
pub mod sale;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use money::{Money, Quantity, UnitCost};
pub use types::{new_id, AuditStamp, DocumentRef, TaxRate};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default tenant ID for single-tenant deployments.
///
/// The schema carries `tenant_id` everywhere; this is what gets written when
/// the caller has no tenant concept.
pub const DEFAULT_TENANT_ID: &str = "00000000-0000-0000-0000-000000000001";
