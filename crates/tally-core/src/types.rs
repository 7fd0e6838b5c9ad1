//! # Shared Types
//!
//! Small value types used across the ledger and the stock documents.
//!
//! ## Dual-Key Identity Pattern
//! Every aggregate has:
//! - `id`: UUID v4, immutable, used for relations
//! - a business number (`JE-000042`, `SAL-000103`, ...) that humans quote

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a new UUID v4 identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate in basis points (1 bps = 0.01%, so 1000 bps = 10%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
pub struct TaxRate(u32);

impl TaxRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Audit Stamp
// =============================================================================

/// Who did something, and when.
///
/// The engine never reads the system clock; callers pass the time in so
/// postings and receipts replay deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    /// Opaque acting-user identifier. No authorization happens in the core.
    pub actor: String,
    pub at: DateTime<Utc>,
}

impl AuditStamp {
    pub fn new(actor: impl Into<String>, at: DateTime<Utc>) -> Self {
        AuditStamp {
            actor: actor.into(),
            at,
        }
    }
}

// =============================================================================
// Document Reference
// =============================================================================

/// Link from a ledger transaction or stock movement back to the business
/// document that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// e.g. `sale`, `goods_receipt`, `stock_adjustment`.
    pub kind: String,
    pub id: String,
    pub number: String,
}

impl DocumentRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>, number: impl Into<String>) -> Self {
        DocumentRef {
            kind: kind.into(),
            id: id.into(),
            number: number.into(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
