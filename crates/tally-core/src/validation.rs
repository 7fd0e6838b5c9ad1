//! # Validation Module
//!
//! Input checks shared by the ledger and the stock documents.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: Caller (API layer)      shape / deserialization              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE             amounts, quantities, names           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Aggregate methods       lifecycle + invariants               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 4: SQLite                  UNIQUE / FOREIGN KEY / CHECK         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::{Money, Quantity};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates an account number.
///
/// Account numbers are short codes such as `1000` or `4000-01`.
///
/// ```rust
/// use tally_core::validation::validate_account_number;
///
/// assert!(validate_account_number("1000").is_ok());
/// assert!(validate_account_number("4000-01").is_ok());
/// assert!(validate_account_number("").is_err());
/// assert!(validate_account_number("10 00").is_err());
/// ```
pub fn validate_account_number(number: &str) -> ValidationResult<()> {
    let number = number.trim();

    if number.is_empty() {
        return Err(ValidationError::Required {
            field: "account_number".to_string(),
        });
    }

    if number.len() > 20 {
        return Err(ValidationError::TooLong {
            field: "account_number".to_string(),
            max: 20,
        });
    }

    if !number
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(ValidationError::InvalidFormat {
            field: "account_number".to_string(),
            reason: "must contain only letters, digits, hyphens and dots".to_string(),
        });
    }

    Ok(())
}

/// Validates a required display name (account name, customer name, ...).
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 200,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Quantities moved by an operation must be strictly positive.
///
/// ```rust
/// use tally_core::money::Quantity;
/// use tally_core::validation::validate_positive_quantity;
///
/// assert!(validate_positive_quantity("quantity", Quantity::from_units(1)).is_ok());
/// assert!(validate_positive_quantity("quantity", Quantity::zero()).is_err());
/// ```
pub fn validate_positive_quantity(field: &str, qty: Quantity) -> ValidationResult<()> {
    if !qty.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Prices, costs and fixed discounts may be zero but never negative.
pub fn validate_non_negative(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Payments and refunds must move a positive amount.
pub fn validate_positive_amount(field: &str, amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a rate in basis points (0% to 100%).
pub fn validate_bps(field: &str, bps: u32) -> ValidationResult<()> {
    if bps > 10_000 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: 10_000,
        });
    }
    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string.
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
