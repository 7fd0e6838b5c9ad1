//! # tally-db: Storage and Engine for the Tally Ledger
//!
//! SQLite persistence for accounts, journal transactions, inventory and the
//! business documents that move them, plus the [`Engine`] that runs each
//! business operation as one atomic database transaction.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally Data Flow                                  │
//! │                                                                         │
//! │  Caller (POS terminal, back office, import job)                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tally-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │    Engine     │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │  (engine/)    │───►│ (repository/) │    │  (embedded)  │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ BEGIN         │    │ AccountRepo   │    │ 001_ledger   │  │   │
//! │  │   │  core rules   │    │ JournalRepo   │    │ 002_inventory│  │   │
//! │  │   │  versioned    │    │ InventoryRepo │    │ 003_documents│  │   │
//! │  │   │  writes       │    │ SaleRepo ...  │    │ 004_invoices │  │   │
//! │  │   │ COMMIT        │    │               │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │          │                                                      │   │
//! │  │          ▼                                                      │   │
//! │  │   tally-core (balance, reserve, issue, post, reverse, ...)     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Engine configuration (TOML file + `TALLY_*` env overrides)
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Per-aggregate SQL
//! - [`engine`] - Atomic business operations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_db::{Database, DbConfig, Engine, EngineConfig};
//!
//! let db = Database::new(DbConfig::new("tally.db")).await?;
//! let engine = Engine::new(db, EngineConfig::load(None)?)?;
//!
//! let sale = engine.create_sale("MAIN", None, &stamp).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{EngineConfig, StorePolicy};
pub use engine::Engine;
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::account::AccountRepository;
pub use repository::adjustment::AdjustmentRepository;
pub use repository::inventory::InventoryRepository;
pub use repository::invoice::InvoiceRepository;
pub use repository::journal::JournalRepository;
pub use repository::movement::MovementRepository;
pub use repository::party::PartyRepository;
pub use repository::purchase::PurchaseRepository;
pub use repository::sale::SaleRepository;
