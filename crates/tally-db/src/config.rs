//! # Engine Configuration
//!
//! Store policy, loyalty rates, retry tuning and the posting account map.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_TAX_RATE_BPS=825                                             │
//! │     TALLY_ALLOW_NEGATIVE_INVENTORY=false                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tally/tally.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.tally.engine/tally.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     no tax, negative stock refused, 1% loyalty                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/var/lib/tally/tally.db"
//! max_connections = 5
//!
//! [store]
//! id = "store-001"
//! tax_rate_bps = 1000
//! tax_inclusive = false
//! allow_negative_inventory = false
//! currency_decimals = 2
//!
//! [stores.store-airport]
//! tax_rate_bps = 1250
//!
//! [loyalty]
//! points_rate_bps = 100
//! point_value_cents = 1
//!
//! [retry]
//! initial_interval_ms = 20
//! max_elapsed_ms = 2000
//!
//! [accounts]
//! cash = "1100"
//! accounts_receivable = "1200"
//! inventory = "1300"
//! accounts_payable = "2100"
//! sales_revenue = "4000"
//! sales_tax_payable = "2200"
//! cost_of_goods_sold = "5000"
//! inventory_shrinkage = "5100"
//! ```

use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use tally_core::customer::LoyaltyProgram;
use tally_core::postings::AccountMap;
use tally_core::{Money, TaxRate};

use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. `:memory:` gives a throwaway database.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("com", "tally", "engine")
        .map(|dirs| dirs.data_dir().join("tally.db"))
        .unwrap_or_else(|| PathBuf::from("tally.db"))
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseSettings {
    /// Pool settings for [`crate::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        if self.path.as_os_str() == ":memory:" {
            DbConfig::in_memory()
        } else {
            DbConfig::new(self.path.clone()).max_connections(self.max_connections)
        }
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// Default policy for every store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_id")]
    pub id: String,

    /// Sales tax in basis points (1000 = 10%).
    #[serde(default)]
    pub tax_rate_bps: u32,

    /// Shelf prices already include tax.
    #[serde(default)]
    pub tax_inclusive: bool,

    /// Let sales drive on-hand below zero.
    #[serde(default)]
    pub allow_negative_inventory: bool,

    /// Minor-unit digits of the store currency. Money is held in cents, so
    /// only 2 is accepted.
    #[serde(default = "default_currency_decimals")]
    pub currency_decimals: u8,
}

fn default_store_id() -> String {
    "default-store".to_string()
}

fn default_currency_decimals() -> u8 {
    2
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            id: default_store_id(),
            tax_rate_bps: 0,
            tax_inclusive: false,
            allow_negative_inventory: false,
            currency_decimals: default_currency_decimals(),
        }
    }
}

/// Per-store deviations from [`StoreSettings`]. Unset fields inherit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_rate_bps: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_inclusive: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_negative_inventory: Option<bool>,
}

/// The resolved policy for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorePolicy {
    pub tax_rate: TaxRate,
    pub tax_inclusive: bool,
    pub allow_negative_inventory: bool,
}

// =============================================================================
// Loyalty Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltySettings {
    /// Points per currency unit spent, in basis points (100 = 1%).
    #[serde(default = "default_points_rate")]
    pub points_rate_bps: u32,

    /// Redemption value of one point, in cents.
    #[serde(default = "default_point_value")]
    pub point_value_cents: i64,
}

fn default_points_rate() -> u32 {
    100
}

fn default_point_value() -> i64 {
    1
}

impl Default for LoyaltySettings {
    fn default() -> Self {
        LoyaltySettings {
            points_rate_bps: default_points_rate(),
            point_value_cents: default_point_value(),
        }
    }
}

impl LoyaltySettings {
    pub fn program(&self) -> DbResult<LoyaltyProgram> {
        Ok(LoyaltyProgram::new(
            self.points_rate_bps,
            Money::from_cents(self.point_value_cents),
        )?)
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Exponential backoff for optimistic-lock conflicts and `database is locked`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,

    /// Give up once this much time has passed since the first attempt.
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_ms: u64,
}

fn default_initial_interval() -> u64 {
    20
}

fn default_max_elapsed() -> u64 {
    2_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            initial_interval_ms: default_initial_interval(),
            max_elapsed_ms: default_max_elapsed(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            current_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_elapsed_ms.max(self.initial_interval_ms)),
            max_elapsed_time: Some(Duration::from_millis(self.max_elapsed_ms)),
            ..ExponentialBackoff::default()
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub store: StoreSettings,

    /// Keyed by store id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stores: BTreeMap<String, StoreOverride>,

    #[serde(default)]
    pub loyalty: LoyaltySettings,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Account numbers the posting rules write to. Without it, business
    /// operations move stock but post nothing to the ledger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<AccountMap>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (tally.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| DbError::Config(format!("{}: {}", path.display(), e)))?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn from_toml(contents: &str) -> DbResult<Self> {
        toml::from_str(contents).map_err(|e| DbError::Config(e.to_string()))
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> DbResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| DbError::Config("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DbError::Config(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| DbError::Config(e.to_string()))?;
        std::fs::write(&path, contents).map_err(|e| DbError::Config(e.to_string()))?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.store.id.trim().is_empty() {
            return Err(DbError::Config("store.id must not be empty".into()));
        }
        if self.store.currency_decimals != 2 {
            return Err(DbError::Config(format!(
                "currency_decimals must be 2, got {}",
                self.store.currency_decimals
            )));
        }
        if self.database.max_connections == 0 {
            return Err(DbError::Config("max_connections must be greater than 0".into()));
        }

        let rates = std::iter::once(self.store.tax_rate_bps)
            .chain(self.stores.values().filter_map(|s| s.tax_rate_bps));
        for bps in rates {
            tally_core::validation::validate_bps("tax_rate_bps", bps)?;
        }
        self.loyalty.program()?;

        if let Some(map) = &self.accounts {
            let numbers = [
                &map.cash,
                &map.accounts_receivable,
                &map.inventory,
                &map.accounts_payable,
                &map.sales_revenue,
                &map.sales_tax_payable,
                &map.cost_of_goods_sold,
                &map.inventory_shrinkage,
            ];
            for number in numbers {
                tally_core::validation::validate_account_number(number)?;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TALLY_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(value) = std::env::var("TALLY_MAX_CONNECTIONS") {
            if let Ok(n) = value.parse::<u32>() {
                self.database.max_connections = n;
            }
        }

        if let Ok(id) = std::env::var("TALLY_STORE_ID") {
            self.store.id = id;
        }

        if let Ok(value) = std::env::var("TALLY_TAX_RATE_BPS") {
            match value.parse::<u32>() {
                Ok(bps) => {
                    debug!(bps, "Overriding tax rate from environment");
                    self.store.tax_rate_bps = bps;
                }
                Err(_) => warn!(value = %value, "Ignoring unparsable TALLY_TAX_RATE_BPS"),
            }
        }

        if let Ok(value) = std::env::var("TALLY_TAX_INCLUSIVE") {
            if let Ok(flag) = value.parse::<bool>() {
                self.store.tax_inclusive = flag;
            }
        }

        if let Ok(value) = std::env::var("TALLY_ALLOW_NEGATIVE_INVENTORY") {
            if let Ok(flag) = value.parse::<bool>() {
                self.store.allow_negative_inventory = flag;
            }
        }

        if let Ok(value) = std::env::var("TALLY_POINTS_RATE_BPS") {
            if let Ok(bps) = value.parse::<u32>() {
                self.loyalty.points_rate_bps = bps;
            }
        }

        if let Ok(value) = std::env::var("TALLY_POINT_VALUE_CENTS") {
            if let Ok(cents) = value.parse::<i64>() {
                self.loyalty.point_value_cents = cents;
            }
        }

        if let Ok(value) = std::env::var("TALLY_RETRY_MAX_ELAPSED_MS") {
            if let Ok(ms) = value.parse::<u64>() {
                self.retry.max_elapsed_ms = ms;
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "engine")
            .map(|dirs| dirs.config_dir().join("tally.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Store defaults with the store's own overrides applied.
    pub fn store_policy(&self, store_id: &str) -> StorePolicy {
        let over = self.stores.get(store_id).cloned().unwrap_or_default();
        StorePolicy {
            tax_rate: TaxRate::from_bps(over.tax_rate_bps.unwrap_or(self.store.tax_rate_bps)),
            tax_inclusive: over.tax_inclusive.unwrap_or(self.store.tax_inclusive),
            allow_negative_inventory: over
                .allow_negative_inventory
                .unwrap_or(self.store.allow_negative_inventory),
        }
    }

    pub fn with_accounts(mut self, accounts: AccountMap) -> Self {
        self.accounts = Some(accounts);
        self
    }

    pub fn with_store_tax(mut self, bps: u32, inclusive: bool) -> Self {
        self.store.tax_rate_bps = bps;
        self.store.tax_inclusive = inclusive;
        self
    }

    pub fn with_negative_inventory(mut self, allow: bool) -> Self {
        self.store.allow_negative_inventory = allow;
        self
    }
}
