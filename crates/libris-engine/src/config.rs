//! # Engine Configuration
//!
//! Configuration for the loan engine and its workers.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     LIBRIS_DB_PATH=/var/lib/libris/libris.db                           │
//! │     LIBRIS_MAX_BOOKS_PER_USER=8                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/libris/libris.toml (Linux)                               │
//! │     ~/Library/Application Support/org.libris.libris/libris.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # libris.toml
//! [database]
//! path = "/var/lib/libris/libris.db"
//! max_connections = 5
//!
//! [policy]
//! max_books_per_user = 5
//! max_renewals = 2
//! max_reservations_per_student = 5
//! reservation_window_days = 7
//! fine_rate_cents = 50
//! fallback_loan_days = 28
//!
//! [[policy.loan_periods]]
//! min_year = 1
//! max_year = 2
//! days = 14
//!
//! [workers]
//! sweep_interval_secs = 300
//! fulfillment_queue_capacity = 256
//! fulfillment_max_attempts = 5
//! fulfillment_initial_backoff_ms = 200
//! ```

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use libris_core::policy::{
    default_loan_periods, DEFAULT_FALLBACK_LOAN_DAYS, DEFAULT_MAX_BOOKS_PER_USER,
    DEFAULT_MAX_RENEWALS, DEFAULT_MAX_RESERVATIONS_PER_STUDENT, DEFAULT_RESERVATION_WINDOW_DAYS,
};
use libris_core::validation::validate_limit;
use libris_core::{LoanPeriodRule, LoanPolicy, Money};
use libris_db::DbConfig;

use crate::error::{EngineError, EngineResult};

const CONFIG_FILE_NAME: &str = "libris.toml";
const DB_FILE_NAME: &str = "libris.db";

// =============================================================================
// Sections
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file. `None` means `<platform data dir>/libris.db`.
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: 5,
        }
    }
}

/// `[policy]` section. Mirrors [`LoanPolicy`] in config-file units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub max_books_per_user: i64,
    pub max_renewals: i64,
    pub max_reservations_per_student: i64,
    pub reservation_window_days: i64,
    pub fine_rate_cents: i64,
    pub fallback_loan_days: i64,
    pub loan_periods: Vec<LoanPeriodRule>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        PolicySettings {
            max_books_per_user: DEFAULT_MAX_BOOKS_PER_USER,
            max_renewals: DEFAULT_MAX_RENEWALS,
            max_reservations_per_student: DEFAULT_MAX_RESERVATIONS_PER_STUDENT,
            reservation_window_days: DEFAULT_RESERVATION_WINDOW_DAYS,
            fine_rate_cents: 50,
            fallback_loan_days: DEFAULT_FALLBACK_LOAN_DAYS,
            loan_periods: default_loan_periods(),
        }
    }
}

/// `[workers]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Seconds between expiration sweeps.
    pub sweep_interval_secs: u64,
    /// Pending fulfillment signals before `signal()` starts dropping.
    pub fulfillment_queue_capacity: usize,
    /// Attempts per fulfillment job, including the first.
    pub fulfillment_max_attempts: u32,
    pub fulfillment_initial_backoff_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            sweep_interval_secs: 300,
            fulfillment_queue_capacity: 256,
            fulfillment_max_attempts: 5,
            fulfillment_initial_backoff_ms: 200,
        }
    }
}

impl WorkerSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.fulfillment_initial_backoff_ms)
    }
}

// =============================================================================
// Engine Config
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseSettings,
    pub policy: PolicySettings,
    pub workers: WorkerSettings,
}

impl EngineConfig {
    /// Loads configuration from file and environment.
    ///
    /// ## Loading Order
    /// 1. Start with defaults
    /// 2. Override with config file (if exists)
    /// 3. Override with environment variables
    /// 4. Validate
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
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

    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml(contents: &str) -> EngineResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        let p = &self.policy;
        let limits = [
            ("max_books_per_user", p.max_books_per_user, 1, 100),
            ("max_renewals", p.max_renewals, 0, 50),
            ("max_reservations_per_student", p.max_reservations_per_student, 1, 100),
            ("reservation_window_days", p.reservation_window_days, 1, 365),
            ("fine_rate_cents", p.fine_rate_cents, 0, 100_000),
            ("fallback_loan_days", p.fallback_loan_days, 1, 365),
        ];
        for (field, value, min, max) in limits {
            validate_limit(field, value, min, max)
                .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        }

        for rule in &p.loan_periods {
            if rule.min_year > rule.max_year || rule.days <= 0 {
                return Err(EngineError::InvalidConfig(format!(
                    "loan period {}..={} with {} days is invalid",
                    rule.min_year, rule.max_year, rule.days
                )));
            }
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        let w = &self.workers;
        if w.sweep_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "sweep_interval_secs must be greater than 0".into(),
            ));
        }
        if w.fulfillment_queue_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "fulfillment_queue_capacity must be greater than 0".into(),
            ));
        }
        if w.fulfillment_max_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "fulfillment_max_attempts must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `LIBRIS_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("LIBRIS_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        let int = |key: &str| -> Option<i64> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key, value = %raw, "Ignoring non-numeric override");
                    None
                }
            }
        };

        if let Some(v) = int("LIBRIS_MAX_BOOKS_PER_USER") {
            self.policy.max_books_per_user = v;
        }
        if let Some(v) = int("LIBRIS_MAX_RENEWALS") {
            self.policy.max_renewals = v;
        }
        if let Some(v) = int("LIBRIS_MAX_RESERVATIONS") {
            self.policy.max_reservations_per_student = v;
        }
        if let Some(v) = int("LIBRIS_RESERVATION_WINDOW_DAYS") {
            self.policy.reservation_window_days = v;
        }
        if let Some(v) = int("LIBRIS_FINE_RATE_CENTS") {
            self.policy.fine_rate_cents = v;
        }
        if let Some(v) = int("LIBRIS_SWEEP_INTERVAL_SECS") {
            if let Ok(secs) = u64::try_from(v) {
                self.workers.sweep_interval_secs = secs;
            }
        }
    }

    /// Default config file location.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "libris", "libris")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    /// The pure rule parameters.
    pub fn policy(&self) -> LoanPolicy {
        let p = &self.policy;
        LoanPolicy {
            max_books_per_user: p.max_books_per_user,
            max_renewals: p.max_renewals,
            max_reservations_per_student: p.max_reservations_per_student,
            reservation_window: ChronoDuration::days(p.reservation_window_days),
            fine_rate: Money::from_cents(p.fine_rate_cents),
            loan_periods: p.loan_periods.clone(),
            fallback_loan_days: p.fallback_loan_days,
        }
    }

    /// Database file: the configured path, else the platform data dir.
    pub fn database_path(&self) -> EngineResult<PathBuf> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }

        directories::ProjectDirs::from("org", "libris", "libris")
            .map(|dirs| dirs.data_dir().join(DB_FILE_NAME))
            .ok_or_else(|| {
                EngineError::InvalidConfig("no database path and no home directory".into())
            })
    }

    /// Pool settings for [`libris_db::Database::new`].
    pub fn db_config(&self) -> EngineResult<DbConfig> {
        Ok(DbConfig::new(self.database_path()?).max_connections(self.database.max_connections))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
