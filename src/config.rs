//! Application configuration: database settings, business rules, feature
//! flags and the site URL helpers.
//!
//! Values come from a TOML file (or defaults) and are then overridden by
//! environment variables. Configuration is resolved once at startup and
//! treated as read-only afterwards.

use crate::core::{Result, StoreError};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Database name that selects a private in-memory database.
pub const MEMORY_DATABASE: &str = ":memory:";

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSettings,
    pub database: DatabaseConfig,
    pub business: BusinessConfig,
    pub features: FeatureFlags,
    pub logging: LoggingConfig,
}

/// Site identity and public URLs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub name: String,
    pub base_url: String,
    pub assets_path: String,
    pub debug: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            name: "Storefront".to_string(),
            base_url: "http://localhost:8080".to_string(),
            assets_path: "assets".to_string(),
            debug: false,
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Directory holding the database file
    pub host: PathBuf,
    /// Database name; the file is `<host>/<name>.db`
    pub name: String,
    /// Session character set
    pub charset: String,
    /// How long a statement waits on a locked database, in milliseconds
    pub busy_timeout_ms: u64,
    /// Trivial statement used to check that a handle is still usable
    pub probe_sql: String,
    /// Whether bound parameter values are written to debug logs
    pub log_params: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            host: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("storefront"),
            name: "storefront".to_string(),
            charset: "utf8mb4".to_string(),
            busy_timeout_ms: 5_000,
            probe_sql: "SELECT 1".to_string(),
            log_params: true,
        }
    }
}

impl DatabaseConfig {
    /// Config for a database file named `name` inside `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        DatabaseConfig {
            host: dir.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Config for a private in-memory database.
    pub fn in_memory() -> Self {
        DatabaseConfig {
            host: PathBuf::from("."),
            name: MEMORY_DATABASE.to_string(),
            ..Default::default()
        }
    }

    pub fn is_memory(&self) -> bool {
        self.name == MEMORY_DATABASE
    }

    /// Path of the database file (`None` for in-memory databases).
    pub fn path(&self) -> Option<PathBuf> {
        if self.is_memory() {
            None
        } else {
            Some(self.host.join(format!("{}.db", self.name)))
        }
    }

    /// Connection string handed to the driver.
    pub fn dsn(&self) -> String {
        match self.path() {
            Some(path) => format!("file:{}?mode=rwc", path.display()),
            None => "file::memory:".to_string(),
        }
    }

    /// SQLite text encoding for the configured charset.
    pub fn encoding(&self) -> Result<&'static str> {
        match self.charset.to_ascii_lowercase().as_str() {
            "utf8" | "utf8mb4" | "utf-8" => Ok("UTF-8"),
            "utf16" | "utf-16" => Ok("UTF-16"),
            "utf16le" | "utf-16le" => Ok("UTF-16le"),
            "utf16be" | "utf-16be" => Ok("UTF-16be"),
            other => Err(StoreError::Config(format!("unsupported charset '{}'", other))),
        }
    }

    /// Overrides fields from `DB_HOST`, `DB_NAME`, `DB_CHARSET` and
    /// `DB_BUSY_TIMEOUT_MS` when they are set.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = env::var("DB_HOST") {
            self.host = PathBuf::from(host);
        }
        if let Ok(name) = env::var("DB_NAME") {
            self.name = name;
        }
        if let Ok(charset) = env::var("DB_CHARSET") {
            self.charset = charset;
        }
        if let Ok(timeout) = env::var("DB_BUSY_TIMEOUT_MS") {
            self.busy_timeout_ms = timeout.parse().map_err(|_| {
                StoreError::Config(format!("DB_BUSY_TIMEOUT_MS is not a number: '{}'", timeout))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::Config("database name must not be empty".to_string()));
        }
        if self.probe_sql.trim().is_empty() {
            return Err(StoreError::Config("probe_sql must not be empty".to_string()));
        }
        self.encoding()?;
        Ok(())
    }
}

/// Business rules shared by the storefront.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusinessConfig {
    pub currency: String,
    /// Fraction of the net price, between 0 and 1
    pub tax_rate: f64,
    /// Order total from which shipping is free
    pub free_shipping_threshold: f64,
    pub shipping_cost: f64,
    pub items_per_page: u32,
    pub max_cart_quantity: u32,
    pub session_lifetime_secs: u64,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        BusinessConfig {
            currency: "EUR".to_string(),
            tax_rate: 0.19,
            free_shipping_threshold: 50.0,
            shipping_cost: 4.99,
            items_per_page: 12,
            max_cart_quantity: 99,
            session_lifetime_secs: 7_200,
        }
    }
}

impl BusinessConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.tax_rate) {
            return Err(StoreError::Config(format!(
                "tax_rate must be between 0 and 1, got {}",
                self.tax_rate
            )));
        }
        if self.free_shipping_threshold < 0.0 || self.shipping_cost < 0.0 {
            return Err(StoreError::Config("shipping values must not be negative".to_string()));
        }
        if self.items_per_page == 0 {
            return Err(StoreError::Config("items_per_page must be at least 1".to_string()));
        }
        if self.max_cart_quantity == 0 {
            return Err(StoreError::Config("max_cart_quantity must be at least 1".to_string()));
        }
        if self.currency.len() != 3 {
            return Err(StoreError::Config(format!(
                "currency must be a three-letter code, got '{}'",
                self.currency
            )));
        }
        Ok(())
    }

    /// Shipping charged for an order of `order_total`.
    pub fn shipping_for(&self, order_total: f64) -> f64 {
        if order_total >= self.free_shipping_threshold {
            0.0
        } else {
            self.shipping_cost
        }
    }
}

/// Named on/off switches. Unknown flags are off.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct FeatureFlags(HashMap<String, bool>);

impl FeatureFlags {
    pub fn is_enabled(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }

    pub fn set(&mut self, name: impl Into<String>, enabled: bool) {
        self.0.insert(name.into(), enabled);
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
    /// Include the event target in log lines
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            with_target: false,
        }
    }
}

impl AppConfig {
    /// Overrides file values with environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.database.apply_env_overrides()?;
        if let Ok(base_url) = env::var("APP_BASE_URL") {
            self.app.base_url = base_url;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.app.base_url.trim().is_empty() {
            return Err(StoreError::Config("app.base_url must not be empty".to_string()));
        }
        self.database.validate()?;
        self.business.validate()
    }

    /// Absolute site URL for `path`.
    pub fn url(&self, path: &str) -> String {
        join_url(&self.app.base_url, path)
    }

    /// Absolute URL of a static asset.
    pub fn asset(&self, path: &str) -> String {
        self.url(&join_url(&self.app.assets_path, path))
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        format!("{}/", base)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Loads configuration from a TOML file at the given path.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let content = fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Loads, overrides from the environment, and validates configuration.
///
/// Without a path the built-in defaults are used as the base.
pub fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}
