use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SESSION_HOURS: i64 = 24;
const DEFAULT_ORDER_PAGE_URL: &str = "http://localhost:3000/order";
const DEFAULT_QR_TEMPLATE: &str = "compact2";
const DEV_DEFAULT_QR_SECRET: &str = "development-only-qr-token-secret-change-me";

/// Loyalty point policy. The defaults are business policy and must not drift.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LoyaltyConfig {
    /// Discount value of one point when redeemed
    #[serde(default = "default_redeem_value_per_point")]
    #[validate(range(min = 1))]
    pub redeem_value_per_point: i64,

    /// Smallest balance that may be redeemed
    #[serde(default = "default_min_redeem_points")]
    #[validate(range(min = 0))]
    pub min_redeem_points: i32,

    /// Amount spent to earn one point
    #[serde(default = "default_currency_per_point")]
    #[validate(range(min = 1))]
    pub currency_per_point: i64,

    /// Smallest settled amount that earns points
    #[serde(default = "default_min_order_for_points")]
    #[validate(range(min = 0))]
    pub min_order_for_points: i64,
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        Self {
            redeem_value_per_point: default_redeem_value_per_point(),
            min_redeem_points: default_min_redeem_points(),
            currency_per_point: default_currency_per_point(),
            min_order_for_points: default_min_order_for_points(),
        }
    }
}

impl LoyaltyConfig {
    pub fn redeem_value(&self) -> Decimal {
        Decimal::from(self.redeem_value_per_point)
    }

    pub fn accrual_unit(&self) -> Decimal {
        Decimal::from(self.currency_per_point)
    }

    pub fn accrual_minimum(&self) -> Decimal {
        Decimal::from(self.min_order_for_points)
    }
}

/// Merchant bank identity encoded into transfer QR codes
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BankConfig {
    #[serde(default)]
    pub bank_code: Option<String>,

    #[serde(default)]
    pub account_no: Option<String>,

    #[serde(default)]
    pub account_name: Option<String>,

    /// VietQR image template
    #[serde(default = "default_qr_template")]
    pub template: String,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            bank_code: None,
            account_no: None,
            account_name: None,
            template: default_qr_template(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Per-request timeout applied by the HTTP layer
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Capacity of the domain event channel
    #[serde(default = "default_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// Capacity of each notification room
    #[serde(default = "default_channel_capacity")]
    #[validate(range(min = 1))]
    pub notification_channel_capacity: usize,

    /// Lifetime of a dining session in hours
    #[serde(default = "default_session_hours")]
    #[validate(range(min = 1, max = 720))]
    pub qr_session_duration_hours: i64,

    /// Key used to sign table QR tokens
    #[validate(length(min = 16))]
    pub qr_token_secret: String,

    /// Customer ordering page encoded into each table QR
    #[serde(default = "default_order_page_url")]
    pub order_page_url: String,

    #[serde(default)]
    #[validate]
    pub loyalty: LoyaltyConfig,

    #[serde(default)]
    pub bank: BankConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(
        database_url: String,
        qr_token_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            event_channel_capacity: default_channel_capacity(),
            notification_channel_capacity: default_channel_capacity(),
            qr_session_duration_hours: default_session_hours(),
            qr_token_secret,
            order_page_url: default_order_page_url(),
            loyalty: LoyaltyConfig::default(),
            bank: BankConfig::default(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn session_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(self.qr_session_duration_hours)
    }

    fn validate_secrets(&self) -> Result<(), validator::ValidationErrors> {
        let mut errors = validator::ValidationErrors::new();
        if !self.is_development() && self.qr_token_secret.trim() == DEV_DEFAULT_QR_SECRET {
            let mut err = ValidationError::new("qr_token_secret_default_dev");
            err.message = Some(
                "The bundled development QR secret must not be used outside development. Set APP__QR_TOKEN_SECRET."
                    .into(),
            );
            errors.add("qr_token_secret", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_request_timeout_secs() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_session_hours() -> i64 {
    DEFAULT_SESSION_HOURS
}

fn default_order_page_url() -> String {
    DEFAULT_ORDER_PAGE_URL.to_string()
}

fn default_qr_template() -> String {
    DEFAULT_QR_TEMPLATE.to_string()
}

fn default_redeem_value_per_point() -> i64 {
    3_000
}
fn default_min_redeem_points() -> i32 {
    30
}
fn default_currency_per_point() -> i64 {
    100_000
}
fn default_min_order_for_points() -> i64 {
    300_000
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("tableside_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Loads configuration rooted at `config_dir`; split out so tests can point at a temp dir.
pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://tableside.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("qr_token_secret", DEV_DEFAULT_QR_SECRET)?
        .add_source(
            File::with_name(&config_dir.join("default").to_string_lossy()).required(false),
        )
        .add_source(File::with_name(&config_dir.join(run_env).to_string_lossy()).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_secrets().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
