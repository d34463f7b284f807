use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_PAYMOB_BASE_URL: &str = "https://accept.paymob.com/api";

/// Bare environment variables that override the matching `paymob.*` keys.
const PAYMOB_ENV_OVERRIDES: [(&str, &str); 3] = [
    ("PAYMOB_API_KEY", "paymob.api_key"),
    ("PAYMOB_INTEGRATION_ID", "paymob.integration_id"),
    ("PAYMOB_IFRAME_ID", "paymob.iframe_id"),
];

/// Paymob Accept credentials and request tuning
#[derive(Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymobConfig {
    /// Merchant API key exchanged for a short-lived auth token
    #[validate(length(min = 1))]
    pub api_key: String,

    /// Card (or wallet) integration the payment key is issued for
    pub integration_id: u64,

    /// Hosted iframe used to build the payment URL
    #[validate(length(min = 1))]
    pub iframe_id: String,

    #[serde(default = "default_paymob_base_url")]
    #[validate(url)]
    pub base_url: String,

    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// ISO country sent in billing data
    #[serde(default = "default_country")]
    pub country: String,

    #[serde(default = "default_true_bool")]
    pub delivery_needed: bool,

    /// Lifetime of a payment key in seconds
    #[serde(default = "default_payment_key_expiry_secs")]
    #[validate(range(min = 60))]
    pub payment_key_expiry_secs: u64,

    /// Per-request timeout; unset waits for the provider indefinitely
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// How many times reconciliation looks up the local order before giving up
    #[serde(default = "default_reconcile_lookup_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub reconcile_lookup_attempts: u32,

    #[serde(default = "default_reconcile_lookup_backoff_ms")]
    pub reconcile_lookup_backoff_ms: u64,
}

impl PaymobConfig {
    /// Minimal configuration with every optional setting at its default.
    pub fn new(api_key: impl Into<String>, integration_id: u64, iframe_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            integration_id,
            iframe_id: iframe_id.into(),
            base_url: default_paymob_base_url(),
            currency: default_currency(),
            country: default_country(),
            delivery_needed: true,
            payment_key_expiry_secs: default_payment_key_expiry_secs(),
            request_timeout_secs: None,
            reconcile_lookup_attempts: default_reconcile_lookup_attempts(),
            reconcile_lookup_backoff_ms: default_reconcile_lookup_backoff_ms(),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn reconcile_lookup_backoff(&self) -> Duration {
        Duration::from_millis(self.reconcile_lookup_backoff_ms)
    }
}

impl std::fmt::Debug for PaymobConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymobConfig")
            .field("api_key", &"<redacted>")
            .field("integration_id", &self.integration_id)
            .field("iframe_id", &self.iframe_id)
            .field("base_url", &self.base_url)
            .field("currency", &self.currency)
            .field("country", &self.country)
            .field("delivery_needed", &self.delivery_needed)
            .field("payment_key_expiry_secs", &self.payment_key_expiry_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("reconcile_lookup_attempts", &self.reconcile_lookup_attempts)
            .field("reconcile_lookup_backoff_ms", &self.reconcile_lookup_backoff_ms)
            .finish()
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

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Overall HTTP request timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// Paymob credentials and provider settings
    #[validate]
    pub paymob: PaymobConfig,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything but the essentials
    pub fn new(
        database_url: String,
        host: String,
        port: u16,
        environment: String,
        paymob: PaymobConfig,
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
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            paymob,
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Explicitly configured CORS origins, trimmed and without blanks
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && self.cors_origins().is_empty() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_pool_bounds");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
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
    60
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_true_bool() -> bool {
    true
}

fn default_paymob_base_url() -> String {
    DEFAULT_PAYMOB_BASE_URL.to_string()
}

fn default_currency() -> String {
    "EGP".to_string()
}

fn default_country() -> String {
    "EG".to_string()
}

fn default_payment_key_expiry_secs() -> u64 {
    3600
}

fn default_reconcile_lookup_attempts() -> u32 {
    3
}

fn default_reconcile_lookup_backoff_ms() -> u64 {
    500
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

    let default_directive = format!("paymob_storefront={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
/// 5. `PAYMOB_API_KEY`, `PAYMOB_INTEGRATION_ID`, `PAYMOB_IFRAME_ID`
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let paymob_overrides = PAYMOB_ENV_OVERRIDES
        .iter()
        .filter_map(|(var, key)| {
            env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| (*key, v))
        })
        .collect::<Vec<_>>();

    load_config_from(Path::new(CONFIG_DIR), &run_env, &paymob_overrides)
}

/// Builds the configuration from `config_dir` with explicit `paymob.*` overrides.
pub fn load_config_from(
    config_dir: &Path,
    run_env: &str,
    paymob_overrides: &[(&str, String)],
) -> Result<AppConfig, AppConfigError> {
    // NOTE: Paymob credentials have no defaults; a checkout against placeholder
    // credentials would only fail later at the provider.
    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    for (key, value) in paymob_overrides {
        builder = builder.set_override(*key, value.as_str())?;
    }

    let config = builder.build()?;

    // Check for Paymob credentials before deserialization to provide a clear error message
    let missing = PAYMOB_ENV_OVERRIDES
        .iter()
        .filter(|(_, key)| {
            config
                .get_string(key)
                .map(|v| v.trim().is_empty())
                .unwrap_or(true)
        })
        .map(|(var, _)| *var)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        error!(
            "Paymob is not configured. Set {} (or the matching APP__PAYMOB__* variables).",
            missing.join(", ")
        );
        return Err(AppConfigError::Load(ConfigError::NotFound(format!(
            "missing required Paymob settings: {}",
            missing.join(", ")
        ))));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
