use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_DATABASE_URL: &str = "sqlite://fulfillment.db?mode=rwc";

/// Only cipher the token codec implements.
pub const SUPPORTED_ENCRYPTION_ALGORITHM: &str = "AES-256-GCM";

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    pub url: String,
    #[validate(range(min = 1, max = 1000))]
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    /// Run embedded migrations on startup
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 300,
            auto_migrate: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    #[validate(custom = "validate_log_level")]
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

/// Knobs for the simulated external systems and the payment retry loop.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct BusinessRules {
    /// Percentage (0-100) of tokenization calls that fail
    #[validate(range(min = 0, max = 100))]
    pub tokenization_failure_percent: u32,

    /// Percentage (0-100) of charge attempts the gateway declines
    #[validate(range(min = 0, max = 100))]
    pub payment_rejection_percent: u32,

    /// Total charge attempts per payment, including the first
    #[validate(range(min = 1, max = 10))]
    pub max_retry_attempts: u32,

    /// Fixed wait between charge attempts
    #[validate(range(min = 100, max = 10000))]
    pub retry_delay_ms: u64,

    /// Remaining stock below this level raises a low-stock warning
    #[validate(range(min = 0))]
    pub min_stock_threshold: i32,
}

impl BusinessRules {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            tokenization_failure_percent: 10,
            payment_rejection_percent: 20,
            max_retry_attempts: 3,
            retry_delay_ms: 1000,
            min_stock_threshold: 5,
        }
    }
}

#[derive(Clone, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct EncryptionConfig {
    #[validate(custom = "validate_encryption_algorithm")]
    pub algorithm: String,
    /// Secret material for the payment token key. Base64 or raw, at least 32 bytes.
    /// Left unchecked at load time; the codec refuses to run without it.
    pub secret_key: Option<String>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            algorithm: SUPPORTED_ENCRYPTION_ALGORITHM.to_string(),
            secret_key: None,
        }
    }
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("algorithm", &self.algorithm)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationConfig {
    #[validate(email)]
    pub from_address: String,
    pub enabled: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            from_address: "orders@fulfillment.local".to_string(),
            enabled: true,
        }
    }
}

/// Sizing for the background executor that runs notifications and other
/// fire-and-forget work.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
#[validate(schema(function = "validate_executor_bounds"))]
pub struct ExecutorConfig {
    #[validate(range(min = 1, max = 256))]
    pub core_workers: usize,
    #[validate(range(min = 1, max = 256))]
    pub max_workers: usize,
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
    /// How long an idle overflow worker lingers before exiting
    pub keep_alive_secs: u64,
}

impl ExecutorConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            core_workers: 5,
            max_workers: 10,
            queue_capacity: 100,
            keep_alive_secs: 60,
        }
    }
}

/// Application configuration. Loaded once at startup and never mutated.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Deployment profile (development, test, production)
    pub environment: String,
    #[validate]
    pub server: ServerConfig,
    #[validate]
    pub database: DatabaseConfig,
    #[validate]
    pub logging: LoggingConfig,
    #[validate]
    pub business: BusinessRules,
    #[validate]
    pub encryption: EncryptionConfig,
    #[validate]
    pub notifications: NotificationConfig,
    #[validate]
    pub executor: ExecutorConfig,
}

impl AppConfig {
    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
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

fn validate_encryption_algorithm(algorithm: &str) -> Result<(), ValidationError> {
    if algorithm.eq_ignore_ascii_case(SUPPORTED_ENCRYPTION_ALGORITHM) {
        return Ok(());
    }
    let mut err = ValidationError::new("encryption_algorithm");
    err.message = Some(format!("Only {} is supported", SUPPORTED_ENCRYPTION_ALGORITHM).into());
    Err(err)
}

fn validate_executor_bounds(cfg: &ExecutorConfig) -> Result<(), ValidationError> {
    if cfg.max_workers < cfg.core_workers {
        let mut err = ValidationError::new("executor_bounds");
        err.message = Some("max_workers must be at least core_workers".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("fulfillment_api={},tower_http=debug", level);
    let filter = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new(default_directive));

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
/// 4. Environment variables (APP__SECTION__KEY)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
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

    let config = Config::builder()
        .set_default("environment", run_env.as_str())?
        .set_default("logging.level", DEFAULT_LOG_LEVEL)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config = from_config(config)?;

    if app_config.encryption.secret_key.is_none() {
        error!("No encryption secret configured (APP__ENCRYPTION__SECRET_KEY); payment token encryption will fail");
    }

    info!("Configuration loaded successfully");
    Ok(app_config)
}

/// Deserializes and validates an already-built layered config.
pub fn from_config(config: Config) -> Result<AppConfig, AppConfigError> {
    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Result<AppConfig, AppConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        from_config(config)
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.business.max_retry_attempts, 3);
        assert_eq!(cfg.business.retry_delay(), Duration::from_millis(1000));
        assert_eq!(cfg.business.payment_rejection_percent, 20);
        assert_eq!(cfg.business.tokenization_failure_percent, 10);
        assert_eq!(cfg.executor.core_workers, 5);
        assert_eq!(cfg.executor.max_workers, 10);
        assert_eq!(cfg.executor.queue_capacity, 100);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg = from_toml(
            r#"
            [business]
            payment_rejection_percent = 0
            max_retry_attempts = 5

            [encryption]
            secret_key = "0123456789abcdef0123456789abcdef"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.business.payment_rejection_percent, 0);
        assert_eq!(cfg.business.max_retry_attempts, 5);
        assert_eq!(cfg.business.retry_delay_ms, 1000);
        assert!(cfg.encryption.secret_key.is_some());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert_matches!(
            from_toml("[business]\nmax_retry_attempts = 11\n"),
            Err(AppConfigError::Validation(_))
        );
        assert_matches!(
            from_toml("[business]\nretry_delay_ms = 50\n"),
            Err(AppConfigError::Validation(_))
        );
        assert_matches!(
            from_toml("[business]\npayment_rejection_percent = 101\n"),
            Err(AppConfigError::Validation(_))
        );
    }

    #[test]
    fn unsupported_algorithm_is_rejected() {
        assert_matches!(
            from_toml("[encryption]\nalgorithm = \"DES\"\n"),
            Err(AppConfigError::Validation(_))
        );
    }

    #[test]
    fn executor_max_below_core_is_rejected() {
        assert_matches!(
            from_toml("[executor]\ncore_workers = 8\nmax_workers = 4\n"),
            Err(AppConfigError::Validation(_))
        );
    }

    #[test]
    fn secret_is_redacted_in_debug() {
        let cfg = EncryptionConfig {
            secret_key: Some("super-secret-material".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", cfg).contains("super-secret-material"));
    }
}
