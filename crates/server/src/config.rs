//! Service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL` - `PostgreSQL` connection string (mapping table, price history)
//! - `SHOPIFY_STORE` - Shopify store domain (e.g., your-store.myshopify.com)
//! - `SHOPIFY_ADMIN_ACCESS_TOKEN` - Admin API access token of the custom app
//! - `SHOPIFY_WEBHOOK_SECRET` - Secret used to sign Shopify webhooks
//! - `KEYCRM_API_KEY` - keyCRM OpenAPI bearer key
//! - `ESPUTNIK_API_KEY` - eSputnik API key (basic auth password)
//!
//! ## Optional
//! - `HOST` - Bind address (default: 0.0.0.0)
//! - `PORT` - Listen port (default: 3000)
//! - `SHOPIFY_API_VERSION` - API version (default: 2025-01)
//! - `KEYCRM_BASE_URL` - keyCRM API root (default: <https://openapi.keycrm.app/v1>)
//! - `KEYCRM_SOURCE_ID` - keyCRM sales source for pushed orders (default: 1)
//! - `KEYCRM_WEBHOOK_TOKEN` - shared token expected in `?token=` on keyCRM webhooks
//! - `ESPUTNIK_BASE_URL` - eSputnik API root (default: <https://esputnik.com/api/v1>)
//! - `QUEUE_CONCURRENCY` - handlers per queue, 1 to 1024 (default: 5)
//! - `QUEUE_ATTEMPTS` - attempts per job including the first (default: 3)
//! - `QUEUE_BACKOFF_MS` - first retry delay, doubled per attempt (default: 5000)
//! - `LOG_FORMAT` - `json` for structured logs, anything else for text
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Sentry error sample rate (default: 1.0)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::queue::{Backoff, JobOptions, MAX_QUEUE_CONCURRENCY};

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.0;
const DEFAULT_SHOPIFY_API_VERSION: &str = "2025-01";
const DEFAULT_KEYCRM_BASE_URL: &str = "https://openapi.keycrm.app/v1";
const DEFAULT_ESPUTNIK_BASE_URL: &str = "https://esputnik.com/api/v1";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
///
/// Any of these is fatal: the process does not start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    pub shopify: ShopifyConfig,
    pub keycrm: KeycrmConfig,
    pub esputnik: EsputnikConfig,
    pub queue: QueueConfig,
    /// Emit JSON log lines instead of human-readable text
    pub json_logs: bool,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
}

/// Shopify Admin API configuration.
///
/// Implements `Debug` manually to redact the access token and webhook secret.
#[derive(Clone)]
pub struct ShopifyConfig {
    /// Shopify store domain (e.g., your-store.myshopify.com)
    pub store: String,
    /// Shopify API version (e.g., 2025-01)
    pub api_version: String,
    /// Admin API access token of the custom app
    pub access_token: SecretString,
    /// HMAC key for `X-Shopify-Hmac-Sha256`
    pub webhook_secret: SecretString,
}

impl std::fmt::Debug for ShopifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyConfig")
            .field("store", &self.store)
            .field("api_version", &self.api_version)
            .field("access_token", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .finish()
    }
}

/// keyCRM OpenAPI configuration.
#[derive(Clone)]
pub struct KeycrmConfig {
    pub api_key: SecretString,
    pub base_url: Url,
    /// Sales source id stamped on orders pushed from Shopify
    pub source_id: i64,
    /// Shared token for inbound status webhooks; `None` disables the check
    pub webhook_token: Option<SecretString>,
}

impl std::fmt::Debug for KeycrmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeycrmConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url.as_str())
            .field("source_id", &self.source_id)
            .field(
                "webhook_token",
                &self.webhook_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// eSputnik API configuration.
#[derive(Clone)]
pub struct EsputnikConfig {
    pub api_key: SecretString,
    pub base_url: Url,
}

impl std::fmt::Debug for EsputnikConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsputnikConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

/// Worker pool and retry policy shared by all queues.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub attempts: u32,
    pub backoff_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            attempts: 3,
            backoff_delay: Duration::from_secs(5),
        }
    }
}

impl QueueConfig {
    /// Job options derived from this configuration.
    #[must_use]
    pub const fn job_options(&self) -> JobOptions {
        JobOptions {
            attempts: self.attempts,
            backoff: Backoff::Exponential {
                delay: self.backoff_delay,
            },
        }
    }

    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let concurrency = parse_env_or("QUEUE_CONCURRENCY", defaults.concurrency)?;
        let attempts = parse_env_or("QUEUE_ATTEMPTS", defaults.attempts)?;
        let backoff_ms = parse_env_or("QUEUE_BACKOFF_MS", 5_000_u64)?;
        Self::new(concurrency, attempts, Duration::from_millis(backoff_ms))
    }

    fn new(concurrency: usize, attempts: u32, backoff_delay: Duration) -> Result<Self, ConfigError> {
        if !(1..=MAX_QUEUE_CONCURRENCY).contains(&concurrency) {
            return Err(ConfigError::InvalidEnvVar(
                "QUEUE_CONCURRENCY".to_string(),
                format!("must be between 1 and {MAX_QUEUE_CONCURRENCY}"),
            ));
        }
        if attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "QUEUE_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            concurrency,
            attempts,
            backoff_delay,
        })
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets look like placeholders.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_required_secret("DATABASE_URL")?;
        let host = get_env_or_default("HOST", "0.0.0.0")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("HOST".to_string(), e.to_string()))?;
        let port = parse_env_or("PORT", 3000_u16)?;

        let shopify = ShopifyConfig::from_env()?;
        let keycrm = KeycrmConfig::from_env()?;
        let esputnik = EsputnikConfig::from_env()?;
        let queue = QueueConfig::from_env()?;

        let json_logs = get_optional_env("LOG_FORMAT").is_some_and(|f| f == "json");
        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);

        Ok(Self {
            database_url,
            host,
            port,
            shopify,
            keycrm,
            esputnik,
            queue,
            json_logs,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl ShopifyConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            store: get_required_env("SHOPIFY_STORE")?,
            api_version: get_env_or_default("SHOPIFY_API_VERSION", DEFAULT_SHOPIFY_API_VERSION),
            access_token: get_validated_secret("SHOPIFY_ADMIN_ACCESS_TOKEN")?,
            webhook_secret: get_validated_secret("SHOPIFY_WEBHOOK_SECRET")?,
        })
    }
}

impl KeycrmConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let webhook_token = match get_optional_env("KEYCRM_WEBHOOK_TOKEN") {
            Some(token) => {
                check_placeholder(&token, "KEYCRM_WEBHOOK_TOKEN")?;
                Some(SecretString::from(token))
            }
            None => None,
        };

        Ok(Self {
            api_key: get_validated_secret("KEYCRM_API_KEY")?,
            base_url: get_url("KEYCRM_BASE_URL", DEFAULT_KEYCRM_BASE_URL)?,
            source_id: parse_env_or("KEYCRM_SOURCE_ID", 1_i64)?,
            webhook_token,
        })
    }
}

impl EsputnikConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: get_validated_secret("ESPUTNIK_API_KEY")?,
            base_url: get_url("ESPUTNIK_BASE_URL", DEFAULT_ESPUTNIK_BASE_URL)?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional environment variable, falling back to `default`.
fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Parse an API base URL, trimming any trailing slash so paths can be appended.
fn get_url(key: &str, default: &str) -> Result<Url, ConfigError> {
    let raw = get_env_or_default(key, default);
    parse_base_url(&raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e))
}

fn parse_base_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim_end_matches('/')).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    Ok(url)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Reject values that look like they were copied from a sample `.env`.
fn check_placeholder(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }
    Ok(())
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    check_placeholder(secret, var_name)?;

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
