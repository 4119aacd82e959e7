//! Configuration management for pub/sub wrapper services

use serde::Deserialize;
use std::env;
use thiserror::Error;

/// Default message bus URL
pub const DEFAULT_URL: &str = "nats://localhost:4222";

/// Default subject prefix for topic subjects
pub const DEFAULT_SUBJECT_PREFIX: &str = "pubsub";

/// Default number of handler invocations running at once per subscription
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 10;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// How topic and subscription listings treat errors from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListPolicy {
    /// Return the first listing error to the caller
    #[default]
    Strict,
    /// Stop at the first listing error, drop it, keep what was collected
    Lenient,
}

/// Message bus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub url: String,
    pub subject_prefix: String,
    #[serde(default)]
    pub list_policy: ListPolicy,
    pub max_concurrent_handlers: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            list_policy: ListPolicy::default(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }
}

impl BusConfig {
    /// Build the bus configuration from `PUBSUB_*` variables in `source`
    pub fn from_environment(source: config::Environment) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .set_default("url", DEFAULT_URL)?
            .set_default("subject_prefix", DEFAULT_SUBJECT_PREFIX)?
            .set_default("list_policy", "strict")?
            .set_default("max_concurrent_handlers", DEFAULT_MAX_CONCURRENT_HANDLERS as u64)?
            .add_source(source)
            .build()?;

        let bus: BusConfig = settings.try_deserialize()?;
        bus.validate()?;
        Ok(bus)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_handlers == 0 {
            return Err(ConfigError::Invalid {
                key: "max_concurrent_handlers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.subject_prefix.is_empty() || self.subject_prefix.contains(['*', '>', ' ']) {
            return Err(ConfigError::Invalid {
                key: "subject_prefix",
                reason: format!("{:?} is not a valid subject token", self.subject_prefix),
            });
        }
        Ok(())
    }
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bus: BusConfig,
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let bus = BusConfig::from_environment(
            config::Environment::with_prefix("PUBSUB").try_parsing(true),
        )?;

        let log_level = env::var("LOG_LEVEL").ok();

        Ok(Self { bus, log_level })
    }

    /// Get message bus URL
    pub fn bus_url(&self) -> &str {
        &self.bus.url
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}
