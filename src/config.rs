//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::terminal::{PublicationMode, TerminalConfig, DEFAULT_EXCHANGE_NAME};

/// Storage medium behind the event store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Filesystem,
    Postgres,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage medium for event streams
    pub storage_backend: StorageBackend,

    /// Root directory of the filesystem medium
    pub event_store_dir: PathBuf,

    /// Database connection URL, required for the postgres medium
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Exchange events are published to
    pub broker_exchange: String,

    pub publication_mode: PublicationMode,

    /// Publisher confirm timeout, zero waits indefinitely
    pub publisher_ack_timeout: Duration,

    /// Publish with persistent delivery mode
    pub broker_durable: bool,

    /// Environment (development, production)
    pub environment: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage_backend = match var("EVENT_STORE_BACKEND").as_deref() {
            None | Some("filesystem") => StorageBackend::Filesystem,
            Some("memory") => StorageBackend::Memory,
            Some("postgres") => StorageBackend::Postgres,
            Some(_) => return Err(ConfigError::InvalidValue("EVENT_STORE_BACKEND")),
        };

        let event_store_dir = var("EVENT_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/events"));

        let database_url = var("DATABASE_URL");
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnv("DATABASE_URL"));
        }

        let database_max_connections = var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let broker_exchange =
            var("BROKER_EXCHANGE").unwrap_or_else(|| DEFAULT_EXCHANGE_NAME.to_string());
        if broker_exchange.is_empty() {
            return Err(ConfigError::InvalidValue("BROKER_EXCHANGE"));
        }

        let publication_mode = match var("PUBLICATION_MODE").as_deref() {
            None | Some("immediate") => PublicationMode::Immediate,
            Some("transactional") => PublicationMode::Transactional,
            Some("ack_wait") => PublicationMode::AckWait,
            Some(_) => return Err(ConfigError::InvalidValue("PUBLICATION_MODE")),
        };

        let publisher_ack_timeout = var("PUBLISHER_ACK_TIMEOUT_MS")
            .unwrap_or_else(|| "0".to_string())
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidValue("PUBLISHER_ACK_TIMEOUT_MS"))?;

        let broker_durable = var("BROKER_DURABLE")
            .unwrap_or_else(|| "true".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("BROKER_DURABLE"))?;

        let environment = var("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        Ok(Self {
            storage_backend,
            event_store_dir,
            database_url,
            database_max_connections,
            broker_exchange,
            publication_mode,
            publisher_ack_timeout,
            broker_durable,
            environment,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Terminal settings derived from the broker variables
    pub fn terminal_config(&self) -> TerminalConfig {
        TerminalConfig {
            exchange_name: self.broker_exchange.clone(),
            mode: self.publication_mode,
            publisher_ack_timeout: self.publisher_ack_timeout,
            durable: self.broker_durable,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
