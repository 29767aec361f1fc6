//! Application configuration loaded from environment variables.

use crate::error::{AppError, Result};
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Server bind address (host:port)
    pub bind_address: String,

    /// Log level
    pub log_level: String,

    /// Deployment environment: "production", "staging", "development"
    pub environment: String,

    /// Secret key for HMAC signatures on chain links.
    ///
    /// Required in production. When absent elsewhere, an ephemeral secret is
    /// generated at startup and previously signed entries become unverifiable
    /// after a restart.
    pub integrity_secret: Option<String>,

    /// Whether audit entries may be delivered asynchronously at all.
    /// When false, every entry is routed synchronously.
    pub audit_async_enabled: bool,

    /// Pending-batch size that forces a flush
    pub audit_batch_size: usize,

    /// Quiescence window in seconds before a non-empty batch flushes
    pub audit_batch_quiescence_secs: u64,

    /// Modules whose entries are always critical and synchronous
    pub audit_critical_modules: Vec<String>,

    /// Age in days past which ledger entries are purged
    pub audit_retention_days: u32,

    /// Capacity of the transient delivery queue
    pub audit_queue_capacity: usize,

    /// OTLP endpoint for span export (optional)
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| AppError::Config("DATABASE_URL not set".into()))?,
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            integrity_secret: env::var("AUDIT_INTEGRITY_SECRET").ok(),
            audit_async_enabled: env::var("AUDIT_ASYNC_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            audit_batch_size: env::var("AUDIT_BATCH_SIZE")
                .unwrap_or_else(|_| "10".into())
                .parse()
                .unwrap_or(10),
            audit_batch_quiescence_secs: env::var("AUDIT_BATCH_QUIESCENCE_SECS")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .unwrap_or(5),
            audit_critical_modules: env::var("AUDIT_CRITICAL_MODULES")
                .unwrap_or_else(|_| "auth,user,permission,approval".into())
                .split(',')
                .map(|m| m.trim().to_ascii_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            audit_retention_days: env::var("AUDIT_RETENTION_DAYS")
                .unwrap_or_else(|_| "365".into())
                .parse()
                .unwrap_or(365),
            audit_queue_capacity: env::var("AUDIT_QUEUE_CAPACITY")
                .unwrap_or_else(|_| "1024".into())
                .parse()
                .unwrap_or(1024),
            otel_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
