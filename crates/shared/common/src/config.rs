//! Store configuration loaded from environment variables.
//!
//! Missing required values are configuration errors; they are never
//! silently defaulted.

use std::env;

use serde::{Deserialize, Serialize};

use domain::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_DOCUMENT_DATABASE, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MIN_CONNECTIONS,
};

use crate::error::{StoreError, StoreResult};

/// Relational database configuration.
#[derive(Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    /// Log every SQL statement through sqlx
    pub sql_logging: bool,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("sql_logging", &self.sql_logging)
            .finish()
    }
}

impl DatabaseConfig {
    /// Configuration with default pool settings for the given URL.
    ///
    /// Fails when the URL is empty.
    pub fn new(url: impl Into<String>) -> StoreResult<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(StoreError::configuration("No connection string given"));
        }

        Ok(Self {
            url,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            sql_logging: false,
        })
    }
}

/// Document store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentStoreConfig {
    /// Cluster node URLs, tried in order
    pub nodes: Vec<String>,
    /// Logical database name used as key prefix
    pub database: String,
}

/// Complete store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    pub database: DatabaseConfig,
    pub documents: Option<DocumentStoreConfig>,
    /// Per-batch bulk write timeout, 0 = none
    pub bulk_timeout_secs: u64,
}

impl StoreConfig {
    /// Load configuration from environment variables (and `.env`).
    ///
    /// `DATABASE_URL` is required.
    pub fn from_env() -> StoreResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL")
            .ok_or_else(|| StoreError::configuration("DATABASE_URL must be set"))?;

        let mut database = DatabaseConfig::new(url)?;
        database.max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        database.min_connections = parse_or(&lookup, "DATABASE_MIN_CONNECTIONS", DEFAULT_MIN_CONNECTIONS)?;
        database.connect_timeout_secs =
            parse_or(&lookup, "DATABASE_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?;
        database.sql_logging = parse_or(&lookup, "DATABASE_SQL_LOGGING", false)?;

        let documents = lookup("DOCUMENT_STORE_NODES").map(|raw| DocumentStoreConfig {
            nodes: raw
                .split(',')
                .map(str::trim)
                .filter(|node| !node.is_empty())
                .map(String::from)
                .collect(),
            database: lookup("DOCUMENT_STORE_DATABASE")
                .unwrap_or_else(|| DEFAULT_DOCUMENT_DATABASE.to_string()),
        });

        let config = Self {
            database,
            documents,
            bulk_timeout_secs: parse_or(&lookup, "BULK_WRITE_TIMEOUT_SECS", 0)?,
        };

        tracing::debug!(?config, "Store configuration loaded");
        Ok(config)
    }
}

/// Parse an optional variable, falling back to `default` when unset.
/// A present but malformed value is a configuration error.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> StoreResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| StoreError::configuration(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}
