//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use common::DatabaseConfig;
use persistence::{Database, DbContext};
use uuid::Uuid;

/// Unique SQLite file under the system temp directory.
pub fn unique_db_path(suffix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("x3-store-{}-{}.db", suffix, Uuid::new_v4()))
}

/// Connection URL of a fresh SQLite file, created on first connect.
pub fn sqlite_url(suffix: &str) -> String {
    format!("sqlite://{}?mode=rwc", unique_db_path(suffix).display())
}

/// Unique, already created directory under the system temp directory.
pub fn unique_db_dir(suffix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("x3-store-{}-{}", suffix, Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Migrate a fresh SQLite file inside `dir` and return its URL.
pub async fn migrated_url_in(dir: &Path) -> String {
    let url = format!("sqlite://{}?mode=rwc", dir.join("store.db").display());
    Database::connect(&DatabaseConfig::new(url.clone()).unwrap())
        .await
        .unwrap();
    url
}

/// Fresh migrated database, returned with its URL.
pub async fn migrated_database(suffix: &str) -> (Database, String) {
    let url = sqlite_url(suffix);
    let config = DatabaseConfig::new(url.clone()).unwrap();
    let database = Database::connect(&config).await.unwrap();
    (database, url)
}

/// Context over a fresh migrated database.
pub async fn migrated_context(suffix: &str) -> DbContext {
    let (database, _) = migrated_database(suffix).await;
    DbContext::new(database.get_connection())
}
