//! Database connection and initialization.

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database as SeaDatabase, DatabaseConnection, DbErr, Statement,
};
use sea_orm_migration::MigratorTrait;

use common::{DatabaseConfig, StoreResult};

use super::migrations::Migrator;

/// Database wrapper for connection management
#[derive(Clone)]
pub struct Database {
    connection: Arc<DatabaseConnection>,
}

impl Database {
    /// Open a connection pool and run pending migrations.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let database = Self::open(config).await?;

        Migrator::up(database.connection(), None).await?;
        tracing::info!("Database connected and migrations applied");

        Ok(database)
    }

    /// Open a connection pool without running migrations.
    pub async fn open(config: &DatabaseConfig) -> StoreResult<Self> {
        let connection = SeaDatabase::connect(connect_options(config)).await?;
        tracing::debug!(
            backend = ?connection.get_database_backend(),
            max_connections = config.max_connections,
            "Database connection opened"
        );

        Ok(Self {
            connection: Arc::new(connection),
        })
    }

    /// Get a reference to the database connection.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Shared handle to the connection pool.
    pub fn get_connection(&self) -> Arc<DatabaseConnection> {
        Arc::clone(&self.connection)
    }

    /// Run pending migrations.
    pub async fn run_migrations(&self) -> Result<(), DbErr> {
        Migrator::up(self.connection(), None).await
    }

    /// Rollback the last migration.
    pub async fn rollback_migration(&self) -> Result<(), DbErr> {
        Migrator::down(self.connection(), Some(1)).await
    }

    /// Get migration status (list all migrations with applied status).
    pub async fn migration_status(&self) -> Result<Vec<(String, bool)>, DbErr> {
        use sea_orm::{EntityTrait, QueryOrder};
        use sea_orm_migration::seaql_migrations;

        let applied: std::collections::HashSet<String> = seaql_migrations::Entity::find()
            .order_by_asc(seaql_migrations::Column::Version)
            .all(self.connection())
            .await?
            .into_iter()
            .map(|m| m.version)
            .collect();

        let migrations: Vec<(String, bool)> = Migrator::migrations()
            .iter()
            .map(|m| {
                let name = m.name().to_string();
                let is_applied = applied.contains(&name);
                (name, is_applied)
            })
            .collect();

        Ok(migrations)
    }

    /// Drop everything and run all migrations fresh.
    pub async fn fresh_migrations(&self) -> Result<(), DbErr> {
        Migrator::fresh(self.connection()).await
    }

    /// Check database connectivity by executing a simple query.
    pub async fn ping(&self) -> Result<(), DbErr> {
        self.connection
            .execute(Statement::from_string(
                self.connection.get_database_backend(),
                "SELECT 1".to_string(),
            ))
            .await?;
        Ok(())
    }
}

/// Pool options derived from the configuration.
pub fn connect_options(config: &DatabaseConfig) -> ConnectOptions {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .sqlx_logging(config.sql_logging);
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_follow_config() {
        let mut config = DatabaseConfig::new("sqlite::memory:").unwrap();
        config.max_connections = 3;
        config.connect_timeout_secs = 2;

        let options = connect_options(&config);

        assert_eq!(options.get_url(), "sqlite::memory:");
        assert_eq!(options.get_max_connections(), Some(3));
        assert_eq!(options.get_connect_timeout(), Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_connect_runs_migrations() {
        let mut config = DatabaseConfig::new("sqlite::memory:").unwrap();
        // every pooled in-memory connection is its own database
        config.max_connections = 1;
        let database = Database::connect(&config).await.unwrap();

        database.ping().await.unwrap();
        let status = database.migration_status().await.unwrap();
        assert!(status.iter().all(|(_, applied)| *applied));
    }
}
