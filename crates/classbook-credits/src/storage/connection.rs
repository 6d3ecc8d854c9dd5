use crate::config::DatabaseConfig;
use crate::error::{CreditsError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

/// Opens the SQLite pool, creating the database file when it does not exist.
pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| CreditsError::Config {
            message: format!("invalid database url '{}': {}", config.url, e),
        })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(config.busy_timeout_seconds))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .map_err(|e| CreditsError::persistence("connect", e))?;

    info!(
        "Connected to credit database {} (max_connections={})",
        config.url, config.max_connections
    );
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations");

    match sqlx::migrate!("./migrations").run(pool).await {
        Ok(_) => {
            info!("Database migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Failed to run database migrations: {}", e);
            Err(CreditsError::persistence("run_migrations", e))
        }
    }
}

/// Pool plus schema, ready for a repository.
pub async fn connect_and_migrate(config: &DatabaseConfig) -> Result<SqlitePool> {
    let pool = create_pool(config).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
