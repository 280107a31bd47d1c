use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

pub mod queue;

use crate::error::HookError;
pub use queue::{Queue, QueueEntry};

/// Open (creating if needed) the SQLite queue database and run migrations
pub async fn init_db(db_path: impl AsRef<Path>) -> Result<SqlitePool, HookError> {
    let db_path = db_path.as_ref();

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            HookError::DatabaseError(format!("Failed to create database directory: {}", e))
        })?;
    }

    info!("Connecting to database at {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| HookError::DatabaseError(format!("Failed to connect to database: {}", e)))?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| HookError::DatabaseError(format!("Failed to run migrations: {}", e)))?;

    info!("Database initialized successfully");
    Ok(pool)
}
