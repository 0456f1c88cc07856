use std::path::Path;

use sluice_core::AppError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::archive::SqliteArchive;
use crate::config::DatabaseConfig;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS archive (entry PRIMARY KEY) WITHOUT ROWID";

/// One archive database file: owns the connection pool, creates the
/// schema and vends archive handles.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (and create, if needed) the SQLite file at `path`.
    pub async fn connect(path: &Path, config: &DatabaseConfig) -> Result<Self, AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AppError::Archive(format!("Failed to open {}: {e}", path.display())))?;

        Ok(Self { pool })
    }

    /// Create the archive table if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Archive(format!("Migration failed: {e}")))?;
        Ok(())
    }

    pub fn archive(&self) -> SqliteArchive {
        SqliteArchive::new(self.pool.clone())
    }
}
