use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sluice_core::AppError;
use sluice_core::traits::{Archive, ArchiveOpener};
use sqlx::SqlitePool;

use crate::config::DatabaseConfig;
use crate::database::Database;

/// Download archive stored in the `archive` table of a SQLite file.
#[derive(Clone)]
pub struct SqliteArchive {
    pool: SqlitePool,
}

impl SqliteArchive {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn len(&self) -> Result<u64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM archive")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Archive(e.to_string()))?;
        Ok(row.0.max(0) as u64)
    }
}

#[async_trait]
impl Archive for SqliteArchive {
    async fn contains(&self, key: &str) -> Result<bool, AppError> {
        let row = sqlx::query("SELECT 1 FROM archive WHERE entry = ? LIMIT 1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Archive(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn add(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("INSERT OR IGNORE INTO archive (entry) VALUES (?)")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Archive(e.to_string()))?;
        Ok(())
    }
}

/// Opens archive files on demand and reuses the pool for a path that has
/// been opened before.
#[derive(Clone, Default)]
pub struct SqliteArchives {
    config: DatabaseConfig,
    open: Arc<Mutex<HashMap<PathBuf, Database>>>,
}

impl SqliteArchives {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            open: Arc::default(),
        }
    }

    fn cached(&self, path: &Path) -> Option<Database> {
        let open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        open.get(path).cloned()
    }
}

#[async_trait]
impl ArchiveOpener for SqliteArchives {
    async fn open(&self, path: &Path) -> Result<Box<dyn Archive>, AppError> {
        if let Some(db) = self.cached(path) {
            return Ok(Box::new(db.archive()));
        }

        let db = Database::connect(path, &self.config).await?;
        db.migrate().await?;
        tracing::debug!(path = %path.display(), "Opened archive database");
        self.open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), db.clone());
        Ok(Box::new(db.archive()))
    }
}
