use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::AppError;
use crate::format::format_map;
use crate::message::Kwdict;
use crate::traits::{Archive, ArchiveOpener};

/// Build the archive key of an item: its category followed by the rendered
/// `archive_fmt`.
pub fn archive_key(category: &str, archive_fmt: &str, kwdict: &Kwdict) -> Result<String, AppError> {
    let id = format_map(archive_fmt, kwdict).map_err(|e| AppError::format("archive", e))?;
    Ok(format!("{category}{id}"))
}

/// Archive kept in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    entries: Mutex<HashSet<String>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Archive for MemoryArchive {
    async fn contains(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.lock().contains(key))
    }

    async fn add(&self, key: &str) -> Result<(), AppError> {
        self.lock().insert(key.to_string());
        Ok(())
    }
}

#[async_trait]
impl Archive for Arc<MemoryArchive> {
    async fn contains(&self, key: &str) -> Result<bool, AppError> {
        self.as_ref().contains(key).await
    }

    async fn add(&self, key: &str) -> Result<(), AppError> {
        self.as_ref().add(key).await
    }
}

/// Hands out one [`MemoryArchive`] per path, so jobs that name the same
/// archive share its entries.
#[derive(Debug, Default, Clone)]
pub struct MemoryArchives {
    archives: Arc<Mutex<HashMap<PathBuf, Arc<MemoryArchive>>>>,
}

impl MemoryArchives {
    pub fn new() -> Self {
        Self::default()
    }

    /// The archive registered for `path`, if any job opened it.
    pub fn get(&self, path: &Path) -> Option<Arc<MemoryArchive>> {
        self.archives
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }
}

#[async_trait]
impl ArchiveOpener for MemoryArchives {
    async fn open(&self, path: &Path) -> Result<Box<dyn Archive>, AppError> {
        let archive = self
            .archives
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(path.to_path_buf())
            .or_default()
            .clone();
        Ok(Box::new(archive))
    }
}
