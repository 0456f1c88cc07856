use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::AppError;
use crate::message::Message;
use crate::output::Output;

/// Scrapes one source and yields [`Message`]s in the order they should be
/// acted upon.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn category(&self) -> &str;

    fn subcategory(&self) -> &str;

    /// Whether nested jobs spawned from this extractor inherit its
    /// category and subcategory.
    fn category_transfer(&self) -> bool {
        false
    }

    /// Template rendered against item metadata to build archive keys.
    fn archive_fmt(&self) -> &str {
        ""
    }

    /// Directory templates, one per path segment.
    fn directory_fmt(&self) -> Vec<String> {
        vec!["{category}".to_string()]
    }

    fn filename_fmt(&self) -> &str {
        "{filename}.{extension}"
    }

    /// Skip up to `count` items without yielding them. Returns how many
    /// items were actually skipped.
    fn skip(&mut self, count: u64) -> u64 {
        let _ = count;
        0
    }

    /// Pull the next message. `Ok(None)` ends the stream.
    async fn next_message(&mut self) -> Result<Option<Message>, AppError>;
}

/// Builds an extractor for URLs it recognizes.
pub trait ExtractorFactory: Send + Sync {
    /// Short identifier shown by `--list-extractors`.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Return an extractor for `url`, or `None` if the URL is not handled.
    fn create(&self, url: &str) -> Option<Box<dyn Extractor>>;
}

/// Writable destination for one downloaded resource.
///
/// Implemented by the on-disk path formatter and by the hashing sink used
/// for fixtures.
pub trait DownloadTarget: Send {
    fn path(&self) -> &Path;

    fn filename(&self) -> &str;

    fn has_extension(&self) -> bool;

    /// Set the extension of a target whose metadata did not provide one.
    fn set_extension(&mut self, extension: &str) -> Result<(), AppError>;

    /// Whether the target is already present and should not be fetched.
    fn exists(&self) -> bool;

    /// Write into a temporary `.part` file and move it into place on
    /// [`DownloadTarget::finish`].
    fn part_enable(&mut self) {}

    /// Number of bytes already present from an earlier, interrupted attempt.
    fn part_size(&self) -> u64 {
        0
    }

    /// Prepare for writing. An `offset` above zero appends to existing data.
    fn open(&mut self, offset: u64) -> Result<(), AppError>;

    fn write(&mut self, chunk: &[u8]) -> Result<(), AppError>;

    /// Bytes written since the last `open`, including the resume offset.
    fn written(&self) -> u64;

    /// Complete a successful transfer.
    fn finish(&mut self) -> Result<(), AppError>;

    /// Drop an incomplete transfer.
    fn discard(&mut self) {}
}

/// Transfers the resource behind a URL into a [`DownloadTarget`].
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Returns `Ok(false)` for a failed transfer that may be retried with a
    /// fallback URL; `Err` is reserved for local failures.
    async fn download(&self, url: &str, target: &mut dyn DownloadTarget) -> Result<bool, AppError>;
}

/// What a downloader gets to see when it is constructed.
#[derive(Clone)]
pub struct DownloaderContext {
    pub scheme: String,
    pub config: Arc<Config>,
    pub output: Arc<dyn Output>,
}

impl DownloaderContext {
    /// Look up `downloader.<scheme>.<key>`, falling back to `downloader.<key>`.
    pub fn config(&self, key: &str) -> Option<&serde_json::Value> {
        self.config.interpolate(&["downloader", self.scheme.as_str(), key])
    }

    pub fn config_u64(&self, key: &str, default: u64) -> u64 {
        self.config(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    pub fn config_bool(&self, key: &str, default: bool) -> bool {
        self.config(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }
}

/// Constructs downloaders for one URL scheme.
pub trait DownloaderFactory: Send + Sync {
    fn create(&self, ctx: &DownloaderContext) -> Result<Box<dyn Downloader>, AppError>;
}

impl<F> DownloaderFactory for F
where
    F: Fn(&DownloaderContext) -> Result<Box<dyn Downloader>, AppError> + Send + Sync,
{
    fn create(&self, ctx: &DownloaderContext) -> Result<Box<dyn Downloader>, AppError> {
        self(ctx)
    }
}

/// Persistent record of already downloaded items.
#[async_trait]
pub trait Archive: Send + Sync {
    async fn contains(&self, key: &str) -> Result<bool, AppError>;

    async fn add(&self, key: &str) -> Result<(), AppError>;
}

/// Opens the archive configured for a job.
#[async_trait]
pub trait ArchiveOpener: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Box<dyn Archive>, AppError>;
}
