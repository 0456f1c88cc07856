use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AppError;
use crate::output::Output;
use crate::registry::DownloaderRegistry;
use crate::traits::{DownloadTarget, Downloader, DownloaderContext};

/// Scheme used to select a downloader for `url`.
///
/// URLs without a scheme are treated as `http`, and `https` shares the
/// `http` downloader.
pub fn scheme_of(url: &str) -> &str {
    match url.find(':') {
        Some(pos) if &url[..pos] == "https" => "http",
        Some(pos) => &url[..pos],
        None => "http",
    }
}

/// Per-job memo of downloader instances, one per scheme.
///
/// Entries are created on first use and never evicted.
pub struct DownloaderCache {
    registry: Arc<DownloaderRegistry>,
    instances: HashMap<String, Box<dyn Downloader>>,
}

impl DownloaderCache {
    pub fn new(registry: Arc<DownloaderRegistry>) -> Self {
        Self {
            registry,
            instances: HashMap::new(),
        }
    }

    pub fn get(&mut self, ctx: &DownloaderContext, url: &str) -> Result<&dyn Downloader, AppError> {
        let scheme = scheme_of(url);
        if !self.instances.contains_key(scheme) {
            let factory = self
                .registry
                .find(scheme)
                .ok_or_else(|| AppError::UnsupportedScheme(scheme.to_string()))?;
            let ctx = DownloaderContext {
                scheme: scheme.to_string(),
                ..ctx.clone()
            };
            let instance = factory.create(&ctx)?;
            tracing::debug!(scheme, "Created downloader");
            self.instances.insert(scheme.to_string(), instance);
        }
        self.instances
            .get(scheme)
            .map(|d| d.as_ref())
            .ok_or_else(|| AppError::UnsupportedScheme(scheme.to_string()))
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Writes the text after `text:` as the file content.
pub struct TextDownloader {
    output: Arc<dyn Output>,
}

impl TextDownloader {
    pub fn new(ctx: &DownloaderContext) -> Self {
        Self {
            output: ctx.output.clone(),
        }
    }
}

#[async_trait]
impl Downloader for TextDownloader {
    async fn download(&self, url: &str, target: &mut dyn DownloadTarget) -> Result<bool, AppError> {
        let payload = url.strip_prefix("text:").unwrap_or(url);
        if !target.has_extension() {
            target.set_extension("txt")?;
            if target.exists() {
                self.output.skip(target.path());
                return Ok(true);
            }
        }
        self.output.start(target.path());
        target.open(0)?;
        target.write(payload.as_bytes())?;
        target.finish()?;
        self.output.success(target.path(), 1);
        Ok(true)
    }
}

/// Factory for [`TextDownloader`].
pub fn text_downloader(ctx: &DownloaderContext) -> Result<Box<dyn Downloader>, AppError> {
    Ok(Box::new(TextDownloader::new(ctx)))
}
