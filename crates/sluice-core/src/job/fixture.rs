//! Deterministic fingerprints of an extractor run, used as regression
//! fixtures.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{Flow, Handler, Job, JobEnv, JobScope, ParentContext};
use crate::downloader::DownloaderCache;
use crate::error::AppError;
use crate::format::format_map;
use crate::message::{Kwdict, sorted};
use crate::output::NullOutput;
use crate::traits::{DownloadTarget, DownloaderContext};

/// Hashes URLs, metadata, archive ids and optionally file content instead
/// of writing anything to disk.
pub struct TestJob {
    job: Job<TestHandler>,
}

impl TestJob {
    pub fn new(url: &str, parent: Option<&ParentContext>, env: JobEnv, content: bool) -> Result<Self, AppError> {
        let handler = TestHandler::new(&env, content);
        Ok(Self {
            job: Job::with_handler(url, parent, env, handler)?,
        })
    }

    /// Run the extractor to completion. Unlike the other jobs, failures are
    /// returned to the caller.
    pub async fn run(&mut self) -> Result<(), AppError> {
        self.job.pump().await
    }

    pub fn handler(&self) -> &TestHandler {
        self.job.handler()
    }

    pub fn fixture(&self) -> Fixture {
        self.job.handler().fixture()
    }
}

/// Summary of a [`TestJob`] run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fixture {
    pub url: String,
    pub keyword: String,
    pub archive: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub count: usize,
}

fn hex(hasher: &Sha256) -> String {
    format!("{:x}", hasher.clone().finalize())
}

/// Download target that feeds the bytes of every completed transfer into a
/// hash instead of a file.
#[derive(Default)]
pub struct HashSink {
    hasher: Sha256,
    buffer: Vec<u8>,
    path: PathBuf,
}

impl HashSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hexdigest(&self) -> String {
        hex(&self.hasher)
    }
}

impl DownloadTarget for HashSink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn filename(&self) -> &str {
        ""
    }

    fn has_extension(&self) -> bool {
        true
    }

    fn set_extension(&mut self, _extension: &str) -> Result<(), AppError> {
        Ok(())
    }

    fn exists(&self) -> bool {
        false
    }

    fn open(&mut self, _offset: u64) -> Result<(), AppError> {
        self.buffer.clear();
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), AppError> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    fn written(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn finish(&mut self) -> Result<(), AppError> {
        self.hasher.update(&self.buffer);
        self.buffer.clear();
        Ok(())
    }

    fn discard(&mut self) {
        self.buffer.clear();
    }
}

pub struct TestHandler {
    content: Option<(HashSink, DownloaderCache)>,
    hash_url: Sha256,
    hash_keyword: Sha256,
    hash_archive: Sha256,
    urls: Vec<String>,
    keywords: Vec<Kwdict>,
    archive_ids: Vec<String>,
}

impl TestHandler {
    pub fn new(env: &JobEnv, content: bool) -> Self {
        Self {
            content: content.then(|| (HashSink::new(), DownloaderCache::new(env.downloaders.clone()))),
            hash_url: Sha256::new(),
            hash_keyword: Sha256::new(),
            hash_archive: Sha256::new(),
            urls: Vec::new(),
            keywords: Vec::new(),
            archive_ids: Vec::new(),
        }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn keywords(&self) -> &[Kwdict] {
        &self.keywords
    }

    pub fn archive_ids(&self) -> &[String] {
        &self.archive_ids
    }

    pub fn fixture(&self) -> Fixture {
        Fixture {
            url: hex(&self.hash_url),
            keyword: hex(&self.hash_keyword),
            archive: hex(&self.hash_archive),
            content: self.content.as_ref().map(|(sink, _)| sink.hexdigest()),
            count: self.urls.len(),
        }
    }

    fn update_url(&mut self, url: &str) {
        self.hash_url.update(url.as_bytes());
        self.urls.push(url.to_string());
    }

    fn update_keyword(&mut self, kwdict: &Kwdict, to_list: bool) -> Result<(), AppError> {
        let text = serde_json::to_string(&sorted(&Value::Object(kwdict.clone())))?;
        self.hash_keyword.update(text.as_bytes());
        if to_list {
            self.keywords.push(kwdict.clone());
        }
        Ok(())
    }

    fn update_archive(&mut self, archive_fmt: &str, kwdict: &Kwdict) -> Result<(), AppError> {
        let id = format_map(archive_fmt, kwdict).map_err(|e| AppError::format("archive", e))?;
        self.hash_archive.update(id.as_bytes());
        self.archive_ids.push(id);
        Ok(())
    }

    async fn update_content(&mut self, scope: &JobScope<'_>, url: &str) -> Result<(), AppError> {
        let Some((sink, downloaders)) = self.content.as_mut() else {
            return Ok(());
        };
        // the hash sink has no path to report
        let ctx = DownloaderContext {
            output: Arc::new(NullOutput),
            ..scope.downloader_context()
        };
        let downloader = downloaders.get(&ctx, url)?;
        if !downloader.download(url, &mut *sink).await? {
            sink.discard();
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for TestHandler {
    async fn handle_url(
        &mut self,
        scope: &JobScope<'_>,
        url: &str,
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        self.update_url(url);
        self.update_keyword(kwdict, true)?;
        self.update_archive(scope.extractor.archive_fmt(), kwdict)?;
        self.update_content(scope, url).await?;
        Ok(Flow::Continue(()))
    }

    async fn handle_directory(&mut self, _scope: &JobScope<'_>, kwdict: &Kwdict) -> Result<Flow, AppError> {
        self.update_keyword(kwdict, false)?;
        Ok(Flow::Continue(()))
    }

    /// Nested sources are recorded, not followed.
    async fn handle_queue(
        &mut self,
        _scope: &JobScope<'_>,
        url: &str,
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        self.update_url(url);
        self.update_keyword(kwdict, true)?;
        Ok(Flow::Continue(()))
    }
}
