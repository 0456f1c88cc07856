//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests. Shared state
//! lives behind `Arc<Mutex<_>>` so clones handed to a job still report
//! back to the test.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::AppError;
use crate::message::Message;
use crate::output::{Output, SharedWriter};
use crate::traits::{
    DownloadTarget, Downloader, DownloaderContext, Extractor, ExtractorFactory,
};

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

type ErrorFn = Arc<dyn Fn() -> AppError + Send + Sync>;

/// Extractor that replays a fixed script of messages.
///
/// Clones share their counters but keep their own read position, so the
/// instance kept by a test can observe every extractor created from it.
#[derive(Clone)]
pub struct MockExtractor {
    category: String,
    messages: Arc<Vec<Message>>,
    position: usize,
    archive_fmt: String,
    category_transfer: bool,
    skip_support: bool,
    error: Option<ErrorFn>,
    panic: bool,
    pulled: Arc<Mutex<usize>>,
    skipped: Arc<Mutex<u64>>,
    created: Arc<Mutex<usize>>,
}

impl MockExtractor {
    pub fn new(category: &str, messages: Vec<Message>) -> Self {
        Self {
            category: category.to_string(),
            messages: Arc::new(messages),
            position: 0,
            archive_fmt: String::new(),
            category_transfer: false,
            skip_support: false,
            error: None,
            panic: false,
            pulled: Arc::new(Mutex::new(0)),
            skipped: Arc::new(Mutex::new(0)),
            created: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_archive_fmt(mut self, fmt: &str) -> Self {
        self.archive_fmt = fmt.to_string();
        self
    }

    pub fn with_category_transfer(mut self) -> Self {
        self.category_transfer = true;
        self
    }

    pub fn with_skip_support(mut self) -> Self {
        self.skip_support = true;
        self
    }

    /// Fail with `error()` once the script is exhausted.
    pub fn with_error(mut self, error: impl Fn() -> AppError + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(error));
        self
    }

    /// Panic once the script is exhausted.
    pub fn with_panic(mut self) -> Self {
        self.panic = true;
        self
    }

    /// Messages handed out so far, across all clones.
    pub fn pulled(&self) -> usize {
        *self.pulled.lock().unwrap()
    }

    pub fn skipped(&self) -> u64 {
        *self.skipped.lock().unwrap()
    }

    /// Extractors created from this script by [`MockExtractors`].
    pub fn created(&self) -> usize {
        *self.created.lock().unwrap()
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    fn category(&self) -> &str {
        &self.category
    }

    fn subcategory(&self) -> &str {
        "test"
    }

    fn category_transfer(&self) -> bool {
        self.category_transfer
    }

    fn archive_fmt(&self) -> &str {
        &self.archive_fmt
    }

    fn skip(&mut self, count: u64) -> u64 {
        if !self.skip_support {
            return 0;
        }
        let remaining = (self.messages.len() - self.position) as u64;
        let n = count.min(remaining);
        self.position += n as usize;
        *self.skipped.lock().unwrap() += n;
        n
    }

    async fn next_message(&mut self) -> Result<Option<Message>, AppError> {
        if let Some(msg) = self.messages.get(self.position) {
            self.position += 1;
            *self.pulled.lock().unwrap() += 1;
            return Ok(Some(msg.clone()));
        }
        if self.panic {
            panic!("mock extractor crashed");
        }
        match &self.error {
            Some(error) => Err(error()),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractors
// ---------------------------------------------------------------------------

/// Factory that maps exact URLs to scripted extractors.
#[derive(Clone, Default)]
pub struct MockExtractors {
    scripts: HashMap<String, MockExtractor>,
}

impl MockExtractors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, url: &str, extractor: MockExtractor) -> Self {
        self.scripts.insert(url.to_string(), extractor);
        self
    }
}

impl ExtractorFactory for MockExtractors {
    fn name(&self) -> &str {
        "mock"
    }

    fn create(&self, url: &str) -> Option<Box<dyn Extractor>> {
        let extractor = self.scripts.get(url)?;
        *extractor.created.lock().unwrap() += 1;
        Some(Box::new(extractor.clone()))
    }
}

// ---------------------------------------------------------------------------
// MockDownloader
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DownloaderState {
    outcomes: VecDeque<bool>,
    urls: Vec<String>,
    created: usize,
}

/// Downloader with scripted outcomes. Each call pops the next outcome;
/// once they run out every download succeeds.
#[derive(Clone)]
pub struct MockDownloader {
    state: Arc<Mutex<DownloaderState>>,
}

impl MockDownloader {
    /// Bytes written by every successful download.
    pub const PAYLOAD: &'static [u8] = b"mock payload";

    pub fn new(outcomes: Vec<bool>) -> Self {
        Self {
            state: Arc::new(Mutex::new(DownloaderState {
                outcomes: outcomes.into(),
                ..Default::default()
            })),
        }
    }

    /// A factory handing out instances that share this mock's state.
    pub fn factory(
        &self,
    ) -> impl Fn(&DownloaderContext) -> Result<Box<dyn Downloader>, AppError> + Send + Sync + 'static {
        let state = self.state.clone();
        move |ctx: &DownloaderContext| -> Result<Box<dyn Downloader>, AppError> {
            state.lock().unwrap().created += 1;
            Ok(Box::new(MockDownloaderInstance {
                state: state.clone(),
                output: ctx.output.clone(),
            }))
        }
    }

    /// Every URL passed to `download`, in call order.
    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn created(&self) -> usize {
        self.state.lock().unwrap().created
    }
}

struct MockDownloaderInstance {
    state: Arc<Mutex<DownloaderState>>,
    output: Arc<dyn Output>,
}

#[async_trait]
impl Downloader for MockDownloaderInstance {
    async fn download(&self, url: &str, target: &mut dyn DownloadTarget) -> Result<bool, AppError> {
        let ok = {
            let mut state = self.state.lock().unwrap();
            state.urls.push(url.to_string());
            state.outcomes.pop_front().unwrap_or(true)
        };
        if !ok {
            return Ok(false);
        }
        self.output.start(target.path());
        target.open(0)?;
        target.write(MockDownloader::PAYLOAD)?;
        target.finish()?;
        self.output.success(target.path(), 1);
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// RecordingOutput
// ---------------------------------------------------------------------------

/// Output that records started, skipped and finished paths.
#[derive(Default)]
pub struct RecordingOutput {
    starts: Mutex<Vec<PathBuf>>,
    successes: Mutex<Vec<PathBuf>>,
    skips: Mutex<Vec<PathBuf>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> Vec<PathBuf> {
        self.starts.lock().unwrap().clone()
    }

    pub fn successes(&self) -> Vec<PathBuf> {
        self.successes.lock().unwrap().clone()
    }

    pub fn skips(&self) -> Vec<PathBuf> {
        self.skips.lock().unwrap().clone()
    }
}

impl Output for RecordingOutput {
    fn start(&self, path: &Path) {
        self.starts.lock().unwrap().push(path.to_path_buf());
    }

    fn skip(&self, path: &Path) {
        self.skips.lock().unwrap().push(path.to_path_buf());
    }

    fn success(&self, path: &Path, _tries: u32) {
        self.successes.lock().unwrap().push(path.to_path_buf());
    }
}

// ---------------------------------------------------------------------------
// SharedBuffer
// ---------------------------------------------------------------------------

/// In-memory sink that can be handed out as a [`SharedWriter`].
#[derive(Clone, Default)]
pub struct SharedBuffer {
    data: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writer(&self) -> SharedWriter {
        crate::output::shared(self.clone())
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.data.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.data.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryTarget
// ---------------------------------------------------------------------------

/// Download target that keeps the transferred bytes in memory.
pub struct MemoryTarget {
    path: PathBuf,
    data: Vec<u8>,
    extension: Option<String>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("memory"),
            data: Vec::new(),
            extension: None,
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.data
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }
}

impl DownloadTarget for MemoryTarget {
    fn path(&self) -> &Path {
        &self.path
    }

    fn filename(&self) -> &str {
        "memory"
    }

    fn has_extension(&self) -> bool {
        self.extension.is_some()
    }

    fn set_extension(&mut self, extension: &str) -> Result<(), AppError> {
        self.extension = Some(extension.to_string());
        Ok(())
    }

    fn exists(&self) -> bool {
        false
    }

    fn open(&mut self, offset: u64) -> Result<(), AppError> {
        self.data.truncate(offset as usize);
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), AppError> {
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    fn written(&self) -> u64 {
        self.data.len() as u64
    }

    fn finish(&mut self) -> Result<(), AppError> {
        Ok(())
    }

    fn discard(&mut self) {
        self.data.clear();
    }
}
