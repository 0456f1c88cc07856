//! Jobs drive one extractor and route its messages to a [`Handler`].
//!
//! [`Job`] owns the extractor, the two predicate chains and the dispatch
//! loop. What happens to an accepted item is decided by the handler:
//! downloading it, printing it, hashing it or dumping it.

mod data;
mod download;
mod keyword;
mod fixture;
mod url;

use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::archive::MemoryArchives;
use crate::config::Config;
use crate::downloader::text_downloader;
use crate::error::AppError;
use crate::filter::FilterExpr;
use crate::message::{Kwdict, Message, PROTOCOL_VERSION};
use crate::output::{NullOutput, Output, SharedWriter, stdout_writer, write_line};
use crate::predicate::{
    FilterPredicate, Predicate, PredicateChain, RangePredicate, Ranges, UniquePredicate,
};
use crate::registry::{DownloaderRegistry, ExtractorRegistry};
use crate::traits::{ArchiveOpener, DownloaderContext, Extractor};

pub use data::{DataHandler, DataJob};
pub use download::{DownloadHandler, DownloadJob};
pub use keyword::{KeywordHandler, KeywordJob, keyword_lines};
pub use fixture::{Fixture, HashSink, TestHandler, TestJob};
pub use url::{UrlHandler, UrlJob};

/// Result of a handler hook. `Break` ends the run early without an error.
pub type Flow = ControlFlow<()>;

/// Filter and range applied to one kind of message.
#[derive(Clone, Default)]
pub struct ScopeOptions {
    pub filter: Option<Arc<dyn FilterExpr>>,
    pub range: Option<Ranges>,
}

/// User-selected predicates: `image` gates `Url`/`UrlList` messages,
/// `chapter` gates `Queue` messages.
#[derive(Clone, Default)]
pub struct PredicateOptions {
    pub image: ScopeOptions,
    pub chapter: ScopeOptions,
}

/// Everything a job needs from the outside world. Cheap to clone; nested
/// jobs receive a clone of their parent's environment.
#[derive(Clone)]
pub struct JobEnv {
    pub config: Arc<Config>,
    pub extractors: Arc<ExtractorRegistry>,
    pub downloaders: Arc<DownloaderRegistry>,
    pub archives: Arc<dyn ArchiveOpener>,
    pub output: Arc<dyn Output>,
    pub predicates: PredicateOptions,
    pub stdout: SharedWriter,
    pub unsupported: Option<SharedWriter>,
}

impl JobEnv {
    pub fn new(extractors: ExtractorRegistry) -> Self {
        Self {
            config: Arc::new(Config::new()),
            extractors: Arc::new(extractors),
            downloaders: Arc::new(DownloaderRegistry::new().with_factory("text", text_downloader)),
            archives: Arc::new(MemoryArchives::new()),
            output: Arc::new(NullOutput),
            predicates: PredicateOptions::default(),
            stdout: stdout_writer(),
            unsupported: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_downloaders(mut self, downloaders: DownloaderRegistry) -> Self {
        self.downloaders = Arc::new(downloaders);
        self
    }

    pub fn with_archives(mut self, archives: impl ArchiveOpener + 'static) -> Self {
        self.archives = Arc::new(archives);
        self
    }

    pub fn with_output(mut self, output: Arc<dyn Output>) -> Self {
        self.output = output;
        self
    }

    pub fn with_predicates(mut self, predicates: PredicateOptions) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn with_stdout(mut self, stdout: SharedWriter) -> Self {
        self.stdout = stdout;
        self
    }

    pub fn with_unsupported(mut self, unsupported: Option<SharedWriter>) -> Self {
        self.unsupported = unsupported;
        self
    }

    /// Print one line to the job's stdout.
    pub fn print(&self, line: &str) -> Result<(), AppError> {
        write_line(&self.stdout, line)?;
        Ok(())
    }

    /// Record a URL no extractor could handle.
    pub fn write_unsupported(&self, url: &str) {
        match &self.unsupported {
            Some(writer) => {
                if let Err(e) = write_line(writer, url) {
                    tracing::warn!(url, error = %e, "Unable to write unsupported URL");
                }
            }
            None => tracing::debug!(url, "No extractor for nested URL"),
        }
    }
}

/// Identity a nested job inherits from the job that spawned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentContext {
    pub category: String,
    pub subcategory: String,
    pub category_transfer: bool,
}

/// Per-job identity and user metadata.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub url: String,
    pub category: String,
    pub subcategory: String,
    pub user_keywords: Option<Kwdict>,
}

impl JobInfo {
    /// Add `category`/`subcategory` and the user's fixed keywords to `kwdict`.
    /// User keywords win over everything else.
    pub fn update_kwdict(&self, kwdict: &mut Kwdict) {
        kwdict.insert("category".to_string(), Value::String(self.category.clone()));
        kwdict.insert("subcategory".to_string(), Value::String(self.subcategory.clone()));
        if let Some(user) = &self.user_keywords {
            for (key, value) in user {
                kwdict.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Read-only view of the running job handed to every handler hook.
#[derive(Clone, Copy)]
pub struct JobScope<'a> {
    pub info: &'a JobInfo,
    pub extractor: &'a dyn Extractor,
    pub env: &'a JobEnv,
}

impl<'a> JobScope<'a> {
    /// `extractor.<category>.<subcategory>.<key>` with the usual fallbacks.
    pub fn config(&self, key: &str) -> Option<&'a Value> {
        self.env.config.interpolate(&[
            "extractor",
            self.info.category.as_str(),
            self.info.subcategory.as_str(),
            key,
        ])
    }

    pub fn parent_context(&self) -> ParentContext {
        ParentContext {
            category: self.info.category.clone(),
            subcategory: self.info.subcategory.clone(),
            category_transfer: self.extractor.category_transfer(),
        }
    }

    pub fn downloader_context(&self) -> DownloaderContext {
        DownloaderContext {
            scheme: String::new(),
            config: self.env.config.clone(),
            output: self.env.output.clone(),
        }
    }
}

/// What a job does with the messages that pass its predicates.
///
/// Every hook receives metadata that has already been enriched by
/// [`JobInfo::update_kwdict`], except `handle_queue`, which sees the raw
/// metadata of the nested source.
#[async_trait]
pub trait Handler: Send {
    async fn handle_url(
        &mut self,
        scope: &JobScope<'_>,
        url: &str,
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        let _ = (scope, url, kwdict);
        Ok(Flow::Continue(()))
    }

    /// Defaults to handling the primary URL only.
    async fn handle_urllist(
        &mut self,
        scope: &JobScope<'_>,
        urls: &[String],
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        match urls.first() {
            Some(url) => self.handle_url(scope, url, kwdict).await,
            None => Ok(Flow::Continue(())),
        }
    }

    async fn handle_directory(&mut self, scope: &JobScope<'_>, kwdict: &Kwdict) -> Result<Flow, AppError> {
        let _ = (scope, kwdict);
        Ok(Flow::Continue(()))
    }

    async fn handle_queue(
        &mut self,
        scope: &JobScope<'_>,
        url: &str,
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        let _ = (scope, url, kwdict);
        Ok(Flow::Continue(()))
    }
}

/// One extractor run routed through a handler.
pub struct Job<H> {
    extractor: Box<dyn Extractor>,
    info: JobInfo,
    env: JobEnv,
    pred_url: PredicateChain,
    pred_queue: PredicateChain,
    handler: H,
}

impl<H: Handler> Job<H> {
    /// Find an extractor for `url` and prepare the predicate chains.
    ///
    /// Fails with [`AppError::NoExtractor`] if no registered extractor
    /// accepts the URL.
    pub fn with_handler(
        url: &str,
        parent: Option<&ParentContext>,
        env: JobEnv,
        handler: H,
    ) -> Result<Self, AppError> {
        let mut extractor = env
            .extractors
            .find(url)
            .ok_or_else(|| AppError::NoExtractor(url.to_string()))?;
        tracing::debug!(
            category = extractor.category(),
            subcategory = extractor.subcategory(),
            url,
            "Using extractor"
        );

        let image = &env.predicates.image;
        let mut predicates: Vec<Box<dyn Predicate>> = vec![Box::new(UniquePredicate::new())];
        if let Some(filter) = &image.filter {
            predicates.push(Box::new(FilterPredicate::new(filter.clone())));
        }
        if let Some(range) = &image.range {
            let mut pred = RangePredicate::new(range.clone());
            if pred.lower() > 1 && image.filter.is_none() {
                let skipped = extractor.skip(pred.lower() - 1);
                pred.advance(skipped);
            }
            predicates.push(Box::new(pred));
        }
        let pred_url = PredicateChain::build(predicates);

        let chapter = &env.predicates.chapter;
        let mut predicates: Vec<Box<dyn Predicate>> = Vec::new();
        if let Some(filter) = &chapter.filter {
            predicates.push(Box::new(FilterPredicate::new(filter.clone())));
        }
        if let Some(range) = &chapter.range {
            predicates.push(Box::new(RangePredicate::new(range.clone())));
        }
        let pred_queue = PredicateChain::build(predicates);

        let (category, subcategory) = match parent {
            Some(parent) if parent.category_transfer => {
                (parent.category.clone(), parent.subcategory.clone())
            }
            _ => (
                extractor.category().to_string(),
                extractor.subcategory().to_string(),
            ),
        };
        let user_keywords = env
            .config
            .interpolate(&["extractor", category.as_str(), subcategory.as_str(), "keywords"])
            .and_then(Value::as_object)
            .cloned();

        Ok(Self {
            extractor,
            info: JobInfo {
                url: url.to_string(),
                category,
                subcategory,
                user_keywords,
            },
            env,
            pred_url,
            pred_queue,
            handler,
        })
    }

    pub fn info(&self) -> &JobInfo {
        &self.info
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Process every message and report any failure.
    ///
    /// Errors never escape: each one is turned into a single log line and
    /// the job ends normally.
    pub async fn run(&mut self) {
        if let Err(e) = self.pump().await {
            report(&self.info, &e);
        }
    }

    /// Pull messages until the extractor is exhausted or a handler stops.
    pub(crate) async fn pump(&mut self) -> Result<(), AppError> {
        while let Some(msg) = self.extractor.next_message().await? {
            if self.dispatch(msg).await?.is_break() {
                break;
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, msg: Message) -> Result<Flow, AppError> {
        let scope = JobScope {
            info: &self.info,
            extractor: self.extractor.as_ref(),
            env: &self.env,
        };

        match msg {
            Message::Url { url, mut kwdict } => {
                if !self.pred_url.test(&url, &kwdict)? {
                    return Ok(Flow::Continue(()));
                }
                self.info.update_kwdict(&mut kwdict);
                self.handler.handle_url(&scope, &url, &kwdict).await
            }
            Message::Directory { mut kwdict } => {
                self.info.update_kwdict(&mut kwdict);
                self.handler.handle_directory(&scope, &kwdict).await
            }
            Message::Queue { url, kwdict } => {
                if !self.pred_queue.test(&url, &kwdict)? {
                    return Ok(Flow::Continue(()));
                }
                self.handler.handle_queue(&scope, &url, &kwdict).await
            }
            Message::UrlList { urls, mut kwdict } => {
                let Some(primary) = urls.first() else {
                    tracing::warn!(category = %self.info.category, "Ignoring empty URL list");
                    return Ok(Flow::Continue(()));
                };
                if !self.pred_url.test(primary, &kwdict)? {
                    return Ok(Flow::Continue(()));
                }
                self.info.update_kwdict(&mut kwdict);
                self.handler.handle_urllist(&scope, &urls, &kwdict).await
            }
            Message::Version(version) if version != PROTOCOL_VERSION => {
                Err(AppError::UnsupportedVersion {
                    category: self.info.category.clone(),
                    version,
                })
            }
            Message::Version(_) => Ok(Flow::Continue(())),
        }
    }
}

/// Turn a job failure into one user-facing log line.
fn report(info: &JobInfo, err: &AppError) {
    let category = info.category.as_str();
    tracing::error!(category, "{}", describe_error(&info.url, err));
    if err.is_unexpected() {
        tracing::debug!(category, error = ?err, "Error details");
    }
}

/// The user-facing message for a failure while processing `url`.
pub fn describe_error(url: &str, err: &AppError) -> String {
    match err {
        AppError::Authentication => {
            "Authentication failed. Please provide a valid username/password pair.".to_string()
        }
        AppError::Authorization => {
            format!("You do not have permission to access the resource at '{url}'")
        }
        AppError::NotFound(resource) => {
            let resource = resource
                .as_deref()
                .filter(|r| !r.is_empty())
                .unwrap_or("resource (gallery/image/user)");
            format!("The {resource} at '{url}' does not exist")
        }
        AppError::Http(msg) => msg.clone(),
        AppError::Format { target, source } => {
            format!("Applying {target} format string failed: {}: {source}", source.kind())
        }
        AppError::Filter(e) => format!("Evaluating filter expression failed: {}: {e}", e.kind()),
        AppError::Io(e) => format!("Unable to download data: {e}"),
        AppError::NoExtractor(url) => format!("No suitable extractor found for '{url}'"),
        other => format!(
            "An unexpected error occurred: {}: {other}. Please run sluice again with the \
             --verbose flag, copy its output and report this issue.",
            other.kind()
        ),
    }
}
