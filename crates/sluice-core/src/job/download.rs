use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{Flow, Handler, Job, JobEnv, JobScope, ParentContext};
use crate::archive::archive_key;
use crate::config::expand_path;
use crate::downloader::DownloaderCache;
use crate::error::AppError;
use crate::message::Kwdict;
use crate::path::PathFormat;
use crate::traits::{Archive, DownloadTarget, DownloaderContext};

/// Downloads every accepted item to disk.
pub type DownloadJob = Job<DownloadHandler>;

impl Job<DownloadHandler> {
    pub fn new(url: &str, parent: Option<&ParentContext>, env: JobEnv) -> Result<Self, AppError> {
        let handler = DownloadHandler::new(&env);
        Self::with_handler(url, parent, env, handler)
    }
}

/// State of a download job: created lazily on the first `Directory`
/// message and kept for the rest of the run.
pub struct DownloadHandler {
    pathfmt: Option<PathFormat>,
    archive: Option<Box<dyn Archive>>,
    sleep: Option<Duration>,
    downloaders: DownloaderCache,
}

impl DownloadHandler {
    pub fn new(env: &JobEnv) -> Self {
        Self {
            pathfmt: None,
            archive: None,
            sleep: None,
            downloaders: DownloaderCache::new(env.downloaders.clone()),
        }
    }

    async fn download(
        &mut self,
        scope: &JobScope<'_>,
        url: &str,
        fallback: &[String],
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        let Some(pathfmt) = self.pathfmt.as_mut() else {
            return Err(AppError::Extractor(format!(
                "received '{url}' before any directory"
            )));
        };
        pathfmt.set_keywords(kwdict)?;

        let key = match &self.archive {
            Some(archive) => {
                let key = archive_key(&scope.info.category, scope.extractor.archive_fmt(), kwdict)?;
                if archive.contains(&key).await? {
                    scope.env.output.skip(pathfmt.path());
                    return Ok(Flow::Continue(()));
                }
                Some(key)
            }
            None => None,
        };
        if pathfmt.exists() {
            scope.env.output.skip(pathfmt.path());
            return Ok(Flow::Continue(()));
        }

        if let Some(sleep) = self.sleep {
            tokio::time::sleep(sleep).await;
        }

        let ctx = scope.downloader_context();
        let mut success = attempt(&mut self.downloaders, &ctx, url, pathfmt).await?;
        if !success {
            for (num, url) in fallback.iter().enumerate() {
                let attempt_no = num + 1;
                tracing::info!(attempt = attempt_no, url = %url, "Trying fallback URL #{attempt_no}");
                if attempt(&mut self.downloaders, &ctx, url, pathfmt).await? {
                    success = true;
                    break;
                }
            }
        }

        if !success {
            tracing::error!(category = %scope.info.category, "Failed to download {}", pathfmt.filename());
            return Ok(Flow::Continue(()));
        }

        if let (Some(archive), Some(key)) = (&self.archive, key) {
            archive.add(&key).await?;
        }
        Ok(Flow::Continue(()))
    }
}

/// Try one URL with the downloader for its scheme. A scheme without a
/// downloader counts as a failed attempt.
async fn attempt(
    downloaders: &mut DownloaderCache,
    ctx: &DownloaderContext,
    url: &str,
    target: &mut PathFormat,
) -> Result<bool, AppError> {
    let downloader = match downloaders.get(ctx, url) {
        Ok(downloader) => downloader,
        Err(e) => {
            tracing::error!(url, error = %e, "Unable to select a downloader");
            return Ok(false);
        }
    };
    let ok = downloader.download(url, &mut *target).await?;
    if !ok {
        target.discard();
    }
    Ok(ok)
}

#[async_trait]
impl Handler for DownloadHandler {
    async fn handle_url(
        &mut self,
        scope: &JobScope<'_>,
        url: &str,
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        self.download(scope, url, &[], kwdict).await
    }

    /// The first URL is the primary source, the rest are fallbacks.
    async fn handle_urllist(
        &mut self,
        scope: &JobScope<'_>,
        urls: &[String],
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        match urls.split_first() {
            Some((url, fallback)) => self.download(scope, url, fallback, kwdict).await,
            None => Ok(Flow::Continue(())),
        }
    }

    async fn handle_directory(&mut self, scope: &JobScope<'_>, kwdict: &Kwdict) -> Result<Flow, AppError> {
        if self.pathfmt.is_none() {
            self.pathfmt = Some(PathFormat::from_scope(scope)?);
            self.sleep = scope
                .config("sleep")
                .and_then(Value::as_f64)
                .filter(|s| *s > 0.0)
                .map(Duration::from_secs_f64);
            if let Some(path) = scope.config("archive").and_then(Value::as_str) {
                let path = expand_path(path);
                tracing::debug!(path = %path.display(), "Opening download archive");
                self.archive = Some(scope.env.archives.open(&path).await?);
            }
        }
        if let Some(pathfmt) = self.pathfmt.as_mut() {
            pathfmt.set_directory(kwdict)?;
        }
        Ok(Flow::Continue(()))
    }

    /// Download the nested source in a child job before continuing.
    async fn handle_queue(
        &mut self,
        scope: &JobScope<'_>,
        url: &str,
        _kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        let parent = scope.parent_context();
        match DownloadJob::new(url, Some(&parent), scope.env.clone()) {
            Ok(mut child) => child.run().await,
            Err(AppError::NoExtractor(_)) => scope.env.write_unsupported(url),
            Err(e) => return Err(e),
        }
        Ok(Flow::Continue(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchives;
    use crate::config::Config;
    use crate::message::{Message, kwdict};
    use crate::registry::{DownloaderRegistry, ExtractorRegistry};
    use crate::testutil::{MockDownloader, MockExtractor, MockExtractors, RecordingOutput, SharedBuffer};
    use crate::traits::ArchiveOpener;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;

    struct Fixture {
        dir: tempfile::TempDir,
        archives: MemoryArchives,
        downloader: MockDownloader,
        output: Arc<RecordingOutput>,
    }

    impl Fixture {
        fn new(outcomes: Vec<bool>) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                archives: MemoryArchives::new(),
                downloader: MockDownloader::new(outcomes),
                output: Arc::new(RecordingOutput::new()),
            }
        }

        fn archive_path(&self) -> std::path::PathBuf {
            self.dir.path().join("archive.db")
        }

        fn env(&self, extractors: MockExtractors, extra: serde_json::Value) -> JobEnv {
            let mut config = Config::from_value(json!({
                "extractor": {
                    "base-directory": self.dir.path().to_str().unwrap(),
                    "archive": self.archive_path().to_str().unwrap(),
                    "filename": "{id}.{extension}",
                }
            }));
            config.merge(extra);
            JobEnv::new(ExtractorRegistry::new().with_factory(extractors))
                .with_config(config)
                .with_downloaders(DownloaderRegistry::new().with_factory("http", self.downloader.factory()))
                .with_archives(self.archives.clone())
                .with_output(self.output.clone())
        }

        fn archived(&self) -> usize {
            self.archives.get(&self.archive_path()).map_or(0, |a| a.len())
        }
    }

    fn gallery(messages: Vec<Message>) -> MockExtractor {
        let mut script = vec![Message::directory(kwdict(json!({"album": "one"})))];
        script.extend(messages);
        MockExtractor::new("site", script).with_archive_fmt("{id}")
    }

    fn item(url: &str, id: u64) -> Message {
        Message::url(url, kwdict(json!({"id": id, "extension": "jpg"})))
    }

    #[tokio::test]
    async fn test_downloads_into_directory_and_archives() {
        let fx = Fixture::new(vec![]);
        let extractors = MockExtractors::new().with_script("site:1", gallery(vec![item("http://a/1", 1), item("https://a/2", 2)]));
        let mut job = DownloadJob::new("site:1", None, fx.env(extractors, json!({}))).unwrap();
        job.run().await;

        assert_eq!(fx.downloader.urls(), ["http://a/1", "https://a/2"]);
        assert_eq!(fx.archived(), 2);
        assert_eq!(fx.output.successes().len(), 2);
        let expected = fx.dir.path().join("site").join("1.jpg");
        assert_eq!(fx.output.successes()[0], expected);
        assert!(expected.exists());
        // one downloader instance serves http and https
        assert_eq!(fx.downloader.created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_archived_item_is_skipped_without_download() {
        let fx = Fixture::new(vec![]);
        let archive = fx.archives.open(&fx.archive_path()).await.unwrap();
        archive.add("site1").await.unwrap();

        let extractors = MockExtractors::new().with_script("site:1", gallery(vec![item("http://a/1", 1), item("http://a/2", 2)]));
        let mut job = DownloadJob::new("site:1", None, fx.env(extractors, json!({"extractor": {"sleep": 5.0}}))).unwrap();
        let started = tokio::time::Instant::now();
        job.run().await;

        // only the second item sleeps
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(10), "{elapsed:?}");
        assert_eq!(fx.downloader.urls(), ["http://a/2"]);
        assert_eq!(fx.output.skips().len(), 1);
        assert_eq!(fx.archived(), 2);
    }

    #[tokio::test]
    async fn test_fallback_urls_until_success() {
        let fx = Fixture::new(vec![false, false, true]);
        let list = Message::url_list(
            ["http://a/primary", "http://a/fb1", "http://a/fb2", "http://a/fb3"],
            kwdict(json!({"id": 5, "extension": "jpg"})),
        );
        let extractors = MockExtractors::new().with_script("site:1", gallery(vec![list]));
        let mut job = DownloadJob::new("site:1", None, fx.env(extractors, json!({}))).unwrap();
        job.run().await;

        assert_eq!(
            fx.downloader.urls(),
            ["http://a/primary", "http://a/fb1", "http://a/fb2"]
        );
        assert_eq!(fx.archived(), 1);
    }

    #[tokio::test]
    async fn test_failed_download_is_not_archived() {
        let fx = Fixture::new(vec![false, false]);
        let list = Message::url_list(["http://a/1", "http://a/2"], kwdict(json!({"id": 1, "extension": "jpg"})));
        let extractors = MockExtractors::new().with_script("site:1", gallery(vec![list, item("http://a/3", 3)]));
        let mut job = DownloadJob::new("site:1", None, fx.env(extractors, json!({}))).unwrap();
        job.run().await;

        assert_eq!(fx.downloader.urls(), ["http://a/1", "http://a/2", "http://a/3"]);
        assert_eq!(fx.archived(), 1);
    }

    #[tokio::test]
    async fn test_unknown_scheme_counts_as_failure() {
        let fx = Fixture::new(vec![]);
        let list = Message::url_list(["ftp://a/1", "http://a/1"], kwdict(json!({"id": 1, "extension": "jpg"})));
        let extractors = MockExtractors::new().with_script("site:1", gallery(vec![list]));
        let mut job = DownloadJob::new("site:1", None, fx.env(extractors, json!({}))).unwrap();
        job.run().await;

        assert_eq!(fx.downloader.urls(), ["http://a/1"]);
        assert_eq!(fx.archived(), 1);
    }

    #[tokio::test]
    async fn test_queue_spawns_child_jobs_depth_first() {
        let fx = Fixture::new(vec![]);
        let unsupported = SharedBuffer::new();
        let parent = MockExtractor::new("parent", vec![
            Message::queue("child:1", Kwdict::new()),
            Message::queue("nowhere:1", Kwdict::new()),
            Message::queue("child:2", Kwdict::new()),
        ])
        .with_category_transfer();
        let extractors = MockExtractors::new()
            .with_script("parent:", parent)
            .with_script("child:1", gallery(vec![item("http://c/1", 1)]))
            .with_script("child:2", gallery(vec![item("http://c/2", 2)]));

        let env = fx.env(extractors, json!({})).with_unsupported(Some(unsupported.writer()));
        let mut job = DownloadJob::new("parent:", None, env).unwrap();
        job.run().await;

        assert_eq!(fx.downloader.urls(), ["http://c/1", "http://c/2"]);
        assert_eq!(unsupported.contents(), "nowhere:1\n");
        // children inherit the parent's category for paths and archive keys
        assert!(fx.dir.path().join("parent").join("1.jpg").exists());
        let archive = fx.archives.get(&fx.archive_path()).unwrap();
        assert!(archive.contains("parent1").await.unwrap());
        // every child has its own downloader cache
        assert_eq!(fx.downloader.created(), 2);
    }

    #[tokio::test]
    async fn test_url_before_directory_is_reported() {
        let fx = Fixture::new(vec![]);
        let extractor = MockExtractor::new("site", vec![item("http://a/1", 1)]);
        let extractors = MockExtractors::new().with_script("site:1", extractor);
        let mut job = DownloadJob::new("site:1", None, fx.env(extractors, json!({}))).unwrap();
        let err = job.pump().await.unwrap_err();
        assert!(err.is_unexpected());
        assert!(fx.downloader.urls().is_empty());
    }

    #[tokio::test]
    async fn test_existing_file_is_skipped() {
        let fx = Fixture::new(vec![]);
        std::fs::create_dir_all(fx.dir.path().join("site")).unwrap();
        std::fs::write(fx.dir.path().join("site").join("1.jpg"), b"x").unwrap();
        let extractors = MockExtractors::new().with_script("site:1", gallery(vec![item("http://a/1", 1)]));
        let mut job = DownloadJob::new("site:1", None, fx.env(extractors, json!({}))).unwrap();
        job.run().await;

        assert!(fx.downloader.urls().is_empty());
        assert_eq!(fx.output.skips(), [fx.dir.path().join("site").join("1.jpg")]);
        assert!(Path::new(&fx.output.skips()[0]).exists());
    }
}
