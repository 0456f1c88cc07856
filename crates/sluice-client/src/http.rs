//! Streaming HTTP downloader.
//!
//! Transient failures (connection errors, `429`, `5xx`, truncated bodies)
//! are retried with a linear back-off; any other error status fails the
//! attempt at once so the job can move on to a fallback URL. With `.part`
//! files enabled, a retried transfer resumes with a `Range` request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, RANGE};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use sluice_core::error::AppError;
use sluice_core::output::Output;
use sluice_core::traits::{DownloadTarget, Downloader, DownloaderContext};

use crate::fetcher::{build_client, status_line};

const DEFAULT_RETRIES: u64 = 5;
const DEFAULT_TIMEOUT: f64 = 30.0;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

pub struct HttpDownloader {
    client: Client,
    retries: u32,
    part: bool,
    backoff: Duration,
    output: Arc<dyn Output>,
}

/// Outcome of a single request.
enum Attempt {
    Done,
    Skipped,
    Retry(String),
    Fail(String),
}

impl HttpDownloader {
    /// Reads `retries`, `timeout` and `part` from the `downloader.http`
    /// config section.
    pub fn new(ctx: &DownloaderContext) -> Result<Self, AppError> {
        let timeout = ctx
            .config("timeout")
            .and_then(Value::as_f64)
            .filter(|t| *t > 0.0)
            .unwrap_or(DEFAULT_TIMEOUT);
        let retries = ctx.config_u64("retries", DEFAULT_RETRIES);

        Ok(Self {
            client: build_client(Duration::from_secs_f64(timeout))?,
            retries: u32::try_from(retries).unwrap_or(u32::MAX),
            part: ctx.config_bool("part", true),
            backoff: DEFAULT_BACKOFF,
            output: ctx.output.clone(),
        })
    }

    /// Base delay between attempts; the n-th retry waits `n * backoff`.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, url: &str, target: &mut dyn DownloadTarget) -> Result<Attempt, AppError> {
        let offset = if self.part { target.part_size() } else { 0 };
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Ok(Attempt::Retry(e.to_string())),
        };

        let status = response.status();
        let offset = if status == StatusCode::PARTIAL_CONTENT && offset > 0 {
            offset
        } else if status.is_success() {
            0
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Ok(Attempt::Retry(status_line(status)));
        } else {
            return Ok(Attempt::Fail(status_line(status)));
        };

        if !target.has_extension() {
            let extension = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map_or("bin", extension_from_content_type);
            target.set_extension(extension)?;
            if target.exists() {
                self.output.skip(target.path());
                return Ok(Attempt::Skipped);
            }
        }

        let expected = response.content_length().map(|len| len + offset);
        self.output.start(target.path());
        target.open(offset)?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => target.write(&bytes)?,
                Err(e) => return Ok(Attempt::Retry(e.to_string())),
            }
        }

        if let Some(expected) = expected {
            let written = target.written();
            if written != expected {
                return Ok(Attempt::Retry(format!(
                    "file size mismatch ({written} < {expected})"
                )));
            }
        }

        target.finish()?;
        Ok(Attempt::Done)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, target: &mut dyn DownloadTarget) -> Result<bool, AppError> {
        if self.part {
            target.part_enable();
        }

        let mut tries: u32 = 0;
        loop {
            tries += 1;
            let message = match self.attempt(url, &mut *target).await? {
                Attempt::Done => {
                    self.output.success(target.path(), tries);
                    return Ok(true);
                }
                Attempt::Skipped => return Ok(true),
                Attempt::Fail(message) => {
                    tracing::error!(url, "{message}");
                    return Ok(false);
                }
                Attempt::Retry(message) => message,
            };

            if tries > self.retries {
                tracing::error!(url, "{message} ({tries}/{})", self.retries + 1);
                return Ok(false);
            }
            tracing::warn!(url, attempt = tries, "{message}, retrying");
            tokio::time::sleep(self.backoff * tries).await;
        }
    }
}

/// Factory registered for the `http` scheme.
pub fn http_downloader(ctx: &DownloaderContext) -> Result<Box<dyn Downloader>, AppError> {
    Ok(Box::new(HttpDownloader::new(ctx)?))
}

/// File extension for a `Content-Type` header value.
pub fn extension_from_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" | "image/x-bmp" | "image/x-ms-bmp" => "bmp",
        "image/svg+xml" => "svg",
        "video/webm" => "webm",
        "video/ogg" => "ogg",
        "video/mp4" => "mp4",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "application/zip" | "application/x-zip-compressed" => "zip",
        "application/pdf" => "pdf",
        "application/json" => "json",
        "text/html" => "html",
        "text/plain" => "txt",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_core::config::Config;
    use sluice_core::message::kwdict;
    use sluice_core::output::NullOutput;
    use sluice_core::path::PathFormat;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn downloader(config: serde_json::Value) -> HttpDownloader {
        let ctx = DownloaderContext {
            scheme: "http".to_string(),
            config: Arc::new(Config::from_value(config)),
            output: Arc::new(NullOutput),
        };
        HttpDownloader::new(&ctx).unwrap().with_backoff(Duration::ZERO)
    }

    fn target(dir: &std::path::Path, kw: serde_json::Value) -> PathFormat {
        let mut fmt = PathFormat::new(dir, &[], "{id}.{extension}").unwrap();
        fmt.set_directory(&kwdict(json!({}))).unwrap();
        fmt.set_keywords(&kwdict(kw)).unwrap();
        fmt
    }

    #[test]
    fn test_config_defaults_and_overrides() {
        let dl = downloader(json!({}));
        assert_eq!(dl.retries, 5);
        assert!(dl.part);

        let dl = downloader(json!({"downloader": {"retries": 2, "http": {"part": false}}}));
        assert_eq!(dl.retries, 2);
        assert!(!dl.part);
    }

    #[test]
    fn test_extension_from_content_type() {
        assert_eq!(extension_from_content_type("image/jpeg"), "jpg");
        assert_eq!(extension_from_content_type("image/PNG; charset=binary"), "png");
        assert_eq!(extension_from_content_type("application/x-unknown"), "bin");
    }

    #[tokio::test]
    async fn test_download_sets_extension_from_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/gif")
                    .set_body_bytes(b"GIF89a......".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut fmt = target(dir.path(), json!({"id": 1}));
        let ok = downloader(json!({}))
            .download(&format!("{}/img", server.uri()), &mut fmt)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(std::fs::read(dir.path().join("1.gif")).unwrap(), b"GIF89a......");
        assert!(!dir.path().join("1.gif.part").exists());
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut fmt = target(dir.path(), json!({"id": 1, "extension": "jpg"}));
        let ok = downloader(json!({}))
            .download(&format!("{}/gone", server.uri()), &mut fmt)
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_server_error_retries_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut fmt = target(dir.path(), json!({"id": 1, "extension": "jpg"}));
        let ok = downloader(json!({"downloader": {"retries": 2}}))
            .download(&format!("{}/busy", server.uri()), &mut fmt)
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_resume_from_part_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .and(header("Range", "bytes=6-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"world".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("7.txt.part"), b"hello ").unwrap();
        let mut fmt = target(dir.path(), json!({"id": 7, "extension": "txt"}));
        let ok = downloader(json!({}))
            .download(&format!("{}/file", server.uri()), &mut fmt)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(std::fs::read(dir.path().join("7.txt")).unwrap(), b"hello world");
    }
}
