use std::collections::VecDeque;

use async_trait::async_trait;
use regex::Regex;
use sluice_core::error::AppError;
use sluice_core::message::{Kwdict, Message, PROTOCOL_VERSION};
use sluice_core::traits::{Extractor, ExtractorFactory};
use url::Url;

use crate::fetcher::PageFetcher;

const PREFIX: &str = "recursive:";
const LINK_PATTERN: &str = r#"https?://[^\s"'<>]+"#;

/// Handles `recursive:<page url>`: every absolute link on the page is
/// queued for the extractor that recognizes it.
pub struct RecursiveFactory {
    fetcher: PageFetcher,
    links: Regex,
}

impl RecursiveFactory {
    pub fn new(fetcher: PageFetcher) -> Result<Self, AppError> {
        let links = Regex::new(LINK_PATTERN).map_err(|e| AppError::Config(e.to_string()))?;
        Ok(Self { fetcher, links })
    }
}

impl ExtractorFactory for RecursiveFactory {
    fn name(&self) -> &str {
        "recursive"
    }

    fn description(&self) -> &str {
        "Queue every link found on a page (recursive:URL)"
    }

    fn create(&self, url: &str) -> Option<Box<dyn Extractor>> {
        let page = url.strip_prefix(PREFIX)?;
        let parsed = Url::parse(page).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        Some(Box::new(RecursiveExtractor {
            page: page.to_string(),
            fetcher: self.fetcher.clone(),
            links: self.links.clone(),
            pending: None,
        }))
    }
}

pub struct RecursiveExtractor {
    page: String,
    fetcher: PageFetcher,
    links: Regex,
    pending: Option<VecDeque<Message>>,
}

impl RecursiveExtractor {
    fn collect(&self, body: &str) -> VecDeque<Message> {
        let mut messages = VecDeque::from([Message::Version(PROTOCOL_VERSION)]);
        for link in self.links.find_iter(body) {
            messages.push_back(Message::queue(link.as_str(), Kwdict::new()));
        }
        tracing::debug!(page = %self.page, links = messages.len() - 1, "Collected links");
        messages
    }
}

#[async_trait]
impl Extractor for RecursiveExtractor {
    fn category(&self) -> &str {
        "recursive"
    }

    fn subcategory(&self) -> &str {
        ""
    }

    async fn next_message(&mut self) -> Result<Option<Message>, AppError> {
        if self.pending.is_none() {
            let body = self.fetcher.fetch(&self.page).await?;
            self.pending = Some(self.collect(&body));
        }
        Ok(self.pending.as_mut().and_then(VecDeque::pop_front))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn factory() -> RecursiveFactory {
        RecursiveFactory::new(PageFetcher::new().unwrap()).unwrap()
    }

    #[test]
    fn test_only_prefixed_http_urls() {
        let factory = factory();
        assert!(factory.create("recursive:https://example.org/").is_some());
        assert!(factory.create("https://example.org/").is_none());
        assert!(factory.create("recursive:file:///etc").is_none());
    }

    #[tokio::test]
    async fn test_queues_every_link() {
        let server = MockServer::start().await;
        let body = r#"<a href="https://a.org/1.jpg">one</a> text http://b.org/page <img src='https://c.org/x.png'>"#;
        Mock::given(method("GET"))
            .and(path("/index"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let mut extractor = factory()
            .create(&format!("recursive:{}/index", server.uri()))
            .unwrap();
        let mut queued = Vec::new();
        while let Some(msg) = extractor.next_message().await.unwrap() {
            if let Message::Queue { url, .. } = msg {
                queued.push(url);
            }
        }
        assert_eq!(queued, ["https://a.org/1.jpg", "http://b.org/page", "https://c.org/x.png"]);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let mut extractor = factory().create(&format!("recursive:{}/", server.uri())).unwrap();
        assert!(matches!(extractor.next_message().await, Err(AppError::Authorization)));
    }
}
