use std::collections::VecDeque;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use sluice_core::error::AppError;
use sluice_core::message::{Kwdict, Message, PROTOCOL_VERSION};
use sluice_core::traits::{Extractor, ExtractorFactory};

const PATTERN: &str = r"(?i)^https?://([^/?#]+)/((?:[^?#]+/)*)([^/?#]+)\.(jpe?g|jpe|png|gif|bmp|svg|web[mp]|avif|mp4|mkv|og[gmv]|opus|mp3|m4a|pdf|zip)(?:\?([^#]*))?(?:#(.*))?$";

/// Builds [`DirectLinkExtractor`]s for URLs that point straight at a file.
pub struct DirectLinkFactory {
    pattern: Regex,
}

impl DirectLinkFactory {
    pub fn new() -> Result<Self, AppError> {
        let pattern = Regex::new(PATTERN).map_err(|e| AppError::Config(e.to_string()))?;
        Ok(Self { pattern })
    }
}

impl ExtractorFactory for DirectLinkFactory {
    fn name(&self) -> &str {
        "directlink"
    }

    fn description(&self) -> &str {
        "Direct links to images, videos and documents"
    }

    fn create(&self, url: &str) -> Option<Box<dyn Extractor>> {
        let caps = self.pattern.captures(url)?;
        let part = |i: usize| caps.get(i).map_or("", |m| m.as_str());

        let mut kwdict = Kwdict::new();
        kwdict.insert("domain".into(), json!(part(1)));
        kwdict.insert("path".into(), json!(part(2).trim_end_matches('/')));
        kwdict.insert("filename".into(), json!(part(3)));
        kwdict.insert("extension".into(), json!(part(4).to_ascii_lowercase()));
        kwdict.insert("query".into(), json!(part(5)));
        kwdict.insert("fragment".into(), json!(part(6)));

        Some(Box::new(DirectLinkExtractor::new(url, kwdict)))
    }
}

/// Yields a single file whose metadata comes from the parts of its URL.
pub struct DirectLinkExtractor {
    messages: VecDeque<Message>,
}

impl DirectLinkExtractor {
    fn new(url: &str, kwdict: Kwdict) -> Self {
        let messages = VecDeque::from([
            Message::Version(PROTOCOL_VERSION),
            Message::directory(kwdict.clone()),
            Message::url(url, kwdict),
        ]);
        Self { messages }
    }
}

#[async_trait]
impl Extractor for DirectLinkExtractor {
    fn category(&self) -> &str {
        "directlink"
    }

    fn subcategory(&self) -> &str {
        ""
    }

    fn archive_fmt(&self) -> &str {
        "{domain}/{path}/{filename}.{extension}"
    }

    fn directory_fmt(&self) -> Vec<String> {
        vec!["{category}".to_string(), "{domain}".to_string()]
    }

    fn filename_fmt(&self) -> &str {
        "{filename}.{extension}"
    }

    fn skip(&mut self, count: u64) -> u64 {
        // only the single file can be skipped
        if count == 0 || self.messages.back().is_none_or(|m| !matches!(m, Message::Url { .. })) {
            return 0;
        }
        self.messages.pop_back();
        1
    }

    async fn next_message(&mut self) -> Result<Option<Message>, AppError> {
        Ok(self.messages.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut extractor: Box<dyn Extractor>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(msg) = extractor.next_message().await.unwrap() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_metadata_from_url() {
        let factory = DirectLinkFactory::new().unwrap();
        let url = "https://example.org/a/b/Image.JPG?size=2#top";
        let messages = collect(factory.create(url).unwrap()).await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], Message::Version(1));

        let Message::Url { url: found, kwdict } = &messages[2] else {
            panic!("expected a url message");
        };
        assert_eq!(found, url);
        assert_eq!(kwdict["domain"], "example.org");
        assert_eq!(kwdict["path"], "a/b");
        assert_eq!(kwdict["filename"], "Image");
        assert_eq!(kwdict["extension"], "jpg");
        assert_eq!(kwdict["query"], "size=2");
        assert_eq!(kwdict["fragment"], "top");
    }

    #[test]
    fn test_rejects_pages() {
        let factory = DirectLinkFactory::new().unwrap();
        assert!(factory.create("https://example.org/gallery/1").is_none());
        assert!(factory.create("https://example.org/page.html").is_none());
        assert!(factory.create("ftp://example.org/a.png").is_none());
    }

    #[tokio::test]
    async fn test_skip_drops_the_file() {
        let factory = DirectLinkFactory::new().unwrap();
        let mut extractor = factory.create("http://x.org/f.png").unwrap();
        assert_eq!(extractor.skip(3), 1);
        assert_eq!(extractor.skip(1), 0);
        let messages = collect(extractor).await;
        assert_eq!(messages.len(), 2);
    }
}
