pub mod directlink;
pub mod fetcher;
pub mod http;
pub mod recursive;

pub use directlink::DirectLinkFactory;
pub use fetcher::PageFetcher;
pub use http::{HttpDownloader, http_downloader};
pub use recursive::RecursiveFactory;

use sluice_core::downloader::text_downloader;
use sluice_core::error::AppError;
use sluice_core::registry::{DownloaderRegistry, ExtractorRegistry};

/// All bundled extractors, in match order.
pub fn default_extractors() -> Result<ExtractorRegistry, AppError> {
    Ok(ExtractorRegistry::new()
        .with_factory(RecursiveFactory::new(PageFetcher::new()?)?)
        .with_factory(DirectLinkFactory::new()?))
}

/// Downloaders for the `http` (and `https`) and `text` schemes.
pub fn default_downloaders() -> DownloaderRegistry {
    DownloaderRegistry::new()
        .with_factory("http", http_downloader)
        .with_factory("text", text_downloader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registries() {
        let extractors = default_extractors().unwrap();
        let names: Vec<&str> = extractors.factories().map(|f| f.name()).collect();
        assert_eq!(names, ["recursive", "directlink"]);
        assert!(extractors.find("https://example.org/a.png").is_some());

        let downloaders = default_downloaders();
        assert!(downloaders.find("http").is_some());
        assert!(downloaders.find("text").is_some());
        assert!(downloaders.find("ytdl").is_none());
    }
}
