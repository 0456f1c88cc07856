use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::{DownloaderFactory, Extractor, ExtractorFactory};

/// Ordered list of extractor factories; the first one that accepts a URL wins.
#[derive(Default)]
pub struct ExtractorRegistry {
    factories: Vec<Box<dyn ExtractorFactory>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(mut self, factory: impl ExtractorFactory + 'static) -> Self {
        self.register(factory);
        self
    }

    pub fn register(&mut self, factory: impl ExtractorFactory + 'static) {
        self.factories.push(Box::new(factory));
    }

    pub fn find(&self, url: &str) -> Option<Box<dyn Extractor>> {
        self.factories.iter().find_map(|factory| factory.create(url))
    }

    pub fn factories(&self) -> impl Iterator<Item = &dyn ExtractorFactory> {
        self.factories.iter().map(|f| f.as_ref())
    }
}

/// Downloader factories keyed by normalized URL scheme.
#[derive(Default, Clone)]
pub struct DownloaderRegistry {
    factories: HashMap<String, Arc<dyn DownloaderFactory>>,
}

impl DownloaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(mut self, scheme: &str, factory: impl DownloaderFactory + 'static) -> Self {
        self.register(scheme, factory);
        self
    }

    pub fn register(&mut self, scheme: &str, factory: impl DownloaderFactory + 'static) {
        self.factories.insert(scheme.to_string(), Arc::new(factory));
    }

    pub fn find(&self, scheme: &str) -> Option<Arc<dyn DownloaderFactory>> {
        self.factories.get(scheme).cloned()
    }
}
