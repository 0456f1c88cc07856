pub mod archive;
pub mod config;
pub mod downloader;
pub mod error;
pub mod filter;
pub mod format;
pub mod input;
pub mod job;
pub mod message;
pub mod output;
pub mod path;
pub mod predicate;
pub mod registry;
pub mod traits;

#[cfg(test)]
pub mod testutil;

pub use config::Config;
pub use error::AppError;
pub use job::{DataJob, DownloadJob, JobEnv, KeywordJob, TestJob, UrlJob};
pub use message::{Kwdict, Message};
pub use registry::{DownloaderRegistry, ExtractorRegistry};
pub use traits::{
    Archive, ArchiveOpener, DownloadTarget, Downloader, DownloaderContext, DownloaderFactory,
    Extractor, ExtractorFactory,
};
