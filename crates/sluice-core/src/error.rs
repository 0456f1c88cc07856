use thiserror::Error;

use crate::filter::FilterError;
use crate::format::FormatError;

/// Errors surfaced while running a job.
///
/// The first group is the user-facing taxonomy that `Job::run` turns into a
/// single log line each; everything that does not fit there ends up in
/// [`AppError::Extractor`] and is reported as an unexpected failure.
#[derive(Error, Debug)]
pub enum AppError {
    /// Credentials are missing or were rejected.
    #[error("authentication failed")]
    Authentication,

    /// The resource exists but may not be accessed.
    #[error("access denied")]
    Authorization,

    /// The resource is absent. Carries the kind of resource, if known.
    #[error("{}", .0.as_deref().unwrap_or(""))]
    NotFound(Option<String>),

    /// Transport-level failure.
    #[error("{0}")]
    Http(String),

    /// A format string could not be applied.
    #[error("applying {target} format string failed: {source}")]
    Format {
        target: &'static str,
        #[source]
        source: FormatError,
    },

    /// A user filter expression failed to evaluate.
    #[error("evaluating filter expression failed: {0}")]
    Filter(#[from] FilterError),

    /// Local filesystem failure.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// No extractor recognizes the URL.
    #[error("no suitable extractor found for '{0}'")]
    NoExtractor(String),

    /// The extractor speaks a message protocol version we do not know.
    #[error("unsupported message version ({category}, {version})")]
    UnsupportedVersion { category: String, version: u32 },

    /// No downloader is registered for a URL scheme.
    #[error("no downloader for scheme '{0}'")]
    UnsupportedScheme(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Download archive failure.
    #[error("archive error: {0}")]
    Archive(String),

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything an extractor raises that has no dedicated variant.
    #[error("{0}")]
    Extractor(String),
}

impl AppError {
    /// Short, stable class name for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Authentication => "AuthenticationError",
            AppError::Authorization => "AuthorizationError",
            AppError::NotFound(_) => "NotFoundError",
            AppError::Http(_) => "HttpError",
            AppError::Format { .. } => "FormatError",
            AppError::Filter(_) => "FilterError",
            AppError::Io(_) => "IoError",
            AppError::NoExtractor(_) => "NoExtractorError",
            AppError::UnsupportedVersion { .. } => "UnsupportedVersionError",
            AppError::UnsupportedScheme(_) => "UnsupportedSchemeError",
            AppError::Config(_) => "ConfigError",
            AppError::Archive(_) => "ArchiveError",
            AppError::Serialization(_) => "SerializationError",
            AppError::Extractor(_) => "ExtractorError",
        }
    }

    /// Returns true if this error falls outside the reported taxonomy.
    pub fn is_unexpected(&self) -> bool {
        !matches!(
            self,
            AppError::Authentication
                | AppError::Authorization
                | AppError::NotFound(_)
                | AppError::Http(_)
                | AppError::Format { .. }
                | AppError::Filter(_)
                | AppError::Io(_)
        )
    }

    pub fn format(target: &'static str, source: FormatError) -> Self {
        AppError::Format { target, source }
    }
}
