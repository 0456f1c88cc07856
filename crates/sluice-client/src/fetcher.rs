use std::time::Duration;

use reqwest::{Client, StatusCode};
use sluice_core::error::AppError;

/// User-Agent sent with every request.
pub const USER_AGENT: &str = concat!("sluice/", env!("CARGO_PKG_VERSION"));

/// Build the shared reqwest client.
pub fn build_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Http(e.to_string()))
}

/// Fetches page bodies for extractors that scrape HTML.
#[derive(Clone)]
pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Http(format!("Request timed out: {e}"))
            } else if e.is_connect() {
                AppError::Http(format!("Connection failed: {e}"))
            } else {
                AppError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, url));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::Http(format!("Failed to read response body: {e}")))
    }
}

/// Map an error status to the job error taxonomy.
pub fn status_error(status: StatusCode, url: &str) -> AppError {
    match status {
        StatusCode::UNAUTHORIZED => AppError::Authentication,
        StatusCode::FORBIDDEN => AppError::Authorization,
        StatusCode::NOT_FOUND | StatusCode::GONE => AppError::NotFound(None),
        _ => AppError::Http(format!("{} for {url}", status_line(status))),
    }
}

/// `404 Not Found`
pub fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    }
}
