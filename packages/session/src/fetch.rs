//! Reading dataset text from files and URLs.
//!
//! URLs are fetched with retry on transient failures (connection errors,
//! timeouts, HTTP 429, and 5xx) with exponential backoff. Other 4xx
//! responses are permanent and fail immediately.

use std::time::Duration;

use crate::SessionError;
use crate::config::DataSource;

/// Maximum number of retries for a URL.
pub const MAX_RETRIES: u32 = 3;

/// Reads the full text of `source`.
///
/// # Errors
///
/// Returns [`SessionError`] if the file cannot be read, or the URL still
/// fails after all retries.
pub async fn fetch_text(source: &DataSource, client: &reqwest::Client) -> Result<String, SessionError> {
    match source {
        DataSource::Path(path) => {
            log::debug!("Reading {}", path.display());
            tokio::fs::read_to_string(path)
                .await
                .map_err(|error| SessionError::Read {
                    path: path.display().to_string(),
                    error,
                })
        }
        DataSource::Url(url) => fetch_url(url, client, MAX_RETRIES).await,
    }
}

/// Reads `source` if present.
///
/// # Errors
///
/// Returns [`SessionError`] if the source is present but cannot be read.
pub async fn fetch_optional(
    source: Option<&DataSource>,
    client: &reqwest::Client,
) -> Result<Option<String>, SessionError> {
    match source {
        Some(source) => fetch_text(source, client).await.map(Some),
        None => Ok(None),
    }
}

async fn fetch_url(url: &str, client: &reqwest::Client, max_retries: u32) -> Result<String, SessionError> {
    log::info!("Fetching {url}");
    let mut last_error = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << attempt);
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match client.get(url).send().await {
            Err(e) => {
                if is_transient(&e) {
                    log::warn!("  transient error fetching {url}: {e}");
                    last_error = Some(SessionError::Http(e));
                    continue;
                }
                return Err(SessionError::Http(e));
            }
            Ok(response) => {
                let status = response.status();
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    log::warn!("  HTTP {status} from {url}");
                    last_error = Some(SessionError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                    continue;
                }
                if !status.is_success() {
                    return Err(SessionError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                return Ok(response.text().await?);
            }
        }
    }

    log::error!("Giving up on {url} after {max_retries} retries");
    Err(last_error.unwrap_or_else(|| SessionError::Conversion {
        message: format!("No attempt was made to fetch {url}"),
    }))
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request()
}
