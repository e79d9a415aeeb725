//! Shortlink provider client
//!
//! Providers share one API shape: `GET <base>/api?api=<key>&url=<long>` answering
//! JSON with `shortenedUrl` (or `short_url`), or occasionally a bare URL. The
//! active provider can be replaced at runtime by an administrator.

use crate::model::ShortlinkSettings;
use crate::storage::{RelayStore, StorageError};
use crate::utils::truncate_str;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while shortening a link
#[derive(Debug, Error)]
pub enum ShortlinkError {
    /// No provider configured
    #[error("No shortlink provider configured")]
    NotConfigured,
    /// Error during network communication
    #[error("Network error: {0}")]
    Network(String),
    /// Provider answered with a non-success status
    #[error("Provider returned status {0}")]
    Status(u16),
    /// Provider answered without a usable link
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
    /// Provider settings could not be read
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Maps a long URL to a short one
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Shortener: Send + Sync {
    /// Shorten `long_url`
    async fn shorten(&self, long_url: &str) -> Result<String, ShortlinkError>;
}

/// Shortens `long_url`, falling back to it on any error or after `timeout`.
///
/// Never fails: a challenge or sharing link is always produced.
pub async fn shorten_or_fallback(
    shortener: &dyn Shortener,
    long_url: &str,
    timeout: Duration,
) -> String {
    match tokio::time::timeout(timeout, shortener.shorten(long_url)).await {
        Ok(Ok(short)) if !short.trim().is_empty() => short.trim().to_string(),
        Ok(Ok(_)) => {
            warn!("Shortlink provider returned an empty link, using the direct link");
            long_url.to_string()
        }
        Ok(Err(e)) => {
            warn!("Shortlink creation failed, using the direct link: {e}");
            long_url.to_string()
        }
        Err(_) => {
            warn!(
                "Shortlink creation timed out after {}s, using the direct link",
                timeout.as_secs()
            );
            long_url.to_string()
        }
    }
}

/// HTTP shortlink client
pub struct HttpShortener {
    client: HttpClient,
    store: Arc<dyn RelayStore>,
    defaults: Option<ShortlinkSettings>,
}

impl HttpShortener {
    /// Creates a client bounded by `timeout`. Runtime settings in `store` take
    /// precedence over `defaults`.
    #[must_use]
    pub fn new(
        store: Arc<dyn RelayStore>,
        defaults: Option<ShortlinkSettings>,
        timeout: Duration,
    ) -> Self {
        let client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            client,
            store,
            defaults,
        }
    }

    async fn provider(&self) -> Result<ShortlinkSettings, ShortlinkError> {
        if let Some(settings) = self.store.get_shortlink_settings().await? {
            return Ok(settings);
        }
        self.defaults.clone().ok_or(ShortlinkError::NotConfigured)
    }
}

#[async_trait]
impl Shortener for HttpShortener {
    async fn shorten(&self, long_url: &str) -> Result<String, ShortlinkError> {
        let provider = self.provider().await?;
        let endpoint = provider.api_endpoint();
        debug!("Shortening link via {endpoint}");

        let response = self
            .client
            .get(&endpoint)
            .query(&[("api", provider.api_key.as_str()), ("url", long_url)])
            .send()
            .await
            .map_err(|e| ShortlinkError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ShortlinkError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ShortlinkError::Network(e.without_url().to_string()))?;

        parse_short_link(&body)
            .ok_or_else(|| ShortlinkError::InvalidResponse(truncate_str(&body, 200)))
    }
}

/// Extracts the short link from a provider response body
#[must_use]
pub fn parse_short_link(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return ["shortenedUrl", "short_url"]
            .iter()
            .filter_map(|field| value.get(field).and_then(Value::as_str))
            .map(str::trim)
            .find(|link| !link.is_empty())
            .map(ToString::to_string);
    }

    // Some providers answer with the bare link
    let text = body.trim();
    (text.starts_with("http") && !text.contains(char::is_whitespace)).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::testing::{mock_shortener_failing, mock_shortener_fixed};

    #[test]
    fn test_parse_shortened_url_field() {
        let body = r#"{"status":"success","shortenedUrl":"https://aro.li/x1"}"#;
        assert_eq!(parse_short_link(body), Some("https://aro.li/x1".to_string()));
    }

    #[test]
    fn test_parse_short_url_field() {
        let body = r#"{"short_url":"https://gp.li/y2"}"#;
        assert_eq!(parse_short_link(body), Some("https://gp.li/y2".to_string()));
    }

    #[test]
    fn test_parse_error_payload() {
        let body = r#"{"status":"error","message":"Invalid API token"}"#;
        assert_eq!(parse_short_link(body), None);
    }

    #[test]
    fn test_parse_plain_text() {
        assert_eq!(
            parse_short_link("https://short.ly/abc\n"),
            Some("https://short.ly/abc".to_string())
        );
        assert_eq!(parse_short_link("<html>error</html>"), None);
    }

    #[tokio::test]
    async fn test_fallback_on_error() {
        let shortener = mock_shortener_failing();
        let link = shorten_or_fallback(
            &shortener,
            "https://t.me/bot?start=verify_x",
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(link, "https://t.me/bot?start=verify_x");
    }

    #[tokio::test]
    async fn test_short_link_used_on_success() {
        let shortener = mock_shortener_fixed("https://aro.li/z");
        let link = shorten_or_fallback(&shortener, "https://t.me/bot", Duration::from_secs(1))
            .await;
        assert_eq!(link, "https://aro.li/z");
    }

    struct SlowShortener;

    #[async_trait]
    impl Shortener for SlowShortener {
        async fn shorten(&self, _long_url: &str) -> Result<String, ShortlinkError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("https://never.used".to_string())
        }
    }

    #[tokio::test]
    async fn test_fallback_on_timeout() {
        let link = shorten_or_fallback(
            &SlowShortener,
            "https://t.me/bot?start=verify_y",
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(link, "https://t.me/bot?start=verify_y");
    }

    #[tokio::test]
    async fn test_unconfigured_provider_errors() {
        let shortener = HttpShortener::new(
            Arc::new(InMemoryStorage::new()),
            None,
            Duration::from_secs(1),
        );
        assert!(matches!(
            shortener.shorten("https://t.me/bot").await,
            Err(ShortlinkError::NotConfigured)
        ));
    }
}
