//! JSON quote API adapter.
//!
//! Fetches `GET {base_url}/quotes/{code}` and expects a body shaped like
//! [`MarketSnapshot`] (camelCase, every field optional). A 404 means the
//! upstream has no quote for the code.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{DataSource, SourceError};
use crate::types::MarketSnapshot;

/// Quote endpoint path segment
const QUOTES_ENDPOINT: &str = "/quotes";

/// HTTP adapter for a JSON quote service.
pub struct HttpQuoteSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpQuoteSource {
    /// Create an adapter with the given request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Create from config; `None` when no base URL is configured.
    pub fn from_config(config: &stockdash_common::SourceConfig) -> Option<Self> {
        let base_url = config.base_url.as_deref()?;
        Some(Self::new(
            base_url,
            Duration::from_secs(config.request_timeout_secs),
        ))
    }

    fn quote_url(&self, code: &str) -> String {
        format!("{}{}/{}", self.base_url, QUOTES_ENDPOINT, code)
    }
}

#[async_trait]
impl DataSource for HttpQuoteSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch_snapshot(&self, code: &str) -> Result<Option<MarketSnapshot>, SourceError> {
        let url = self.quote_url(code);
        debug!(url = %url, code, "Fetching quote");

        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout
                } else if e.is_connect() {
                    SourceError::Network("Connection failed".into())
                } else {
                    SourceError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let snapshot: MarketSnapshot = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_quote_url_trims_trailing_slash() {
        let source = HttpQuoteSource::new("http://quotes.local/", Duration::from_secs(1));
        assert_eq!(source.quote_url("005930"), "http://quotes.local/quotes/005930");
    }

    #[tokio::test]
    async fn test_fetch_parses_partial_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quotes/005930"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "삼성전자",
                "price": 71200.0,
                "changePercent": 1.4,
                "marketCap": 425000000000000.0
            })))
            .mount(&server)
            .await;

        let source = HttpQuoteSource::new(server.uri(), Duration::from_secs(2));
        let snapshot = source.fetch_snapshot("005930").await.unwrap().unwrap();

        assert_eq!(snapshot.name.as_deref(), Some("삼성전자"));
        assert_eq!(snapshot.change_percent, Some(1.4));
        assert_eq!(snapshot.foreign_ownership_percent, None);
    }

    #[tokio::test]
    async fn test_not_found_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = HttpQuoteSource::new(server.uri(), Duration::from_secs(2));
        assert!(source.fetch_snapshot("999999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_error_maps_to_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let source = HttpQuoteSource::new(server.uri(), Duration::from_secs(2));
        match source.fetch_snapshot("005930").await {
            Err(SourceError::Http { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let source = HttpQuoteSource::new(server.uri(), Duration::from_secs(2));
        assert!(matches!(
            source.fetch_snapshot("005930").await,
            Err(SourceError::Decode(_))
        ));
    }
}
