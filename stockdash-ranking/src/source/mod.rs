//! Market data source abstraction.
//!
//! The engine consumes a single operation, [`DataSource::fetch_snapshot`].
//! `Ok(None)` means the upstream has nothing for the code; `Err` means the
//! fetch itself failed. Both end up as neutral fallback entries.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::MarketSnapshot;

mod fixture;
mod http;

pub use fixture::FixtureSource;
pub use http::HttpQuoteSource;

// ============================================================================
// Source Error
// ============================================================================

/// Errors raised by market data sources.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Connection failed or was reset
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not finish within its deadline
    #[error("Request timed out")]
    Timeout,

    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Response body could not be parsed
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Source skipped because its circuit breaker is open
    #[error("Circuit open, source temporarily skipped")]
    CircuitOpen,
}

impl SourceError {
    /// Whether this failure should count against the source's circuit breaker.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, Self::CircuitOpen | Self::Decode(_))
    }
}

// ============================================================================
// Data Source Trait
// ============================================================================

/// Trait for market data sources.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Source name used in logs (e.g., "http", "fixture")
    fn name(&self) -> &'static str;

    /// Fetch the latest snapshot for a security code.
    async fn fetch_snapshot(&self, code: &str) -> Result<Option<MarketSnapshot>, SourceError>;
}
