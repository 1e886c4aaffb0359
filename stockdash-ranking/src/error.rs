//! Error taxonomy of the ranking engine.
//!
//! None of these reach callers of the public read operations: each is absorbed
//! by the component touching the failing resource and turned into a fallback
//! score, a cache miss, a skipped write or a default weight.

use thiserror::Error;

use crate::cache::CacheError;
use crate::source::SourceError;

#[derive(Debug, Error)]
pub enum RankingError {
    /// Snapshot fetch for one candidate failed or timed out
    #[error("Upstream fetch failed for {code}: {source}")]
    UpstreamFetch {
        code: String,
        #[source]
        source: SourceError,
    },

    /// Cache backend could not be reached
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(#[from] CacheError),

    /// Cached payload could not be decoded or a value could not be encoded
    #[error("Serialization error for {key}: {reason}")]
    Serialization { key: String, reason: String },

    /// Unknown sector or code in the classification tables
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A rebuild produced nothing worth publishing
    #[error("Rebuild aborted: {0}")]
    RebuildAborted(String),
}

impl RankingError {
    pub fn upstream(code: impl Into<String>, source: SourceError) -> Self {
        Self::UpstreamFetch {
            code: code.into(),
            source,
        }
    }

    pub fn serialization(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Serialization {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code_and_cause() {
        let err = RankingError::upstream("005930", SourceError::Timeout);
        let msg = err.to_string();
        assert!(msg.contains("005930"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_cache_error_converts() {
        let err: RankingError = CacheError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, RankingError::CacheUnavailable(_)));
    }
}
