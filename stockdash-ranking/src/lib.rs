//! Stockdash Ranking Library
//!
//! Ranking-and-cache engine behind the stock dashboard. It scores a fixed
//! universe of securities, selects a sector-diversified top-N, and serves
//! paginated, searchable listings from a TTL cache kept warm by a background
//! scheduler.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      stockdash-ranking                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │  DataSource  │──▶│ RankingEngine│◀──│  RefreshScheduler    │  │
//! │  │ (http/fixture)│  │ score+select │   │ evict / rebuild loops │  │
//! │  └──────────────┘   └──────┬───────┘   └──────────────────────┘  │
//! │                            ▼                                     │
//! │                  ┌──────────────────┐                            │
//! │                  │   CacheLayer     │  memory tier + backend     │
//! │                  │ (memory / redis) │  behind a circuit breaker  │
//! │                  └──────────────────┘                            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Scoring
//!
//! Each candidate starts at 50 and collects points for sector growth, market
//! cap, foreign ownership, momentum and fundamentals, plus a small hourly
//! variance. The total is clamped to 30..=90. Candidates whose data cannot be
//! fetched get a neutral fallback entry instead of failing the request.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod cache;
pub mod circuit_breaker;
pub mod classification;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod scoring;
pub mod selector;
pub mod source;
pub mod types;

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use stockdash_common::{CacheBackendKind, CacheConfig, Config, SourceConfig, SourceKind};

pub use cache::{CacheBackend, CacheError, CacheLayer, CacheStats, InMemoryBackend, MemoryTier};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classification::ClassificationTables;
pub use engine::{EngineSettings, InvalidateTarget, RankingEngine};
pub use error::RankingError;
pub use scheduler::{RefreshScheduler, SchedulerSettings, SchedulerState, SchedulerStatus};
pub use scoring::ScoreCalculator;
pub use selector::DiversitySelector;
pub use source::{DataSource, FixtureSource, HttpQuoteSource, SourceError};
pub use types::{
    MarketSnapshot, RankedEntry, RefreshReport, SearchResult, SecurityCandidate, SecurityDetail,
    Signal, UniverseMember, UniversePage,
};

/// The assembled service: engine plus its background scheduler.
pub struct RankingService {
    engine: Arc<RankingEngine>,
    scheduler: RefreshScheduler,
}

impl RankingService {
    /// Assemble the service from configuration.
    ///
    /// An unreachable Redis falls back to the in-memory backend; a missing
    /// source or unreadable table file is an error.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let tables = ClassificationTables::from_config(&config.ranking)
            .context("failed to load classification tables")?;
        let source = build_source(&config.source)?;
        let backend = build_backend(&config.cache).await;

        info!(
            source = source.name(),
            backend = backend.name(),
            universe = tables.universe().len(),
            "Ranking service assembled"
        );

        let engine = Arc::new(RankingEngine::new(
            source,
            Arc::new(tables),
            Arc::new(CacheLayer::new(backend)),
            Arc::new(MemoryTier::new(config.cache.memory_tier_capacity)),
            EngineSettings::from_config(&config.cache, &config.ranking),
        ));

        Ok(Self::new(engine, SchedulerSettings::from_config(&config.scheduler)))
    }

    pub fn new(engine: Arc<RankingEngine>, settings: SchedulerSettings) -> Self {
        let scheduler = RefreshScheduler::new(Arc::clone(&engine), settings);
        Self { engine, scheduler }
    }

    pub fn engine(&self) -> Arc<RankingEngine> {
        Arc::clone(&self.engine)
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    /// Start the background loops.
    pub async fn start(&self) {
        self.scheduler.start().await;
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        let stats = self.engine.cache_stats();
        info!(
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = format!("{:.1}%", stats.hit_rate() * 100.0),
            "Ranking service stopped"
        );
    }
}

fn build_source(config: &SourceConfig) -> anyhow::Result<Arc<dyn DataSource>> {
    match config.kind {
        SourceKind::Http => {
            let source = HttpQuoteSource::from_config(config)
                .context("source.base_url is required for the http source")?;
            Ok(Arc::new(source))
        }
        SourceKind::Fixture => {
            let path = config
                .fixture_path
                .as_deref()
                .context("source.fixture_path is required for the fixture source")?;
            let source = FixtureSource::load_from(Path::new(path))
                .with_context(|| format!("failed to load fixture snapshots from {path}"))?;
            Ok(Arc::new(source))
        }
    }
}

async fn build_backend(config: &CacheConfig) -> Arc<dyn CacheBackend> {
    match config.backend {
        CacheBackendKind::Memory => Arc::new(InMemoryBackend::new()),
        CacheBackendKind::Redis => {
            #[cfg(feature = "redis-backend")]
            {
                match cache::RedisBackend::connect(&config.redis_url, config.key_prefix.clone()).await
                {
                    Ok(backend) => return Arc::new(backend),
                    Err(e) => {
                        warn!(error = %e, "Failed to connect to Redis, using in-memory cache");
                    }
                }
            }
            #[cfg(not(feature = "redis-backend"))]
            warn!(
                url = %config.redis_url,
                "Redis backend requested but built without `redis-backend`, using in-memory cache"
            );

            Arc::new(InMemoryBackend::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_from_config_with_fixture_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"005930": {{"name": "Samsung Electronics", "marketCap": 4.0e14, "changePercent": 1.2}}}}"#
        )
        .unwrap();

        let mut config = Config::default();
        config.source.kind = SourceKind::Fixture;
        config.source.fixture_path = Some(file.path().display().to_string());
        config.scheduler.enabled = false;

        let service = RankingService::from_config(&config).await.unwrap();
        assert!(service.engine().universe_size() > 0);
        assert_eq!(service.engine().cache_stats().backend, "memory");

        service.start().await;
        assert_eq!(service.scheduler().status().await.state, SchedulerState::Idle);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_http_source_requires_base_url() {
        let mut config = Config::default();
        config.source.kind = SourceKind::Http;
        config.source.base_url = None;

        assert!(RankingService::from_config(&config).await.is_err());
    }

    #[cfg(not(feature = "redis-backend"))]
    #[tokio::test]
    async fn test_redis_without_feature_falls_back_to_memory() {
        let mut config = CacheConfig::default();
        config.backend = CacheBackendKind::Redis;
        let backend = build_backend(&config).await;
        assert_eq!(backend.name(), "memory");
    }
}
