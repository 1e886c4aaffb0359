//! Integration tests for the ranking read path.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stockdash_ranking::types::SecurityCandidate;
use stockdash_ranking::{
    CacheLayer, ClassificationTables, DataSource, DiversitySelector, EngineSettings, FixtureSource,
    InvalidateTarget, MarketSnapshot, MemoryTier, RankingEngine, SecurityDetail, Signal,
    SourceError,
};

/// Fixture source that counts every fetch.
struct CountingSource {
    inner: FixtureSource,
    calls: AtomicUsize,
}

impl CountingSource {
    fn full() -> Self {
        let tables = ClassificationTables::builtin().unwrap();
        let snapshots = tables
            .universe()
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let snapshot = MarketSnapshot {
                    market_cap: Some(2e14 / (i as f64 + 1.0)),
                    change_percent: Some(1.0 + (i % 5) as f64 * 0.5),
                    foreign_ownership_percent: Some(20.0),
                    ..Default::default()
                };
                (m.code.clone(), snapshot)
            })
            .collect();
        Self {
            inner: FixtureSource::new(snapshots),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for CountingSource {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn fetch_snapshot(&self, code: &str) -> Result<Option<MarketSnapshot>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_snapshot(code).await
    }
}

fn engine(source: Arc<CountingSource>, settings: EngineSettings) -> RankingEngine {
    RankingEngine::new(
        source,
        Arc::new(ClassificationTables::builtin().unwrap()),
        Arc::new(CacheLayer::in_memory()),
        Arc::new(MemoryTier::new(32)),
        settings,
    )
}

fn detail(code: &str, sector: &str, score: i32) -> SecurityDetail {
    SecurityDetail {
        candidate: SecurityCandidate::without_metrics(code, code, sector),
        score,
        signal: Signal::Neutral,
        summary: String::new(),
        computed_at: Utc::now(),
        fallback: false,
    }
}

#[test]
fn test_sector_cap_skips_third_of_a_sector() {
    let candidates = vec![
        detail("X", "S1", 90),
        detail("Y", "S1", 85),
        detail("Z", "S1", 80),
        detail("W", "S2", 70),
    ];

    let ranked = DiversitySelector::new(2).select(&candidates, 3);
    let codes: Vec<&str> = ranked.iter().map(|e| e.code.as_str()).collect();
    assert_eq!(codes, vec!["X", "Y", "W"]);
}

#[tokio::test]
async fn test_cache_hit_suppresses_recompute() {
    let source = Arc::new(CountingSource::full());
    let engine = engine(source.clone(), EngineSettings::default());

    let first = engine.get_ranked_top_n(10).await;
    let calls_after_first = source.calls();
    assert_eq!(calls_after_first, engine.universe_size());

    let second = engine.get_ranked_top_n(10).await;
    assert_eq!(source.calls(), calls_after_first);
    assert_eq!(first, second);

    let stats = engine.cache_stats();
    assert!(stats.hits >= 1);
}

#[tokio::test]
async fn test_ranking_publishes_details() {
    let source = Arc::new(CountingSource::full());
    let engine = engine(source.clone(), EngineSettings::default());

    engine.get_ranked_top_n(5).await;
    let calls = source.calls();

    // Details written by the ranking pass are served without a fetch
    let detail = engine.get_detail("005930").await.unwrap();
    assert!(!detail.fallback);
    assert_eq!(source.calls(), calls);
}

#[tokio::test]
async fn test_expired_entry_is_recomputed() {
    let source = Arc::new(CountingSource::full());
    let settings = EngineSettings {
        detail_ttl: Duration::from_millis(200),
        ..EngineSettings::default()
    };
    let engine = engine(source.clone(), settings);

    let first = engine.get_detail("000660").await.unwrap();
    assert_eq!(source.calls(), 1);

    let cached = engine.get_detail("000660").await.unwrap();
    assert_eq!(source.calls(), 1);
    assert_eq!(cached, first);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let fresh = engine.get_detail("000660").await.unwrap();
    assert_eq!(source.calls(), 2);
    assert!(fresh.computed_at > first.computed_at);
    assert_eq!(fresh.code(), first.code());
}

#[tokio::test(start_paused = true)]
async fn test_shared_page_does_not_outlive_its_ttl() {
    let tables = Arc::new(ClassificationTables::builtin().unwrap());
    let cache = Arc::new(CacheLayer::in_memory());
    let settings = EngineSettings {
        page_ttl: Duration::from_secs(300),
        ..EngineSettings::default()
    };
    let writer = RankingEngine::new(
        Arc::new(CountingSource::full()),
        tables.clone(),
        cache.clone(),
        Arc::new(MemoryTier::new(8)),
        settings.clone(),
    );
    let reader = RankingEngine::new(
        Arc::new(CountingSource::full()),
        tables,
        cache.clone(),
        Arc::new(MemoryTier::new(8)),
        settings,
    );

    writer.get_paginated_universe(0, 10).await;

    // Reader copies the shared entry into its own memory tier near expiry
    tokio::time::advance(Duration::from_secs(299)).await;
    reader.get_paginated_universe(0, 10).await;
    assert_eq!(cache.stats().memory_hits, 0);

    tokio::time::advance(Duration::from_secs(200)).await;
    let misses = cache.stats().misses;
    reader.get_paginated_universe(0, 10).await;

    let stats = cache.stats();
    assert_eq!(stats.memory_hits, 0);
    assert!(stats.misses > misses);
}

#[tokio::test]
async fn test_invalidate_all_forces_recompute() {
    let source = Arc::new(CountingSource::full());
    let engine = engine(source.clone(), EngineSettings::default());

    engine.get_ranked_top_n(10).await;
    let calls = source.calls();

    engine.invalidate(InvalidateTarget::All).await;
    engine.get_ranked_top_n(10).await;
    assert_eq!(source.calls(), calls * 2);
}

#[tokio::test]
async fn test_ranking_is_stable_within_the_hour() {
    let source = Arc::new(CountingSource::full());
    let engine = engine(source, EngineSettings::default());

    let first = engine.get_ranked_top_n(10).await;
    engine.invalidate(InvalidateTarget::All).await;
    let second = engine.get_ranked_top_n(10).await;

    // Recomputing with unchanged inputs only risks a difference across an hour boundary
    if first[0].computed_at.format("%Y%m%d%H").to_string()
        == second[0].computed_at.format("%Y%m%d%H").to_string()
    {
        let a: Vec<(&str, i32)> = first.iter().map(|e| (e.code.as_str(), e.score)).collect();
        let b: Vec<(&str, i32)> = second.iter().map(|e| (e.code.as_str(), e.score)).collect();
        assert_eq!(a, b);
    }
}

#[tokio::test]
async fn test_pagination_covers_universe_once() {
    let source = Arc::new(CountingSource::full());
    let engine = engine(source, EngineSettings::default());
    let size = 7;

    let first = engine.get_paginated_universe(0, size).await;
    assert_eq!(first.total_count, engine.universe_size());
    assert_eq!(first.total_pages, engine.universe_size().div_ceil(size));

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut previous_cap = f64::INFINITY;
    for page in 0..first.total_pages {
        let listing = engine.get_paginated_universe(page, size).await;
        assert!(listing.items.len() <= size);
        for item in &listing.items {
            *seen.entry(item.code().to_string()).or_insert(0) += 1;
            let cap = item.market_cap().unwrap_or(0.0);
            assert!(cap <= previous_cap);
            previous_cap = cap;
        }
    }

    assert_eq!(seen.len(), engine.universe_size());
    assert!(seen.values().all(|&n| n == 1));

    let past_end = engine.get_paginated_universe(first.total_pages + 3, size).await;
    assert!(past_end.items.is_empty());
}

#[tokio::test]
async fn test_search_by_code_and_name() {
    let source = Arc::new(CountingSource::full());
    let engine = engine(source, EngineSettings::default());

    let by_code = engine.search("0059").await;
    assert!(by_code.items.iter().any(|d| d.code() == "005930"));

    let nothing = engine.search("no-such-security").await;
    assert!(nothing.items.is_empty());

    let blank = engine.search("   ").await;
    assert!(blank.items.is_empty());
}

#[tokio::test]
async fn test_force_refresh_reports_universe() {
    let source = Arc::new(CountingSource::full());
    let engine = engine(source, EngineSettings::default());

    let report = engine.force_refresh().await.unwrap();
    assert_eq!(report.universe_size, engine.universe_size());
    assert_eq!(report.fallback_count, 0);
    assert_eq!(report.ranked_count, engine.settings().top_n.min(engine.universe_size()));
}
