//! Ranking engine: the read operations the dashboard consumes.
//!
//! Every read is cache-aside. On a miss the engine fans out snapshot fetches
//! over a bounded pool, scores each candidate, and writes the result back.
//! Failures never reach the caller: a failed fetch becomes a neutral fallback
//! entry, a failed cache call becomes a miss or a skipped write.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use stockdash_common::{CacheConfig, RankingConfig};

use crate::cache::{keys, CacheLayer, CacheStats, MemoryTier};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::classification::ClassificationTables;
use crate::error::RankingError;
use crate::scoring::ScoreCalculator;
use crate::selector::{compare_market_cap, sort_by_rank, DiversitySelector};
use crate::source::{DataSource, SourceError};
use crate::types::{
    MarketSnapshot, RankedEntry, RefreshReport, SearchResult, SecurityDetail, SortedUniverse,
    UniverseMember, UniversePage,
};

// ============================================================================
// Settings
// ============================================================================

/// Tunables of the engine, usually derived from [`stockdash_common::Config`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// N of the eagerly rebuilt ranking
    pub top_n: usize,
    pub sector_cap: usize,
    pub max_page_size: usize,
    /// Parallel snapshot fetches
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    /// Upper bound for evaluating the whole universe
    pub rebuild_deadline: Duration,
    pub rank_ttl: Duration,
    pub universe_ttl: Duration,
    pub detail_ttl: Duration,
    pub page_ttl: Duration,
    pub search_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default(), &RankingConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(cache: &CacheConfig, ranking: &RankingConfig) -> Self {
        Self {
            top_n: ranking.top_n,
            sector_cap: ranking.sector_cap,
            max_page_size: ranking.max_page_size.max(1),
            concurrency: ranking.concurrency.max(1),
            fetch_timeout: ranking.fetch_timeout(),
            rebuild_deadline: ranking.rebuild_deadline(),
            rank_ttl: cache.rank_ttl(),
            universe_ttl: cache.universe_ttl(),
            detail_ttl: cache.detail_ttl(),
            page_ttl: cache.page_ttl(),
            search_ttl: cache.search_ttl(),
        }
    }
}

// ============================================================================
// Invalidation Target
// ============================================================================

/// What [`RankingEngine::invalidate`] clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidateTarget {
    /// Every namespace and the memory tier
    All,
    /// One security's detail plus every listing that may contain it
    Code(String),
}

impl FromStr for InvalidateTarget {
    type Err = RankingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(RankingError::Configuration("empty invalidation target".into())),
            "all" | "ALL" | "*" => Ok(Self::All),
            code => Ok(Self::Code(code.to_string())),
        }
    }
}

fn all_fallback(details: &[SecurityDetail]) -> bool {
    !details.is_empty() && details.iter().all(|d| d.fallback)
}

// ============================================================================
// Ranking Engine
// ============================================================================

/// Cache-backed ranking and listing service.
pub struct RankingEngine {
    source: Arc<dyn DataSource>,
    source_breaker: CircuitBreaker,
    calculator: ScoreCalculator,
    selector: DiversitySelector,
    cache: Arc<CacheLayer>,
    pages: Arc<MemoryTier<UniversePage>>,
    settings: EngineSettings,
    /// Last name seen per code, used for fallback entries
    known_names: RwLock<HashMap<String, String>>,
    rebuild_lock: Mutex<()>,
}

impl RankingEngine {
    pub fn new(
        source: Arc<dyn DataSource>,
        tables: Arc<ClassificationTables>,
        cache: Arc<CacheLayer>,
        pages: Arc<MemoryTier<UniversePage>>,
        settings: EngineSettings,
    ) -> Self {
        let source_breaker = CircuitBreaker::new(
            CircuitBreakerConfig::with_name(format!("source-{}", source.name()))
                .failure_threshold(5)
                .reset_timeout(Duration::from_secs(30)),
        );

        Self {
            source,
            source_breaker,
            calculator: ScoreCalculator::new(tables),
            selector: DiversitySelector::new(settings.sector_cap),
            cache,
            pages,
            settings,
            known_names: RwLock::new(HashMap::new()),
            rebuild_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn universe_size(&self) -> usize {
        self.calculator.tables().universe().len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn source_health(&self) -> CircuitBreakerStats {
        self.source_breaker.stats()
    }

    // ========================================================================
    // Read Operations
    // ========================================================================

    /// Diversified top-N, cached under `rank:top{n}`.
    ///
    /// A result made only of fallback entries is returned but not cached, so
    /// the next call retries the upstream.
    pub async fn get_ranked_top_n(&self, n: usize) -> Vec<RankedEntry> {
        if n == 0 {
            return Vec::new();
        }

        let compute = || async {
            let at = Utc::now();
            let details = self.evaluate_universe(at).await;
            if all_fallback(&details) {
                warn!(n, "Every candidate fell back to neutral, ranking not cached");
            } else {
                self.publish_evaluation(&details, at).await;
            }
            self.selector.select(&details, n)
        };

        self.cache
            .get_or_compute_if(
                &keys::rank_top(n),
                self.settings.rank_ttl,
                compute,
                |ranked: &Vec<RankedEntry>| ranked.is_empty() || ranked.iter().any(|e| !e.fallback),
            )
            .await
    }

    /// One page of the universe sorted by market cap. Pages are 0-based and
    /// `size` is clamped to `[1, max_page_size]`.
    pub async fn get_paginated_universe(&self, page: usize, size: usize) -> UniversePage {
        let size = size.clamp(1, self.settings.max_page_size);
        let key = keys::page(page, size);
        let ttl = self.settings.page_ttl;

        if let Some(cached) = self.cache.get_tiered(&self.pages, &key, ttl).await {
            return cached;
        }

        let universe = self.sorted_universe().await;
        let total_count = universe.codes.len();
        let codes: Vec<&String> = universe
            .codes
            .iter()
            .skip(page.saturating_mul(size))
            .take(size)
            .collect();

        let members: Vec<UniverseMember> = codes
            .into_iter()
            .filter_map(|code| self.calculator.tables().member(code).cloned())
            .collect();
        let items = self.details_for(&members).await;

        let result = UniversePage {
            page,
            size,
            total_count,
            total_pages: total_count.div_ceil(size),
            computed_at: Utc::now(),
            items,
        };

        if all_fallback(&result.items) {
            debug!(page, size, "Page built from fallbacks only, not cached");
        } else {
            self.cache.set_tiered(&self.pages, &key, &result, ttl).await;
        }
        result
    }

    /// Scored detail for one code; `None` outside the universe.
    pub async fn get_detail(&self, code: &str) -> Option<SecurityDetail> {
        let member = self.calculator.tables().member(code)?.clone();
        Some(self.detail_for(&member).await)
    }

    /// Case-insensitive match on code or name, best score first.
    pub async fn search(&self, keyword: &str) -> SearchResult {
        let needle = keys::normalize_keyword(keyword);
        if needle.is_empty() {
            return SearchResult {
                keyword: needle,
                items: Vec::new(),
                computed_at: Utc::now(),
            };
        }

        let key = keys::search(&needle);
        let compute = || async {
            let members: Vec<UniverseMember> = self
                .calculator
                .tables()
                .universe()
                .iter()
                .filter(|m| self.matches(m, &needle))
                .cloned()
                .collect();

            let mut items = self.details_for(&members).await;
            sort_by_rank(&mut items);

            SearchResult {
                keyword: needle.clone(),
                items,
                computed_at: Utc::now(),
            }
        };

        self.cache
            .get_or_compute_if(&key, self.settings.search_ttl, compute, |result: &SearchResult| {
                !all_fallback(&result.items)
            })
            .await
    }

    // ========================================================================
    // Maintenance Operations
    // ========================================================================

    pub async fn invalidate(&self, target: InvalidateTarget) {
        match target {
            InvalidateTarget::Code(code) => {
                self.cache.invalidate(&keys::detail(&code)).await;
                self.evict_listings().await;
                info!(code = %code, "Invalidated security");
            }
            InvalidateTarget::All => {
                let mut removed = 0;
                for prefix in keys::ALL_PREFIXES {
                    removed += self.cache.invalidate_prefix(prefix).await;
                }
                self.pages.clear();
                info!(removed, "Invalidated all cache namespaces");
            }
        }
    }

    /// Drop page listings and search results from both tiers. Returns the
    /// number of backend keys removed.
    pub async fn evict_listings(&self) -> usize {
        let local = self.pages.remove_prefix(keys::PAGE_PREFIX);
        let removed = self.cache.invalidate_prefix(keys::PAGE_PREFIX).await
            + self.cache.invalidate_prefix(keys::SEARCH_PREFIX).await;
        debug!(removed, local, "Evicted listings");
        removed
    }

    /// Rebuild the ranking, the sorted universe and every detail now,
    /// waiting for an in-flight rebuild first.
    pub async fn force_refresh(&self) -> Result<RefreshReport, RankingError> {
        let _guard = self.rebuild_lock.lock().await;
        self.rebuild().await
    }

    /// Scheduled variant of [`Self::force_refresh`]: `Ok(None)` when another
    /// rebuild is already running.
    pub async fn try_scheduled_rebuild(&self) -> Result<Option<RefreshReport>, RankingError> {
        let Ok(_guard) = self.rebuild_lock.try_lock() else {
            debug!("Rebuild already in flight, skipping cycle");
            return Ok(None);
        };
        self.rebuild().await.map(Some)
    }

    async fn rebuild(&self) -> Result<RefreshReport, RankingError> {
        let started = Instant::now();
        let at = Utc::now();

        let details = self.evaluate_universe(at).await;
        let fallback_count = details.iter().filter(|d| d.fallback).count();

        if all_fallback(&details) {
            return Err(RankingError::RebuildAborted(format!(
                "all {} candidates fell back to neutral",
                details.len()
            )));
        }

        let ranked = self.selector.select(&details, self.settings.top_n);
        self.publish_evaluation(&details, at).await;
        self.cache
            .set(&keys::rank_top(self.settings.top_n), &ranked, self.settings.rank_ttl)
            .await;

        let report = RefreshReport {
            computed_at: at,
            universe_size: details.len(),
            fallback_count,
            ranked_count: ranked.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            universe = report.universe_size,
            fallbacks = report.fallback_count,
            ranked = report.ranked_count,
            duration_ms = report.duration_ms,
            "Ranking rebuilt"
        );
        Ok(report)
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Sorted universe index, cached under `universe:sorted`.
    async fn sorted_universe(&self) -> SortedUniverse {
        if let Some(universe) = self.cache.get::<SortedUniverse>(keys::UNIVERSE_SORTED).await {
            return universe;
        }

        let at = Utc::now();
        let details = self.evaluate_universe(at).await;
        let universe = Self::index_by_market_cap(&details, at);

        if !all_fallback(&details) {
            self.publish_evaluation(&details, at).await;
        }
        universe
    }

    fn index_by_market_cap(details: &[SecurityDetail], at: DateTime<Utc>) -> SortedUniverse {
        let mut ordered: Vec<&SecurityDetail> = details.iter().collect();
        ordered.sort_by(|a, b| compare_market_cap(a.market_cap(), b.market_cap()));
        SortedUniverse {
            codes: ordered.iter().map(|d| d.code().to_string()).collect(),
            computed_at: at,
        }
    }

    /// Write live details and the sorted index produced by one evaluation.
    async fn publish_evaluation(&self, details: &[SecurityDetail], at: DateTime<Utc>) {
        let ttl = self.settings.detail_ttl;
        let live: Vec<usize> = (0..details.len()).filter(|&i| !details[i].fallback).collect();
        stream::iter(live)
            .for_each_concurrent(self.settings.concurrency, |i| async move {
                let detail = &details[i];
                self.cache.set(&keys::detail(detail.code()), detail, ttl).await;
            })
            .await;

        let universe = Self::index_by_market_cap(details, at);
        self.cache
            .set(keys::UNIVERSE_SORTED, &universe, self.settings.universe_ttl)
            .await;
    }

    /// Score every universe member, in table order.
    ///
    /// Candidates still pending when the rebuild deadline fires are published
    /// as fallback entries.
    async fn evaluate_universe(&self, at: DateTime<Utc>) -> Vec<SecurityDetail> {
        let members = self.calculator.tables().universe();
        let mut results: Vec<Option<SecurityDetail>> = vec![None; members.len()];

        let mut pending = stream::iter(0..members.len())
            .map(|i| async move { (i, self.evaluate(&members[i], at).await) })
            .buffer_unordered(self.settings.concurrency);

        let deadline = tokio::time::sleep(self.settings.rebuild_deadline);
        tokio::pin!(deadline);

        let mut completed = 0usize;
        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some((i, detail)) => {
                        results[i] = Some(detail);
                        completed += 1;
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(
                        completed,
                        pending = members.len() - completed,
                        deadline_secs = self.settings.rebuild_deadline.as_secs(),
                        "Evaluation deadline reached, using fallbacks for pending candidates"
                    );
                    break;
                }
            }
        }
        drop(pending);

        results
            .into_iter()
            .zip(members)
            .map(|(result, member)| result.unwrap_or_else(|| self.fallback(member, at)))
            .collect()
    }

    /// Cached details for `members`, in order; misses are evaluated and cached.
    async fn details_for(&self, members: &[UniverseMember]) -> Vec<SecurityDetail> {
        stream::iter(0..members.len())
            .map(|i| self.detail_for(&members[i]))
            .buffered(self.settings.concurrency)
            .collect()
            .await
    }

    async fn detail_for(&self, member: &UniverseMember) -> SecurityDetail {
        self.cache
            .get_or_compute_if(
                &keys::detail(&member.code),
                self.settings.detail_ttl,
                || self.evaluate(member, Utc::now()),
                |detail: &SecurityDetail| !detail.fallback,
            )
            .await
    }

    /// Fetch and score one member; any failure yields its fallback entry.
    async fn evaluate(&self, member: &UniverseMember, at: DateTime<Utc>) -> SecurityDetail {
        match self.fetch(&member.code).await {
            Ok(Some(snapshot)) => {
                self.remember_name(&member.code, &snapshot);
                self.calculator.score_snapshot(member, &snapshot, at)
            }
            Ok(None) => {
                debug!(code = %member.code, "No snapshot available, using fallback");
                self.fallback(member, at)
            }
            Err(e) => {
                let skipped = matches!(e, SourceError::CircuitOpen);
                let err = RankingError::upstream(&member.code, e);
                if skipped {
                    debug!(error = %err, "Using fallback");
                } else {
                    warn!(error = %err, "Using fallback");
                }
                self.fallback(member, at)
            }
        }
    }

    async fn fetch(&self, code: &str) -> Result<Option<MarketSnapshot>, SourceError> {
        if !self.source_breaker.can_execute() {
            return Err(SourceError::CircuitOpen);
        }

        let result = tokio::time::timeout(self.settings.fetch_timeout, self.source.fetch_snapshot(code))
            .await
            .unwrap_or(Err(SourceError::Timeout));

        match &result {
            Ok(_) => self.source_breaker.record_success(),
            Err(e) if e.counts_as_failure() => self.source_breaker.record_failure(),
            Err(_) => {}
        }
        result
    }

    fn fallback(&self, member: &UniverseMember, at: DateTime<Utc>) -> SecurityDetail {
        let name = self.known_name(&member.code).unwrap_or_else(|| member.name.clone());
        self.calculator.fallback(member, &name, at)
    }

    fn matches(&self, member: &UniverseMember, needle: &str) -> bool {
        member.code.to_lowercase().contains(needle)
            || member.name.to_lowercase().contains(needle)
            || self
                .known_name(&member.code)
                .is_some_and(|name| name.to_lowercase().contains(needle))
    }

    fn remember_name(&self, code: &str, snapshot: &MarketSnapshot) {
        let Some(name) = snapshot.name.as_deref().filter(|n| !n.trim().is_empty()) else {
            return;
        };
        if let Ok(mut names) = self.known_names.write() {
            if names.get(code).map(String::as_str) != Some(name) {
                names.insert(code.to_string(), name.to_string());
            }
        }
    }

    fn known_name(&self, code: &str) -> Option<String> {
        self.known_names.read().ok()?.get(code).cloned()
    }
}

// ============================================================================
// Tests
// ============================================================================
