//! Background refresh jobs.
//!
//! Two independent loops:
//! - **eviction**: drops page listings and search results on a short cadence
//! - **rebuild**: eagerly recomputes the ranking, the sorted universe and the
//!   per-security details, after a randomized start-up delay
//!
//! A failing or panicking cycle is logged and recorded in the status; the
//! loop keeps its schedule and the previously cached values stay in place.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stockdash_common::SchedulerConfig;

use crate::engine::RankingEngine;
use crate::types::RefreshReport;

// ============================================================================
// Scheduler State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Not started
    Idle,
    /// Waiting out the start-up delay before the first rebuild
    WarmingUp,
    Running,
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::WarmingUp => write!(f, "warming_up"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Scheduler status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub started_at: Option<DateTime<Utc>>,
    pub last_rebuild_at: Option<DateTime<Utc>>,
    pub last_eviction_at: Option<DateTime<Utc>>,
    pub rebuild_count: u64,
    /// Cycles skipped because a rebuild was already in flight
    pub skipped_rebuilds: u64,
    pub eviction_count: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_report: Option<RefreshReport>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            started_at: None,
            last_rebuild_at: None,
            last_eviction_at: None,
            rebuild_count: 0,
            skipped_rebuilds: 0,
            eviction_count: 0,
            consecutive_failures: 0,
            last_error: None,
            last_report: None,
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub eviction_interval: Duration,
    pub rebuild_interval: Duration,
    pub startup_delay_min: Duration,
    pub startup_delay_max: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            enabled: config.enabled,
            eviction_interval: config.eviction_interval(),
            rebuild_interval: config.rebuild_interval(),
            startup_delay_min: Duration::from_secs(config.startup_delay_min_secs),
            startup_delay_max: Duration::from_secs(config.startup_delay_max_secs),
        }
    }

    /// Uniform pick in `[startup_delay_min, startup_delay_max]`.
    pub fn pick_startup_delay(&self) -> Duration {
        let min = self.startup_delay_min.as_millis() as u64;
        let max = self.startup_delay_max.as_millis() as u64;
        if max <= min {
            return self.startup_delay_min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

// ============================================================================
// Refresh Scheduler
// ============================================================================

/// Owns the background jobs of one [`RankingEngine`].
pub struct RefreshScheduler {
    engine: Arc<RankingEngine>,
    settings: SchedulerSettings,
    status: Arc<RwLock<SchedulerStatus>>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(engine: Arc<RankingEngine>, settings: SchedulerSettings) -> Self {
        Self {
            engine,
            settings,
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }

    /// Token cancelled by [`Self::shutdown`]; child tokens stop with it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn both loops. Calling it again while running is a no-op.
    pub async fn start(&self) {
        if !self.settings.enabled {
            info!("Refresh scheduler disabled");
            return;
        }

        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            warn!("Refresh scheduler already started");
            return;
        }
        if self.cancel.is_cancelled() {
            warn!("Refresh scheduler was shut down, not restarting");
            return;
        }

        {
            let mut status = self.status.write().await;
            status.state = SchedulerState::WarmingUp;
            status.started_at = Some(Utc::now());
        }

        handles.push(tokio::spawn(eviction_loop(
            self.engine.clone(),
            self.status.clone(),
            self.settings.eviction_interval,
            self.cancel.child_token(),
        )));

        handles.push(tokio::spawn(rebuild_loop(
            self.engine.clone(),
            self.status.clone(),
            self.settings.rebuild_interval,
            self.settings.pick_startup_delay(),
            self.cancel.child_token(),
        )));

        info!(
            eviction_secs = self.settings.eviction_interval.as_secs(),
            rebuild_secs = self.settings.rebuild_interval.as_secs(),
            "Refresh scheduler started"
        );
    }

    /// Cancel both loops and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }

        self.status.write().await.state = SchedulerState::Stopped;
        info!("Refresh scheduler stopped");
    }

    /// Run one eviction cycle now.
    pub async fn trigger_eviction(&self) {
        eviction_cycle(&self.engine, &self.status, &self.cancel).await;
    }

    /// Run one rebuild cycle now (skipped if one is in flight).
    pub async fn trigger_rebuild(&self) {
        rebuild_cycle(&self.engine, &self.status, &self.cancel).await;
    }
}

// ============================================================================
// Loops
// ============================================================================

async fn eviction_loop(
    engine: Arc<RankingEngine>,
    status: Arc<RwLock<SchedulerStatus>>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        eviction_cycle(&engine, &status, &cancel).await;
    }
    debug!("Eviction loop exited");
}

async fn rebuild_loop(
    engine: Arc<RankingEngine>,
    status: Arc<RwLock<SchedulerStatus>>,
    every: Duration,
    startup_delay: Duration,
    cancel: CancellationToken,
) {
    info!(delay_ms = startup_delay.as_millis() as u64, "Delaying first rebuild");
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(startup_delay) => {}
    }
    status.write().await.state = SchedulerState::Running;

    // First tick completes immediately: rebuild right after the delay
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        rebuild_cycle(&engine, &status, &cancel).await;
    }
    debug!("Rebuild loop exited");
}

/// Run `job` on its own task so a panic is contained; `None` if cancelled.
async fn isolated<T, F>(job: F, cancel: &CancellationToken) -> Option<Result<T, String>>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let mut handle = tokio::spawn(job);
    tokio::select! {
        joined = &mut handle => Some(joined.map_err(|e| {
            if e.is_panic() {
                "job panicked".to_string()
            } else {
                e.to_string()
            }
        })),
        _ = cancel.cancelled() => {
            handle.abort();
            None
        }
    }
}

async fn eviction_cycle(
    engine: &Arc<RankingEngine>,
    status: &RwLock<SchedulerStatus>,
    cancel: &CancellationToken,
) {
    let job = {
        let engine = engine.clone();
        async move { engine.evict_listings().await }
    };

    match isolated(job, cancel).await {
        Some(Ok(removed)) => {
            let mut status = status.write().await;
            status.last_eviction_at = Some(Utc::now());
            status.eviction_count += 1;
            debug!(removed, "Evicted page and search listings");
        }
        Some(Err(e)) => {
            error!(error = %e, "Eviction cycle failed");
            status.write().await.last_error = Some(e);
        }
        None => {}
    }
}

async fn rebuild_cycle(
    engine: &Arc<RankingEngine>,
    status: &RwLock<SchedulerStatus>,
    cancel: &CancellationToken,
) {
    let job = {
        let engine = engine.clone();
        async move { engine.try_scheduled_rebuild().await }
    };

    let outcome = match isolated(job, cancel).await {
        Some(Ok(result)) => result.map_err(|e| e.to_string()),
        Some(Err(e)) => Err(e),
        None => return,
    };

    let mut status = status.write().await;
    match outcome {
        Ok(Some(report)) => {
            status.last_rebuild_at = Some(report.computed_at);
            status.rebuild_count += 1;
            status.consecutive_failures = 0;
            status.last_error = None;
            status.last_report = Some(report);
        }
        Ok(None) => {
            status.skipped_rebuilds += 1;
        }
        Err(e) => {
            status.consecutive_failures += 1;
            warn!(
                error = %e,
                consecutive_failures = status.consecutive_failures,
                "Rebuild failed, keeping previously cached values"
            );
            status.last_error = Some(e);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheLayer, MemoryTier};
    use crate::classification::ClassificationTables;
    use crate::engine::EngineSettings;
    use crate::source::FixtureSource;
    use crate::types::MarketSnapshot;

    fn engine(source: FixtureSource) -> Arc<RankingEngine> {
        Arc::new(RankingEngine::new(
            Arc::new(source),
            Arc::new(ClassificationTables::builtin().unwrap()),
            Arc::new(CacheLayer::in_memory()),
            Arc::new(MemoryTier::new(16)),
            EngineSettings::default(),
        ))
    }

    fn live_source() -> FixtureSource {
        let tables = ClassificationTables::builtin().unwrap();
        FixtureSource::new(
            tables
                .universe()
                .iter()
                .map(|m| {
                    (
                        m.code.clone(),
                        MarketSnapshot {
                            market_cap: Some(2e13),
                            change_percent: Some(0.8),
                            ..Default::default()
                        },
                    )
                })
                .collect(),
        )
    }

    fn settings(delay_secs: u64) -> SchedulerSettings {
        SchedulerSettings {
            enabled: true,
            eviction_interval: Duration::from_secs(300),
            rebuild_interval: Duration::from_secs(600),
            startup_delay_min: Duration::from_secs(delay_secs),
            startup_delay_max: Duration::from_secs(delay_secs),
        }
    }

    #[test]
    fn test_startup_delay_within_range() {
        let settings = SchedulerSettings {
            startup_delay_min: Duration::from_secs(10),
            startup_delay_max: Duration::from_secs(60),
            ..settings(0)
        };
        for _ in 0..50 {
            let delay = settings.pick_startup_delay();
            assert!(delay >= Duration::from_secs(10) && delay <= Duration::from_secs(60));
        }

        let fixed = settings_with_inverted_range();
        assert_eq!(fixed.pick_startup_delay(), Duration::from_secs(30));
    }

    fn settings_with_inverted_range() -> SchedulerSettings {
        SchedulerSettings {
            startup_delay_min: Duration::from_secs(30),
            startup_delay_max: Duration::from_secs(5),
            ..settings(0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_after_startup_delay() {
        let scheduler = RefreshScheduler::new(engine(live_source()), settings(10));
        scheduler.start().await;
        assert_eq!(scheduler.status().await.state, SchedulerState::WarmingUp);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(scheduler.status().await.rebuild_count, 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        let status = scheduler.status().await;
        assert_eq!(status.state, SchedulerState::Running);
        assert_eq!(status.rebuild_count, 1);
        assert_eq!(status.last_report.as_ref().map(|r| r.fallback_count), Some(0));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(scheduler.status().await.rebuild_count, 2);

        scheduler.shutdown().await;
        assert_eq!(scheduler.status().await.state, SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_runs_periodically() {
        let engine = engine(live_source());
        let scheduler = RefreshScheduler::new(engine.clone(), settings(3600));
        scheduler.start().await;

        engine.get_paginated_universe(0, 10).await;

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(scheduler.status().await.eviction_count, 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        let status = scheduler.status().await;
        assert_eq!(status.eviction_count, 2);
        assert_eq!(status.rebuild_count, 0);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rebuild_is_recorded_and_loop_continues() {
        let scheduler = RefreshScheduler::new(engine(FixtureSource::default()), settings(1));
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        let status = scheduler.status().await;
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.last_error.as_deref().is_some_and(|e| e.contains("Rebuild aborted")));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(scheduler.status().await.consecutive_failures, 2);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_startup_delay() {
        let scheduler = RefreshScheduler::new(engine(live_source()), settings(60));
        scheduler.start().await;
        scheduler.shutdown().await;

        let status = scheduler.status().await;
        assert_eq!(status.state, SchedulerState::Stopped);
        assert_eq!(status.rebuild_count, 0);

        // Cancelled schedulers stay down
        scheduler.start().await;
        assert_eq!(scheduler.status().await.state, SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_disabled_scheduler_spawns_nothing() {
        let scheduler = RefreshScheduler::new(
            engine(live_source()),
            SchedulerSettings {
                enabled: false,
                ..settings(0)
            },
        );
        scheduler.start().await;
        assert_eq!(scheduler.status().await.state, SchedulerState::Idle);
        assert!(scheduler.handles.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_manual_triggers() {
        let scheduler = RefreshScheduler::new(engine(live_source()), settings(0));
        scheduler.trigger_rebuild().await;
        scheduler.trigger_eviction().await;

        let status = scheduler.status().await;
        assert_eq!(status.rebuild_count, 1);
        assert_eq!(status.eviction_count, 1);
    }
}
