//! Configuration management for stockdash services.
//!
//! All services share one configuration file at `~/.stockdash/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (STOCKDASH_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `STOCKDASH_LOG_LEVEL` → observability.log_level
//! - `STOCKDASH_LOG_FORMAT` → observability.log_format
//! - `STOCKDASH_CACHE_BACKEND` → cache.backend (`memory` | `redis`)
//! - `STOCKDASH_REDIS_URL` → cache.redis_url
//! - `STOCKDASH_QUOTE_URL` → source.base_url (also switches source.kind to `http`)
//! - `STOCKDASH_CLASSIFICATION` → ranking.classification_path

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".stockdash"),
        |dirs| dirs.home_dir().join(".stockdash"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration shared by stockdash services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub ranking: RankingConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub source: SourceConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("STOCKDASH_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("STOCKDASH_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Ok(backend) = std::env::var("STOCKDASH_CACHE_BACKEND") {
            match backend.to_lowercase().as_str() {
                "memory" => self.cache.backend = CacheBackendKind::Memory,
                "redis" => self.cache.backend = CacheBackendKind::Redis,
                other => tracing::warn!(value = %other, "Ignoring unknown STOCKDASH_CACHE_BACKEND"),
            }
        }
        if let Ok(url) = std::env::var("STOCKDASH_REDIS_URL") {
            self.cache.redis_url = url;
        }

        if let Ok(url) = std::env::var("STOCKDASH_QUOTE_URL") {
            self.source.kind = SourceKind::Http;
            self.source.base_url = Some(url);
        }

        if let Ok(path) = std::env::var("STOCKDASH_CLASSIFICATION") {
            self.ranking.classification_path = Some(path);
        }
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets pinned to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Cache Configuration
// ============================================================================

/// Which store backs the shared cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// In-process map (single instance)
    #[default]
    Memory,
    /// Redis shared by every instance
    Redis,
}

/// Cache namespaces, TTLs and backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Redis URL (redis://host:port), used when backend = redis
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Global key prefix applied by shared backends
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Ranked top-N lists
    #[serde(default = "default_rank_ttl")]
    pub rank_ttl_secs: u64,

    /// Sorted universe index
    #[serde(default = "default_universe_ttl")]
    pub universe_ttl_secs: u64,

    /// Per-security detail
    #[serde(default = "default_detail_ttl")]
    pub detail_ttl_secs: u64,

    /// Page listings
    #[serde(default = "default_page_ttl")]
    pub page_ttl_secs: u64,

    /// Keyword search results
    #[serde(default = "default_search_ttl")]
    pub search_ttl_secs: u64,

    /// Maximum entries held by the in-process page tier
    #[serde(default = "default_memory_tier_capacity")]
    pub memory_tier_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            rank_ttl_secs: default_rank_ttl(),
            universe_ttl_secs: default_universe_ttl(),
            detail_ttl_secs: default_detail_ttl(),
            page_ttl_secs: default_page_ttl(),
            search_ttl_secs: default_search_ttl(),
            memory_tier_capacity: default_memory_tier_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn rank_ttl(&self) -> Duration {
        Duration::from_secs(self.rank_ttl_secs)
    }

    pub fn universe_ttl(&self) -> Duration {
        Duration::from_secs(self.universe_ttl_secs)
    }

    pub fn detail_ttl(&self) -> Duration {
        Duration::from_secs(self.detail_ttl_secs)
    }

    pub fn page_ttl(&self) -> Duration {
        Duration::from_secs(self.page_ttl_secs)
    }

    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.search_ttl_secs)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}

fn default_key_prefix() -> String {
    "stockdash:".into()
}

fn default_rank_ttl() -> u64 {
    600 // 10 minutes
}

fn default_universe_ttl() -> u64 {
    600
}

fn default_detail_ttl() -> u64 {
    1800 // 30 minutes
}

fn default_page_ttl() -> u64 {
    300 // 5 minutes
}

fn default_search_ttl() -> u64 {
    300
}

fn default_memory_tier_capacity() -> usize {
    256
}

// ============================================================================
// Ranking Configuration
// ============================================================================

/// Ranking engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Default length of the ranked list
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Maximum entries from one sector in a ranked list
    #[serde(default = "default_sector_cap")]
    pub sector_cap: usize,

    /// Upper bound for a requested page size
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Per-candidate fetch timeout in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Deadline for a whole rebuild, after which pending candidates fall back
    #[serde(default = "default_rebuild_deadline")]
    pub rebuild_deadline_secs: u64,

    /// Concurrent snapshot fetches during a rebuild
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Classification table file; the built-in table is used when unset
    #[serde(default)]
    pub classification_path: Option<String>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            sector_cap: default_sector_cap(),
            max_page_size: default_max_page_size(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            rebuild_deadline_secs: default_rebuild_deadline(),
            concurrency: default_concurrency(),
            classification_path: None,
        }
    }
}

impl RankingConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn rebuild_deadline(&self) -> Duration {
        Duration::from_secs(self.rebuild_deadline_secs)
    }
}

fn default_top_n() -> usize {
    10
}

fn default_sector_cap() -> usize {
    2
}

fn default_max_page_size() -> usize {
    100
}

fn default_fetch_timeout_ms() -> u64 {
    3000
}

fn default_rebuild_deadline() -> u64 {
    30
}

fn default_concurrency() -> usize {
    8
}

// ============================================================================
// Scheduler Configuration
// ============================================================================

/// Background refresh cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Page/search eviction interval
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,

    /// Ranking and sorted-universe rebuild interval
    #[serde(default = "default_rebuild_interval")]
    pub rebuild_interval_secs: u64,

    /// Lower bound of the randomized delay before the first rebuild
    #[serde(default = "default_startup_delay_min")]
    pub startup_delay_min_secs: u64,

    /// Upper bound of the randomized delay before the first rebuild
    #[serde(default = "default_startup_delay_max")]
    pub startup_delay_max_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            eviction_interval_secs: default_eviction_interval(),
            rebuild_interval_secs: default_rebuild_interval(),
            startup_delay_min_secs: default_startup_delay_min(),
            startup_delay_max_secs: default_startup_delay_max(),
        }
    }
}

impl SchedulerConfig {
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_secs(self.rebuild_interval_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_eviction_interval() -> u64 {
    300
}

fn default_rebuild_interval() -> u64 {
    600
}

fn default_startup_delay_min() -> u64 {
    10
}

fn default_startup_delay_max() -> u64 {
    60
}

// ============================================================================
// Market Data Source Configuration
// ============================================================================

/// Which adapter supplies market snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// JSON quote API
    #[default]
    Http,
    /// Snapshots read from a local JSON file
    Fixture,
}

/// Market data source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    /// Base URL of the quote API (`{base_url}/quotes/{code}`)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Snapshot file used when kind = fixture
    #[serde(default)]
    pub fixture_path: Option<String>,

    /// HTTP request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            base_url: None,
            fixture_path: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    5
}

// ============================================================================
// Tests
// ============================================================================
