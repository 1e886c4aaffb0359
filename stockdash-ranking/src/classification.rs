//! Static classification tables.
//!
//! Sector membership, sector growth weights, per-security fundamental
//! adjustments, the scoring tier thresholds and the summary text pools are
//! configuration, not code. A default table ships with the crate and can be
//! replaced by a JSON file (`ranking.classification_path`).
//!
//! Every weight is clamped to its documented bound when the table is loaded,
//! so a misconfigured file cannot push a composite score out of range.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

use stockdash_common::error::{Error, ResultExt};
use stockdash_common::RankingConfig;

use crate::error::RankingError;
use crate::types::{Signal, UniverseMember};

/// Built-in table, used when no classification file is configured.
const BUILTIN_TABLES: &str = include_str!("../data/classification.json");

pub const SECTOR_WEIGHT_BOUNDS: (i32, i32) = (2, 25);
pub const MARKET_CAP_BOUNDS: (i32, i32) = (0, 15);
pub const FOREIGN_OWNERSHIP_BOUNDS: (i32, i32) = (0, 10);
pub const MOMENTUM_BOUNDS: (i32, i32) = (-8, 8);
pub const FUNDAMENTAL_BOUNDS: (i32, i32) = (-3, 5);

/// Sector used for codes the table does not classify.
pub const UNCLASSIFIED_SECTOR: &str = "Unclassified";

const GENERIC_SUMMARY: &str = "{name} ({change})";

// ============================================================================
// Tier Tables
// ============================================================================

/// One threshold: values `>= min` earn `points`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub min: f64,
    pub points: i32,
}

/// Threshold table evaluated top-down; values below every threshold earn `floor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    pub tiers: Vec<Tier>,
    #[serde(default)]
    pub floor: i32,
}

impl TierTable {
    fn from_pairs(pairs: &[(f64, i32)], floor: i32) -> Self {
        Self {
            tiers: pairs
                .iter()
                .map(|&(min, points)| Tier { min, points })
                .collect(),
            floor,
        }
    }

    /// Market cap (KRW): 300T / 100T / 50T / 10T / 5T / 1T.
    pub fn market_cap_default() -> Self {
        const T: f64 = 1_000_000_000_000.0;
        Self::from_pairs(
            &[
                (300.0 * T, 15),
                (100.0 * T, 12),
                (50.0 * T, 10),
                (10.0 * T, 7),
                (5.0 * T, 5),
                (1.0 * T, 3),
            ],
            0,
        )
    }

    /// Foreign ownership (%): 50 / 40 / 30 / 20 / 10.
    pub fn foreign_ownership_default() -> Self {
        Self::from_pairs(&[(50.0, 10), (40.0, 8), (30.0, 6), (20.0, 4), (10.0, 2)], 0)
    }

    /// Day change (%): 5 / 3 / 1 / -1 / -3 / -5.
    pub fn momentum_default() -> Self {
        Self::from_pairs(
            &[(5.0, 8), (3.0, 5), (1.0, 2), (-1.0, 0), (-3.0, -3), (-5.0, -5)],
            -8,
        )
    }

    /// Points for a metric. An absent or non-finite value earns nothing.
    pub fn points_for(&self, value: Option<f64>) -> i32 {
        let Some(v) = value.filter(|v| v.is_finite()) else {
            return 0;
        };
        self.tiers
            .iter()
            .find(|tier| v >= tier.min)
            .map_or(self.floor, |tier| tier.points)
    }

    fn normalize(&mut self, (lo, hi): (i32, i32)) {
        self.tiers.retain(|t| t.min.is_finite());
        self.tiers.sort_by(|a, b| b.min.total_cmp(&a.min));
        for tier in &mut self.tiers {
            tier.points = tier.points.clamp(lo, hi);
        }
        self.floor = self.floor.clamp(lo, hi);
    }
}

// ============================================================================
// Summary Pools
// ============================================================================

/// One-line descriptions per signal. Placeholders: `{name}`, `{sector}`, `{change}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryPools {
    #[serde(default)]
    pub strong_buy: Vec<String>,
    #[serde(default)]
    pub buy: Vec<String>,
    #[serde(default)]
    pub neutral: Vec<String>,
    #[serde(default)]
    pub sell: Vec<String>,
    #[serde(default)]
    pub strong_sell: Vec<String>,
}

impl SummaryPools {
    pub fn pool(&self, signal: Signal) -> &[String] {
        match signal {
            Signal::StrongBuy => &self.strong_buy,
            Signal::Buy => &self.buy,
            Signal::Neutral => &self.neutral,
            Signal::Sell => &self.sell,
            Signal::StrongSell => &self.strong_sell,
        }
    }

    /// Pick a template by index (wrapping); generic text when the pool is empty.
    pub fn template(&self, signal: Signal, pick: u64) -> &str {
        let pool = self.pool(signal);
        if pool.is_empty() {
            return GENERIC_SUMMARY;
        }
        &pool[(pick % pool.len() as u64) as usize]
    }
}

// ============================================================================
// Classification Tables
// ============================================================================

fn default_sector_weight() -> i32 {
    5
}

/// Static lookup tables consumed by the score calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationTables {
    /// Eligible universe, in table order
    pub universe: Vec<UniverseMember>,

    /// Sector → growth weight
    #[serde(default)]
    pub sector_growth: HashMap<String, i32>,

    /// Code → fundamental adjustment
    #[serde(default)]
    pub fundamentals: HashMap<String, i32>,

    /// Weight for sectors missing from `sector_growth`
    #[serde(default = "default_sector_weight")]
    pub default_sector_weight: i32,

    #[serde(default = "TierTable::market_cap_default")]
    pub market_cap_tiers: TierTable,

    #[serde(default = "TierTable::foreign_ownership_default")]
    pub foreign_ownership_tiers: TierTable,

    #[serde(default = "TierTable::momentum_default")]
    pub momentum_tiers: TierTable,

    #[serde(default)]
    pub summaries: SummaryPools,

    /// code → position in `universe`
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl ClassificationTables {
    /// Build tables from parts, with the default tiers and no summary text.
    pub fn new(
        universe: Vec<UniverseMember>,
        sector_growth: HashMap<String, i32>,
        fundamentals: HashMap<String, i32>,
    ) -> stockdash_common::Result<Self> {
        let mut tables = Self {
            universe,
            sector_growth,
            fundamentals,
            default_sector_weight: default_sector_weight(),
            market_cap_tiers: TierTable::market_cap_default(),
            foreign_ownership_tiers: TierTable::foreign_ownership_default(),
            momentum_tiers: TierTable::momentum_default(),
            summaries: SummaryPools::default(),
            index: HashMap::new(),
        };
        tables.normalize()?;
        Ok(tables)
    }

    /// The table bundled with the crate.
    pub fn builtin() -> stockdash_common::Result<Self> {
        Self::from_json(BUILTIN_TABLES).context("parsing built-in classification")
    }

    pub fn from_json(json: &str) -> stockdash_common::Result<Self> {
        let mut tables: Self = serde_json::from_str(json)?;
        tables.normalize()?;
        Ok(tables)
    }

    pub fn load_from(path: &Path) -> stockdash_common::Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("reading classification {}", path.display()))?;
        Self::from_json(&content).context(format!("parsing classification {}", path.display()))
    }

    /// Configured file if any, else the built-in table.
    pub fn from_config(config: &RankingConfig) -> stockdash_common::Result<Self> {
        match config.classification_path.as_deref() {
            Some(path) => Self::load_from(Path::new(path)),
            None => Self::builtin(),
        }
    }

    fn normalize(&mut self) -> stockdash_common::Result<()> {
        let mut seen = HashSet::new();
        self.universe.retain(|member| {
            let fresh = seen.insert(member.code.clone());
            if !fresh {
                warn!(code = %member.code, "Duplicate universe entry ignored");
            }
            fresh
        });

        if self.universe.is_empty() {
            return Err(Error::Config("classification universe is empty".into()));
        }

        let (lo, hi) = SECTOR_WEIGHT_BOUNDS;
        self.default_sector_weight = self.default_sector_weight.clamp(lo, hi);
        for weight in self.sector_growth.values_mut() {
            *weight = (*weight).clamp(lo, hi);
        }

        let (lo, hi) = FUNDAMENTAL_BOUNDS;
        for adjustment in self.fundamentals.values_mut() {
            *adjustment = (*adjustment).clamp(lo, hi);
        }

        self.market_cap_tiers.normalize(MARKET_CAP_BOUNDS);
        self.foreign_ownership_tiers.normalize(FOREIGN_OWNERSHIP_BOUNDS);
        self.momentum_tiers.normalize(MOMENTUM_BOUNDS);

        self.index = self
            .universe
            .iter()
            .enumerate()
            .map(|(i, member)| (member.code.clone(), i))
            .collect();

        Ok(())
    }

    pub fn universe(&self) -> &[UniverseMember] {
        &self.universe
    }

    pub fn member(&self, code: &str) -> Option<&UniverseMember> {
        self.index.get(code).map(|&i| &self.universe[i])
    }

    pub fn sector_of(&self, code: &str) -> Option<&str> {
        self.member(code).map(|m| m.sector.as_str())
    }

    /// Growth weight, or a configuration error for an unknown sector.
    pub fn try_sector_growth_weight(&self, sector: &str) -> Result<i32, RankingError> {
        self.sector_growth
            .get(sector)
            .copied()
            .ok_or_else(|| RankingError::Configuration(format!("no growth weight for sector {sector}")))
    }

    /// Growth weight, falling back to the default weight for unknown sectors.
    pub fn sector_growth_weight(&self, sector: &str) -> i32 {
        self.try_sector_growth_weight(sector).unwrap_or_else(|e| {
            debug!(error = %e, default = self.default_sector_weight, "Using default sector weight");
            self.default_sector_weight
        })
    }

    pub fn fundamental_adjustment(&self, code: &str) -> i32 {
        self.fundamentals.get(code).copied().unwrap_or(0)
    }
}

// ============================================================================
// Tests
// ============================================================================
