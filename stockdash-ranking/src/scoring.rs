//! Composite attractiveness score.
//!
//! ```text
//! score = clamp(50 + sector + market_cap + ownership + momentum + fundamental + temporal, 30, 90)
//! ```
//!
//! Each term is bounded on its own (see [`crate::classification`]); the
//! temporal term is a deterministic function of `(code, hour, day-of-year)`
//! so repeated computations inside the same hour reproduce the same ranking.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

use stockdash_common::util::{format_signed_percent, truncate_with_ellipsis};

use crate::classification::{ClassificationTables, UNCLASSIFIED_SECTOR};
use crate::types::{MarketSnapshot, SecurityCandidate, SecurityDetail, Signal, UniverseMember};

pub const BASE_SCORE: i32 = 50;
pub const MIN_SCORE: i32 = 30;
pub const MAX_SCORE: i32 = 90;
pub const FALLBACK_SCORE: i32 = 50;

/// Momentum above which a top score becomes STRONG_BUY.
pub const STRONG_MOMENTUM: f64 = 3.0;

const MAX_SUMMARY_CHARS: usize = 80;
const FALLBACK_SUMMARY: &str = "Live data temporarily unavailable";

/// Stable hash of `(code, hour, day-of-year)`.
fn time_bucket_hash(code: &str, at: DateTime<Utc>) -> u64 {
    xxh3_64(format!("{}:{}:{}", code, at.hour(), at.ordinal()).as_bytes())
}

/// Bounded, deterministic per-hour variation in `[-3, 3]`.
pub fn temporal_variance(code: &str, at: DateTime<Utc>) -> i32 {
    (time_bucket_hash(code, at) % 7) as i32 - 3
}

/// Map a clamped score and day change to a signal.
pub fn signal_for(score: i32, momentum: Option<f64>) -> Signal {
    match score {
        s if s >= 80 => {
            if momentum.is_some_and(|m| m > STRONG_MOMENTUM) {
                Signal::StrongBuy
            } else {
                Signal::Buy
            }
        }
        s if s >= 65 => Signal::Buy,
        s if s >= 50 => Signal::Neutral,
        s if s >= 35 => Signal::Sell,
        _ => Signal::StrongSell,
    }
}

/// Individual score terms, kept for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreBreakdown {
    pub sector: i32,
    pub market_cap: i32,
    pub foreign_ownership: i32,
    pub momentum: i32,
    pub fundamental: i32,
    pub temporal: i32,
}

impl ScoreBreakdown {
    pub fn raw_total(&self) -> i32 {
        BASE_SCORE
            + self.sector
            + self.market_cap
            + self.foreign_ownership
            + self.momentum
            + self.fundamental
            + self.temporal
    }

    pub fn score(&self) -> i32 {
        self.raw_total().clamp(MIN_SCORE, MAX_SCORE)
    }
}

/// Turns candidates into scored [`SecurityDetail`]s.
#[derive(Clone)]
pub struct ScoreCalculator {
    tables: Arc<ClassificationTables>,
}

impl ScoreCalculator {
    pub fn new(tables: Arc<ClassificationTables>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &ClassificationTables {
        &self.tables
    }

    /// Sector for a code, `Unclassified` when the table does not know it.
    pub fn sector_of(&self, code: &str) -> String {
        self.tables
            .sector_of(code)
            .unwrap_or(UNCLASSIFIED_SECTOR)
            .to_string()
    }

    pub fn breakdown(
        &self,
        code: &str,
        sector: &str,
        snapshot: &MarketSnapshot,
        at: DateTime<Utc>,
    ) -> ScoreBreakdown {
        ScoreBreakdown {
            sector: self.tables.sector_growth_weight(sector),
            market_cap: self.tables.market_cap_tiers.points_for(snapshot.market_cap),
            foreign_ownership: self
                .tables
                .foreign_ownership_tiers
                .points_for(snapshot.foreign_ownership_percent),
            momentum: self.tables.momentum_tiers.points_for(snapshot.change_percent),
            fundamental: self.tables.fundamental_adjustment(code),
            temporal: temporal_variance(code, at),
        }
    }

    /// Score a candidate with live metrics.
    pub fn score(&self, candidate: SecurityCandidate, at: DateTime<Utc>) -> SecurityDetail {
        let snapshot = MarketSnapshot {
            name: None,
            price: candidate.price,
            change_percent: candidate.change_percent,
            market_cap: candidate.market_cap,
            volume: candidate.volume,
            foreign_ownership_percent: candidate.foreign_ownership_percent,
        };
        let score = self
            .breakdown(&candidate.code, &candidate.sector, &snapshot, at)
            .score();
        let signal = signal_for(score, candidate.change_percent);
        let summary = self.summarize(&candidate, signal, at);

        SecurityDetail {
            candidate,
            score,
            signal,
            summary,
            computed_at: at,
            fallback: false,
        }
    }

    /// Score a member from a fetched snapshot.
    pub fn score_snapshot(
        &self,
        member: &UniverseMember,
        snapshot: &MarketSnapshot,
        at: DateTime<Utc>,
    ) -> SecurityDetail {
        self.score(SecurityCandidate::from_snapshot(member, snapshot), at)
    }

    /// Neutral entry for a security whose snapshot is unavailable.
    pub fn fallback(&self, member: &UniverseMember, name: &str, at: DateTime<Utc>) -> SecurityDetail {
        SecurityDetail {
            candidate: SecurityCandidate::without_metrics(&member.code, name, &member.sector),
            score: FALLBACK_SCORE,
            signal: Signal::Neutral,
            summary: FALLBACK_SUMMARY.to_string(),
            computed_at: at,
            fallback: true,
        }
    }

    fn summarize(&self, candidate: &SecurityCandidate, signal: Signal, at: DateTime<Utc>) -> String {
        let template = self
            .tables
            .summaries
            .template(signal, time_bucket_hash(&candidate.code, at) >> 8);
        let change = candidate
            .change_percent
            .map_or_else(|| "n/a".to_string(), format_signed_percent);

        let text = template
            .replace("{name}", &candidate.name)
            .replace("{sector}", &candidate.sector)
            .replace("{change}", &change);
        truncate_with_ellipsis(&text, MAX_SUMMARY_CHARS)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn calculator() -> ScoreCalculator {
        ScoreCalculator::new(Arc::new(ClassificationTables::builtin().unwrap()))
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 16, 5, 30, 0).unwrap()
    }

    fn member(code: &str) -> UniverseMember {
        let tables = ClassificationTables::builtin().unwrap();
        tables.member(code).cloned().unwrap()
    }

    #[test]
    fn test_signal_mapping() {
        assert_eq!(signal_for(85, Some(3.5)), Signal::StrongBuy);
        assert_eq!(signal_for(85, Some(3.0)), Signal::Buy);
        assert_eq!(signal_for(80, None), Signal::Buy);
        assert_eq!(signal_for(65, Some(10.0)), Signal::Buy);
        assert_eq!(signal_for(64, None), Signal::Neutral);
        assert_eq!(signal_for(50, None), Signal::Neutral);
        assert_eq!(signal_for(49, None), Signal::Sell);
        assert_eq!(signal_for(35, None), Signal::Sell);
        assert_eq!(signal_for(34, None), Signal::StrongSell);
    }

    #[test]
    fn test_temporal_variance_is_deterministic() {
        let t = at();
        let first = temporal_variance("005930", t);
        for _ in 0..10 {
            assert_eq!(temporal_variance("005930", t), first);
        }
        // Same hour later in the day bucket
        let same_bucket = t + chrono::Duration::minutes(20);
        assert_eq!(temporal_variance("005930", same_bucket), first);
    }

    #[test]
    fn test_breakdown_terms() {
        let calc = calculator();
        let snapshot = MarketSnapshot {
            market_cap: Some(425e12),
            foreign_ownership_percent: Some(55.0),
            change_percent: Some(4.0),
            ..Default::default()
        };
        let b = calc.breakdown("005930", "Semiconductors", &snapshot, at());

        assert_eq!(b.sector, 25);
        assert_eq!(b.market_cap, 15);
        assert_eq!(b.foreign_ownership, 10);
        assert_eq!(b.momentum, 5);
        assert_eq!(b.fundamental, 5);
        assert_eq!(b.temporal, temporal_variance("005930", at()));
        assert_eq!(b.score(), MAX_SCORE);
        assert!(b.raw_total() > MAX_SCORE);
    }

    #[test]
    fn test_missing_fields_contribute_nothing() {
        let calc = calculator();
        let b = calc.breakdown("005930", "Semiconductors", &MarketSnapshot::default(), at());
        assert_eq!(b.market_cap, 0);
        assert_eq!(b.foreign_ownership, 0);
        assert_eq!(b.momentum, 0);
    }

    #[test]
    fn test_score_strong_buy_with_momentum() {
        let calc = calculator();
        let snapshot = MarketSnapshot {
            market_cap: Some(425e12),
            foreign_ownership_percent: Some(55.0),
            change_percent: Some(4.0),
            ..Default::default()
        };
        let detail = calc.score_snapshot(&member("005930"), &snapshot, at());
        assert_eq!(detail.score, 90);
        assert_eq!(detail.signal, Signal::StrongBuy);
        assert!(!detail.fallback);
        assert!(detail.summary.contains("+4.00%"));
    }

    #[test]
    fn test_low_score_clamped() {
        let tables = ClassificationTables::new(
            vec![UniverseMember {
                code: "X".into(),
                name: "x".into(),
                sector: "Slow".into(),
            }],
            HashMap::from([("Slow".to_string(), 2)]),
            HashMap::from([("X".to_string(), -3)]),
        )
        .unwrap();
        let calc = ScoreCalculator::new(Arc::new(tables));
        let snapshot = MarketSnapshot {
            change_percent: Some(-9.0),
            ..Default::default()
        };
        let b = calc.breakdown("X", "Slow", &snapshot, at());
        // 50 + 2 + 0 + 0 - 8 - 3 + [-3, 3]
        assert!((38..=44).contains(&b.raw_total()));
        let signal = signal_for(b.score(), snapshot.change_percent);
        assert_eq!(signal, Signal::Sell);
    }

    #[test]
    fn test_fallback_entry() {
        let calc = calculator();
        let detail = calc.fallback(&member("035720"), "카카오", at());
        assert_eq!(detail.score, FALLBACK_SCORE);
        assert_eq!(detail.signal, Signal::Neutral);
        assert!(detail.fallback);
        assert_eq!(detail.candidate.name, "카카오");
        assert_eq!(detail.candidate.market_cap, None);
    }

    #[test]
    fn test_unknown_code_is_unclassified() {
        let calc = calculator();
        assert_eq!(calc.sector_of("999999"), UNCLASSIFIED_SECTOR);
    }

    proptest! {
        #[test]
        fn prop_score_always_in_bounds(
            cap in proptest::option::of(0.0f64..1e15),
            foreign in proptest::option::of(0.0f64..100.0),
            change in proptest::option::of(-30.0f64..30.0),
            hour in 0u32..24,
            day in 1u32..365,
            code_idx in 0usize..30,
        ) {
            let calc = calculator();
            let member = calc.tables().universe()[code_idx].clone();
            let t = chrono::NaiveDate::from_yo_opt(2026, day)
                .and_then(|d| d.and_hms_opt(hour, 0, 0))
                .unwrap()
                .and_utc();
            let snapshot = MarketSnapshot {
                market_cap: cap,
                foreign_ownership_percent: foreign,
                change_percent: change,
                ..Default::default()
            };
            let detail = calc.score_snapshot(&member, &snapshot, t);
            prop_assert!((MIN_SCORE..=MAX_SCORE).contains(&detail.score));
            let variance = temporal_variance(&member.code, t);
            prop_assert!((-3..=3).contains(&variance));
        }
    }
}
