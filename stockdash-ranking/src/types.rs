//! Core types shared by the scoring, selection and caching stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Signal
// ============================================================================

/// Investment signal derived from a composite score and momentum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongBuy => "STRONG_BUY",
            Self::Buy => "BUY",
            Self::Neutral => "NEUTRAL",
            Self::Sell => "SELL",
            Self::StrongSell => "STRONG_SELL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Market Data
// ============================================================================

/// Live metrics for one security as returned by a data source.
///
/// Every metric is optional: a field the upstream omitted is absent, not zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    /// Day change (%)
    #[serde(default)]
    pub change_percent: Option<f64>,
    /// Market capitalisation (KRW)
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    /// Foreign ownership (%)
    #[serde(default)]
    pub foreign_ownership_percent: Option<f64>,
}

/// A security in the eligible universe, as listed in the classification table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseMember {
    pub code: String,
    pub name: String,
    pub sector: String,
}

/// One security prepared for scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityCandidate {
    pub code: String,
    pub name: String,
    pub sector: String,
    pub price: Option<f64>,
    pub change_percent: Option<f64>,
    pub market_cap: Option<f64>,
    pub foreign_ownership_percent: Option<f64>,
    pub volume: Option<f64>,
}

impl SecurityCandidate {
    /// Build a candidate from a universe member and its live snapshot.
    ///
    /// The snapshot's name wins over the table name when present.
    pub fn from_snapshot(member: &UniverseMember, snapshot: &MarketSnapshot) -> Self {
        Self {
            code: member.code.clone(),
            name: snapshot
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| member.name.clone()),
            sector: member.sector.clone(),
            price: snapshot.price,
            change_percent: snapshot.change_percent,
            market_cap: snapshot.market_cap,
            foreign_ownership_percent: snapshot.foreign_ownership_percent,
            volume: snapshot.volume,
        }
    }

    /// Candidate with no live metrics.
    pub fn without_metrics(code: &str, name: &str, sector: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            sector: sector.to_string(),
            price: None,
            change_percent: None,
            market_cap: None,
            foreign_ownership_percent: None,
            volume: None,
        }
    }
}

// ============================================================================
// Scored Output
// ============================================================================

/// A scored security: cached under `detail:{code}` and used as selector input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityDetail {
    #[serde(flatten)]
    pub candidate: SecurityCandidate,
    pub score: i32,
    pub signal: Signal,
    pub summary: String,
    pub computed_at: DateTime<Utc>,
    /// True when live data was unavailable and the neutral fallback was used
    pub fallback: bool,
}

impl SecurityDetail {
    pub fn code(&self) -> &str {
        &self.candidate.code
    }

    pub fn sector(&self) -> &str {
        &self.candidate.sector
    }

    pub fn market_cap(&self) -> Option<f64> {
        self.candidate.market_cap
    }
}

/// One row of a ranked top-N list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    /// 1-based, contiguous
    pub rank: usize,
    pub code: String,
    pub name: String,
    pub sector: String,
    pub score: i32,
    pub signal: Signal,
    pub summary: String,
    pub computed_at: DateTime<Utc>,
    pub fallback: bool,
}

impl RankedEntry {
    pub fn from_detail(rank: usize, detail: &SecurityDetail) -> Self {
        Self {
            rank,
            code: detail.candidate.code.clone(),
            name: detail.candidate.name.clone(),
            sector: detail.candidate.sector.clone(),
            score: detail.score,
            signal: detail.signal,
            summary: detail.summary.clone(),
            computed_at: detail.computed_at,
            fallback: detail.fallback,
        }
    }
}

/// Eligible codes ordered by market cap, descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortedUniverse {
    pub codes: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

/// One page of the sorted universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniversePage {
    pub items: Vec<SecurityDetail>,
    /// 0-based
    pub page: usize,
    pub size: usize,
    pub total_count: usize,
    pub total_pages: usize,
    pub computed_at: DateTime<Utc>,
}

/// Keyword search over codes and names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub keyword: String,
    pub items: Vec<SecurityDetail>,
    pub computed_at: DateTime<Utc>,
}

/// Outcome of an eager rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub computed_at: DateTime<Utc>,
    pub universe_size: usize,
    pub fallback_count: usize,
    pub ranked_count: usize,
    pub duration_ms: u64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> UniverseMember {
        UniverseMember {
            code: "005930".into(),
            name: "삼성전자".into(),
            sector: "Semiconductors".into(),
        }
    }

    #[test]
    fn test_signal_serde_names() {
        assert_eq!(serde_json::to_string(&Signal::StrongBuy).unwrap(), "\"STRONG_BUY\"");
        let parsed: Signal = serde_json::from_str("\"STRONG_SELL\"").unwrap();
        assert_eq!(parsed, Signal::StrongSell);
        assert_eq!(Signal::Neutral.to_string(), "NEUTRAL");
    }

    #[test]
    fn test_snapshot_missing_fields_are_absent() {
        let snapshot: MarketSnapshot =
            serde_json::from_str(r#"{"price": 71200.0, "changePercent": 1.2}"#).unwrap();
        assert_eq!(snapshot.price, Some(71200.0));
        assert_eq!(snapshot.change_percent, Some(1.2));
        assert_eq!(snapshot.market_cap, None);
        assert_eq!(snapshot.foreign_ownership_percent, None);
    }

    #[test]
    fn test_candidate_prefers_snapshot_name() {
        let snapshot = MarketSnapshot {
            name: Some("Samsung Elec".into()),
            ..Default::default()
        };
        let candidate = SecurityCandidate::from_snapshot(&member(), &snapshot);
        assert_eq!(candidate.name, "Samsung Elec");

        let blank = MarketSnapshot {
            name: Some("  ".into()),
            ..Default::default()
        };
        let candidate = SecurityCandidate::from_snapshot(&member(), &blank);
        assert_eq!(candidate.name, "삼성전자");
    }

    #[test]
    fn test_detail_flattens_candidate() {
        let detail = SecurityDetail {
            candidate: SecurityCandidate::without_metrics("005930", "삼성전자", "Semiconductors"),
            score: 50,
            signal: Signal::Neutral,
            summary: String::new(),
            computed_at: Utc::now(),
            fallback: true,
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["code"], "005930");
        assert_eq!(value["signal"], "NEUTRAL");

        let back: SecurityDetail = serde_json::from_value(value).unwrap();
        assert_eq!(back, detail);
    }
}
