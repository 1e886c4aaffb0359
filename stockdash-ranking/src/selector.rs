//! Sector-diversified top-N selection.
//!
//! Candidates are ordered by score (market cap breaks ties) and accepted while
//! their sector is under the cap. When the cap leaves the list short, the
//! rejected candidates fill the remaining slots in the same order, so the
//! result always has `min(n, unique codes)` entries.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::types::{RankedEntry, SecurityDetail};

/// Descending market cap; absent caps sort last.
pub(crate) fn compare_market_cap(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Ranking order: score desc, then market cap desc.
pub fn rank_order(a: &SecurityDetail, b: &SecurityDetail) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| compare_market_cap(a.market_cap(), b.market_cap()))
}

/// Sort into [`rank_order`]. `sort_by` is stable, so full ties keep input order.
pub fn sort_by_rank(details: &mut [SecurityDetail]) {
    details.sort_by(rank_order);
}

/// Picks a ranked, sector-diversified top-N.
#[derive(Debug, Clone, Copy)]
pub struct DiversitySelector {
    sector_cap: usize,
}

impl DiversitySelector {
    pub fn new(sector_cap: usize) -> Self {
        Self { sector_cap }
    }

    pub fn sector_cap(&self) -> usize {
        self.sector_cap
    }

    pub fn select(&self, details: &[SecurityDetail], n: usize) -> Vec<RankedEntry> {
        if n == 0 {
            return Vec::new();
        }

        let mut sorted: Vec<&SecurityDetail> = details.iter().collect();
        sorted.sort_by(|a, b| rank_order(a, b));

        let mut seen: HashSet<&str> = HashSet::new();
        let mut per_sector: HashMap<&str, usize> = HashMap::new();
        let mut accepted: Vec<&SecurityDetail> = Vec::with_capacity(n);
        let mut rejected: Vec<&SecurityDetail> = Vec::new();

        for detail in sorted {
            if accepted.len() == n {
                break;
            }
            if !seen.insert(detail.code()) {
                continue;
            }
            let count = per_sector.entry(detail.sector()).or_insert(0);
            if *count < self.sector_cap {
                *count += 1;
                accepted.push(detail);
            } else {
                rejected.push(detail);
            }
        }

        if accepted.len() < n {
            let missing = n - accepted.len();
            accepted.extend(rejected.into_iter().take(missing));
        }

        accepted
            .into_iter()
            .enumerate()
            .map(|(i, detail)| RankedEntry::from_detail(i + 1, detail))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
