//! File-backed source for offline runs and demos.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

use stockdash_common::error::ResultExt;

use super::{DataSource, SourceError};
use crate::types::MarketSnapshot;

/// Serves snapshots from a `{code: snapshot}` JSON map.
#[derive(Debug, Clone, Default)]
pub struct FixtureSource {
    snapshots: HashMap<String, MarketSnapshot>,
}

impl FixtureSource {
    pub fn new(snapshots: HashMap<String, MarketSnapshot>) -> Self {
        Self { snapshots }
    }

    pub fn from_json(json: &str) -> stockdash_common::Result<Self> {
        let snapshots: HashMap<String, MarketSnapshot> = serde_json::from_str(json)?;
        Ok(Self::new(snapshots))
    }

    pub fn load_from(path: &Path) -> stockdash_common::Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("reading fixture {}", path.display()))?;
        Self::from_json(&content).context(format!("parsing fixture {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait]
impl DataSource for FixtureSource {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_snapshot(&self, code: &str) -> Result<Option<MarketSnapshot>, SourceError> {
        Ok(self.snapshots.get(code).cloned())
    }
}
