// =============================================================================
// Version Store — in-memory genealogy of parameter sets
// =============================================================================
//
// Versions are immutable once created; annotation replaces the entry with an
// updated clone. Readers take an Arc snapshot of the whole list and never
// block the single writer (the agent task): every mutation builds a new list
// and swaps the pointer, so any observer sees either the old state or the
// new one, never a mixture.
// =============================================================================

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::graph::GraphConfig;
use crate::types::MarketConditions;

/// Penalty weight on the market-conditions distance when ranking history.
const DISTANCE_PENALTY: f64 = 10.0;

/// A named, immutable parameter set with its running scoreboard.
#[derive(Debug, Clone, Serialize)]
pub struct AgentVersion {
    pub id: String,
    pub name: String,
    pub config: GraphConfig,
    /// Overwritten by the latest simulation that used this version.
    pub score: f64,
    pub winrate: f64,
    pub total_simulations: u32,
    pub is_active: bool,
    pub is_production: bool,
    pub created_at: DateTime<Utc>,
    /// Conditions observed by the last simulation, once one has run.
    pub market_conditions: Option<MarketConditions>,
    pub parent_id: Option<String>,
}

struct Inner {
    versions: Arc<Vec<Arc<AgentVersion>>>,
    current_id: Option<String>,
}

pub struct VersionStore {
    inner: RwLock<Inner>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                versions: Arc::new(Vec::new()),
                current_id: None,
            }),
        }
    }

    /// Seed the store from durable records. A no-op when versions already
    /// exist, so startup loading is idempotent. The newest seeded version
    /// becomes current.
    pub fn seed(&self, versions: Vec<AgentVersion>) {
        let mut inner = self.inner.write();
        if !inner.versions.is_empty() || versions.is_empty() {
            debug!(
                existing = inner.versions.len(),
                "version seed skipped"
            );
            return;
        }
        let list: Vec<Arc<AgentVersion>> = versions.into_iter().map(Arc::new).collect();
        inner.current_id = list.last().map(|v| v.id.clone());
        info!(count = list.len(), "versions seeded from durable store");
        inner.versions = Arc::new(list);
    }

    /// Create a new version and return it. Does not adopt it.
    pub fn create(
        &self,
        name: impl Into<String>,
        config: GraphConfig,
        parent_id: Option<String>,
    ) -> Arc<AgentVersion> {
        let version = Arc::new(AgentVersion {
            id: Uuid::new_v4().to_string()[..8].to_string(),
            name: name.into(),
            config,
            score: 0.0,
            winrate: 0.0,
            total_simulations: 0,
            is_active: false,
            is_production: false,
            created_at: Utc::now(),
            market_conditions: None,
            parent_id,
        });

        let mut inner = self.inner.write();
        let mut list: Vec<Arc<AgentVersion>> = inner.versions.as_ref().clone();
        list.push(version.clone());
        inner.versions = Arc::new(list);
        info!(id = %version.id, name = %version.name, "version created");
        version
    }

    /// Number of versions, for naming the next one.
    pub fn count(&self) -> usize {
        self.inner.read().versions.len()
    }

    /// The currently adopted version, if any.
    pub fn current(&self) -> Option<Arc<AgentVersion>> {
        let inner = self.inner.read();
        let id = inner.current_id.as_ref()?;
        inner.versions.iter().find(|v| &v.id == id).cloned()
    }

    /// Adopt `id` as the active version. Adopting the current version is a
    /// no-op that leaves the snapshot untouched.
    pub fn adopt(&self, id: &str) -> Result<Arc<AgentVersion>> {
        let mut inner = self.inner.write();
        if inner.current_id.as_deref() == Some(id) {
            // Already current.
            return inner
                .versions
                .iter()
                .find(|v| v.id == id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("current version {id} missing from store"));
        }
        if !inner.versions.iter().any(|v| v.id == id) {
            bail!("unknown version: {id}");
        }

        let list: Vec<Arc<AgentVersion>> = inner
            .versions
            .iter()
            .map(|v| {
                let mut next = v.as_ref().clone();
                next.is_active = v.id == id;
                Arc::new(next)
            })
            .collect();
        inner.versions = Arc::new(list);
        inner.current_id = Some(id.to_string());

        let adopted = inner
            .versions
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .expect("adopted version present by construction");
        info!(id = %adopted.id, name = %adopted.name, "version adopted");
        Ok(adopted)
    }

    /// Record a simulation outcome against a version.
    pub fn annotate(
        &self,
        id: &str,
        score: f64,
        winrate: f64,
        conditions: MarketConditions,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.versions.iter().any(|v| v.id == id) {
            bail!("unknown version: {id}");
        }
        let list: Vec<Arc<AgentVersion>> = inner
            .versions
            .iter()
            .map(|v| {
                if v.id == id {
                    let mut next = v.as_ref().clone();
                    next.score = score;
                    next.winrate = winrate;
                    next.total_simulations += 1;
                    next.market_conditions = Some(conditions);
                    Arc::new(next)
                } else {
                    v.clone()
                }
            })
            .collect();
        inner.versions = Arc::new(list);
        Ok(())
    }

    /// Immutable snapshot of every version, creation order.
    pub fn list(&self) -> Arc<Vec<Arc<AgentVersion>>> {
        self.inner.read().versions.clone()
    }

    /// Best non-current version for `conditions`: candidates need a score of
    /// at least `min_score`, and are ranked by score minus a penalty
    /// proportional to how far their recorded market looked from this one.
    /// Versions that never ran count as maximally distant.
    pub fn find_best_for(
        &self,
        conditions: &MarketConditions,
        min_score: f64,
    ) -> Option<Arc<AgentVersion>> {
        let inner = self.inner.read();
        let current_id = inner.current_id.clone();

        let mut best: Option<(f64, Arc<AgentVersion>)> = None;
        for version in inner.versions.iter() {
            if Some(&version.id) == current_id.as_ref() || version.score < min_score {
                continue;
            }
            let distance = version
                .market_conditions
                .as_ref()
                .map(|mc| conditions.distance(mc))
                .unwrap_or(1.0);
            let adjusted = version.score - DISTANCE_PENALTY * distance;
            if best.as_ref().map_or(adjusted > 0.0, |(b, _)| adjusted > *b) {
                best = Some((adjusted, version.clone()));
            }
        }
        best.map(|(_, v)| v)
    }
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("VersionStore")
            .field("count", &inner.versions.len())
            .field("current_id", &inner.current_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conditions(rsi: f64) -> MarketConditions {
        MarketConditions {
            rsi,
            volatility: 1.0,
            trend: 0.0,
            momentum: 0.0,
        }
    }

    #[test]
    fn create_then_adopt_marks_active() {
        let store = VersionStore::new();
        let v1 = store.create("v1_initial", GraphConfig::scalping(), None);
        assert!(store.current().is_none());

        store.adopt(&v1.id).unwrap();
        let current = store.current().unwrap();
        assert_eq!(current.id, v1.id);
        assert!(current.is_active);
    }

    #[test]
    fn adopting_current_is_a_noop() {
        let store = VersionStore::new();
        let v1 = store.create("v1_initial", GraphConfig::scalping(), None);
        store.adopt(&v1.id).unwrap();

        let before = store.list();
        store.adopt(&v1.id).unwrap();
        let after = store.list();
        // Same snapshot pointer: nothing was rebuilt.
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn adopt_unknown_id_fails() {
        let store = VersionStore::new();
        store.create("v1_initial", GraphConfig::scalping(), None);
        assert!(store.adopt("nope").is_err());
    }

    #[test]
    fn at_most_one_version_is_active() {
        let store = VersionStore::new();
        let v1 = store.create("v1_initial", GraphConfig::scalping(), None);
        let v2 = store.create("v2_brain_optimized", GraphConfig::scalping(), Some(v1.id.clone()));
        store.adopt(&v1.id).unwrap();
        store.adopt(&v2.id).unwrap();

        let active: Vec<_> = store.list().iter().filter(|v| v.is_active).cloned().collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, v2.id);
        assert_eq!(active[0].parent_id.as_deref(), Some(v1.id.as_str()));
    }

    #[test]
    fn snapshots_are_isolated_from_later_writes() {
        let store = VersionStore::new();
        let v1 = store.create("v1_initial", GraphConfig::scalping(), None);
        let snapshot = store.list();

        store
            .annotate(&v1.id, 80.0, 75.0, conditions(50.0))
            .unwrap();

        // The old snapshot still shows the unannotated version.
        assert_eq!(snapshot[0].score, 0.0);
        assert_eq!(store.list()[0].score, 80.0);
        assert_eq!(store.list()[0].total_simulations, 1);
    }

    #[test]
    fn seed_is_idempotent() {
        let store = VersionStore::new();
        let seeded = AgentVersion {
            id: "abc12345".to_string(),
            name: "v1_initial".to_string(),
            config: GraphConfig::scalping(),
            score: 60.0,
            winrate: 55.0,
            total_simulations: 1,
            is_active: true,
            is_production: false,
            created_at: Utc::now(),
            market_conditions: None,
            parent_id: None,
        };
        store.seed(vec![seeded.clone()]);
        assert_eq!(store.count(), 1);
        assert_eq!(store.current().unwrap().id, "abc12345");

        // Second seed must not duplicate.
        store.seed(vec![seeded]);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn find_best_prefers_similar_conditions() {
        let store = VersionStore::new();
        let near = store.create("v1_near", GraphConfig::scalping(), None);
        let far = store.create("v2_far", GraphConfig::scalping(), None);
        let current = store.create("v3_current", GraphConfig::scalping(), None);
        store.adopt(&current.id).unwrap();

        // Same score, different recorded conditions.
        store.annotate(&near.id, 70.0, 65.0, conditions(52.0)).unwrap();
        store.annotate(&far.id, 70.0, 65.0, conditions(90.0)).unwrap();

        let best = store.find_best_for(&conditions(50.0), 50.0).unwrap();
        assert_eq!(best.id, near.id);
    }

    #[test]
    fn find_best_skips_current_and_low_scores() {
        let store = VersionStore::new();
        let low = store.create("v1_low", GraphConfig::scalping(), None);
        let current = store.create("v2_current", GraphConfig::scalping(), None);
        store.adopt(&current.id).unwrap();

        store.annotate(&low.id, 30.0, 25.0, conditions(50.0)).unwrap();
        store
            .annotate(&current.id, 90.0, 85.0, conditions(50.0))
            .unwrap();

        assert!(store.find_best_for(&conditions(50.0), 50.0).is_none());
    }

    #[test]
    fn never_simulated_versions_rank_with_full_distance() {
        let make = |id: &str, mc: Option<MarketConditions>| AgentVersion {
            id: id.to_string(),
            name: id.to_string(),
            config: GraphConfig::scalping(),
            score: 70.0,
            winrate: 65.0,
            total_simulations: 1,
            is_active: false,
            is_production: false,
            created_at: Utc::now(),
            market_conditions: mc,
            parent_id: None,
        };

        let store = VersionStore::new();
        store.seed(vec![
            make("ghost", None),
            make("proven", Some(conditions(50.0))),
            make("current", Some(conditions(50.0))),
        ]);

        // Same score; the one with matching recorded conditions outranks the
        // one that never recorded any (which counts as maximally distant).
        let best = store.find_best_for(&conditions(50.0), 50.0).unwrap();
        assert_eq!(best.id, "proven");
    }
}
