//! Store, registry and policy setup shared by every subcommand.

use std::path::Path;

use anyhow::Context;
use tracing::info;

use carbonetes_core::{CarbonetesConfig, ClusterRecord};
use carbonetes_learner::PolicyLearner;
use carbonetes_placement::{ClusterStateStore, ScoringParams};
use carbonetes_state::StateStore;
use carbonetes_telemetry::CarbonTable;

pub fn load_config(path: Option<&Path>) -> anyhow::Result<CarbonetesConfig> {
    match path {
        Some(path) => CarbonetesConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => {
            let config = CarbonetesConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

pub fn open_store(db: &Path) -> anyhow::Result<StateStore> {
    if let Some(dir) = db.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let store = StateStore::open(db)?;
    info!(path = ?db, "state store opened");
    Ok(store)
}

/// Upsert configured registry rows and seed the initial policy.
/// Returns the full registry.
pub fn seed(
    store: &StateStore,
    config: &CarbonetesConfig,
    now: u64,
) -> anyhow::Result<Vec<ClusterRecord>> {
    for record in &config.registry {
        store.put_cluster(record)?;
    }
    if store.seed_policy_if_absent(config.policy.initial, now)? {
        info!(weights = ?config.policy.initial, "seeded initial policy");
    }
    let registry = store.list_clusters()?;
    info!(clusters = registry.len(), "cluster registry loaded");
    Ok(registry)
}

/// Restore projected cluster state from the last snapshot, reconciled
/// with the current registry.
pub fn cluster_state(
    store: &StateStore,
    registry: &[ClusterRecord],
    carbon: &CarbonTable,
    now: u64,
) -> anyhow::Result<ClusterStateStore> {
    if registry.is_empty() {
        anyhow::bail!("cluster registry is empty: add [[registry]] rows to the config");
    }
    let snapshot = store.list_cluster_states()?;
    if snapshot.is_empty() {
        return Ok(ClusterStateStore::from_registry(
            registry,
            |region| carbon.intensity(region),
            now,
        )?);
    }
    let mut clusters = ClusterStateStore::from_snapshot(snapshot)?;
    clusters.rebase(registry, |region| carbon.intensity(region), now)?;
    info!(clusters = clusters.len(), "cluster snapshot restored");
    Ok(clusters)
}

pub fn learner(store: StateStore, config: &CarbonetesConfig) -> PolicyLearner {
    PolicyLearner::new(
        store,
        ScoringParams::from(&config.placement),
        config.learner.clone(),
        CarbonTable::from_config(&config.telemetry),
    )
}
