//! StateStore: redb-backed state persistence for Carbonetes.
//!
//! Provides typed operations over the cluster registry, cluster snapshots,
//! the active policy, the history log, and placement audits. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(CLUSTER_STATES).map_err(map_err!(Table))?;
        txn.open_table(POLICY).map_err(map_err!(Table))?;
        txn.open_table(POLICY_AUDIT).map_err(map_err!(Table))?;
        txn.open_table(HISTORY).map_err(map_err!(Table))?;
        txn.open_table(PLACEMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_json<T: Serialize>(
        &self,
        def: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        def: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(
        &self,
        def: TableDefinition<'static, &'static str, &'static [u8]>,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    // ── Cluster registry ───────────────────────────────────────────

    /// Insert or update a registry row.
    pub fn put_cluster(&self, record: &ClusterRecord) -> StateResult<()> {
        self.put_json(CLUSTERS, &record.name, record)?;
        debug!(cluster = %record.name, region = %record.region, "cluster registered");
        Ok(())
    }

    pub fn get_cluster(&self, name: &str) -> StateResult<Option<ClusterRecord>> {
        self.get_json(CLUSTERS, name)
    }

    /// List the registry, ordered by cluster name.
    pub fn list_clusters(&self) -> StateResult<Vec<ClusterRecord>> {
        self.list_json(CLUSTERS)
    }

    /// Remove a cluster and its snapshot. Returns true if it was registered.
    pub fn delete_cluster(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
            let mut states = txn.open_table(CLUSTER_STATES).map_err(map_err!(Table))?;
            states.remove(name).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster = %name, existed, "cluster deregistered");
        Ok(existed)
    }

    // ── Cluster snapshots ──────────────────────────────────────────

    /// Replace the stored projection of every given cluster in one transaction.
    pub fn put_cluster_states(&self, states: &[ClusterState]) -> StateResult<()> {
        let mut encoded = Vec::with_capacity(states.len());
        for state in states {
            let value = serde_json::to_vec(state).map_err(map_err!(Serialize))?;
            encoded.push((state.name.as_str(), value));
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CLUSTER_STATES).map_err(map_err!(Table))?;
            for (name, value) in &encoded {
                table
                    .insert(*name, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Latest projection of every cluster, ordered by name.
    pub fn list_cluster_states(&self) -> StateResult<Vec<ClusterState>> {
        self.list_json(CLUSTER_STATES)
    }

    // ── Policy ─────────────────────────────────────────────────────

    /// The active policy, if one has been committed.
    pub fn active_policy(&self) -> StateResult<Option<PolicyRecord>> {
        self.get_json(POLICY, ACTIVE_POLICY_KEY)
    }

    /// Replace the active policy and append it to the audit log, atomically.
    pub fn replace_active_policy(&self, record: &PolicyRecord) -> StateResult<()> {
        self.commit_policy(record, false)?;
        Ok(())
    }

    /// Commit `weights` as the active policy unless one already exists.
    /// Returns true if the seed was written.
    pub fn seed_policy_if_absent(&self, weights: WeightVector, now: u64) -> StateResult<bool> {
        let record = PolicyRecord {
            weights,
            fitness: None,
            committed_at: now,
        };
        self.commit_policy(&record, true)
    }

    /// Write the active row and its audit entry in one transaction. With
    /// `only_if_absent` the existence check runs inside that same
    /// transaction, so concurrent seeders cannot both write.
    fn commit_policy(&self, record: &PolicyRecord, only_if_absent: bool) -> StateResult<bool> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut policy = txn.open_table(POLICY).map_err(map_err!(Table))?;
            if only_if_absent && policy.get(ACTIVE_POLICY_KEY).map_err(map_err!(Read))?.is_some() {
                drop(policy);
                txn.abort().map_err(map_err!(Transaction))?;
                return Ok(false);
            }
            policy
                .insert(ACTIVE_POLICY_KEY, value.as_slice())
                .map_err(map_err!(Write))?;

            let mut audit = txn.open_table(POLICY_AUDIT).map_err(map_err!(Table))?;
            let seq = audit.iter().map_err(map_err!(Read))?.count();
            let key = format!("{:020}:{seq:06}", record.committed_at);
            audit
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            a = record.weights.a,
            b = record.weights.b,
            c = record.weights.c,
            d = record.weights.d,
            fitness = ?record.fitness,
            "active policy replaced"
        );
        Ok(true)
    }

    /// Committed policies, newest first.
    pub fn list_policy_audit(&self, limit: usize) -> StateResult<Vec<PolicyRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICY_AUDIT).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev().take(limit) {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: PolicyRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    // ── History ────────────────────────────────────────────────────

    /// Append a finished job to the history log.
    pub fn append_history(&self, job: &HistoricalJob) -> StateResult<()> {
        self.put_json(HISTORY, &job.table_key(), job)
    }

    /// Read the most recent `limit` history rows, oldest first.
    ///
    /// Rows that fail to decode are reported in `malformed` instead of
    /// failing the whole read.
    pub fn recent_history(&self, limit: usize) -> StateResult<HistoryBatch> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        let mut batch = HistoryBatch::default();
        for entry in table.iter().map_err(map_err!(Read))?.rev().take(limit) {
            let (key, value) = entry.map_err(map_err!(Read))?;
            match serde_json::from_slice::<HistoricalJob>(value.value()) {
                Ok(job) => batch.records.push(job),
                Err(e) => {
                    warn!(key = %key.value(), error = %e, "skipping undecodable history row");
                    batch.malformed.push(key.value().to_string());
                }
            }
        }
        batch.records.reverse();
        batch.malformed.reverse();
        Ok(batch)
    }

    /// Number of rows in the history log.
    pub fn history_count(&self) -> StateResult<usize> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        Ok(table.iter().map_err(map_err!(Read))?.count())
    }

    // ── Placement audit ────────────────────────────────────────────

    pub fn put_placement_audit(&self, audit: &PlacementAudit) -> StateResult<()> {
        self.put_json(PLACEMENTS, &audit.job_id, audit)
    }

    pub fn get_placement_audit(&self, job_id: &str) -> StateResult<Option<PlacementAudit>> {
        self.get_json(PLACEMENTS, job_id)
    }
}
