//! redb table definitions for the Carbonetes state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Cluster registry rows keyed by cluster name.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Latest projected cluster state keyed by cluster name.
pub const CLUSTER_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("cluster_states");

/// The active weight policy, a single row under [`ACTIVE_POLICY_KEY`].
pub const POLICY: TableDefinition<&str, &[u8]> = TableDefinition::new("policy");

/// Every committed policy keyed by `{committed_at:020}:{seq:06}`.
pub const POLICY_AUDIT: TableDefinition<&str, &[u8]> = TableDefinition::new("policy_audit");

/// Historical job log keyed by `{dispatched_at:020}:{task_id}`.
pub const HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("history");

/// Per-job placement audit keyed by job id.
pub const PLACEMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("placements");

pub const ACTIVE_POLICY_KEY: &str = "active";
