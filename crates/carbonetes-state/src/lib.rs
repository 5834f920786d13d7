//! carbonetes-state — embedded state store for Carbonetes.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the cluster registry, cluster snapshots, the active weight
//! policy, the historical job log, and placement audit records.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! History keys start with a zero-padded dispatch timestamp so a key-ordered
//! scan is chronological. The active policy is a single row that is replaced
//! in the same write transaction that appends its audit entry.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
