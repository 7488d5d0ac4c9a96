//! Conflict detection and resolution for replicated multi-master document stores
//!
//! Every replica accepts writes locally and reconciles with its peers later.
//! Reconciliation keeps one concurrent revision as the winner and records
//! the others as conflicts. This crate finds those conflicts and resolves
//! them with pluggable strategies:
//!
//! - writes rejected by the local store (a stale revision, a missing id) are
//!   handed to an [`ImmediateResolver`](conflict::ImmediateResolver) by the
//!   [`WriteCoordinator`](write::WriteCoordinator);
//! - conflicts that replication leaves behind show up on the change feed,
//!   where the [`ChangeFeedListener`](feed::ChangeFeedListener) picks them up
//!   and an [`EventualResolver`](conflict::EventualResolver) reconciles them,
//!   possibly through a three-way [merge](conflict::merge).
//!
//! [`ConflictEngine`] wires all of it to one [`DocumentStore`]. The store is
//! a trait; [`MemoryStore`] is a complete in-process implementation with a
//! revision tree and a change feed.

pub mod config;
pub mod conflict;
pub mod document;
pub mod engine;
pub mod feed;
pub mod jobs;
pub mod revision;
pub mod store;
pub mod sync;
pub mod write;

#[cfg(test)]
pub(crate) mod fixtures;

pub use config::{ConfigError, EngineConfig, EventualStrategy, ImmediateStrategy};
pub use conflict::{ConflictRecord, Resolution, ResolveError};
pub use document::{Document, Fields};
pub use engine::{ConflictEngine, EngineError, EngineHandle};
pub use feed::{ChangeEvent, ChangeNotice};
pub use revision::{Revision, RevisionHistory};
pub use store::{DocumentStore, MemoryStore, StoreError};
pub use sync::SyncEvent;
