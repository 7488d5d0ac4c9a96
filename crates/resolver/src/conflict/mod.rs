//! Conflict resolution strategies
//!
//! Two kinds of conflict reach this module:
//!
//! - **Immediate**: a single write is rejected by the local store, because
//!   its revision is stale or it carries no usable identity. An
//!   [`ImmediateResolver`] receives the outcome of the write and decides
//!   whether to retry.
//! - **Eventual**: replication delivered concurrent edits of one document
//!   and the store kept one as the winner. An [`EventualResolver`] receives
//!   the winner and one losing revision and reconciles them.
//!
//! # Built-in Strategies
//!
//! - **[`NoRetry`]**: report the outcome as is
//! - **[`RetryWithNewIdentity`]**: re-create a rejected document under a
//!   fresh store-assigned id
//! - **[`RefreshRevisionAndRetry`]**: re-apply the write on top of the
//!   current revision, once
//! - **[`RejectOnConflict`]**: surface revision conflicts, swallow the rest
//! - **[`AcceptWinner`]**: prune every live losing revision
//! - **[`MergeByField`]**: three-way merge of winner and loser against their
//!   common ancestor
//!
//! # Custom Resolvers
//!
//! Implement either trait to plug in a strategy of your own.

mod eventual;
mod immediate;
pub mod merge;
mod types;

pub use eventual::{AcceptWinner, MergeByField};
pub use immediate::{NoRetry, RefreshRevisionAndRetry, RejectOnConflict, RetryWithNewIdentity};
pub use merge::{Classification, MergePolicy};
pub use types::{ConflictRecord, Resolution, ResolveError};

use async_trait::async_trait;

use crate::document::Document;
use crate::store::DocumentStore;
use crate::write::{WriteAttempt, WriteCoordinator};

/// Strategy applied to the outcome of a single write
#[async_trait]
pub trait ImmediateResolver<S: DocumentStore>: std::fmt::Debug + Send + Sync {
    /// Settle the outcome of writing `document`
    ///
    /// # Arguments
    ///
    /// * `writes` - Write path for any retry; retries must name a terminal
    ///   strategy so the chain is bounded
    /// * `document` - The document as the caller submitted it
    /// * `attempt` - What the store said
    async fn resolve(
        &self,
        writes: &WriteCoordinator<S>,
        document: Document,
        attempt: WriteAttempt<S::Error>,
    ) -> Result<Resolution, ResolveError>;
}

/// Strategy applied to one eventual conflict
#[async_trait]
pub trait EventualResolver<S: DocumentStore>: std::fmt::Debug + Send + Sync {
    async fn resolve(
        &self,
        writes: &WriteCoordinator<S>,
        conflict: &ConflictRecord,
    ) -> Result<Resolution, ResolveError>;
}
