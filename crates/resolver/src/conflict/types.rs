//! Core types for conflict resolution
//!
//! This module defines the values that flow through a single resolution:
//! the detected conflict, the outcome, and the failure cause.

use crate::document::Document;
use crate::revision::Revision;
use crate::store::{StoreError, WriteResult};

/// An eventual conflict observed on the change feed
///
/// Exists only for the duration of one resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    /// The document id the conflict belongs to
    pub id: String,
    /// The revision the store picked as current
    pub winner: Document,
    /// A concurrent revision that lost the tie-break
    pub losing: Revision,
}

impl ConflictRecord {
    pub fn new(id: impl Into<String>, winner: Document, losing: Revision) -> Self {
        Self {
            id: id.into(),
            winner,
            losing,
        }
    }
}

/// Successful outcome of a resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A document was persisted
    Written(WriteResult),
    /// Losing revisions were removed from the revision tree
    Pruned(Vec<Revision>),
    /// Nothing needed to change
    Unchanged,
}

impl Resolution {
    pub fn written(&self) -> Option<&WriteResult> {
        match self {
            Resolution::Written(result) => Some(result),
            _ => None,
        }
    }
}

/// Failure cause of a resolution
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Revision mismatch on write that the strategy did not absorb
    #[error("update conflict on document {id}")]
    Conflict { id: String },
    /// A write without an identity that the strategy did not absorb
    #[error("document id is required")]
    MissingId,
    /// A referenced document or revision is absent
    #[error("not found: {0}")]
    NotFound(String),
    /// The winner has no parent revision to merge against
    #[error("no common ancestor for {id} at {revision}")]
    MissingAncestor { id: String, revision: Revision },
    /// Any other store failure
    #[error("store error: {0}")]
    Store(String),
    /// The change feed or sync stream failed
    #[error("transport error: {0}")]
    Transport(String),
}

impl ResolveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolveError::NotFound(_))
    }
}

impl<T: std::fmt::Display> From<StoreError<T>> for ResolveError {
    fn from(err: StoreError<T>) -> Self {
        match err {
            StoreError::Conflict(id) => ResolveError::Conflict { id },
            StoreError::MissingId => ResolveError::MissingId,
            StoreError::NotFound(what) => ResolveError::NotFound(what),
            StoreError::Transport(reason) => ResolveError::Transport(reason),
            StoreError::Provider(e) => ResolveError::Store(e.to_string()),
        }
    }
}
