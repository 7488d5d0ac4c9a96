use std::fmt::{Debug, Display};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::feed::ChangeEvent;
use crate::revision::Revision;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError<T> {
    /// An error specific to the store implementation
    #[error("unhandled store provider error: {0}")]
    Provider(#[from] T),
    /// The write named a stale revision, or no revision for a document
    ///  that already exists
    #[error("document update conflict: {0}")]
    Conflict(String),
    /// The write did not carry a document id
    #[error("document id is required")]
    MissingId,
    /// The referenced document or revision does not exist
    #[error("missing: {0}")]
    NotFound(String),
    /// The change feed was interrupted
    #[error("change feed interrupted: {0}")]
    Transport(String),
}

impl<T> StoreError<T> {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, StoreError::MissingId)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Acknowledgement of an accepted write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub id: String,
    pub rev: Revision,
}

/// Options for reading a document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Read this specific revision instead of the current winner
    pub revision: Option<Revision>,
    /// Attach the revision's ancestry as `_revisions`
    pub revisions: bool,
    /// Attach the losing leaf revisions as `_conflicts`
    pub conflicts: bool,
}

impl GetOptions {
    pub fn latest() -> Self {
        Self::default()
    }

    pub fn at(revision: Revision) -> Self {
        Self {
            revision: Some(revision),
            ..Default::default()
        }
    }

    pub fn with_revisions(mut self) -> Self {
        self.revisions = true;
        self
    }

    pub fn with_conflicts(mut self) -> Self {
        self.conflicts = true;
        self
    }
}

/// Position in the change feed to start from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Since {
    /// Only changes made after subscribing
    #[default]
    Now,
    /// Every document from the start of the log
    Beginning,
    /// Changes after this sequence number
    #[serde(untagged)]
    Seq(u64),
}

/// Options for subscribing to the change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangesOptions {
    pub since: Since,
    pub live: bool,
    pub include_docs: bool,
    pub include_conflicts: bool,
}

impl Default for ChangesOptions {
    fn default() -> Self {
        Self {
            since: Since::Now,
            live: true,
            include_docs: true,
            include_conflicts: true,
        }
    }
}

pub type ChangeStream<E> = BoxStream<'static, Result<ChangeEvent, StoreError<E>>>;

/// A revision-tracking document store
///
/// The resolution engine only ever talks to the store through this trait.
/// Every call is a suspension point: callers must tolerate the store having
/// changed between two calls.
#[async_trait]
pub trait DocumentStore: Send + Sync + Debug + Clone + 'static {
    type Error: Display + Debug + Send + Sync + 'static;

    /// Read a document
    ///
    /// # Returns
    /// * `Ok(Document)` - The current winner, or the requested revision
    /// * `Err(StoreError::NotFound)` - The document or revision does not exist,
    ///   or the document is deleted and no revision was requested
    async fn get(
        &self,
        id: &str,
        options: GetOptions,
    ) -> Result<Document, StoreError<Self::Error>>;

    /// Write a document under its own id
    ///
    /// Should fail with the following errors to be considered correct:
    /// * `Err(StoreError::MissingId)` - The document has no id
    /// * `Err(StoreError::Conflict)` - The document's revision is not a current
    ///   leaf, or it has no revision and a live document already exists
    async fn put(&self, document: &Document) -> Result<WriteResult, StoreError<Self::Error>>;

    /// Create a document, assigning an id when it has none
    async fn post(&self, document: &Document) -> Result<WriteResult, StoreError<Self::Error>>;

    /// Delete one specific leaf revision of a document
    ///
    /// Removing a losing leaf is how a conflict is pruned.
    async fn remove(
        &self,
        id: &str,
        rev: &Revision,
    ) -> Result<WriteResult, StoreError<Self::Error>>;

    /// Subscribe to the change feed
    async fn changes(
        &self,
        options: ChangesOptions,
    ) -> Result<ChangeStream<Self::Error>, StoreError<Self::Error>>;

    /// The current winning revision of a document
    async fn current_revision(&self, id: &str) -> Result<Revision, StoreError<Self::Error>> {
        self.get(id, GetOptions::latest())
            .await?
            .rev
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_since_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            since: Since,
        }
        let w: Wrapper = toml::from_str("since = \"now\"").unwrap();
        assert_eq!(w.since, Since::Now);
        let w: Wrapper = toml::from_str("since = \"beginning\"").unwrap();
        assert_eq!(w.since, Since::Beginning);
        let w: Wrapper = toml::from_str("since = 42").unwrap();
        assert_eq!(w.since, Since::Seq(42));
    }

    #[test]
    fn test_error_classes() {
        let err: StoreError<std::io::Error> = StoreError::Conflict("a".into());
        assert!(err.is_conflict());
        assert!(!err.is_precondition());
        assert!(StoreError::<std::io::Error>::MissingId.is_precondition());
        assert!(StoreError::<std::io::Error>::NotFound("a".into()).is_not_found());
    }
}
