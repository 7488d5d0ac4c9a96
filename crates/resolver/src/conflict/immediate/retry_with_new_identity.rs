//! Re-create rejected writes under a fresh identity

use async_trait::async_trait;

use crate::conflict::{ImmediateResolver, ResolveError, Resolution};
use crate::document::Document;
use crate::store::DocumentStore;
use crate::write::{WriteAttempt, WriteCoordinator};

use super::NoRetry;

/// Submit a rejected document again as a new document
///
/// On a revision conflict or a missing id, the document's id and revision
/// are cleared and it is posted once more, so the store assigns it an id of
/// its own. The retry is settled by [`NoRetry`]. Other failures are
/// reported unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryWithNewIdentity;

impl RetryWithNewIdentity {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: DocumentStore> ImmediateResolver<S> for RetryWithNewIdentity {
    async fn resolve(
        &self,
        writes: &WriteCoordinator<S>,
        mut document: Document,
        attempt: WriteAttempt<S::Error>,
    ) -> Result<Resolution, ResolveError> {
        match attempt {
            Ok(result) => Ok(Resolution::Written(result)),
            Err(e) if e.is_conflict() || e.is_precondition() => {
                tracing::info!(
                    doc_id = ?document.id(),
                    "write rejected, re-creating under a new identity: {}",
                    e
                );
                document.id = None;
                document.rev = None;
                writes.post(document, &NoRetry).await
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GetOptions, MemoryStore};
    use serde_json::json;

    #[tokio::test]
    async fn test_conflict_creates_new_document() {
        let writes = WriteCoordinator::new(MemoryStore::new());
        writes
            .put(Document::new("a").with_field("v", 1), &NoRetry)
            .await
            .unwrap();

        let resolution = writes
            .put(Document::new("a").with_field("v", 2), &RetryWithNewIdentity)
            .await
            .unwrap();
        let written = resolution.written().unwrap();
        assert_ne!(written.id, "a");

        // the original is untouched
        let original = writes.store().get("a", GetOptions::latest()).await.unwrap();
        assert_eq!(original.get("v"), Some(&json!(1)));
        let copy = writes
            .store()
            .get(&written.id, GetOptions::latest())
            .await
            .unwrap();
        assert_eq!(copy.get("v"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_missing_id_creates_new_document() {
        let writes = WriteCoordinator::new(MemoryStore::new());
        let resolution = writes
            .put(Document::anonymous().with_field("v", 1), &RetryWithNewIdentity)
            .await
            .unwrap();
        assert!(resolution.written().is_some());
    }

    #[tokio::test]
    async fn test_other_errors_fail() {
        let writes = WriteCoordinator::new(MemoryStore::new());
        let attempt: WriteAttempt<crate::store::MemoryStoreError> =
            Err(crate::store::StoreError::Transport("offline".into()));
        let err = RetryWithNewIdentity
            .resolve(&writes, Document::new("a"), attempt)
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::Transport("offline".into()));
    }
}
