//! Surface conflicts, tolerate everything else

use async_trait::async_trait;

use crate::conflict::{ImmediateResolver, ResolveError, Resolution};
use crate::document::Document;
use crate::store::DocumentStore;
use crate::write::{WriteAttempt, WriteCoordinator};

/// Fail on revision conflicts and missing ids only
///
/// Any other failure is logged and treated as settled.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectOnConflict;

impl RejectOnConflict {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: DocumentStore> ImmediateResolver<S> for RejectOnConflict {
    async fn resolve(
        &self,
        _writes: &WriteCoordinator<S>,
        document: Document,
        attempt: WriteAttempt<S::Error>,
    ) -> Result<Resolution, ResolveError> {
        match attempt {
            Ok(result) => Ok(Resolution::Written(result)),
            Err(e) if e.is_conflict() || e.is_precondition() => Err(e.into()),
            Err(e) => {
                tracing::warn!(doc_id = ?document.id(), "ignoring failed write: {}", e);
                Ok(Resolution::Unchanged)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MemoryStoreError, StoreError};

    #[tokio::test]
    async fn test_conflict_fails() {
        let writes = WriteCoordinator::new(MemoryStore::new());
        writes.put(Document::new("a"), &RejectOnConflict).await.unwrap();
        let err = writes
            .put(Document::new("a"), &RejectOnConflict)
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::Conflict { id: "a".into() });
    }

    #[tokio::test]
    async fn test_other_errors_are_settled() {
        let writes = WriteCoordinator::new(MemoryStore::new());
        let attempt: WriteAttempt<MemoryStoreError> =
            Err(StoreError::NotFound("a".into()));
        let resolution = RejectOnConflict
            .resolve(&writes, Document::new("a"), attempt)
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Unchanged);
    }
}
