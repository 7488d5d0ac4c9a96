//! Terminal immediate strategy

use async_trait::async_trait;

use crate::conflict::{ImmediateResolver, ResolveError, Resolution};
use crate::document::Document;
use crate::store::DocumentStore;
use crate::write::{WriteAttempt, WriteCoordinator};

/// Report the outcome of the write as is
///
/// Every retrying strategy hands its one retry to this strategy, which is
/// what bounds a retry chain to a single extra hop.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl NoRetry {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: DocumentStore> ImmediateResolver<S> for NoRetry {
    async fn resolve(
        &self,
        _writes: &WriteCoordinator<S>,
        document: Document,
        attempt: WriteAttempt<S::Error>,
    ) -> Result<Resolution, ResolveError> {
        match attempt {
            Ok(result) => Ok(Resolution::Written(result)),
            Err(e) => {
                tracing::debug!(doc_id = ?document.id(), "write failed without retry: {}", e);
                Err(e.into())
            }
        }
    }
}
