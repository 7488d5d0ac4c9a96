//! Re-apply a stale write on top of the current revision

use async_trait::async_trait;

use crate::conflict::{ImmediateResolver, ResolveError, Resolution};
use crate::document::Document;
use crate::store::DocumentStore;
use crate::write::{WriteAttempt, WriteCoordinator};

use super::NoRetry;

/// Retry a conflicting write once against the current revision
///
/// The current revision of the same id is fetched and stamped onto the
/// document, which is then written again and settled by [`NoRetry`]. The
/// caller's body wins over whatever was written in between.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshRevisionAndRetry;

impl RefreshRevisionAndRetry {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: DocumentStore> ImmediateResolver<S> for RefreshRevisionAndRetry {
    async fn resolve(
        &self,
        writes: &WriteCoordinator<S>,
        document: Document,
        attempt: WriteAttempt<S::Error>,
    ) -> Result<Resolution, ResolveError> {
        let e = match attempt {
            Ok(result) => return Ok(Resolution::Written(result)),
            Err(e) if e.is_conflict() => e,
            Err(e) => return Err(e.into()),
        };
        let Some(id) = document.id.clone() else {
            return Err(e.into());
        };

        let current = writes.store().current_revision(&id).await?;
        tracing::info!(doc_id = %id, rev = %current, "stale write, retrying on current revision");
        writes.put(document.with_rev(current), &NoRetry).await
    }
}
