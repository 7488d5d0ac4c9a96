//! Keep the store's winner, prune the rest

use async_trait::async_trait;

use crate::conflict::{ConflictRecord, EventualResolver, ResolveError, Resolution};
use crate::store::DocumentStore;
use crate::write::WriteCoordinator;

/// Accept the winner and remove every live losing revision
///
/// Only conflicts produced at the winner's own generation are removed;
/// conflicts from earlier generations are left alone. A revision that is
/// already gone is skipped, so replaying the same conflict is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptWinner;

impl AcceptWinner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: DocumentStore> EventualResolver<S> for AcceptWinner {
    async fn resolve(
        &self,
        writes: &WriteCoordinator<S>,
        conflict: &ConflictRecord,
    ) -> Result<Resolution, ResolveError> {
        let Some(live) = conflict.winner.live_conflicts() else {
            tracing::warn!(
                doc_id = %conflict.id,
                "winning document carries no conflict list, nothing to prune"
            );
            return Ok(Resolution::Unchanged);
        };

        let mut pruned = Vec::new();
        for rev in live {
            match writes.remove(&conflict.id, &rev).await {
                Ok(_) => {
                    tracing::info!(doc_id = %conflict.id, rev = %rev, "pruned losing revision");
                    pruned.push(rev);
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(doc_id = %conflict.id, rev = %rev, "losing revision already pruned");
                }
                Err(e) => return Err(e),
            }
        }

        if pruned.is_empty() {
            Ok(Resolution::Unchanged)
        } else {
            Ok(Resolution::Pruned(pruned))
        }
    }
}
