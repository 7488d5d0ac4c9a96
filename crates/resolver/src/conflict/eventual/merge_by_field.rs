//! Three-way merge of the winner and one losing revision

use async_trait::async_trait;

use crate::conflict::immediate::RefreshRevisionAndRetry;
use crate::conflict::merge::{three_way_merge, MergePolicy};
use crate::conflict::{ConflictRecord, EventualResolver, ResolveError, Resolution};
use crate::document::Document;
use crate::store::{DocumentStore, GetOptions, StoreError};
use crate::write::WriteCoordinator;

/// Merge the losing revision into the winner field by field
///
/// The loser is merged only while it is still a live conflict of the
/// document; a loser that was already merged or pruned leaves the document
/// alone. The common ancestor is the winner's parent revision. If the winner
/// named in the record has since been superseded (by the merge of another
/// loser, say), the loser is merged against the current winner instead, with
/// the loser's own parent as the ancestor.
///
/// The merged body is written on top of the current winner and settled by
/// [`RefreshRevisionAndRetry`] since other writes may land while the merge
/// runs. The loser is then pruned, as its edits now live in the winner.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeByField {
    policy: MergePolicy,
}

impl MergeByField {
    /// Double edits keep the winner's value
    pub fn new() -> Self {
        Self::default()
    }

    /// Double edits of text fields keep both values, winner first
    pub fn concatenating() -> Self {
        Self::with_policy(MergePolicy::Concatenate)
    }

    pub fn with_policy(policy: MergePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }
}

fn abandon<E: std::fmt::Display>(id: &str, step: &str, e: StoreError<E>) -> ResolveError {
    tracing::warn!(doc_id = %id, "abandoning merge, failed to fetch {}: {}", step, e);
    e.into()
}

#[async_trait]
impl<S: DocumentStore> EventualResolver<S> for MergeByField {
    async fn resolve(
        &self,
        writes: &WriteCoordinator<S>,
        conflict: &ConflictRecord,
    ) -> Result<Resolution, ResolveError> {
        let id = conflict.id.as_str();
        let store = writes.store();

        let current = store
            .get(id, GetOptions::latest().with_conflicts().with_revisions())
            .await
            .map_err(|e| abandon(id, "winner", e))?;
        let current_rev = current
            .rev
            .clone()
            .ok_or_else(|| ResolveError::NotFound(format!("{} has no winning revision", id)))?;
        let live = current
            .conflicts
            .as_ref()
            .is_some_and(|conflicts| conflicts.contains(&conflict.losing));
        if !live {
            tracing::debug!(
                doc_id = %id,
                rev = %conflict.losing,
                current = %current_rev,
                "losing revision is no longer a live conflict, skipping merge"
            );
            return Ok(Resolution::Unchanged);
        }

        let rejected = store
            .get(id, GetOptions::at(conflict.losing.clone()).with_revisions())
            .await
            .map_err(|e| abandon(id, "losing revision", e))?;

        let superseded = conflict.winner.rev.as_ref() != Some(&current_rev);
        let (lineage, child) = if superseded {
            tracing::debug!(
                doc_id = %id,
                recorded = ?conflict.winner.rev,
                current = %current_rev,
                "winner superseded, merging against the current revision"
            );
            (&rejected, &conflict.losing)
        } else {
            (&current, &current_rev)
        };
        let ancestor = lineage
            .revisions
            .as_ref()
            .and_then(|history| history.parent())
            .ok_or_else(|| ResolveError::MissingAncestor {
                id: id.to_string(),
                revision: child.clone(),
            })?;
        let original = store
            .get(id, GetOptions::at(ancestor))
            .await
            .map_err(|e| abandon(id, "ancestor", e))?;

        let merged = three_way_merge(&original.fields, &current.fields, &rejected.fields, self.policy);
        let resolution = writes
            .put(
                Document::new(id).with_fields(merged).with_rev(current_rev),
                &RefreshRevisionAndRetry,
            )
            .await?;
        if let Some(written) = resolution.written() {
            tracing::info!(doc_id = %id, rev = %written.rev, loser = %conflict.losing, "merged conflict");
        }

        match writes.remove(id, &conflict.losing).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::AcceptWinner;
    use crate::fixtures::{diverged, diverged_many, fields};
    use crate::store::MemoryStore;
    use serde_json::{json, Value};

    fn record(winner: &Document) -> ConflictRecord {
        let losing = winner.conflicts.clone().unwrap()[0].clone();
        ConflictRecord::new(winner.id().unwrap(), winner.clone(), losing)
    }

    #[tokio::test]
    async fn test_merges_one_sided_changes() {
        let (store, winner) = diverged(
            "doc",
            fields(json!({"a": 1, "b": 2})),
            fields(json!({"a": 1, "b": 3})),
            fields(json!({"a": 5, "b": 2})),
        )
        .await;
        let writes = WriteCoordinator::new(store.clone());

        let resolution = MergeByField::new()
            .resolve(&writes, &record(&winner))
            .await
            .unwrap();
        let written = resolution.written().unwrap();
        assert_eq!(written.rev.generation(), 3);

        let merged = store.get("doc", GetOptions::latest()).await.unwrap();
        assert_eq!(Value::Object(merged.fields), json!({"a": 5, "b": 3}));
    }

    #[tokio::test]
    async fn test_concatenating_keeps_both_texts() {
        let (store, winner) = diverged(
            "doc",
            fields(json!({"name": "Bob"})),
            fields(json!({"name": "Bob Smith"})),
            fields(json!({"name": "Robert"})),
        )
        .await;
        let writes = WriteCoordinator::new(store.clone());
        let first = winner.get("name").and_then(Value::as_str).unwrap().to_string();
        let second = if first == "Bob Smith" { "Robert" } else { "Bob Smith" };

        MergeByField::concatenating()
            .resolve(&writes, &record(&winner))
            .await
            .unwrap();

        let merged = store.get("doc", GetOptions::latest()).await.unwrap();
        assert_eq!(merged.get("name"), Some(&json!(format!("{} {}", first, second))));
    }

    #[tokio::test]
    async fn test_replay_after_merge_is_a_noop() {
        let (store, winner) = diverged(
            "doc",
            fields(json!({"a": 1})),
            fields(json!({"a": 2})),
            fields(json!({"a": 3})),
        )
        .await;
        let writes = WriteCoordinator::new(store.clone());
        let record = record(&winner);

        MergeByField::new().resolve(&writes, &record).await.unwrap();
        let after_first = store.current_revision("doc").await.unwrap();

        let replay = MergeByField::new().resolve(&writes, &record).await.unwrap();
        assert_eq!(replay, Resolution::Unchanged);
        assert_eq!(store.current_revision("doc").await.unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_merge_prunes_loser() {
        let (store, winner) = diverged(
            "doc",
            fields(json!({"a": 1})),
            fields(json!({"a": 2})),
            fields(json!({"b": 3})),
        )
        .await;
        let writes = WriteCoordinator::new(store.clone());

        MergeByField::new()
            .resolve(&writes, &record(&winner))
            .await
            .unwrap();

        let current = store
            .get("doc", GetOptions::latest().with_conflicts())
            .await
            .unwrap();
        assert_eq!(current.conflicts, None);
    }

    #[tokio::test]
    async fn test_every_loser_of_one_change_is_merged() {
        let (store, winner) = diverged_many(
            "doc",
            fields(json!({"x": 0, "y": 0, "z": 0})),
            vec![
                fields(json!({"x": 1, "y": 0, "z": 0})),
                fields(json!({"x": 0, "y": 1, "z": 0})),
                fields(json!({"x": 0, "y": 0, "z": 1})),
            ],
        )
        .await;
        let losers = winner.live_conflicts().unwrap();
        assert_eq!(losers.len(), 2);
        let writes = WriteCoordinator::new(store.clone());

        // both records name the winner seen before either merge
        let mut generations = Vec::new();
        for losing in losers {
            let record = ConflictRecord::new("doc", winner.clone(), losing);
            let resolution = MergeByField::new().resolve(&writes, &record).await.unwrap();
            generations.push(resolution.written().unwrap().rev.generation());
        }
        assert_eq!(generations, vec![3, 4]);

        let merged = store
            .get("doc", GetOptions::latest().with_conflicts())
            .await
            .unwrap();
        assert_eq!(Value::Object(merged.fields), json!({"x": 1, "y": 1, "z": 1}));
        assert_eq!(merged.conflicts, None);
    }

    #[tokio::test]
    async fn test_pruned_loser_is_not_merged_back() {
        let (store, winner) = diverged(
            "doc",
            fields(json!({"v": 0, "w": 0})),
            fields(json!({"v": 1, "w": 0})),
            fields(json!({"v": 0, "w": 9})),
        )
        .await;
        let writes = WriteCoordinator::new(store.clone());
        let record = record(&winner);

        let pruned = AcceptWinner::new().resolve(&writes, &record).await.unwrap();
        assert!(matches!(pruned, Resolution::Pruned(_)));
        let before = store.get("doc", GetOptions::latest()).await.unwrap();

        let replay = MergeByField::new().resolve(&writes, &record).await.unwrap();
        assert_eq!(replay, Resolution::Unchanged);
        let after = store.get("doc", GetOptions::latest()).await.unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_first_generation_has_no_ancestor() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        a.put(&Document::new("doc").with_field("v", 1)).await.unwrap();
        b.put(&Document::new("doc").with_field("v", 2)).await.unwrap();
        b.replicate_to(&a);

        let winner = a
            .get("doc", GetOptions::latest().with_conflicts())
            .await
            .unwrap();
        let writes = WriteCoordinator::new(a.clone());
        let err = MergeByField::new()
            .resolve(&writes, &record(&winner))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingAncestor { .. }));
    }
}
