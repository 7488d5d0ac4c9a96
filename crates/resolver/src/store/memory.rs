//! In-memory document store with a full revision tree
//!
//! Keeps every revision of every document, picks a deterministic winner
//! among concurrent leaves and reports the others as conflicts, exactly the
//! way a replicated multi-master store does. Two stores can exchange
//! revisions with [`MemoryStore::replicate_to`], which is enough to produce
//! eventual conflicts between replicas without a network.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::document::{Document, Fields};
use crate::feed::ChangeEvent;
use crate::revision::{Revision, RevisionHistory};

use super::provider::{
    ChangeStream, ChangesOptions, DocumentStore, GetOptions, Since, StoreError, WriteResult,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryStoreError {
    #[error("failed to encode document body: {0}")]
    Encode(String),
}

type Error = StoreError<MemoryStoreError>;
type FeedItem = Result<ChangeEvent, Error>;

#[derive(Debug, Clone)]
struct RevisionNode {
    parent: Option<Revision>,
    deleted: bool,
    fields: Fields,
}

#[derive(Debug, Default)]
struct RevisionTree {
    nodes: HashMap<Revision, RevisionNode>,
    /// Sequence number of the last write touching this document
    last_seq: u64,
}

impl RevisionTree {
    fn leaves(&self) -> Vec<&Revision> {
        let parents: HashSet<&Revision> = self
            .nodes
            .values()
            .filter_map(|node| node.parent.as_ref())
            .collect();
        self.nodes
            .keys()
            .filter(|rev| !parents.contains(rev))
            .collect()
    }

    fn is_live_leaf(&self, rev: &Revision) -> bool {
        match self.nodes.get(rev) {
            Some(node) => !node.deleted && self.leaves().contains(&rev),
            None => false,
        }
    }

    /// Non-deleted leaves beat deleted ones, then the highest revision wins
    fn winner(&self) -> Option<(&Revision, &RevisionNode)> {
        self.leaves()
            .into_iter()
            .filter_map(|rev| self.nodes.get_key_value(rev))
            .max_by(|(rev_a, a), (rev_b, b)| (!a.deleted, *rev_a).cmp(&(!b.deleted, *rev_b)))
    }

    /// Live leaves other than the winner, highest first
    fn conflicts(&self) -> Vec<Revision> {
        let winner = self.winner().map(|(rev, _)| rev.clone());
        let mut conflicts: Vec<Revision> = self
            .leaves()
            .into_iter()
            .filter(|rev| Some(*rev) != winner.as_ref())
            .filter(|rev| self.nodes.get(*rev).is_some_and(|node| !node.deleted))
            .cloned()
            .collect();
        conflicts.sort_by(|a, b| b.cmp(a));
        conflicts
    }

    fn history(&self, rev: &Revision) -> RevisionHistory {
        let mut ids = Vec::new();
        let mut current = Some(rev);
        while let Some(r) = current {
            ids.push(r.hash().to_string());
            current = self.nodes.get(r).and_then(|node| node.parent.as_ref());
        }
        RevisionHistory {
            start: rev.generation(),
            ids,
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    tx: flume::Sender<FeedItem>,
    include_docs: bool,
    include_conflicts: bool,
}

#[derive(Debug, Default)]
struct Inner {
    docs: HashMap<String, RevisionTree>,
    seq: u64,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    fn commit(&mut self, id: &str, rev: Revision, node: RevisionNode) -> WriteResult {
        self.seq += 1;
        let tree = self.docs.entry(id.to_string()).or_default();
        tree.nodes.insert(rev.clone(), node);
        tree.last_seq = self.seq;
        self.notify(id);
        WriteResult {
            id: id.to_string(),
            rev,
        }
    }

    /// Push the document's current state to every live feed, dropping
    ///  feeds whose receiver is gone
    fn notify(&mut self, id: &str) {
        let Some(tree) = self.docs.get(id) else {
            return;
        };
        self.subscribers.retain(|sub| {
            match change_event(id, tree, sub.include_docs, sub.include_conflicts) {
                Some(event) => sub.tx.send(Ok(event)).is_ok(),
                None => true,
            }
        });
    }

    fn get(&self, id: &str, options: &GetOptions) -> Result<Document, Error> {
        let tree = self
            .docs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let winner = tree.winner().map(|(rev, _)| rev);

        let (rev, node) = match &options.revision {
            Some(rev) => tree
                .nodes
                .get_key_value(rev)
                .ok_or_else(|| StoreError::NotFound(format!("{} at {}", id, rev)))?,
            None => {
                let (rev, node) = tree
                    .winner()
                    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
                if node.deleted {
                    return Err(StoreError::NotFound(format!("{} is deleted", id)));
                }
                (rev, node)
            }
        };

        let conflicts = if options.conflicts && winner == Some(rev) {
            let conflicts = tree.conflicts();
            (!conflicts.is_empty()).then_some(conflicts)
        } else {
            None
        };

        Ok(Document {
            id: Some(id.to_string()),
            rev: Some(rev.clone()),
            deleted: node.deleted,
            conflicts,
            revisions: options.revisions.then(|| tree.history(rev)),
            fields: node.fields.clone(),
        })
    }

    fn put(&mut self, document: &Document) -> Result<WriteResult, Error> {
        let id = document
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or(StoreError::MissingId)?;

        let parent = match (self.docs.get(&id), &document.rev) {
            (None, None) => None,
            (None, Some(_)) => return Err(StoreError::Conflict(id)),
            (Some(tree), None) => match tree.winner() {
                // writing over a deletion re-creates the document
                Some((rev, node)) if node.deleted => Some(rev.clone()),
                Some(_) => return Err(StoreError::Conflict(id)),
                None => None,
            },
            (Some(tree), Some(rev)) if tree.is_live_leaf(rev) => Some(rev.clone()),
            (Some(_), Some(_)) => return Err(StoreError::Conflict(id)),
        };

        let hash = revision_hash(parent.as_ref(), document.deleted, &document.fields)?;
        let rev = match &parent {
            Some(parent) => parent.child(hash),
            None => Revision::new(1, hash),
        };
        let node = RevisionNode {
            parent,
            deleted: document.deleted,
            fields: document.fields.clone(),
        };
        Ok(self.commit(&id, rev, node))
    }

    fn remove(&mut self, id: &str, rev: &Revision) -> Result<WriteResult, Error> {
        let tree = self
            .docs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let node = tree
            .nodes
            .get(rev)
            .ok_or_else(|| StoreError::NotFound(format!("{} at {}", id, rev)))?;
        if node.deleted {
            return Err(StoreError::NotFound(format!("{} at {} is deleted", id, rev)));
        }
        if !tree.is_live_leaf(rev) {
            let tombstoned = tree
                .nodes
                .values()
                .any(|child| child.deleted && child.parent.as_ref() == Some(rev));
            return Err(if tombstoned {
                StoreError::NotFound(format!("{} at {} is deleted", id, rev))
            } else {
                StoreError::Conflict(id.to_string())
            });
        }

        let fields = Fields::new();
        let hash = revision_hash(Some(rev), true, &fields)?;
        let node = RevisionNode {
            parent: Some(rev.clone()),
            deleted: true,
            fields,
        };
        Ok(self.commit(id, rev.child(hash), node))
    }
}

fn change_event(
    id: &str,
    tree: &RevisionTree,
    include_docs: bool,
    include_conflicts: bool,
) -> Option<ChangeEvent> {
    let (rev, node) = tree.winner()?;
    Some(ChangeEvent {
        seq: tree.last_seq,
        id: id.to_string(),
        rev: rev.clone(),
        deleted: node.deleted,
        fields: if include_docs {
            node.fields.clone()
        } else {
            Fields::new()
        },
        conflicts: if include_conflicts {
            tree.conflicts()
        } else {
            Vec::new()
        },
    })
}

/// Content hash of a revision: identical edits on the same parent produce
///  the same revision on every replica
fn revision_hash(
    parent: Option<&Revision>,
    deleted: bool,
    fields: &Fields,
) -> Result<String, MemoryStoreError> {
    let body = serde_json::to_vec(&canonical(&Value::Object(fields.clone())))
        .map_err(|e| MemoryStoreError::Encode(e.to_string()))?;
    let mut hasher = Sha256::new();
    if let Some(parent) = parent {
        hasher.update(parent.to_string().as_bytes());
    }
    hasher.update([deleted as u8]);
    hasher.update(&body);
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(32);
    Ok(digest)
}

/// `value` with every object's keys sorted, so field order never changes a hash
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(name, value)| (name.clone(), canonical(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// A cheaply cloneable handle to an in-memory revision store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy every revision this store has and `target` lacks, with ancestry
    ///
    /// Returns the number of revisions copied. Documents that receive
    /// revisions show up on the target's change feed, with any conflicts the
    /// merged revision trees now contain.
    pub fn replicate_to(&self, target: &MemoryStore) -> usize {
        let snapshot: Vec<(String, Vec<(Revision, RevisionNode)>)> = {
            let inner = self.inner.lock();
            inner
                .docs
                .iter()
                .map(|(id, tree)| {
                    let mut nodes: Vec<_> = tree
                        .nodes
                        .iter()
                        .map(|(rev, node)| (rev.clone(), node.clone()))
                        .collect();
                    nodes.sort_by(|a, b| a.0.cmp(&b.0));
                    (id.clone(), nodes)
                })
                .collect()
        };

        let mut guard = target.inner.lock();
        let target = &mut *guard;
        let mut copied = 0;
        for (id, nodes) in snapshot {
            let missing: Vec<_> = {
                let tree = target.docs.get(&id);
                nodes
                    .into_iter()
                    .filter(|(rev, _)| tree.map_or(true, |t| !t.nodes.contains_key(rev)))
                    .collect()
            };
            if missing.is_empty() {
                continue;
            }
            copied += missing.len();

            target.seq += 1;
            let tree = target.docs.entry(id.clone()).or_default();
            for (rev, node) in missing {
                tree.nodes.insert(rev, node);
            }
            tree.last_seq = target.seq;
            target.notify(&id);
        }

        tracing::debug!(copied, "replicated revisions");
        copied
    }

    /// End every live change feed with a transport error
    pub fn close_feeds(&self, reason: &str) {
        let subscribers = std::mem::take(&mut self.inner.lock().subscribers);
        tracing::debug!(feeds = subscribers.len(), reason, "closing change feeds");
        for sub in subscribers {
            let _ = sub.tx.send(Err(StoreError::Transport(reason.to_string())));
        }
    }

    /// Number of change feeds still attached
    pub fn live_feeds(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|sub| !sub.tx.is_disconnected());
        inner.subscribers.len()
    }

    /// Current sequence number of the change log
    pub fn update_seq(&self) -> u64 {
        self.inner.lock().seq
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    type Error = MemoryStoreError;

    async fn get(&self, id: &str, options: GetOptions) -> Result<Document, Error> {
        self.inner.lock().get(id, &options)
    }

    async fn put(&self, document: &Document) -> Result<WriteResult, Error> {
        self.inner.lock().put(document)
    }

    async fn post(&self, document: &Document) -> Result<WriteResult, Error> {
        let mut document = document.clone();
        if document.id.as_deref().map_or(true, str::is_empty) {
            document.id = Some(uuid::Uuid::new_v4().to_string());
            document.rev = None;
        }
        self.inner.lock().put(&document)
    }

    async fn remove(&self, id: &str, rev: &Revision) -> Result<WriteResult, Error> {
        self.inner.lock().remove(id, rev)
    }

    async fn changes(&self, options: ChangesOptions) -> Result<ChangeStream<MemoryStoreError>, Error> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let start = match options.since {
            Since::Now => inner.seq,
            Since::Beginning => 0,
            Since::Seq(seq) => seq,
        };
        let mut backlog: Vec<ChangeEvent> = inner
            .docs
            .iter()
            .filter(|(_, tree)| tree.last_seq > start)
            .filter_map(|(id, tree)| {
                change_event(id, tree, options.include_docs, options.include_conflicts)
            })
            .collect();
        backlog.sort_by_key(|event| event.seq);
        let backlog = futures::stream::iter(backlog.into_iter().map(Ok));

        if !options.live {
            return Ok(backlog.boxed());
        }

        let (tx, rx) = flume::unbounded();
        inner.subscribers.push(Subscriber {
            tx,
            include_docs: options.include_docs,
            include_conflicts: options.include_conflicts,
        });
        Ok(backlog.chain(rx.into_stream()).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, value: i64) -> Document {
        Document::new(id).with_field("value", value)
    }

    #[tokio::test]
    async fn test_put_get_and_update() {
        let store = MemoryStore::new();
        let first = store.put(&doc("a", 1)).await.unwrap();
        assert_eq!(first.rev.generation(), 1);

        let fetched = store.get("a", GetOptions::latest()).await.unwrap();
        assert_eq!(fetched.get("value"), Some(&json!(1)));
        assert_eq!(fetched.rev, Some(first.rev.clone()));

        let second = store
            .put(&doc("a", 2).with_rev(first.rev.clone()))
            .await
            .unwrap();
        assert_eq!(second.rev.generation(), 2);

        // a stale revision conflicts
        let stale = store.put(&doc("a", 3).with_rev(first.rev)).await;
        assert_eq!(stale, Err(StoreError::Conflict("a".into())));

        // no revision on an existing document conflicts
        let blind = store.put(&doc("a", 3)).await;
        assert_eq!(blind, Err(StoreError::Conflict("a".into())));
    }

    #[tokio::test]
    async fn test_put_requires_id() {
        let store = MemoryStore::new();
        let result = store.put(&Document::anonymous().with_field("x", 1)).await;
        assert_eq!(result, Err(StoreError::MissingId));
    }

    #[tokio::test]
    async fn test_post_assigns_id() {
        let store = MemoryStore::new();
        let result = store
            .post(&Document::anonymous().with_field("x", 1))
            .await
            .unwrap();
        assert!(!result.id.is_empty());
        assert!(store.get(&result.id, GetOptions::latest()).await.is_ok());

        // posting over a live id conflicts
        let again = store.post(&Document::new(result.id.clone())).await;
        assert!(again.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_identical_edits_produce_identical_revisions() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let ra = a.put(&doc("x", 1)).await.unwrap();
        let rb = b.put(&doc("x", 1)).await.unwrap();
        assert_eq!(ra.rev, rb.rev);
    }

    #[tokio::test]
    async fn test_field_order_is_kept_but_not_hashed() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let ra = a
            .put(&Document::new("x").with_field("z", 1).with_field("a", json!({"y": 2, "b": 3})))
            .await
            .unwrap();
        let rb = b
            .put(&Document::new("x").with_field("a", json!({"b": 3, "y": 2})).with_field("z", 1))
            .await
            .unwrap();
        assert_eq!(ra.rev, rb.rev);

        let stored = a.get("x", GetOptions::latest()).await.unwrap();
        let names: Vec<_> = stored.fields.keys().cloned().collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[tokio::test]
    async fn test_replication_produces_conflict() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let base = a.put(&doc("x", 1)).await.unwrap();
        a.replicate_to(&b);

        let ra = a.put(&doc("x", 2).with_rev(base.rev.clone())).await.unwrap();
        let rb = b.put(&doc("x", 3).with_rev(base.rev.clone())).await.unwrap();
        assert_eq!(b.replicate_to(&a), 1);

        let current = a
            .get("x", GetOptions::latest().with_conflicts())
            .await
            .unwrap();
        let (winner, loser) = if ra.rev > rb.rev {
            (ra.rev, rb.rev)
        } else {
            (rb.rev, ra.rev)
        };
        assert_eq!(current.rev, Some(winner));
        assert_eq!(current.conflicts, Some(vec![loser.clone()]));

        // pruning the loser clears the conflict
        a.remove("x", &loser).await.unwrap();
        let current = a
            .get("x", GetOptions::latest().with_conflicts())
            .await
            .unwrap();
        assert_eq!(current.conflicts, None);

        // pruning twice is a benign not-found
        assert!(a.remove("x", &loser).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_revision_history() {
        let store = MemoryStore::new();
        let r1 = store.put(&doc("a", 1)).await.unwrap();
        let r2 = store.put(&doc("a", 2).with_rev(r1.rev.clone())).await.unwrap();
        let r3 = store.put(&doc("a", 3).with_rev(r2.rev.clone())).await.unwrap();

        let current = store
            .get("a", GetOptions::latest().with_revisions())
            .await
            .unwrap();
        let history = current.revisions.unwrap();
        assert_eq!(history.start, 3);
        assert_eq!(
            history.ids,
            vec![r3.rev.hash(), r2.rev.hash(), r1.rev.hash()]
        );
        assert_eq!(history.parent(), Some(r2.rev.clone()));

        let old = store.get("a", GetOptions::at(r1.rev)).await.unwrap();
        assert_eq!(old.get("value"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_deleted_document_reads_not_found_and_can_be_recreated() {
        let store = MemoryStore::new();
        let r1 = store.put(&doc("a", 1)).await.unwrap();
        let tombstone = store.remove("a", &r1.rev).await.unwrap();
        assert!(store
            .get("a", GetOptions::latest())
            .await
            .unwrap_err()
            .is_not_found());

        let deleted = store.get("a", GetOptions::at(tombstone.rev)).await.unwrap();
        assert!(deleted.deleted);

        let recreated = store.put(&doc("a", 5)).await.unwrap();
        assert_eq!(recreated.rev.generation(), 3);
    }

    #[tokio::test]
    async fn test_changes_backlog_and_live() {
        let store = MemoryStore::new();
        store.put(&doc("a", 1)).await.unwrap();
        store.put(&doc("b", 1)).await.unwrap();

        let options = ChangesOptions {
            since: Since::Beginning,
            live: false,
            ..Default::default()
        };
        let events: Vec<_> = store.changes(options).await.unwrap().collect().await;
        let ids: Vec<_> = events
            .into_iter()
            .map(|e| e.unwrap().id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        let mut live = store.changes(ChangesOptions::default()).await.unwrap();
        assert_eq!(store.live_feeds(), 1);
        store.put(&doc("c", 1)).await.unwrap();
        let event = live.next().await.unwrap().unwrap();
        assert_eq!(event.id, "c");
        assert_eq!(event.fields.get("value"), Some(&json!(1)));

        store.close_feeds("shutting down");
        let err = live.next().await.unwrap().unwrap_err();
        assert_eq!(err, StoreError::Transport("shutting down".into()));
        assert!(live.next().await.is_none());
    }
}
