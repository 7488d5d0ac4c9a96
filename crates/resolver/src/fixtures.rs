//! Shared setup for the unit tests

use crate::document::{Document, Fields};
use crate::store::{DocumentStore, GetOptions, MemoryStore};

pub fn fields(value: serde_json::Value) -> Fields {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

/// Create `id` from `base` on the first replica and copy it to every other
///  replica, give each replica its own edit, then replicate all of them into
///  the first
///
/// Returns the first replica and its winning document with conflicts.
pub async fn diverged_many(id: &str, base: Fields, edits: Vec<Fields>) -> (MemoryStore, Document) {
    let replicas: Vec<MemoryStore> = edits.iter().map(|_| MemoryStore::new()).collect();
    let first = &replicas[0];
    let base = first.put(&Document::new(id).with_fields(base)).await.unwrap();
    for replica in &replicas[1..] {
        first.replicate_to(replica);
    }

    for (replica, edit) in replicas.iter().zip(edits) {
        replica
            .put(&Document::new(id).with_fields(edit).with_rev(base.rev.clone()))
            .await
            .unwrap();
    }
    for replica in &replicas[1..] {
        replica.replicate_to(first);
    }

    let winner = first
        .get(id, GetOptions::latest().with_conflicts())
        .await
        .unwrap();
    (first.clone(), winner)
}

/// Two replicas edit `id` concurrently starting from `base`
pub async fn diverged(id: &str, base: Fields, left: Fields, right: Fields) -> (MemoryStore, Document) {
    diverged_many(id, base, vec![left, right]).await
}
