//! Shared setup for the integration tests
#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use resolver::store::GetOptions;
use resolver::{Document, DocumentStore, Fields, MemoryStore};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn fields(value: serde_json::Value) -> Fields {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

/// Two replicas of the same database
pub struct Replicas {
    pub alice: MemoryStore,
    pub bob: MemoryStore,
}

impl Replicas {
    pub fn new() -> Self {
        Self {
            alice: MemoryStore::new(),
            bob: MemoryStore::new(),
        }
    }

    /// Create `id` on alice and replicate it to bob, then edit it on both
    ///  sides without replicating
    pub async fn diverge(&self, id: &str, base: Fields, on_alice: Fields, on_bob: Fields) {
        let base = self
            .alice
            .put(&Document::new(id).with_fields(base))
            .await
            .unwrap();
        self.alice.replicate_to(&self.bob);

        self.alice
            .put(&Document::new(id).with_fields(on_alice).with_rev(base.rev.clone()))
            .await
            .unwrap();
        self.bob
            .put(&Document::new(id).with_fields(on_bob).with_rev(base.rev))
            .await
            .unwrap();
    }

    /// Alice's view of `id`, with its conflicts
    pub async fn on_alice(&self, id: &str) -> Document {
        self.alice
            .get(id, GetOptions::latest().with_conflicts())
            .await
            .unwrap()
    }
}

/// Wait for the next message, failing the test after a second
pub async fn next<T>(rx: &flume::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv_async())
        .await
        .expect("timed out waiting for the engine")
        .expect("channel closed")
}

/// Let background tasks run for a moment
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Poll `check` until it holds, failing the test after a second
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
