//! Write path shared by callers and resolution strategies
//!
//! Every write goes to the store once and its outcome is handed to an
//! immediate strategy, which may retry through the coordinator it was given.

mod locks;

pub use locks::{IdGuard, IdLocks};

use crate::conflict::{ImmediateResolver, ResolveError, Resolution};
use crate::document::Document;
use crate::revision::Revision;
use crate::store::{DocumentStore, StoreError, WriteResult};

/// Raw outcome of one store write, before any strategy looked at it
pub type WriteAttempt<E> = Result<WriteResult, StoreError<E>>;

#[derive(Debug, Clone)]
pub struct WriteCoordinator<S: DocumentStore> {
    store: S,
    locks: Option<IdLocks>,
}

impl<S: DocumentStore> WriteCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self { store, locks: None }
    }

    /// Serialize writes that target the same document id
    pub fn with_id_locks(mut self) -> Self {
        self.locks = Some(IdLocks::new());
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn locks(&self) -> Option<&IdLocks> {
        self.locks.as_ref()
    }

    /// Handle a strategy retries through; the outer write already holds the id
    fn unlocked(&self) -> Self {
        Self {
            store: self.store.clone(),
            locks: None,
        }
    }

    async fn lock(&self, id: Option<&str>) -> Option<IdGuard> {
        match (&self.locks, id) {
            (Some(locks), Some(id)) => Some(locks.acquire(id).await),
            _ => None,
        }
    }

    /// Write a document under its id and let `strategy` settle the outcome
    pub async fn put(
        &self,
        document: Document,
        strategy: &dyn ImmediateResolver<S>,
    ) -> Result<Resolution, ResolveError> {
        let _guard = self.lock(document.id()).await;
        let attempt = self.store.put(&document).await;
        if let Err(e) = &attempt {
            tracing::debug!(doc_id = ?document.id(), strategy = ?strategy, "put rejected: {}", e);
        }
        strategy.resolve(&self.unlocked(), document, attempt).await
    }

    /// Create a document and let `strategy` settle the outcome
    pub async fn post(
        &self,
        document: Document,
        strategy: &dyn ImmediateResolver<S>,
    ) -> Result<Resolution, ResolveError> {
        let _guard = self.lock(document.id()).await;
        let attempt = self.store.post(&document).await;
        if let Err(e) = &attempt {
            tracing::debug!(doc_id = ?document.id(), strategy = ?strategy, "post rejected: {}", e);
        }
        strategy.resolve(&self.unlocked(), document, attempt).await
    }

    /// Delete one leaf revision of a document
    pub async fn remove(&self, id: &str, rev: &Revision) -> Result<WriteResult, ResolveError> {
        let _guard = self.lock(Some(id)).await;
        Ok(self.store.remove(id, rev).await?)
    }
}
