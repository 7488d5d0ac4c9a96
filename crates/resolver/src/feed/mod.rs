//! Change feed listener
//!
//! Consumes the store's change feed and turns each event into callbacks:
//! one conflict callback per live conflict, in list order, followed by the
//! generic change callback. Deletions only reach the change callback.
//!
//! A feed error is handed to the error callback and ends the listener.
//! Resubscribing is left to whoever owns the replication policy.

mod event;

pub use event::{ChangeEvent, ChangeNotice};

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::conflict::{ConflictRecord, ResolveError};
use crate::revision::matches_generation;
use crate::store::{ChangeStream, ChangesOptions, DocumentStore};

pub type ChangeCallback = Arc<dyn Fn(ChangeNotice) + Send + Sync>;
pub type ConflictCallback = Arc<dyn Fn(ConflictRecord) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(ResolveError) + Send + Sync>;

/// Conflicts in `event` that are live against its revision, in list order
pub fn conflicts_in(event: &ChangeEvent) -> Vec<ConflictRecord> {
    if event.deleted || event.conflicts.is_empty() {
        return Vec::new();
    }
    let winner = event.winning_document();
    event
        .conflicts
        .iter()
        .filter(|losing| matches_generation(&event.rev, losing))
        .map(|losing| ConflictRecord::new(event.id.clone(), winner.clone(), losing.clone()))
        .collect()
}

pub struct ChangeFeedListener<S: DocumentStore> {
    store: S,
    on_change: Option<ChangeCallback>,
    on_conflict: Option<ConflictCallback>,
    on_error: Option<ErrorCallback>,
}

impl<S: DocumentStore> std::fmt::Debug for ChangeFeedListener<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeedListener")
            .field("store", &self.store)
            .field("on_change", &self.on_change.is_some())
            .field("on_conflict", &self.on_conflict.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl<S: DocumentStore> ChangeFeedListener<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            on_change: None,
            on_conflict: None,
            on_error: None,
        }
    }

    pub fn on_change(mut self, callback: impl Fn(ChangeNotice) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(callback));
        self
    }

    pub fn on_conflict(
        mut self,
        callback: impl Fn(ConflictRecord) + Send + Sync + 'static,
    ) -> Self {
        self.on_conflict = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(ResolveError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    fn notify(&self, notice: ChangeNotice) {
        if let Some(callback) = &self.on_change {
            callback(notice);
        }
    }

    fn report(&self, err: ResolveError) -> ResolveError {
        if let Some(callback) = &self.on_error {
            callback(err.clone());
        }
        err
    }

    /// Dispatch the callbacks for one event
    pub fn handle_event(&self, event: ChangeEvent) {
        if event.deleted {
            tracing::debug!(doc_id = %event.id, rev = %event.rev, "document deleted");
            self.notify(ChangeNotice::Deleted {
                seq: event.seq,
                id: event.id,
                rev: event.rev,
            });
            return;
        }

        for record in conflicts_in(&event) {
            tracing::debug!(
                doc_id = %record.id,
                rev = %event.rev,
                losing = %record.losing,
                "conflict detected"
            );
            if let Some(callback) = &self.on_conflict {
                callback(record);
            }
        }
        self.notify(ChangeNotice::Updated(event));
    }

    /// Open the feed
    pub async fn subscribe(
        &self,
        options: ChangesOptions,
    ) -> Result<ChangeStream<S::Error>, ResolveError> {
        self.store
            .changes(options)
            .await
            .map_err(|e| self.report(e.into()))
    }

    /// Drain `stream` until it ends, fails, or `shutdown` fires
    pub async fn consume(
        &self,
        mut stream: ChangeStream<S::Error>,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<(), ResolveError> {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("change feed listener stopped");
                    return Ok(());
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => self.handle_event(event),
                        Some(Err(e)) => {
                            let err = ResolveError::from(e);
                            tracing::error!("change feed failed: {}", err);
                            return Err(self.report(err));
                        }
                        None => {
                            tracing::info!("change feed ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Subscribe and consume in place
    pub async fn run(
        &self,
        options: ChangesOptions,
        shutdown: watch::Receiver<()>,
    ) -> Result<(), ResolveError> {
        let stream = self.subscribe(options).await?;
        self.consume(stream, shutdown).await
    }

    /// Subscribe, then consume on a background task
    ///
    /// The feed is open by the time this returns, so no write made after it
    /// is missed.
    pub async fn spawn(self, options: ChangesOptions) -> Result<ListenerHandle, ResolveError> {
        let stream = self.subscribe(options).await?;
        let (shutdown, shutdown_rx) = watch::channel(());
        let task = tokio::spawn(async move { self.consume(stream, shutdown_rx).await });
        Ok(ListenerHandle { shutdown, task })
    }
}

/// A listener running in the background
///
/// Dropping the handle stops the listener as well.
#[derive(Debug)]
pub struct ListenerHandle {
    shutdown: watch::Sender<()>,
    task: JoinHandle<Result<(), ResolveError>>,
}

impl ListenerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Tear the subscription down and wait for the listener to exit
    pub async fn stop(self) -> Result<(), ResolveError> {
        let _ = self.shutdown.send(());
        self.join().await
    }

    /// Wait for the listener to exit on its own
    pub async fn join(self) -> Result<(), ResolveError> {
        let Self { shutdown, task } = self;
        let result = task.await;
        drop(shutdown);
        result.map_err(|e| ResolveError::Transport(format!("listener task failed: {}", e)))?
    }
}
