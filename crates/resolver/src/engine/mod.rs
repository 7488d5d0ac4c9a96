//! The conflict engine
//!
//! Wires a store to the write path, the change feed listener, the
//! background resolution worker and the replication signal consumer.
//!
//! ```ignore
//! let engine = ConflictEngine::builder()
//!     .store(store)
//!     .config(EngineConfig::load("resolver.toml")?)
//!     .on_error(|e| tracing::warn!("resolution failed: {}", e))
//!     .build();
//!
//! let handle = engine.start().await?;
//! engine.put(Document::new("bob").with_field("name", "Bob")).await?;
//! handle.stop().await?;
//! ```

mod builder;

pub use builder::{EngineBuilder, NeedsStore, ReadyToBuild};

use std::sync::Arc;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::conflict::{ConflictRecord, EventualResolver, ImmediateResolver, ResolveError, Resolution};
use crate::document::Document;
use crate::feed::{ChangeCallback, ChangeFeedListener, ErrorCallback, ListenerHandle};
use crate::jobs::{Job, JobDispatcher, JobReceiver};
use crate::store::{ChangesOptions, DocumentStore};
use crate::sync::{SyncEvent, SyncSummary};
use crate::write::{IdLocks, WriteCoordinator};

pub type ResolvedCallback = Arc<dyn Fn(&ConflictRecord, &Resolution) + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("no remote url configured, refusing to sync")]
    MissingRemote,
    #[error("the resolution worker has already been started")]
    WorkerTaken,
    #[error("failed to open change feed: {0}")]
    Listen(#[from] ResolveError),
}

pub(crate) struct EngineCore<S: DocumentStore> {
    config: EngineConfig,
    writes: WriteCoordinator<S>,
    put_strategy: Arc<dyn ImmediateResolver<S>>,
    post_strategy: Arc<dyn ImmediateResolver<S>>,
    eventual: Arc<dyn EventualResolver<S>>,
    /// Held for the whole of one eventual resolution
    resolution_locks: Option<IdLocks>,
    on_change: Option<ChangeCallback>,
    on_error: Option<ErrorCallback>,
    on_resolved: Option<ResolvedCallback>,
}

impl<S: DocumentStore> EngineCore<S> {
    fn report(&self, err: &ResolveError) {
        if let Some(callback) = &self.on_error {
            callback(err.clone());
        }
    }

    async fn resolve_conflict(&self, record: &ConflictRecord) -> Result<Resolution, ResolveError> {
        let _guard = match &self.resolution_locks {
            Some(locks) => Some(locks.acquire(&record.id).await),
            None => None,
        };
        tracing::debug!(
            doc_id = %record.id,
            losing = %record.losing,
            strategy = ?self.eventual,
            "resolving conflict"
        );

        match self.eventual.resolve(&self.writes, record).await {
            Ok(resolution) => {
                tracing::info!(doc_id = %record.id, losing = %record.losing, outcome = ?resolution, "conflict resolved");
                if let Some(callback) = &self.on_resolved {
                    callback(record, &resolution);
                }
                Ok(resolution)
            }
            Err(e) => {
                tracing::error!(doc_id = %record.id, losing = %record.losing, "abandoned conflict resolution: {}", e);
                self.report(&e);
                Err(e)
            }
        }
    }
}

/// Drain the job queue, one task per job, until shutdown or the queue closes
async fn run_worker<S: DocumentStore>(
    core: Arc<EngineCore<S>>,
    jobs: JobReceiver,
    mut shutdown: watch::Receiver<()>,
) {
    tracing::info!(db = %core.config.db_name, "starting conflict resolution worker");
    let mut stream = jobs.into_async();

    loop {
        tokio::select! {
            Some(job) = stream.next() => {
                match job {
                    Job::ResolveConflict(record) => {
                        let core = core.clone();
                        tokio::spawn(async move {
                            let _ = core.resolve_conflict(&record).await;
                        });
                    }
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("shutdown signal received, stopping worker");
                break;
            }
            else => {
                tracing::info!("job queue closed, shutting down worker");
                break;
            }
        }
    }

    tracing::info!(db = %core.config.db_name, "conflict resolution worker stopped");
}

/// A cheaply cloneable handle to a configured engine
#[derive(Clone)]
pub struct ConflictEngine<S: DocumentStore> {
    core: Arc<EngineCore<S>>,
    jobs: JobDispatcher,
    job_receiver: Arc<Mutex<Option<JobReceiver>>>,
}

impl<S: DocumentStore> std::fmt::Debug for ConflictEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictEngine")
            .field("config", &self.core.config)
            .field("store", self.core.writes.store())
            .field("eventual", &self.core.eventual)
            .finish()
    }
}

impl<S: DocumentStore> ConflictEngine<S> {
    pub fn builder() -> EngineBuilder<S, NeedsStore> {
        EngineBuilder::new()
    }

    pub fn new(store: S, config: EngineConfig) -> Self {
        Self::builder().store(store).config(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn store(&self) -> &S {
        self.core.writes.store()
    }

    pub fn writes(&self) -> &WriteCoordinator<S> {
        &self.core.writes
    }

    /// Write a document with the configured put strategy
    pub async fn put(&self, document: Document) -> Result<Resolution, ResolveError> {
        self.put_with(document, self.core.put_strategy.as_ref()).await
    }

    /// Create a document with the configured post strategy
    pub async fn post(&self, document: Document) -> Result<Resolution, ResolveError> {
        self.post_with(document, self.core.post_strategy.as_ref()).await
    }

    pub async fn put_with(
        &self,
        document: Document,
        strategy: &dyn ImmediateResolver<S>,
    ) -> Result<Resolution, ResolveError> {
        self.core.writes.put(document, strategy).await
    }

    pub async fn post_with(
        &self,
        document: Document,
        strategy: &dyn ImmediateResolver<S>,
    ) -> Result<Resolution, ResolveError> {
        self.core.writes.post(document, strategy).await
    }

    /// Resolve one conflict in place, bypassing the job queue
    pub async fn resolve(&self, record: &ConflictRecord) -> Result<Resolution, ResolveError> {
        self.core.resolve_conflict(record).await
    }

    /// Queue one conflict for the worker
    pub fn dispatch(&self, record: ConflictRecord) -> anyhow::Result<()> {
        self.jobs.dispatch_conflict(record)
    }

    /// Conflicts queued and not yet picked up by the worker
    pub fn pending_jobs(&self) -> usize {
        self.jobs.pending()
    }

    /// A change feed listener that queues conflicts for the worker
    pub fn listener(&self) -> ChangeFeedListener<S> {
        let jobs = self.jobs.clone();
        let core = self.core.clone();
        let mut listener = ChangeFeedListener::new(self.store().clone()).on_conflict(move |record| {
            if let Err(e) = jobs.dispatch_conflict(record) {
                tracing::error!("failed to queue conflict: {}", e);
                core.report(&ResolveError::Store(e.to_string()));
            }
        });
        if let Some(callback) = self.core.on_change.clone() {
            listener = listener.on_change(move |notice| callback(notice));
        }
        if let Some(callback) = self.core.on_error.clone() {
            listener = listener.on_error(move |err| callback(err));
        }
        listener
    }

    /// Listen on the change feed with the configured options
    pub async fn listen(&self) -> Result<ListenerHandle, ResolveError> {
        self.listen_with(self.core.config.changes.clone()).await
    }

    pub async fn listen_with(&self, options: ChangesOptions) -> Result<ListenerHandle, ResolveError> {
        tracing::info!(db = %self.core.config.db_name, since = ?options.since, "listening for changes");
        self.listener().spawn(options).await
    }

    /// Start the background resolution worker
    ///
    /// There is one worker per engine; it can only be started once.
    pub fn spawn_worker(&self) -> Result<WorkerHandle, EngineError> {
        let jobs = self
            .job_receiver
            .lock()
            .take()
            .ok_or(EngineError::WorkerTaken)?;
        let (shutdown, shutdown_rx) = watch::channel(());
        let task = tokio::spawn(run_worker(self.core.clone(), jobs, shutdown_rx));
        Ok(WorkerHandle { shutdown, task })
    }

    /// Consume replication signals on a background task
    pub fn sync<St>(&self, events: St) -> Result<JoinHandle<SyncSummary>, EngineError>
    where
        St: Stream<Item = SyncEvent> + Send + 'static,
    {
        let remote = self
            .core
            .config
            .remote_url
            .as_ref()
            .ok_or(EngineError::MissingRemote)?;
        tracing::info!(db = %self.core.config.db_name, remote = %remote, "consuming replication events");

        let on_change = self.core.on_change.clone();
        let on_error = self.core.on_error.clone();
        Ok(tokio::spawn(crate::sync::drive(events, on_change, on_error)))
    }

    /// Start the worker and the change feed listener
    pub async fn start(&self) -> Result<EngineHandle, EngineError> {
        let worker = self.spawn_worker()?;
        let listener = self.listen().await?;
        Ok(EngineHandle { listener, worker })
    }
}

/// The background resolution worker
///
/// Dropping the handle stops the worker as well. Resolutions already
/// started run to completion.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<()>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::error!("resolution worker failed: {}", e);
        }
    }
}

/// A running engine: listener plus worker
#[derive(Debug)]
pub struct EngineHandle {
    listener: ListenerHandle,
    worker: WorkerHandle,
}

impl EngineHandle {
    /// Stop listening, then stop taking new jobs
    pub async fn stop(self) -> Result<(), ResolveError> {
        let result = self.listener.stop().await;
        self.worker.stop().await;
        result
    }
}
