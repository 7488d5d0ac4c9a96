//! Background job dispatcher for conflict resolution
//!
//! The change feed listener must not wait on a resolution before moving on
//! to the next event, so every conflict it finds is queued here and picked
//! up by a worker task. Jobs are queued in the order the conflicts appear
//! on the feed.

use anyhow::Result;

use crate::conflict::ConflictRecord;

/// Background jobs that can be dispatched to the resolution worker
#[derive(Debug, Clone)]
pub enum Job {
    /// Reconcile one losing revision with the winner
    ResolveConflict(ConflictRecord),
}

/// Job dispatcher that can be cloned and shared across tasks
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    tx: flume::Sender<Job>,
}

impl JobDispatcher {
    /// Create a new job dispatcher and receiver pair
    ///
    /// The dispatcher can be cloned and shared, while the receiver should be
    /// given to the worker task.
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, JobReceiver { rx })
    }

    /// Dispatch a job to the background worker
    ///
    /// This is non-blocking and will succeed unless the receiver has been dropped.
    pub fn dispatch(&self, job: Job) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|_| anyhow::anyhow!("job receiver has been dropped"))
    }

    pub fn dispatch_conflict(&self, conflict: ConflictRecord) -> Result<()> {
        self.dispatch(Job::ResolveConflict(conflict))
    }

    /// Number of jobs waiting for the worker
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// Job receiver for the background worker
#[derive(Debug)]
pub struct JobReceiver {
    rx: flume::Receiver<Job>,
}

impl JobReceiver {
    /// Try to receive a job without blocking
    ///
    /// Returns None if no jobs are available or all senders have been dropped.
    pub fn try_recv(&self) -> Option<Job> {
        self.rx.try_recv().ok()
    }

    /// Get an async stream of jobs for the worker loop
    ///
    /// The stream ends once every dispatcher has been dropped.
    pub fn into_async(self) -> flume::r#async::RecvStream<'static, Job> {
        self.rx.into_stream()
    }
}
