//! Replication signals
//!
//! Replication itself lives outside this crate. The engine only listens to
//! what the replication layer reports: written documents re-drive the change
//! callback, and failures go to the error handler. Retrying is the
//! replication layer's business, so an error never ends consumption.

use futures::{Stream, StreamExt};

use crate::conflict::ResolveError;
use crate::feed::{ChangeCallback, ChangeNotice, ErrorCallback};

/// Events emitted by the replication layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A batch of documents was replicated
    Change { docs_written: u64 },

    /// Replication caught up and is waiting for new changes
    Paused,

    /// Replication resumed
    Active,

    /// Replication failed; it may recover on its own
    Error(String),
}

/// Totals over one sync stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub batches: u64,
    pub docs_written: u64,
    pub errors: u64,
}

/// Consume `events` until the replication layer closes the stream
pub async fn drive<St>(
    events: St,
    on_change: Option<ChangeCallback>,
    on_error: Option<ErrorCallback>,
) -> SyncSummary
where
    St: Stream<Item = SyncEvent> + Send,
{
    let mut events = std::pin::pin!(events);
    let mut summary = SyncSummary::default();

    while let Some(event) = events.next().await {
        match event {
            SyncEvent::Change { docs_written } => {
                tracing::debug!(docs_written, "replication wrote documents");
                summary.batches += 1;
                summary.docs_written += docs_written;
                if let Some(callback) = &on_change {
                    callback(ChangeNotice::Replicated { docs_written });
                }
            }
            SyncEvent::Paused => tracing::debug!("replication paused"),
            SyncEvent::Active => tracing::debug!("replication active"),
            SyncEvent::Error(reason) => {
                tracing::error!("replication error: {}", reason);
                summary.errors += 1;
                if let Some(callback) = &on_error {
                    callback(ResolveError::Transport(reason));
                }
            }
        }
    }

    tracing::info!(
        batches = summary.batches,
        docs_written = summary.docs_written,
        errors = summary.errors,
        "replication stream closed"
    );
    summary
}
