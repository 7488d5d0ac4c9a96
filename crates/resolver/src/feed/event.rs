//! Change feed event types

use serde::{Deserialize, Serialize};

use crate::document::{Document, Fields};
use crate::revision::Revision;

/// One entry of the store's change feed
///
/// `fields` is empty unless the feed was opened with `include_docs`, and
/// `conflicts` is empty unless it was opened with `include_conflicts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub seq: u64,
    pub id: String,
    pub rev: Revision,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default)]
    pub conflicts: Vec<Revision>,
}

impl ChangeEvent {
    /// The document the store currently considers the winner
    pub fn winning_document(&self) -> Document {
        Document {
            id: Some(self.id.clone()),
            rev: Some(self.rev.clone()),
            deleted: self.deleted,
            conflicts: (!self.conflicts.is_empty()).then(|| self.conflicts.clone()),
            revisions: None,
            fields: self.fields.clone(),
        }
    }
}

/// What the generic change callback is told about
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeNotice {
    /// A document was written
    Updated(ChangeEvent),
    /// A document's winning revision is now a deletion
    Deleted { seq: u64, id: String, rev: Revision },
    /// The replication layer reported written documents
    Replicated { docs_written: u64 },
}
