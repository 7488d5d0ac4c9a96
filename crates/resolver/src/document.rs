//! Documents as seen by the resolution engine
//!
//! A document is an identifier, a revision token and an ordered mapping of
//! field names to JSON values. Store metadata travels under reserved
//! underscore-prefixed keys on the wire (`_id`, `_rev`, `_deleted`,
//! `_conflicts`, `_revisions`) and is kept out of the field map.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::revision::{matches_generation, Revision, RevisionHistory};

/// Ordered mapping of field name to value
pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    /// Concurrent leaf revisions that lost the store's tie-break
    #[serde(rename = "_conflicts", default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Vec<Revision>>,
    #[serde(rename = "_revisions", default, skip_serializing_if = "Option::is_none")]
    pub revisions: Option<RevisionHistory>,
    #[serde(flatten)]
    pub fields: Fields,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// A document body with no identity, to be created through `post`
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_rev(mut self, rev: Revision) -> Self {
        self.rev = Some(rev);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Conflicts on this document produced at the same generation as its
    /// current revision
    ///
    /// Returns `None` when the document carries no conflict list at all.
    pub fn live_conflicts(&self) -> Option<Vec<Revision>> {
        let conflicts = self.conflicts.as_ref()?;
        let Some(rev) = self.rev.as_ref() else {
            return Some(Vec::new());
        };
        Some(
            conflicts
                .iter()
                .filter(|conflict| matches_generation(rev, conflict))
                .cloned()
                .collect(),
        )
    }
}
