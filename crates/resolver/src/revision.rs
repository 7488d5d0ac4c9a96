//! Revision tokens and revision history
//!
//! Every accepted write gives a document a new revision token of the form
//! `<generation>-<hash>`. The generation counts the edits along the
//! document's lineage; the hash distinguishes concurrent edits made at the
//! same generation on different replicas.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// Errors produced while parsing a revision token
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RevisionParseError {
    #[error("revision token {0:?} has no generation separator")]
    MissingSeparator(String),
    #[error("revision token {0:?} has an invalid generation")]
    InvalidGeneration(String),
    #[error("revision token {0:?} has an empty hash")]
    EmptyHash(String),
}

/// A parsed revision token
///
/// Ordering is by generation, then by hash. This is the same ordering the
/// store uses to pick a deterministic winner among concurrent leaves.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct Revision {
    generation: u64,
    hash: String,
}

impl Revision {
    pub fn new(generation: u64, hash: impl Into<String>) -> Self {
        Self {
            generation,
            hash: hash.into(),
        }
    }

    /// Parse a `<generation>-<hash>` token
    pub fn parse(token: &str) -> Result<Self, RevisionParseError> {
        token.parse()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The revision a write on top of this one would produce, given its hash
    pub fn child(&self, hash: impl Into<String>) -> Self {
        Self::new(self.generation + 1, hash)
    }

    /// Check whether two tokens were produced at the same generation
    pub fn same_generation(&self, other: &Revision) -> bool {
        self.generation == other.generation
    }
}

impl FromStr for Revision {
    type Err = RevisionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, hash) = s
            .split_once('-')
            .ok_or_else(|| RevisionParseError::MissingSeparator(s.to_string()))?;
        let generation = generation
            .parse::<u64>()
            .ok()
            .filter(|g| *g > 0)
            .ok_or_else(|| RevisionParseError::InvalidGeneration(s.to_string()))?;
        if hash.is_empty() {
            return Err(RevisionParseError::EmptyHash(s.to_string()));
        }
        Ok(Self::new(generation, hash))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}

/// Decide whether a listed conflict is live against the current revision
///
/// A conflict applies when the current revision's token starts with the
/// conflict's generation followed by the separator, i.e. both were produced
/// at the same generation. Conflicts from an earlier generation have already
/// been superseded and are ignored.
///
/// Two unrelated revisions can share a generation under heavy concurrent
/// writes, so this is an approximation of true lineage and is kept as such.
pub fn matches_generation(current: &Revision, conflict: &Revision) -> bool {
    current.same_generation(conflict)
}

/// The ancestry of a revision, newest first
///
/// `ids[0]` is the hash of the revision at generation `start`, `ids[1]` the
/// hash of its parent at `start - 1`, and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionHistory {
    pub start: u64,
    pub ids: Vec<String>,
}

impl RevisionHistory {
    /// Revisions along the lineage, newest first
    pub fn revisions(&self) -> impl Iterator<Item = Revision> + '_ {
        self.ids
            .iter()
            .enumerate()
            .take_while(|(i, _)| (*i as u64) < self.start)
            .map(|(i, hash)| Revision::new(self.start - i as u64, hash.clone()))
    }

    /// The revision immediately preceding the head in its direct lineage
    pub fn parent(&self) -> Option<Revision> {
        self.revisions().nth(1)
    }
}
