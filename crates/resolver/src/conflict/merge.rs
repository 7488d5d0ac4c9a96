//! Three-way field merge
//!
//! Given the common ancestor (`original`), the store's winner (`chosen`) and
//! a losing revision (`rejected`), every field is classified per side as
//! unchanged or changed relative to the ancestor. One-sided changes always
//! win over no change. Only a field edited on both sides is settled by the
//! [`MergePolicy`], which is the one place a value can be lost.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Fields;

/// How one side treats a field relative to the common ancestor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Unchanged,
    ChangedFromOriginal,
}

/// Combine rule for a field both sides changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// Keep the winner's value
    #[default]
    PickWinner,
    /// Winner's text, a space, then the loser's text; non-text values keep
    /// the winner's
    Concatenate,
}

impl MergePolicy {
    pub fn combine(&self, chosen: &Value, rejected: &Value) -> Value {
        match (self, chosen, rejected) {
            (MergePolicy::Concatenate, Value::String(chosen), Value::String(rejected)) => {
                Value::String(format!("{} {}", chosen, rejected))
            }
            _ => chosen.clone(),
        }
    }
}

/// Classify every field of `side` against `original`
///
/// Fields present in `original` but missing from `side` get no
/// classification: that side has no opinion on them.
pub fn classify(original: &Fields, side: &Fields) -> Vec<(String, Classification)> {
    side.iter()
        .map(|(name, value)| {
            let class = match original.get(name) {
                Some(before) if before == value => Classification::Unchanged,
                _ => Classification::ChangedFromOriginal,
            };
            (name.clone(), class)
        })
        .collect()
}

/// Merge `chosen` and `rejected` against their common ancestor
///
/// The result is a complete body, not a patch: fields neither side touched
/// carry the ancestor's value forward.
pub fn three_way_merge(
    original: &Fields,
    chosen: &Fields,
    rejected: &Fields,
    policy: MergePolicy,
) -> Fields {
    use Classification::{ChangedFromOriginal, Unchanged};

    let chosen_class: HashMap<String, Classification> =
        classify(original, chosen).into_iter().collect();
    let rejected_class: HashMap<String, Classification> =
        classify(original, rejected).into_iter().collect();

    let names = original
        .keys()
        .chain(chosen.keys())
        .chain(rejected.keys());

    let mut merged = Fields::new();
    for name in names {
        if merged.contains_key(name) {
            continue;
        }
        let value = match (chosen_class.get(name), rejected_class.get(name)) {
            // neither side kept the field
            (None, None) => None,
            (None, Some(_)) => rejected.get(name).cloned(),
            (Some(_), None) => chosen.get(name).cloned(),
            (Some(Unchanged), Some(Unchanged)) => original.get(name).cloned(),
            (Some(Unchanged), Some(ChangedFromOriginal)) => rejected.get(name).cloned(),
            (Some(ChangedFromOriginal), Some(Unchanged)) => chosen.get(name).cloned(),
            (Some(ChangedFromOriginal), Some(ChangedFromOriginal)) => {
                match (chosen.get(name), rejected.get(name)) {
                    (Some(c), Some(r)) => Some(policy.combine(c, r)),
                    _ => None,
                }
            }
        };
        if let Some(value) = value {
            merged.insert(name.clone(), value);
        }
    }
    merged
}
