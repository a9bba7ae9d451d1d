//! Candidate indexes ("arms") and the store that owns them for the life
//! of a run (spec.md §3 "Arm").

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Structural identity of a candidate index: the table, the ordered key
/// columns it would be built on, and the sorted set of included (leaf-only)
/// columns. Two arms with equal fingerprints are the same arm.
///
/// `canonical_name` is the *physical* encoding (a valid, deterministic
/// index name, matching the source's `BanditArm.get_arm_str_id`); it is
/// injective over distinct fingerprints (spec.md §8 item 4) but, like the
/// source, not guaranteed losslessly invertible when identifiers contain
/// the `_` joiner. The `Serialize`/`Deserialize` derive below is this
/// type's lossless wire encoding (spec.md §8 "Round-trip/idempotence"),
/// used for persistence, logging, and the round-trip test rather than
/// for the physical index name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub table: String,
    /// Key columns, in index order. Order matters: `(a, b)` and `(b, a)`
    /// are different arms.
    pub key_columns: Vec<String>,
    /// Include columns. Order doesn't matter for identity, so this is
    /// normalized to sorted order at construction.
    pub include_columns: BTreeSet<String>,
}

impl Fingerprint {
    pub fn new(
        table: impl Into<String>,
        key_columns: Vec<String>,
        include_columns: impl IntoIterator<Item = String>,
    ) -> Self {
        Fingerprint {
            table: table.into(),
            key_columns,
            include_columns: include_columns.into_iter().collect(),
        }
    }

    /// Deterministic, human-readable name derived from the fingerprint.
    /// Doubles as the physical index name passed to the port and as the
    /// arm store's map key, so it must be injective (spec.md §8 item 4).
    pub fn canonical_name(&self) -> String {
        let key_part = self.key_columns.join("_");
        if self.include_columns.is_empty() {
            format!("IX_{}_{}", self.table, key_part)
        } else {
            let include_part = self
                .include_columns
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join("_");
            format!("IXN_{}_{}_{}", self.table, key_part, include_part)
        }
    }

    /// True if `self`'s key columns are an equal-wise prefix of `other`'s
    /// (spec.md §4.5 "covered": `arm <= j`). Include columns are ignored,
    /// matching the source's `BanditArm.__le__`.
    pub fn is_prefix_of(&self, other: &Fingerprint) -> bool {
        if self.table != other.table {
            return false;
        }
        if self.key_columns.len() > other.key_columns.len() {
            return false;
        }
        self.key_columns
            .iter()
            .zip(other.key_columns.iter())
            .all(|(a, b)| a == b)
    }
}

/// A candidate secondary index, plus the run-accumulated state the
/// bandit and oracle reason about. Arms are created lazily and live for
/// the entire run (spec.md §5 "arms are never evicted").
#[derive(Debug, Clone)]
pub struct Arm {
    pub fingerprint: Fingerprint,
    /// Estimated size in MB, as last reported by the port.
    pub size_mb: f64,
    pub row_count: u64,
    /// Set when this arm covers *all* predicates of some query on its
    /// table; used for cluster dominance pruning.
    pub cluster: Option<String>,
    /// True for covering (with-includes) and payload-only arms.
    pub is_include: bool,
    /// Per-query heuristic benefit estimate (spec.md §4.2).
    pub arm_value: FxHashMap<u64, f64>,
    /// Memoized name-encoded context tail; computed once, at creation.
    pub name_encoded_context: Vec<f64>,
    /// Usage observed in the most recently completed round.
    pub usage_last_batch: f64,
}

impl Arm {
    pub fn new(fingerprint: Fingerprint, size_mb: f64, row_count: u64) -> Self {
        Arm {
            fingerprint,
            size_mb,
            row_count,
            cluster: None,
            is_include: false,
            arm_value: FxHashMap::default(),
            name_encoded_context: Vec::new(),
            usage_last_batch: 0.0,
        }
    }

    pub fn name(&self) -> String {
        self.fingerprint.canonical_name()
    }

    pub fn table(&self) -> &str {
        &self.fingerprint.table
    }
}

impl PartialEq for Arm {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}
impl Eq for Arm {}

/// Stable small-integer handle for an arm within one round's selection
/// and bandit math. Not persisted across rounds; arms are looked up by
/// [`Fingerprint`]/canonical name in the store.
pub type ArmId = usize;

/// Insertion-ordered map from canonical fingerprint string to owned
/// [`Arm`], confined to the run's owning context (spec.md §9 "global
/// mutable stores... confined to the run's owning context object").
#[derive(Debug, Default)]
pub struct ArmStore {
    order: Vec<String>,
    arms: FxHashMap<String, Arm>,
}

impl ArmStore {
    pub fn new() -> Self {
        ArmStore::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arm> {
        self.arms.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Arm> {
        self.arms.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.arms.contains_key(name)
    }

    pub fn insert(&mut self, arm: Arm) {
        let name = arm.name();
        if !self.arms.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.arms.insert(name, arm);
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Iterates arms in insertion order, the order a canonical printable
    /// dump (or a deterministic test) should rely on.
    pub fn iter(&self) -> impl Iterator<Item = &Arm> {
        self.order.iter().map(move |name| &self.arms[name])
    }
}
