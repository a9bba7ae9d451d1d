//! Per-arm context vector encoding (spec.md §4.3).
//!
//! A context vector is the concatenation of a small derived-value head
//! (recomputed every round) and a name-encoded tail (memoized on the arm
//! the first time it is built, since it never changes after creation).

use rustc_hash::FxHashMap;

use crate::arm::{Arm, Fingerprint};

/// Fixes the context dimension `d` for a run and knows how to place a
/// (table, column) pair into the name-encoded tail.
///
/// `d = n_columns * (1 + context_uniqueness + context_includes) + static_head`,
/// matching spec.md §4.3: `static_head` dedicated-position slices plus one
/// shared "left-over" slice, plus an optional include slice.
#[derive(Debug, Clone)]
pub struct ContextLayout {
    static_head: usize,
    context_uniqueness: usize,
    context_includes: bool,
    n_columns: usize,
    column_index: FxHashMap<(String, String), usize>,
}

impl ContextLayout {
    /// `columns` must be in the canonical order spec.md §4.3 assumes and
    /// §6 `list_all_columns` returns.
    pub fn new(
        columns: &[(String, String)],
        context_uniqueness: usize,
        context_includes: bool,
        static_head: usize,
    ) -> Self {
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(i, (t, c))| ((t.clone(), c.clone()), i))
            .collect();
        ContextLayout {
            static_head,
            context_uniqueness: context_uniqueness.max(1),
            context_includes,
            n_columns: columns.len(),
            column_index,
        }
    }

    /// Total context dimension `d`.
    pub fn dimension(&self) -> usize {
        self.static_head
            + self.n_columns * (1 + self.context_uniqueness + self.context_includes as usize)
    }

    /// The coordinate within the derived-value head that carries the
    /// size-delta feature, i.e. the "creation cost" coordinate the bandit
    /// splits out for the disjoint creation/usage update (spec.md §4.4).
    pub fn creation_coordinate(&self) -> usize {
        1
    }

    fn position_slice_start(&self, position_index: usize) -> usize {
        self.static_head + position_index * self.n_columns
    }

    fn leftover_slice_start(&self) -> usize {
        self.static_head + self.context_uniqueness * self.n_columns
    }

    fn include_slice_start(&self) -> usize {
        self.leftover_slice_start() + self.n_columns
    }

    /// Builds (or returns the memoized) name-encoded tail for `arm`,
    /// filling it in on `arm` if this is the first time it's requested.
    pub fn name_encoded_tail(&self, arm: &mut Arm) -> &[f64] {
        if arm.name_encoded_context.is_empty() {
            arm.name_encoded_context = self.encode_tail(&arm.fingerprint);
        }
        &arm.name_encoded_context
    }

    /// Encodes the name-encoded tail (everything after the derived-value
    /// head) for a fingerprint, without touching any arm's cache.
    pub fn encode_tail(&self, fingerprint: &Fingerprint) -> Vec<f64> {
        let tail_width =
            self.n_columns * (1 + self.context_uniqueness + self.context_includes as usize);
        let mut tail = vec![0.0; tail_width];

        for (i, column) in fingerprint.key_columns.iter().enumerate() {
            let position = i + 1; // 1-indexed, matching spec.md §4.3
            let Some(&col_idx) = self.column_index.get(&(fingerprint.table.clone(), column.clone())) else {
                continue;
            };
            if i < self.context_uniqueness {
                let start = self.position_slice_start(i) - self.static_head;
                tail[start + col_idx] = 1.0;
            } else {
                let start = self.leftover_slice_start() - self.static_head;
                tail[start + col_idx] += 10f64.powi(-(position as i32));
            }
        }

        if self.context_includes {
            let start = self.include_slice_start() - self.static_head;
            for column in &fingerprint.include_columns {
                if let Some(&col_idx) = self.column_index.get(&(fingerprint.table.clone(), column.clone())) {
                    tail[start + col_idx] = 1.0;
                }
            }
        }

        tail
    }

    /// Encodes the full per-round context vector for `arm`: derived-value
    /// head (`usage_last_batch`, `size_delta / db_size`, `is_include`)
    /// followed by the memoized name-encoded tail.
    pub fn encode(&self, arm: &mut Arm, was_chosen_last_round: bool, db_size_mb: f64) -> Vec<f64> {
        let size_delta = if was_chosen_last_round { 0.0 } else { arm.size_mb };
        let size_feature = if db_size_mb > 0.0 { size_delta / db_size_mb } else { 0.0 };
        let is_include = if arm.is_include { 1.0 } else { 0.0 };

        let tail = self.name_encoded_tail(arm).to_vec();
        let mut context = Vec::with_capacity(self.static_head + tail.len());
        context.push(arm.usage_last_batch);
        context.push(size_feature);
        context.push(is_include);
        context.extend(tail);
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::Arm;

    fn columns() -> Vec<(String, String)> {
        vec![
            ("t".to_string(), "a".to_string()),
            ("t".to_string(), "b".to_string()),
            ("t".to_string(), "c".to_string()),
        ]
    }

    #[test]
    fn dimension_matches_spec_formula() {
        let layout = ContextLayout::new(&columns(), 1, false, 3);
        // d = 3 columns * (1 + 1 + 0) + 3 = 9
        assert_eq!(layout.dimension(), 9);
    }

    #[test]
    fn include_slice_widens_dimension_when_enabled() {
        let layout = ContextLayout::new(&columns(), 1, true, 3);
        // d = 3 * (1 + 1 + 1) + 3 = 12
        assert_eq!(layout.dimension(), 12);
    }

    #[test]
    fn first_key_column_lands_in_the_dedicated_position_slice() {
        let layout = ContextLayout::new(&columns(), 1, false, 3);
        let fp = Fingerprint::new("t", vec!["b".to_string()], []);
        let tail = layout.encode_tail(&fp);
        // dedicated slice is tail[0..3], "b" is column index 1.
        assert_eq!(tail[1], 1.0);
        assert_eq!(tail[0], 0.0);
        assert_eq!(tail[2], 0.0);
    }

    #[test]
    fn positions_beyond_uniqueness_decay_into_the_leftover_slice() {
        let layout = ContextLayout::new(&columns(), 1, false, 3);
        let fp = Fingerprint::new("t", vec!["a".to_string(), "c".to_string()], []);
        let tail = layout.encode_tail(&fp);
        // position 1 ("a", col 0) -> dedicated slice tail[0..3]
        assert_eq!(tail[0], 1.0);
        // position 2 ("c", col 2) -> leftover slice tail[3..6], decayed 10^-2
        assert!((tail[3 + 2] - 0.01).abs() < 1e-12);
    }

    #[test]
    fn name_encoded_tail_is_memoized_on_the_arm() {
        let layout = ContextLayout::new(&columns(), 1, false, 3);
        let fp = Fingerprint::new("t", vec!["a".to_string()], []);
        let mut arm = Arm::new(fp, 10.0, 1000);
        assert!(arm.name_encoded_context.is_empty());
        let first = layout.name_encoded_tail(&mut arm).to_vec();
        assert!(!arm.name_encoded_context.is_empty());
        let second = layout.name_encoded_tail(&mut arm).to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn derived_head_reflects_chosen_last_round_and_includes() {
        let layout = ContextLayout::new(&columns(), 1, false, 3);
        let fp = Fingerprint::new("t", vec!["a".to_string()], []);
        let mut arm = Arm::new(fp, 100.0, 1000);
        arm.is_include = true;
        arm.usage_last_batch = 2.5;

        let chosen = layout.encode(&mut arm, true, 1000.0);
        assert_eq!(chosen[0], 2.5);
        assert_eq!(chosen[1], 0.0); // no size cost: already installed
        assert_eq!(chosen[2], 1.0);

        let not_chosen = layout.encode(&mut arm, false, 1000.0);
        assert_eq!(not_chosen[1], 0.1); // 100 / 1000
    }
}
