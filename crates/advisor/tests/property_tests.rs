//! Property-based tests for the universal invariants in spec.md §8,
//! fuzzing over arbitrary fingerprints and arm pools rather than the
//! hand-picked scenarios in `scenarios.rs`.

use std::collections::{BTreeSet, HashMap};

use index_advisor::arm::{Arm, ArmId, Fingerprint};
use index_advisor::bandit::{ArmReward, CUcbBandit};
use index_advisor::config::Budget;
use index_advisor::oracle::select_super_arm;
use proptest::prelude::*;
use rustc_hash::FxHashMap;

fn ident() -> impl Strategy<Value = String> {
    "[a-z]{1,6}"
}

fn fingerprint_strategy() -> impl Strategy<Value = Fingerprint> {
    (
        ident(),
        prop::collection::vec(ident(), 1..5),
        prop::collection::btree_set(ident(), 0..3),
    )
        .prop_map(|(table, keys, includes)| Fingerprint::new(table, keys, includes))
}

proptest! {
    /// spec.md §8 item 4: the fingerprint function is injective on
    /// `(table, key-ordered, include-sorted)`; distinct fingerprints never
    /// collide on `canonical_name`, and the reverse direction (same
    /// fingerprint -> same name) always holds as well.
    #[test]
    fn canonical_name_is_injective(a in fingerprint_strategy(), b in fingerprint_strategy()) {
        if a == b {
            prop_assert_eq!(a.canonical_name(), b.canonical_name());
        } else {
            prop_assert_ne!(a.canonical_name(), b.canonical_name());
        }
    }

    /// spec.md §8 "Round-trip/idempotence": encoding -> decoding of the
    /// fingerprint is lossless for the `(table, key_cols, include_cols)`
    /// triple, via the type's serde wire encoding.
    #[test]
    fn fingerprint_serde_round_trip_is_lossless(fp in fingerprint_strategy()) {
        let json = serde_json::to_string(&fp).unwrap();
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(fp, back);
    }

    /// Include-column order never affects identity: two fingerprints
    /// built from permutations of the same include set are equal.
    #[test]
    fn include_column_identity_is_order_independent(
        table in ident(),
        keys in prop::collection::vec(ident(), 1..3),
        includes in prop::collection::vec(ident(), 0..4),
    ) {
        let mut shuffled = includes.clone();
        shuffled.reverse();
        let a = Fingerprint::new(table.clone(), keys.clone(), includes);
        let b = Fingerprint::new(table, keys, shuffled);
        prop_assert_eq!(a.canonical_name(), b.canonical_name());
    }

    /// spec.md §8 item 1/2: whatever pool of arms and UCBs the oracle is
    /// handed, the returned super-arm never exceeds its budget (memory or
    /// count) and never exceeds the per-table cap.
    #[test]
    fn oracle_never_exceeds_its_budget(
        sizes in prop::collection::vec(1.0f64..50.0, 1..12),
        ucbs_raw in prop::collection::vec(-5.0f64..20.0, 1..12),
        max_memory in 10.0f64..200.0,
        max_per_table in 1usize..4,
    ) {
        let n = sizes.len().min(ucbs_raw.len());
        let owned: Vec<Arm> = (0..n)
            .map(|i| {
                // Spread arms across a small number of tables so the
                // per-table cap is actually exercised.
                let table = format!("t{}", i % 3);
                Arm::new(Fingerprint::new(table, vec![format!("c{i}")], BTreeSet::new()), sizes[i], 1_000_000)
            })
            .collect();
        let arms: HashMap<ArmId, &Arm> = owned.iter().enumerate().collect();
        let ucbs: FxHashMap<ArmId, f64> = (0..n).map(|i| (i, ucbs_raw[i])).collect();

        let chosen = select_super_arm(&ucbs, &arms, Budget::Memory(max_memory), max_per_table);
        let total: f64 = chosen.iter().map(|id| arms[id].size_mb).sum();
        prop_assert!(total <= max_memory);

        let mut per_table: HashMap<&str, usize> = HashMap::new();
        for id in &chosen {
            *per_table.entry(arms[id].table()).or_insert(0) += 1;
        }
        for count in per_table.values() {
            prop_assert!(*count <= max_per_table);
        }
    }

    /// spec.md §8 item 7: removing an arm from the pool before selection
    /// can never *increase* the total UCB of the returned super-arm.
    #[test]
    fn oracle_monotonicity_holds_under_arbitrary_removal(
        ucbs_raw in prop::collection::vec(1.0f64..20.0, 2..10),
        remove_index in 0usize..9,
    ) {
        let n = ucbs_raw.len();
        let remove_index = remove_index % n;
        let owned: Vec<Arm> = (0..n)
            .map(|i| Arm::new(Fingerprint::new(format!("t{i}"), vec![format!("c{i}")], BTreeSet::new()), 1.0, 1_000_000))
            .collect();

        let arms_full: HashMap<ArmId, &Arm> = owned.iter().enumerate().collect();
        let ucbs_full: FxHashMap<ArmId, f64> = (0..n).map(|i| (i, ucbs_raw[i])).collect();
        let full_total: f64 = select_super_arm(&ucbs_full, &arms_full, Budget::Count(n), usize::MAX)
            .iter()
            .map(|id| ucbs_full[id])
            .sum();

        let arms_reduced: HashMap<ArmId, &Arm> = owned
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != remove_index)
            .collect();
        let ucbs_reduced: FxHashMap<ArmId, f64> = ucbs_full
            .iter()
            .filter(|(&id, _)| id != remove_index)
            .map(|(&id, &v)| (id, v))
            .collect();
        let reduced_total: f64 = select_super_arm(&ucbs_reduced, &arms_reduced, Budget::Count(n), usize::MAX)
            .iter()
            .map(|id| ucbs_reduced[id])
            .sum();

        prop_assert!(reduced_total <= full_total + 1e-9);
    }

    /// spec.md §3 invariant: `V` stays symmetric after any sequence of
    /// updates, since every update is a rank-<=2 outer-product add.
    #[test]
    fn covariance_matrix_stays_symmetric_after_updates(
        contexts in prop::collection::vec(prop::collection::vec(-3.0f64..3.0, 4), 1..6),
        gains in prop::collection::vec(-10.0f64..10.0, 1..6),
    ) {
        let mut bandit = CUcbBandit::new(4, 1, 1.0, 1.0, 1.05, 10.0, 0.02, 3);
        let n = contexts.len().min(gains.len());
        let played: Vec<(Vec<f64>, ArmReward)> = (0..n)
            .map(|i| (contexts[i].clone(), ArmReward { gain: gains[i], creation_cost: 0.0 }))
            .collect();
        bandit.update(&played);
        prop_assert!(bandit.covariance_is_symmetric());
    }
}
