//! Combinatorial oracle: greedy super-arm selection under a budget, with
//! dominance pruning (spec.md §4.5), grounded directly on
//! `oracle_v2.py::OracleV7.get_super_arm` /
//! `reduce_arm_dict_by_selection`.

use rustc_hash::FxHashMap;
use std::collections::{HashMap, HashSet};

use crate::arm::{Arm, ArmId};
use crate::config::Budget;

/// Greedily selects a super-arm from `ucbs` under `budget`, applying the
/// four dominance-pruning rules after every pick plus the covered-by-
/// remaining-memory rule under a memory budget (spec.md §4.5). `arms`
/// must contain every id that appears in `ucbs`.
///
/// Returns the chosen arm ids in selection order; this becomes the
/// database's installed-index set for the round (spec.md §8 item 3).
pub fn select_super_arm(
    ucbs: &FxHashMap<ArmId, f64>,
    arms: &HashMap<ArmId, &Arm>,
    budget: Budget,
    max_indexes_per_table: usize,
) -> Vec<ArmId> {
    let mut pool: FxHashMap<ArmId, f64> = ucbs
        .iter()
        .filter(|(_, &ucb)| ucb > 0.0)
        .map(|(&id, &ucb)| (id, ucb))
        .collect();

    // Per-arm query-id sets get mutated by the query-covered pruning rule
    // (spec.md §4.5 "Query-covered"), so the oracle keeps its own working
    // copy rather than mutating the shared arm store mid-round.
    let mut remaining_query_ids: HashMap<ArmId, HashSet<u64>> = arms
        .iter()
        .map(|(&id, arm)| (id, arm.arm_value.keys().copied().collect()))
        .collect();

    let mut chosen = Vec::new();
    let mut table_count: HashMap<String, usize> = HashMap::new();

    match budget {
        Budget::Memory(max_memory) => {
            let mut used_memory = 0.0;
            while !pool.is_empty() {
                let winner = argmax(&pool);
                let winner_arm = arms[&winner];
                let remaining = max_memory - used_memory;
                if winner_arm.size_mb >= remaining {
                    pool.remove(&winner);
                    continue;
                }
                used_memory += winner_arm.size_mb;
                commit(&mut pool, &mut remaining_query_ids, &mut chosen, &mut table_count, winner, arms, max_indexes_per_table);
                prune_covered(&mut pool, arms, winner, max_memory - used_memory);
            }
        }
        Budget::Count(max_indexes) => {
            for _ in 0..max_indexes {
                if pool.is_empty() {
                    break;
                }
                let winner = argmax(&pool);
                commit(&mut pool, &mut remaining_query_ids, &mut chosen, &mut table_count, winner, arms, max_indexes_per_table);
            }
        }
    }

    chosen
}

fn argmax(pool: &FxHashMap<ArmId, f64>) -> ArmId {
    pool.iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(&id, _)| id)
        .expect("pool is non-empty")
}

/// Applies the per-pick pruning rules in the order
/// `OracleV7.reduce_arm_dict_by_selection` applies them: per-table cap,
/// cluster, query-covered, same-prefix.
fn commit(
    pool: &mut FxHashMap<ArmId, f64>,
    remaining_query_ids: &mut HashMap<ArmId, HashSet<u64>>,
    chosen: &mut Vec<ArmId>,
    table_count: &mut HashMap<String, usize>,
    winner: ArmId,
    arms: &HashMap<ArmId, &Arm>,
    max_indexes_per_table: usize,
) {
    chosen.push(winner);
    let winner_arm = arms[&winner];
    *table_count.entry(winner_arm.table().to_string()).or_insert(0) += 1;
    pool.remove(&winner);

    // Per-table cap: drop every surviving arm on a table that already
    // hit its cap.
    pool.retain(|&id, _| {
        let table = arms[&id].table();
        table_count.get(table).copied().unwrap_or(0) < max_indexes_per_table
    });

    // Cluster: drop other arms on the winner's table sharing its cluster.
    pool.retain(|&id, _| {
        !(arms[&id].table() == winner_arm.table()
            && winner_arm.cluster.is_some()
            && arms[&id].cluster == winner_arm.cluster)
    });

    // Query-covered: a covering-index winner removes its query ids from
    // every other arm on the table; arms left with no query ids drop out.
    if winner_arm.is_include {
        let winner_queries: Vec<u64> = remaining_query_ids
            .get(&winner)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        for (&id, ids) in remaining_query_ids.iter_mut() {
            if id != winner && arms[&id].table() == winner_arm.table() {
                for q in &winner_queries {
                    ids.remove(q);
                }
            }
        }
        pool.retain(|&id, _| {
            remaining_query_ids
                .get(&id)
                .map(|s| !s.is_empty())
                .unwrap_or(true)
        });
    }

    // Same prefix: drop other arms on the winner's table whose first key
    // column matches the winner's, unless they diverge beyond it (longer
    // divergent indexes survive).
    pool.retain(|&id, _| {
        if arms[&id].table() != winner_arm.table() {
            return true;
        }
        let candidate_cols = &arms[&id].fingerprint.key_columns;
        let winner_cols = &winner_arm.fingerprint.key_columns;
        if candidate_cols.len() <= 1 || winner_cols.is_empty() {
            return true;
        }
        candidate_cols[0] != winner_cols[0]
    });
}

/// Covered: a surviving arm whose key-column prefix is covered by the
/// winner and whose size exceeds the remaining memory is dropped.
fn prune_covered(pool: &mut FxHashMap<ArmId, f64>, arms: &HashMap<ArmId, &Arm>, winner: ArmId, remaining_memory: f64) {
    let winner_arm = arms[&winner];
    pool.retain(|&id, _| {
        let candidate = arms[&id];
        !(candidate.fingerprint.is_prefix_of(&winner_arm.fingerprint) && candidate.size_mb > remaining_memory)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::Fingerprint;

    const NO_TABLE_CAP: usize = usize::MAX;

    fn arm_with(table: &str, cols: &[&str], size_mb: f64) -> Arm {
        let fp = Fingerprint::new(table, cols.iter().map(|s| s.to_string()).collect(), []);
        Arm::new(fp, size_mb, 1_000_000)
    }

    #[test]
    fn s2_budget_eviction_picks_arm1_only() {
        let a1 = arm_with("t", &["a"], 60.0);
        let a2 = arm_with("t", &["b"], 50.0);
        let a3 = arm_with("t", &["c"], 30.0);
        let arms: HashMap<ArmId, &Arm> = [(1, &a1), (2, &a2), (3, &a3)].into_iter().collect();
        let ucbs: FxHashMap<ArmId, f64> = [(1, 10.0), (2, 9.0), (3, 8.0)].into_iter().collect();

        let chosen = select_super_arm(&ucbs, &arms, Budget::Memory(80.0), NO_TABLE_CAP);
        assert_eq!(chosen, vec![1]);
    }

    #[test]
    fn s3_per_table_cap_keeps_exactly_the_top_six() {
        let arms_owned: Vec<Arm> = (0..7)
            .map(|i| arm_with("t", &[&format!("c{i}")], 1.0))
            .collect();
        let arms: HashMap<ArmId, &Arm> = arms_owned.iter().enumerate().map(|(i, a)| (i, a)).collect();
        let ucbs: FxHashMap<ArmId, f64> = (0..7).map(|i| (i, 10.0 - i as f64)).collect();

        let chosen = select_super_arm(&ucbs, &arms, Budget::Count(100), 6);
        assert_eq!(chosen.len(), 6);
        assert_eq!(chosen, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn s4_cluster_dominance_prunes_the_runner_up() {
        let mut a1 = arm_with("t", &["a"], 10.0);
        a1.cluster = Some("t_1_all".to_string());
        let mut a2 = arm_with("t", &["b"], 10.0);
        a2.cluster = Some("t_1_all".to_string());
        let arms: HashMap<ArmId, &Arm> = [(1, &a1), (2, &a2)].into_iter().collect();
        let ucbs: FxHashMap<ArmId, f64> = [(1, 10.0), (2, 9.0)].into_iter().collect();

        let chosen = select_super_arm(&ucbs, &arms, Budget::Count(5), NO_TABLE_CAP);
        assert_eq!(chosen, vec![1]);
    }

    #[test]
    fn zero_or_negative_ucb_arms_are_never_selected() {
        let a1 = arm_with("t", &["a"], 10.0);
        let arms: HashMap<ArmId, &Arm> = [(1, &a1)].into_iter().collect();
        let ucbs: FxHashMap<ArmId, f64> = [(1, 0.0)].into_iter().collect();
        assert!(select_super_arm(&ucbs, &arms, Budget::Count(5), NO_TABLE_CAP).is_empty());
    }

    #[test]
    fn query_covered_arms_are_dropped_once_a_covering_index_wins() {
        let mut covering = arm_with("t", &["a", "b"], 10.0);
        covering.is_include = true;
        covering.arm_value.insert(1, 5.0);
        let mut narrower = arm_with("t", &["c"], 5.0);
        narrower.arm_value.insert(1, 3.0);
        let arms: HashMap<ArmId, &Arm> = [(1, &covering), (2, &narrower)].into_iter().collect();
        let ucbs: FxHashMap<ArmId, f64> = [(1, 10.0), (2, 9.0)].into_iter().collect();

        let chosen = select_super_arm(&ucbs, &arms, Budget::Count(5), NO_TABLE_CAP);
        assert_eq!(chosen, vec![1]);
    }

    #[test]
    fn same_prefix_arms_are_pruned_unless_they_diverge() {
        let a1 = arm_with("t", &["a"], 10.0);
        let same_prefix = arm_with("t", &["a", "b"], 5.0);
        let diverging = arm_with("t", &["c", "d"], 5.0);
        let arms: HashMap<ArmId, &Arm> = [(1, &a1), (2, &same_prefix), (3, &diverging)].into_iter().collect();
        let ucbs: FxHashMap<ArmId, f64> = [(1, 10.0), (2, 9.0), (3, 8.0)].into_iter().collect();

        let chosen = select_super_arm(&ucbs, &arms, Budget::Count(5), NO_TABLE_CAP);
        assert_eq!(chosen, vec![1, 3]);
    }

    #[test]
    fn oracle_monotonicity_removing_an_arm_never_increases_total_ucb() {
        let a1 = arm_with("t", &["a"], 10.0);
        let a2 = arm_with("t", &["b"], 10.0);
        let arms_full: HashMap<ArmId, &Arm> = [(1, &a1), (2, &a2)].into_iter().collect();
        let ucbs: FxHashMap<ArmId, f64> = [(1, 10.0), (2, 9.0)].into_iter().collect();
        let full_total: f64 = select_super_arm(&ucbs, &arms_full, Budget::Count(5), NO_TABLE_CAP)
            .iter()
            .map(|id| ucbs[id])
            .sum();

        let arms_reduced: HashMap<ArmId, &Arm> = [(1, &a1)].into_iter().collect();
        let ucbs_reduced: FxHashMap<ArmId, f64> = [(1, 10.0)].into_iter().collect();
        let reduced_total: f64 = select_super_arm(&ucbs_reduced, &arms_reduced, Budget::Count(5), NO_TABLE_CAP)
            .iter()
            .map(|id| ucbs_reduced[id])
            .sum();

        assert!(reduced_total <= full_total);
    }
}
