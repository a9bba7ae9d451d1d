//! Candidate arm generation from one past-seen query (spec.md §4.2).

use std::collections::{HashMap, HashSet};

use crate::arm::{Arm, Fingerprint};
use crate::config::{AdvisorConfig, ArmValueSmoothing};
use crate::error::Result;
use crate::port::{DatabasePort, TableInfo};
use crate::query_store::QueryRecord;

/// All non-empty permutations of `cols`, every length from 1 to
/// `cols.len()`, in the order spec.md §4.2 enumerates them: shorter
/// permutations first, lexicographic order of index-choice within a
/// length.
fn permutations_all_lengths(cols: &[String]) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    for k in 1..=cols.len() {
        permutations_of_length_into(cols, k, &mut out);
    }
    out
}

fn permutations_of_length(cols: &[String], k: usize) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    permutations_of_length_into(cols, k, &mut out);
    out
}

fn permutations_of_length_into(cols: &[String], k: usize, out: &mut Vec<Vec<String>>) {
    if k == 0 || k > cols.len() {
        return;
    }
    let mut used = vec![false; cols.len()];
    let mut current = Vec::with_capacity(k);
    permute_rec(cols, k, &mut used, &mut current, out);
}

fn permute_rec(
    cols: &[String],
    k: usize,
    used: &mut [bool],
    current: &mut Vec<String>,
    out: &mut Vec<Vec<String>>,
) {
    if current.len() == k {
        out.push(current.clone());
        return;
    }
    for i in 0..cols.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        current.push(cols[i].clone());
        permute_rec(cols, k, used, current, out);
        current.pop();
        used[i] = false;
    }
}

fn apply_smoothing(existing: f64, new_value: f64, smoothing: ArmValueSmoothing) -> f64 {
    match smoothing {
        ArmValueSmoothing::Average => (existing + new_value) / 2.0,
        ArmValueSmoothing::ReplaceWithNew => new_value,
    }
}

/// Looks up `fingerprint` in `store`, creating it (asking the port for its
/// estimated size) if this is the first time it's been seen. Returns
/// whether the arm was just created, so callers only tag `cluster`/
/// `is_include` at creation time rather than on every re-sight (matching
/// `bandit_helper_v2.py`'s `else` branch, which sets these fields only
/// when the arm didn't already exist, never on the update path).
fn get_or_create_arm<'a>(
    store: &'a mut crate::arm::ArmStore,
    fingerprint: Fingerprint,
    row_count: u64,
    port: &dyn DatabasePort,
) -> Result<(&'a mut Arm, bool)> {
    let name = fingerprint.canonical_name();
    let created = !store.contains(&name);
    if created {
        let size = port.estimate_index_size(
            &fingerprint.table,
            &fingerprint.key_columns,
            &fingerprint.include_columns.iter().cloned().collect::<Vec<_>>(),
        )?;
        store.insert(Arm::new(fingerprint, size, row_count));
    }
    Ok((store.get_mut(&name).expect("just inserted or already present"), created))
}

/// Generates (or updates) all candidate arms implied by one past-seen
/// query, returning the set of canonical arm names it touched so the
/// round driver can attribute this query's id to each of them.
pub fn generate_arms_for_query(
    query: &QueryRecord,
    tables: &HashMap<String, TableInfo>,
    store: &mut crate::arm::ArmStore,
    config: &AdvisorConfig,
    port: &dyn DatabasePort,
) -> Result<HashSet<String>> {
    let mut touched = HashSet::new();

    for (table_name, table_predicates) in &query.predicates {
        let table = match tables.get(table_name) {
            Some(t) => t,
            None => continue,
        };
        let selectivity = *query.selectivity.get(table_name).unwrap_or(&1.0);
        let includes: Vec<String> = query
            .payload
            .get(table_name)
            .map(|payload_cols| {
                payload_cols
                    .iter()
                    .filter(|c| !table_predicates.contains(c))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if table.row_count < config.small_table_ignore
            || (selectivity > config.table_min_selectivity && !includes.is_empty())
        {
            continue;
        }

        let truncated: Vec<String> = table_predicates
            .iter()
            .take(config.max_permutation_length)
            .cloned()
            .collect();

        for permutation in permutations_all_lengths(&truncated) {
            let arm_value =
                (1.0 - selectivity) * (permutation.len() as f64 / truncated.len() as f64) * table.row_count as f64;
            let fingerprint = Fingerprint::new(table_name.clone(), permutation.clone(), []);
            let name = fingerprint.canonical_name();
            let is_full_length = permutation.len() == truncated.len();

            let (arm, created) = get_or_create_arm(store, fingerprint, table.row_count, port)?;
            if let Some(existing) = arm.arm_value.get(&query.id).copied() {
                arm.arm_value
                    .insert(query.id, apply_smoothing(existing, arm_value, config.arm_value_smoothing));
            } else {
                arm.arm_value.insert(query.id, arm_value);
            }
            if created && is_full_length {
                arm.cluster = Some(format!("{}_{}_all", table_name, query.id));
                if includes.is_empty() {
                    arm.is_include = true;
                }
            }
            touched.insert(name);
        }
    }

    for (table_name, payload_cols) in &query.payload {
        if query.predicates.contains_key(table_name) {
            continue;
        }
        let table = match tables.get(table_name) {
            Some(t) => t,
            None => continue,
        };
        if table.row_count < config.small_table_ignore {
            continue;
        }
        let arm_value = 0.001 * table.row_count as f64;
        let fingerprint = Fingerprint::new(table_name.clone(), payload_cols.clone(), []);
        let name = fingerprint.canonical_name();
        let (arm, created) = get_or_create_arm(store, fingerprint, table.row_count, port)?;
        if let Some(existing) = arm.arm_value.get(&query.id).copied() {
            arm.arm_value
                .insert(query.id, apply_smoothing(existing, arm_value, config.arm_value_smoothing));
        } else {
            arm.arm_value.insert(query.id, arm_value);
        }
        if created {
            arm.cluster = Some(format!("{}_{}_all", table_name, query.id));
            arm.is_include = true;
        }
        touched.insert(name);
    }

    if config.index_includes {
        for (table_name, table_predicates) in &query.predicates {
            let table = match tables.get(table_name) {
                Some(t) => t,
                None => continue,
            };
            if table.row_count < config.small_table_ignore {
                continue;
            }
            let mut includes: Vec<String> = query
                .payload
                .get(table_name)
                .map(|payload_cols| {
                    payload_cols
                        .iter()
                        .filter(|c| !table_predicates.contains(c))
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            if includes.is_empty() {
                continue;
            }
            includes.sort();

            let selectivity = *query.selectivity.get(table_name).unwrap_or(&1.0);
            let arm_value = (1.0 - selectivity) * table.row_count as f64;

            for permutation in permutations_of_length(table_predicates, table_predicates.len()) {
                let fingerprint =
                    Fingerprint::new(table_name.clone(), permutation.clone(), includes.clone());
                let name = fingerprint.canonical_name();
                let (arm, created) = get_or_create_arm(store, fingerprint, table.row_count, port)?;
                if let Some(existing) = arm.arm_value.get(&query.id).copied() {
                    arm.arm_value
                        .insert(query.id, apply_smoothing(existing, arm_value, config.arm_value_smoothing));
                } else {
                    arm.arm_value.insert(query.id, arm_value);
                }
                if created {
                    arm.is_include = true;
                    arm.cluster = Some(format!("{}_{}_all", table_name, query.id));
                }
                touched.insert(name);
            }
        }
    }

    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::ArmStore;
    use crate::port::TableInfo;
    use crate::testing::FakePort;
    use std::collections::HashMap;

    fn table(name: &str, row_count: u64) -> TableInfo {
        TableInfo {
            name: name.to_string(),
            row_count,
            primary_key_columns: vec![],
            column_types: HashMap::new(),
            column_storage_bytes: HashMap::new(),
        }
    }

    fn query(id: u64, predicates: &[(&str, &[&str])], payload: &[(&str, &[&str])]) -> QueryRecord {
        QueryRecord {
            id,
            query_string: format!("q{id}"),
            predicates: predicates
                .iter()
                .map(|(t, c)| (t.to_string(), c.iter().map(|s| s.to_string()).collect()))
                .collect(),
            payload: payload
                .iter()
                .map(|(t, c)| (t.to_string(), c.iter().map(|s| s.to_string()).collect()))
                .collect(),
            selectivity: predicates.iter().map(|(t, _)| (t.to_string(), 0.1)).collect(),
            frequency: 1,
            first_seen_round: 0,
            last_seen_round: 0,
            table_scan_time: HashMap::new(),
        }
    }

    #[test]
    fn small_tables_never_generate_arms() {
        let tables = [("u".to_string(), table("u", 500))].into();
        let q = query(1, &[("u", &["x"])], &[]);
        let mut store = ArmStore::new();
        let config = AdvisorConfig::default();
        let port = FakePort::new();
        generate_arms_for_query(&q, &tables, &mut store, &config, &port).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn two_column_predicate_generates_three_permutation_arms() {
        let tables = [("t".to_string(), table("t", 1_000_000))].into();
        let q = query(1, &[("t", &["a", "b"])], &[]);
        let mut store = ArmStore::new();
        let config = AdvisorConfig::default();
        let port = FakePort::new();
        let touched = generate_arms_for_query(&q, &tables, &mut store, &config, &port).unwrap();
        // permutations of length 1: (a),(b); length 2: (a,b),(b,a) => 4 arms total
        assert_eq!(touched.len(), 4);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn full_length_permutation_is_tagged_with_cluster() {
        let tables = [("t".to_string(), table("t", 1_000_000))].into();
        let q = query(1, &[("t", &["a", "b"])], &[("t", &["c"])]);
        let mut store = ArmStore::new();
        let config = AdvisorConfig::default();
        let port = FakePort::new();
        generate_arms_for_query(&q, &tables, &mut store, &config, &port).unwrap();
        let full = store.get("IX_t_a_b").unwrap();
        assert_eq!(full.cluster.as_deref(), Some("t_1_all"));
        // payload has an extra column beyond predicates, so this arm is
        // not itself a covering index.
        assert!(!full.is_include);
    }

    #[test]
    fn cluster_tag_is_not_overwritten_when_a_later_query_re_touches_the_arm() {
        let tables = [("t".to_string(), table("t", 1_000_000))].into();
        let mut store = ArmStore::new();
        let config = AdvisorConfig::default();
        let port = FakePort::new();

        let q1 = query(1, &[("t", &["a", "b"])], &[]);
        generate_arms_for_query(&q1, &tables, &mut store, &config, &port).unwrap();
        assert_eq!(store.get("IX_t_a_b").unwrap().cluster.as_deref(), Some("t_1_all"));

        // A second query with the identical full-length predicate set
        // re-touches the same arm; its cluster must stay tagged to the
        // query that created it, not be overwritten to the new query id.
        let q2 = query(2, &[("t", &["a", "b"])], &[]);
        generate_arms_for_query(&q2, &tables, &mut store, &config, &port).unwrap();
        assert_eq!(store.get("IX_t_a_b").unwrap().cluster.as_deref(), Some("t_1_all"));
    }

    #[test]
    fn re_seeing_a_query_averages_arm_value_by_default() {
        let tables = [("t".to_string(), table("t", 1_000_000))].into();
        let q = query(1, &[("t", &["a"])], &[]);
        let mut store = ArmStore::new();
        let config = AdvisorConfig::default();
        let port = FakePort::new();
        generate_arms_for_query(&q, &tables, &mut store, &config, &port).unwrap();
        let first_value = *store.get("IX_t_a").unwrap().arm_value.get(&1).unwrap();
        generate_arms_for_query(&q, &tables, &mut store, &config, &port).unwrap();
        let second_value = *store.get("IX_t_a").unwrap().arm_value.get(&1).unwrap();
        assert_eq!(first_value, second_value, "value is stable once averaged with itself");
    }

    #[test]
    fn payload_only_table_gets_a_single_include_arm() {
        let tables = [("t".to_string(), table("t", 1_000_000))].into();
        let q = query(1, &[], &[("t", &["x", "y"])]);
        let mut store = ArmStore::new();
        let config = AdvisorConfig::default();
        let port = FakePort::new();
        generate_arms_for_query(&q, &tables, &mut store, &config, &port).unwrap();
        assert_eq!(store.len(), 1);
        let arm = store.get("IX_t_x_y").unwrap();
        assert!(arm.is_include);
    }

    #[test]
    fn covering_indexes_are_generated_when_includes_enabled() {
        let tables = [("t".to_string(), table("t", 1_000_000))].into();
        let q = query(1, &[("t", &["a", "b"])], &[("t", &["a", "b", "c"])]);
        let mut store = ArmStore::new();
        let mut config = AdvisorConfig::default();
        config.index_includes = true;
        let port = FakePort::new();
        generate_arms_for_query(&q, &tables, &mut store, &config, &port).unwrap();
        assert!(store.contains("IXN_t_a_b_c"));
        assert!(store.contains("IXN_t_b_a_c"));
    }
}
