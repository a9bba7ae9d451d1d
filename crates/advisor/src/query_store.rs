//! One record per distinct query id (spec.md §4.1 "Query Store").

use rustc_hash::FxHashMap;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::Result;
use crate::port::DatabasePort;

/// Bounded FIFO history of scan times for one (table, query) pair
/// (spec.md §3 "Invariants": capped at N≈1000 to prevent unbounded
/// growth).
#[derive(Debug, Clone, Default)]
pub struct ScanTimeHistory {
    table_scan: VecDeque<f64>,
    clustered_index_scan: VecDeque<f64>,
    non_clustered_index_scan: VecDeque<f64>,
    cap: usize,
}

impl ScanTimeHistory {
    pub fn new(cap: usize) -> Self {
        ScanTimeHistory {
            cap,
            ..Default::default()
        }
    }

    fn push(history: &mut VecDeque<f64>, cap: usize, value: f64) {
        history.push_back(value);
        while history.len() > cap {
            history.pop_front();
        }
    }

    pub fn record_table_scan(&mut self, value: f64) {
        Self::push(&mut self.table_scan, self.cap, value);
    }

    pub fn record_clustered_index_scan(&mut self, value: f64) {
        Self::push(&mut self.clustered_index_scan, self.cap, value);
    }

    pub fn record_non_clustered_index_scan(&mut self, value: f64) {
        Self::push(&mut self.non_clustered_index_scan, self.cap, value);
    }

    pub fn max_table_scan(&self) -> f64 {
        self.table_scan.iter().cloned().fold(0.0, f64::max)
    }

    /// The worst-case access cost recorded for this table across any
    /// access method: table scan, clustered-index scan, or
    /// non-clustered-index scan (spec.md §4.6 "max_scan_time_for_its_table").
    pub fn max_any(&self) -> f64 {
        [
            self.table_scan.iter().cloned().fold(0.0, f64::max),
            self.clustered_index_scan.iter().cloned().fold(0.0, f64::max),
            self.non_clustered_index_scan.iter().cloned().fold(0.0, f64::max),
        ]
        .into_iter()
        .fold(0.0, f64::max)
    }
}

/// Which access method a recorded scan-time sample came from (spec.md
/// §3 "per-table scan-time histories for table scan, clustered-index
/// scan, non-clustered-index scan").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    TableScan,
    ClusteredIndexScan,
    NonClusteredIndexScan,
}

/// One distinct query observed at runtime (spec.md §3 "Query record").
#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub id: u64,
    pub query_string: String,
    pub predicates: HashMap<String, Vec<String>>,
    pub payload: HashMap<String, Vec<String>>,
    pub selectivity: HashMap<String, f64>,
    pub frequency: u64,
    /// -1 once the record has been forgotten by `gc` (spec.md §4.1).
    pub first_seen_round: i64,
    pub last_seen_round: u64,
    pub table_scan_time: HashMap<String, ScanTimeHistory>,
}

impl QueryRecord {
    fn is_forgotten(&self) -> bool {
        self.first_seen_round < 0
    }
}

/// Keeps one record per distinct query id observed across rounds.
#[derive(Debug, Default)]
pub struct QueryStore {
    records: FxHashMap<u64, QueryRecord>,
    /// Memoizes selectivity by query string so a resubmitted identical
    /// query skips the port round-trip (spec.md §4.1, and the source's
    /// `query_v5.py` string-keyed caching).
    selectivity_memo: HashMap<String, HashMap<String, f64>>,
    scan_history_cap: usize,
}

/// The three per-round sets the round driver needs (spec.md §4.1).
pub struct RoundClassification {
    pub current_batch: HashSet<u64>,
    pub past_seen: HashSet<u64>,
    pub new_this_round: HashSet<u64>,
}

impl QueryStore {
    pub fn new(scan_history_cap: usize) -> Self {
        QueryStore {
            scan_history_cap,
            ..Default::default()
        }
    }

    pub fn get(&self, id: u64) -> Option<&QueryRecord> {
        self.records.get(&id)
    }

    /// Observes one query occurrence in the current batch: creates the
    /// record on first sight (asking the port for selectivity, using the
    /// string memo when available) or refreshes frequency/last-seen on
    /// re-sight.
    pub fn observe(
        &mut self,
        id: u64,
        query_string: &str,
        predicates: HashMap<String, Vec<String>>,
        payload: HashMap<String, Vec<String>>,
        round: u64,
        port: &dyn DatabasePort,
    ) -> Result<()> {
        if let Some(record) = self.records.get_mut(&id) {
            record.frequency += 1;
            record.last_seen_round = round;
            record.query_string = query_string.to_string();
            if record.first_seen_round < 0 {
                record.first_seen_round = round as i64;
            }
            return Ok(());
        }

        let selectivity = if let Some(cached) = self.selectivity_memo.get(query_string) {
            cached.clone()
        } else {
            let computed = port.get_selectivity(query_string, &predicates)?;
            self.selectivity_memo
                .insert(query_string.to_string(), computed.clone());
            computed
        };

        let mut table_scan_time = HashMap::new();
        for table in predicates.keys() {
            table_scan_time
                .entry(table.clone())
                .or_insert_with(|| ScanTimeHistory::new(self.scan_history_cap));
        }

        self.records.insert(
            id,
            QueryRecord {
                id,
                query_string: query_string.to_string(),
                predicates,
                payload,
                selectivity,
                frequency: 1,
                first_seen_round: round as i64,
                last_seen_round: round,
                table_scan_time,
            },
        );
        Ok(())
    }

    /// Records one scan-time sample for `(query_id, table)`, creating the
    /// history on demand. No-op if the query id is unknown.
    pub fn record_scan(&mut self, query_id: u64, table: &str, kind: ScanKind, value: f64) {
        let cap = self.scan_history_cap;
        let Some(record) = self.records.get_mut(&query_id) else { return };
        let history = record
            .table_scan_time
            .entry(table.to_string())
            .or_insert_with(|| ScanTimeHistory::new(cap));
        match kind {
            ScanKind::TableScan => history.record_table_scan(value),
            ScanKind::ClusteredIndexScan => history.record_clustered_index_scan(value),
            ScanKind::NonClusteredIndexScan => history.record_non_clustered_index_scan(value),
        }
    }

    /// The worst-case recorded access cost for `(query_id, table)` across
    /// every access method, after any scans recorded this round.
    pub fn max_scan_time(&self, query_id: u64, table: &str) -> f64 {
        self.records
            .get(&query_id)
            .and_then(|r| r.table_scan_time.get(table))
            .map(|h| h.max_any())
            .unwrap_or(0.0)
    }

    /// Marks records untouched for more than `query_memory` rounds as
    /// forgotten (spec.md §4.1). Forgotten records remain in the store
    /// (for historical arm_value bookkeeping) but drop out of the "past"
    /// set used for arm generation.
    pub fn gc(&mut self, round: u64, query_memory: u64) {
        for record in self.records.values_mut() {
            if !record.is_forgotten()
                && round.saturating_sub(record.last_seen_round) > query_memory
            {
                record.first_seen_round = -1;
            }
        }
    }

    /// Classifies every known record relative to `round`, per spec.md
    /// §4.1: `current_batch` is supplied by the caller (the ids actually
    /// present in this round's workload window); `past_seen` is every
    /// record first seen in an earlier round and not yet forgotten;
    /// `new_this_round` is every record first seen exactly this round
    /// (excluded from `past_seen`, per the "newer version" behavior
    /// spec.md §9 settles on).
    pub fn classify(&self, round: u64, current_batch: HashSet<u64>) -> RoundClassification {
        let mut past_seen = HashSet::new();
        let mut new_this_round = HashSet::new();
        for record in self.records.values() {
            if record.is_forgotten() {
                continue;
            }
            if record.first_seen_round == round as i64 {
                new_this_round.insert(record.id);
            } else if (record.first_seen_round as u64) < round {
                past_seen.insert(record.id);
            }
        }
        RoundClassification {
            current_batch,
            past_seen,
            new_this_round,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePort;

    #[test]
    fn first_sight_asks_the_port_once_then_memoizes_by_string() {
        let port = FakePort::new();
        let mut store = QueryStore::new(1000);
        let preds: HashMap<String, Vec<String>> =
            [("t".to_string(), vec!["a".to_string()])].into();
        store
            .observe(1, "select * from t where a = 1", preds.clone(), HashMap::new(), 0, &port)
            .unwrap();
        assert_eq!(port.selectivity_calls(), 1);

        // Same string, different id: memo hit, no extra port call.
        store
            .observe(2, "select * from t where a = 1", preds, HashMap::new(), 0, &port)
            .unwrap();
        assert_eq!(port.selectivity_calls(), 1);
    }

    #[test]
    fn gc_forgets_stale_records_but_keeps_them_in_the_store() {
        let port = FakePort::new();
        let mut store = QueryStore::new(1000);
        store
            .observe(1, "q1", HashMap::new(), HashMap::new(), 0, &port)
            .unwrap();
        store.gc(100, 50);
        assert!(store.get(1).unwrap().is_forgotten());
        assert!(store.get(1).is_some());
    }

    #[test]
    fn classify_excludes_first_round_queries_from_past_seen() {
        let port = FakePort::new();
        let mut store = QueryStore::new(1000);
        store
            .observe(1, "q1", HashMap::new(), HashMap::new(), 5, &port)
            .unwrap();
        let classification = store.classify(5, [1].into_iter().collect());
        assert!(classification.new_this_round.contains(&1));
        assert!(!classification.past_seen.contains(&1));

        let classification_later = store.classify(6, HashSet::new());
        assert!(classification_later.past_seen.contains(&1));
        assert!(!classification_later.new_this_round.contains(&1));
    }

    #[test]
    fn scan_time_history_is_bounded() {
        let mut h = ScanTimeHistory::new(3);
        for i in 0..10 {
            h.record_table_scan(i as f64);
        }
        assert_eq!(h.table_scan.len(), 3);
        assert_eq!(h.max_table_scan(), 9.0);
    }

    #[test]
    fn max_scan_time_is_the_worst_across_access_methods() {
        let port = FakePort::new();
        let mut store = QueryStore::new(1000);
        store.observe(1, "q1", HashMap::new(), HashMap::new(), 0, &port).unwrap();
        store.record_scan(1, "t", ScanKind::TableScan, 5.0);
        store.record_scan(1, "t", ScanKind::NonClusteredIndexScan, 12.0);
        store.record_scan(1, "t", ScanKind::ClusteredIndexScan, 3.0);
        assert_eq!(store.max_scan_time(1, "t"), 12.0);
        assert_eq!(store.max_scan_time(1, "u"), 0.0);
    }
}
