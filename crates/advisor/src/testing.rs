//! In-memory [`DatabasePort`] test double, for unit tests throughout this
//! crate and for the integration scenarios under `tests/`. Hand-rolled
//! rather than built on a mocking framework, matching the teacher
//! workspace's preference for explicit test doubles (e.g.
//! `strata-durability::testing`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::Result;
use crate::port::{DatabasePort, IndexUsage, QueryExecution, TableInfo, TableScanUsage};

/// A scripted response for one query string, so tests can control
/// exactly what usage statistics `execute_query`/`get_query_plan` return.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecution {
    pub exec_cost: f64,
    pub non_clustered_usage: Vec<IndexUsage>,
    pub clustered_usage: Vec<IndexUsage>,
    pub table_scan: Vec<TableScanUsage>,
}

impl From<ScriptedExecution> for QueryExecution {
    fn from(s: ScriptedExecution) -> Self {
        QueryExecution {
            exec_cost: s.exec_cost,
            non_clustered_usage: s.non_clustered_usage,
            clustered_usage: s.clustered_usage,
            table_scan: s.table_scan,
        }
    }
}

/// Hand-rolled in-memory database adapter for tests. Tracks created and
/// dropped index names so tests can assert on the diff the round driver
/// sends, and counts `get_selectivity` calls so the query store's memo
/// behavior (spec.md §4.1) is directly observable.
pub struct FakePort {
    tables: Mutex<HashMap<String, TableInfo>>,
    columns: Mutex<Vec<(String, String)>>,
    sizes: Mutex<HashMap<String, f64>>,
    selectivity: Mutex<HashMap<String, HashMap<String, f64>>>,
    executions: Mutex<HashMap<String, ScriptedExecution>>,
    created: Mutex<Vec<String>>,
    dropped: Mutex<Vec<String>>,
    pds_size: Mutex<f64>,
    database_size_mb: Mutex<f64>,
    selectivity_calls: AtomicUsize,
}

impl FakePort {
    pub fn new() -> Self {
        FakePort {
            tables: Mutex::new(HashMap::new()),
            columns: Mutex::new(Vec::new()),
            sizes: Mutex::new(HashMap::new()),
            selectivity: Mutex::new(HashMap::new()),
            executions: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            dropped: Mutex::new(Vec::new()),
            pds_size: Mutex::new(0.0),
            database_size_mb: Mutex::new(10_000.0),
            selectivity_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_table(self, table: TableInfo) -> Self {
        let mut cols: Vec<(String, String)> = table
            .columns()
            .into_iter()
            .map(|c| (table.name.clone(), c))
            .collect();
        self.columns.lock().unwrap().append(&mut cols);
        self.tables.lock().unwrap().insert(table.name.clone(), table);
        self
    }

    pub fn with_size(self, fingerprint_name: impl Into<String>, size_mb: f64) -> Self {
        self.sizes
            .lock()
            .unwrap()
            .insert(fingerprint_name.into(), size_mb);
        self
    }

    pub fn with_selectivity(self, query: impl Into<String>, sel: HashMap<String, f64>) -> Self {
        self.selectivity.lock().unwrap().insert(query.into(), sel);
        self
    }

    pub fn with_execution(self, query: impl Into<String>, exec: ScriptedExecution) -> Self {
        self.executions.lock().unwrap().insert(query.into(), exec);
        self
    }

    pub fn set_database_size(&self, mb: f64) {
        *self.database_size_mb.lock().unwrap() = mb;
    }

    pub fn selectivity_calls(&self) -> usize {
        self.selectivity_calls.load(Ordering::SeqCst)
    }

    pub fn created_indexes(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn dropped_indexes(&self) -> Vec<String> {
        self.dropped.lock().unwrap().clone()
    }

    fn size_for(&self, table: &str, key_cols: &[String], include_cols: &[String]) -> f64 {
        let name = if include_cols.is_empty() {
            format!("IX_{}_{}", table, key_cols.join("_"))
        } else {
            let mut sorted = include_cols.to_vec();
            sorted.sort();
            format!("IXN_{}_{}_{}", table, key_cols.join("_"), sorted.join("_"))
        };
        *self.sizes.lock().unwrap().get(&name).unwrap_or(&1.0)
    }
}

impl Default for FakePort {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabasePort for FakePort {
    fn list_tables(&self) -> Result<HashMap<String, TableInfo>> {
        Ok(self.tables.lock().unwrap().clone())
    }

    fn list_all_columns(&self) -> Result<(Vec<(String, String)>, usize)> {
        let cols = self.columns.lock().unwrap().clone();
        let n = cols.len();
        Ok((cols, n))
    }

    fn estimate_index_size(
        &self,
        table: &str,
        key_cols: &[String],
        include_cols: &[String],
    ) -> Result<f64> {
        Ok(self.size_for(table, key_cols, include_cols))
    }

    fn create_index(
        &self,
        _table: &str,
        _key_cols: &[String],
        _include_cols: &[String],
        name: &str,
    ) -> Result<f64> {
        self.created.lock().unwrap().push(name.to_string());
        Ok(0.0)
    }

    fn drop_index(&self, name: &str, _table: &str) -> Result<()> {
        self.dropped.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn execute_query(&self, sql: &str) -> Result<QueryExecution> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .get(sql)
            .cloned()
            .unwrap_or_default()
            .into())
    }

    fn get_query_plan(&self, sql: &str) -> Result<QueryExecution> {
        self.execute_query(sql)
    }

    fn get_selectivity(
        &self,
        sql: &str,
        _predicates: &HashMap<String, Vec<String>>,
    ) -> Result<HashMap<String, f64>> {
        self.selectivity_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .selectivity
            .lock()
            .unwrap()
            .get(sql)
            .cloned()
            .unwrap_or_default())
    }

    fn current_pds_size(&self) -> Result<f64> {
        Ok(*self.pds_size.lock().unwrap())
    }

    fn database_size(&self) -> Result<f64> {
        Ok(*self.database_size_mb.lock().unwrap())
    }

    fn drop_all_non_clustered(&self) -> Result<()> {
        let created: Vec<String> = self.created.lock().unwrap().clone();
        self.dropped.lock().unwrap().extend(created);
        Ok(())
    }
}
