//! The Database Port: the abstract collaborator the advisor's core treats
//! as an external system (spec.md §1, §6). Real adapters (Postgres,
//! MSSQL, a simulator, a test double) implement [`DatabasePort`]; the
//! advisor core never speaks SQL or knows which engine is underneath.

use std::collections::HashMap;

use crate::error::Result;

/// Catalog information for one table, read once from the port at startup
/// (spec.md §3 "Table info").
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub row_count: u64,
    pub primary_key_columns: Vec<String>,
    /// Declared SQL type per column (e.g. "int", "varchar(255)").
    pub column_types: HashMap<String, String>,
    /// Estimated on-disk storage size per column, in bytes.
    pub column_storage_bytes: HashMap<String, u32>,
}

impl TableInfo {
    pub fn columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = self.column_types.keys().cloned().collect();
        cols.sort();
        cols
    }
}

/// One operator's index-usage record from a query's execution or plan
/// (spec.md §6 "execute_query" / "get_query_plan").
#[derive(Debug, Clone)]
pub struct IndexUsage {
    pub index_name: String,
    pub elapsed_seconds: f64,
    pub cpu_seconds: f64,
    pub subtree_cost: f64,
    pub rows_in: u64,
    pub rows_out: u64,
}

impl IndexUsage {
    /// Reads off the configured cost unit (spec.md §6 "Cost unit").
    pub fn cost(&self, unit: crate::config::CostUnit) -> f64 {
        use crate::config::CostUnit::*;
        match unit {
            ElapsedTimeSeconds => self.elapsed_seconds,
            CpuTimeSeconds => self.cpu_seconds,
            OptimizerSubtreeCost => self.subtree_cost,
        }
    }
}

/// A table-scan (no index used) operator record.
#[derive(Debug, Clone)]
pub struct TableScanUsage {
    pub table: String,
    pub elapsed_seconds: f64,
    pub cpu_seconds: f64,
    pub subtree_cost: f64,
    pub rows: u64,
}

impl TableScanUsage {
    pub fn cost(&self, unit: crate::config::CostUnit) -> f64 {
        use crate::config::CostUnit::*;
        match unit {
            ElapsedTimeSeconds => self.elapsed_seconds,
            CpuTimeSeconds => self.cpu_seconds,
            OptimizerSubtreeCost => self.subtree_cost,
        }
    }
}

/// The result of executing (or planning) one query: an overall cost plus
/// the operator-level usage breakdown the advisor needs to compute
/// per-arm rewards (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct QueryExecution {
    pub exec_cost: f64,
    pub non_clustered_usage: Vec<IndexUsage>,
    pub clustered_usage: Vec<IndexUsage>,
    pub table_scan: Vec<TableScanUsage>,
}

/// Abstract database adapter required by the core (spec.md §6).
///
/// Implementors execute real queries (or a hypothetical-index-aware
/// simulation of them) against a concrete engine. All methods are
/// synchronous and blocking, per the single-threaded cooperative model
/// of spec.md §5; an implementation MAY parallelize independent calls
/// internally as long as it merges results before returning.
pub trait DatabasePort: Send + Sync {
    /// Called once, at startup: every table's catalog info.
    fn list_tables(&self) -> Result<HashMap<String, TableInfo>>;

    /// Called once, at startup: every (table, column) pair in canonical
    /// order plus the total column count, which fixes the context
    /// dimension `d` for the whole run.
    fn list_all_columns(&self) -> Result<(Vec<(String, String)>, usize)>;

    /// Estimated size in MB of an index with the given key and include
    /// columns. May create a hypothetical index transiently.
    fn estimate_index_size(
        &self,
        table: &str,
        key_cols: &[String],
        include_cols: &[String],
    ) -> Result<f64>;

    /// Creates a real or hypothetical index, returning its creation cost
    /// (in the configured cost unit).
    fn create_index(
        &self,
        table: &str,
        key_cols: &[String],
        include_cols: &[String],
        name: &str,
    ) -> Result<f64>;

    /// Drops an index by name. Idempotent: dropping a non-existent index
    /// must not fail.
    fn drop_index(&self, name: &str, table: &str) -> Result<()>;

    /// Executes a query for real, returning its cost and operator usage.
    fn execute_query(&self, sql: &str) -> Result<QueryExecution>;

    /// Plans (but does not execute) a query, returning the same shape of
    /// usage information as `execute_query`. Used for selectivity.
    fn get_query_plan(&self, sql: &str) -> Result<QueryExecution>;

    /// Per-table selectivity estimate for a query's predicates, derived
    /// from plan row estimates.
    fn get_selectivity(
        &self,
        sql: &str,
        predicates: &HashMap<String, Vec<String>>,
    ) -> Result<HashMap<String, f64>>;

    /// Current total size (MB) of all installed secondary indexes (the
    /// PDS — Physical Design Structure).
    fn current_pds_size(&self) -> Result<f64>;

    /// Total database size (MB), used for the size/db_size context
    /// feature.
    fn database_size(&self) -> Result<f64>;

    /// Drops every non-clustered (secondary) index. Used at shutdown to
    /// leave the database clean.
    fn drop_all_non_clustered(&self) -> Result<()>;
}
