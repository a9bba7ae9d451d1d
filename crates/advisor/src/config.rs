//! Recognized configuration knobs (spec.md §6) plus two Open-Question
//! knobs the original source left ambiguous (§9, `SPEC_FULL.md` §4.2/§4.4).

use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::error::{AdvisorError, Result};

/// The cost unit used to compare query execution costs across rounds.
/// Must be fixed for the whole run (spec.md §6 "Cost unit").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostUnit {
    ElapsedTimeSeconds,
    CpuTimeSeconds,
    OptimizerSubtreeCost,
}

impl Default for CostUnit {
    fn default() -> Self {
        CostUnit::ElapsedTimeSeconds
    }
}

/// Open question (spec.md §9): whether a re-seen query's `arm_value`
/// replaces the old estimate or is averaged with it. The source averages;
/// we preserve that as the default and expose the alternative as a knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmValueSmoothing {
    /// `arm_value = (old + new) / 2`, matching `bandit_helper_v2.py`.
    Average,
    /// `arm_value = new`, overwriting the previous estimate outright.
    ReplaceWithNew,
}

impl Default for ArmValueSmoothing {
    fn default() -> Self {
        ArmValueSmoothing::Average
    }
}

/// Budget constraint under which the oracle selects a super-arm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Budget {
    /// Total installed index size may not exceed this many MB.
    Memory(f64),
    /// Total installed index count may not exceed this many indexes.
    Count(usize),
}

/// Full set of recognized configuration keys (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Total rounds to run.
    pub rounds: u64,
    /// Leading rounds run against hypothetical indexes only. 0 disables.
    pub hyp_rounds: u64,
    /// Repetitions of the whole run (orchestration concern; carried for
    /// completeness, unused by the round driver itself).
    pub reps: u32,

    /// Round numbers at which the workload window rotates.
    pub workload_shifts: Vec<u64>,
    /// Start index (inclusive) of the active query-batch window per shift.
    pub queries_start: Vec<u64>,
    /// End index (exclusive) of the active query-batch window per shift.
    pub queries_end: Vec<u64>,

    /// Memory budget in MB. 0 means "use `max_indexes` instead".
    pub max_memory: f64,
    /// Index-count budget, used when `max_memory == 0`.
    pub max_indexes: usize,

    /// Initial alpha (exploration weight), `alpha_0`.
    pub input_alpha: f64,
    /// `lambda`, the ridge term on `V`.
    pub input_lambda: f64,

    /// Enable covering-index (with-includes) arm generation.
    pub index_includes: bool,
    /// Cap on key-column permutation length (default 6).
    pub max_permutation_length: usize,
    /// Tables below this row count are never indexed.
    pub small_table_ignore: u64,
    /// Predicate selectivity above which a table with payload columns is
    /// skipped for arm generation (the query would scan most of it anyway).
    pub table_min_selectivity: f64,
    /// Per-table cap on simultaneously installed indexes.
    pub max_indexes_per_table: usize,
    /// Divides the creation-cost term added back into each UCB.
    pub creation_cost_reduction_factor: f64,
    /// `alpha` is divided by this every round until a reset.
    pub alpha_reduction_rate: f64,
    /// After this many rounds past warm-up, freeze to the best-performing
    /// super-arm seen so far instead of continuing to explore.
    pub stop_exploration_round: u64,
    /// Rounds of inactivity after which a query record is forgotten.
    pub query_memory: u64,

    /// Number of key-column positions that get their own one-hot slice in
    /// the name-encoded context tail (beyond the implicit position-1 slice).
    pub context_uniqueness: usize,
    /// Whether include-columns get a dedicated slice in the context tail.
    pub context_includes: bool,
    /// Width of the derived-value head. Fixed by the spec at 3; kept as a
    /// field so `ContextLayout` doesn't need a second source of truth.
    pub static_context_size: usize,
    /// Cap on per-table scan-time history length (FIFO trim).
    pub table_scan_time_length: usize,

    /// Which cost unit `execute_query` results are compared in.
    pub cost_unit: CostUnit,
    /// Open-question knob (spec.md §9): arm_value forgetting semantics.
    pub arm_value_smoothing: ArmValueSmoothing,

    /// Enables the rejection-sampling confidence term (spec.md §4.4 last
    /// bullet, §9 Open Question). Never gates selection by itself; off by
    /// default.
    pub rejection_sampling: bool,
    /// `delta_2` for the rejection-sampling confidence bound.
    pub delta2: f64,
    /// `tau`, the recent-history window for the rejection-sampling term.
    pub tau: u32,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        AdvisorConfig {
            rounds: 0,
            hyp_rounds: 0,
            reps: 1,
            workload_shifts: vec![0],
            queries_start: vec![0],
            queries_end: vec![0],
            max_memory: 0.0,
            max_indexes: 5,
            input_alpha: 1.0,
            input_lambda: 1.0,
            index_includes: true,
            max_permutation_length: 6,
            small_table_ignore: 1000,
            table_min_selectivity: 0.2,
            max_indexes_per_table: 6,
            creation_cost_reduction_factor: 10.0,
            alpha_reduction_rate: 1.05,
            stop_exploration_round: 50,
            query_memory: 50,
            context_uniqueness: 1,
            context_includes: false,
            static_context_size: 3,
            table_scan_time_length: 1000,
            cost_unit: CostUnit::default(),
            arm_value_smoothing: ArmValueSmoothing::default(),
            rejection_sampling: false,
            delta2: 0.02,
            tau: 3,
        }
    }
}

impl AdvisorConfig {
    /// Loads a config from a JSON reader, matching the teacher's
    /// serde_json-first convention for config and report surfaces.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        serde_json::from_reader(reader).map_err(AdvisorError::from)
    }

    /// Loads a config from a JSON string.
    pub fn from_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(AdvisorError::from)
    }

    /// The effective budget this config implies: memory-constrained if
    /// `max_memory > 0`, otherwise count-constrained.
    pub fn budget(&self) -> Budget {
        if self.max_memory > 0.0 {
            Budget::Memory(self.max_memory)
        } else {
            Budget::Count(self.max_indexes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budget_is_count_constrained() {
        let cfg = AdvisorConfig::default();
        assert_eq!(cfg.budget(), Budget::Count(5));
    }

    #[test]
    fn max_memory_overrides_max_indexes() {
        let mut cfg = AdvisorConfig::default();
        cfg.max_memory = 256.0;
        assert_eq!(cfg.budget(), Budget::Memory(256.0));
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = AdvisorConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back = AdvisorConfig::from_str(&json).unwrap();
        assert_eq!(back.max_indexes, cfg.max_indexes);
        assert_eq!(back.cost_unit, cfg.cost_unit);
    }
}
