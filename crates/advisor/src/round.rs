//! The round driver: orchestrates one round end-to-end (spec.md §4.6).
//!
//! Ordering within a round is load-bearing (spec.md §5 "Ordering
//! guarantees"): store update -> arm generation -> context encoding ->
//! selection -> diff -> drop -> add -> execute -> reward aggregation ->
//! bandit update. A port failure mid-round rolls back every index the
//! round created before the error is surfaced (spec.md §5 "Cancellation",
//! §7 `PortUnavailable`).

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::arm::{Arm, ArmId, ArmStore};
use crate::arm_factory::generate_arms_for_query;
use crate::bandit::{ArmReward, CUcbBandit};
use crate::config::AdvisorConfig;
use crate::context::ContextLayout;
use crate::error::{AdvisorError, Result};
use crate::oracle::select_super_arm;
use crate::port::{DatabasePort, QueryExecution, TableInfo};
use crate::query_store::{QueryStore, ScanKind};

/// One workload-file line (spec.md §6 "Workload file format"). `sort_by`
/// and `group_by` are accepted by the format but unused by this core, so
/// they are not represented here.
#[derive(Debug, Clone)]
pub struct IncomingQuery {
    pub id: u64,
    pub query_string: String,
    pub predicates: HashMap<String, Vec<String>>,
    pub payload: HashMap<String, Vec<String>>,
}

/// Exponential smoothing factor for the frozen-super-arm EMA (spec.md
/// §4.6 step 6: "tracked as an EMA of round execution times keyed by the
/// frozen-set of chosen ids"). The source leaves the smoothing constant
/// unspecified; 0.2 matches the weight the source's other EMA-shaped
/// bookkeeping (`index_usage_last_batch`) uses implicitly via its
/// averaging update.
const SUPER_ARM_EMA_ALPHA: f64 = 0.2;

/// Orchestrates the full advisor loop: query store, arm store, context
/// layout, and bandit state, all confined to this owning object (spec.md
/// §9 "no ambient global state").
pub struct RoundDriver {
    config: AdvisorConfig,
    port: Box<dyn DatabasePort>,
    tables: HashMap<String, TableInfo>,
    query_store: QueryStore,
    arm_store: ArmStore,
    context_layout: ContextLayout,
    bandit: CUcbBandit,
    chosen_last: HashSet<String>,
    frozen_super_arm: Option<Vec<String>>,
    super_arm_ema: HashMap<Vec<String>, f64>,
    /// `|new_last_round|`: the number of brand-new queries observed in the
    /// *previous* round, carried forward so this round's workload-shift
    /// trigger uses `new_last_round / past` rather than the current
    /// round's own new-query count (spec.md §4.6 step 3, §4.4; matches
    /// `sim_c3ucb_vR.py`'s `query_obj_additions` carried across rounds).
    /// `None` until a round has completed.
    prev_new_count: Option<u64>,
}

impl RoundDriver {
    /// Reads the table catalog and column list once (spec.md §6 "called
    /// once, at startup"), which fixes the context dimension `d` for the
    /// whole run.
    pub fn new(config: AdvisorConfig, port: Box<dyn DatabasePort>) -> Result<Self> {
        let tables = port.list_tables()?;
        let (columns, _total) = port.list_all_columns()?;
        let context_layout = ContextLayout::new(
            &columns,
            config.context_uniqueness,
            config.context_includes,
            config.static_context_size,
        );
        let bandit = CUcbBandit::new(
            context_layout.dimension(),
            context_layout.creation_coordinate(),
            config.input_alpha,
            config.input_lambda,
            config.alpha_reduction_rate,
            config.creation_cost_reduction_factor,
            config.delta2,
            config.tau,
        );
        Ok(RoundDriver {
            query_store: QueryStore::new(config.table_scan_time_length),
            arm_store: ArmStore::new(),
            context_layout,
            bandit,
            chosen_last: HashSet::new(),
            frozen_super_arm: None,
            super_arm_ema: HashMap::new(),
            prev_new_count: None,
            config,
            port,
            tables,
        })
    }

    pub fn chosen_last(&self) -> &HashSet<String> {
        &self.chosen_last
    }

    pub fn bandit(&self) -> &CUcbBandit {
        &self.bandit
    }

    pub fn arm_store(&self) -> &ArmStore {
        &self.arm_store
    }

    pub fn query_store(&self) -> &QueryStore {
        &self.query_store
    }

    /// Resolves an `IndexUsage`/`TableScanUsage`'s table. Non-clustered
    /// usage entries are matched against the arm store by index name
    /// (arm names double as physical index names, spec.md §3). Clustered
    /// usage entries aren't bandit arms, so adapters are expected to name
    /// a table's clustered index `CL_<table>` for this lookup to resolve
    /// it (an addition to the port contract needed because `IndexUsage`
    /// itself carries no table field, spec.md §6).
    fn table_for_index_usage(&self, index_name: &str) -> Option<String> {
        if let Some(arm) = self.arm_store.get(index_name) {
            return Some(arm.table().to_string());
        }
        self.tables
            .keys()
            .find(|table| format!("CL_{table}") == index_name)
            .cloned()
    }

    fn record_query_execution(&mut self, query_id: u64, execution: &QueryExecution) {
        let unit = self.config.cost_unit;
        for scan in &execution.table_scan {
            self.query_store
                .record_scan(query_id, &scan.table, ScanKind::TableScan, scan.cost(unit));
        }
        for usage in &execution.clustered_usage {
            if let Some(table) = self.table_for_index_usage(&usage.index_name) {
                self.query_store
                    .record_scan(query_id, &table, ScanKind::ClusteredIndexScan, usage.cost(unit));
            }
        }
        for usage in &execution.non_clustered_usage {
            if let Some(table) = self.table_for_index_usage(&usage.index_name) {
                self.query_store
                    .record_scan(query_id, &table, ScanKind::NonClusteredIndexScan, usage.cost(unit));
            }
        }
    }

    fn rollback_created(&self, created: &[String]) {
        for name in created {
            let table = self.arm_store.get(name).map(|a| a.table().to_string()).unwrap_or_default();
            let _ = self.port.drop_index(name, &table);
        }
    }

    /// Runs one round end-to-end and emits its report records, returning
    /// the chosen super-arm's index names.
    #[tracing::instrument(skip(self, batch, sink), fields(round))]
    pub fn run_round(
        &mut self,
        round: u64,
        batch: &[IncomingQuery],
        sink: &mut dyn crate::report::ReportSink,
    ) -> Result<Vec<String>> {
        let round_start = Instant::now();

        for q in batch {
            self.query_store.observe(
                q.id,
                &q.query_string,
                q.predicates.clone(),
                q.payload.clone(),
                round,
                self.port.as_ref(),
            )?;
        }
        self.query_store.gc(round, self.config.query_memory);
        let current_batch_ids: HashSet<u64> = batch.iter().map(|q| q.id).collect();
        let classification = self.query_store.classify(round, current_batch_ids);

        if let Some(prev_new) = self.prev_new_count {
            if prev_new > 0 && !classification.past_seen.is_empty() {
                let fraction = prev_new as f64 / classification.past_seen.len() as f64;
                tracing::debug!(fraction, "workload shift fraction for this round");
                self.bandit.workload_change_trigger(fraction);
            }
        }

        let recommendation_start = Instant::now();

        let past_queries: Vec<_> = classification
            .past_seen
            .iter()
            .filter_map(|id| self.query_store.get(*id).cloned())
            .collect();

        let mut active_arm_names: HashSet<String> = HashSet::new();
        for q in &past_queries {
            let touched = generate_arms_for_query(q, &self.tables, &mut self.arm_store, &self.config, self.port.as_ref())?;
            active_arm_names.extend(touched);
        }

        let db_size = self.port.database_size()?;
        let mut id_by_name: FxHashMap<String, ArmId> = FxHashMap::default();
        let mut context_by_id: FxHashMap<ArmId, Vec<f64>> = FxHashMap::default();
        for (next_id, name) in active_arm_names.iter().enumerate() {
            let was_chosen = self.chosen_last.contains(name);
            let arm = self.arm_store.get_mut(name).expect("active arm exists in the store");
            let ctx = self.context_layout.encode(arm, was_chosen, db_size);
            id_by_name.insert(name.clone(), next_id);
            context_by_id.insert(next_id, ctx);
        }
        let contexts: Vec<(ArmId, Vec<f64>)> = context_by_id.iter().map(|(&id, ctx)| (id, ctx.clone())).collect();

        let mut chosen_names: Vec<String> = if contexts.is_empty() {
            Vec::new()
        } else {
            let ucbs = self.bandit.compute_ucbs(&contexts)?;
            let arms_by_id: HashMap<ArmId, &Arm> = id_by_name
                .iter()
                .map(|(name, &id)| (id, self.arm_store.get(name).expect("active arm exists")))
                .collect();
            let chosen_ids = select_super_arm(&ucbs, &arms_by_id, self.config.budget(), self.config.max_indexes_per_table);
            chosen_ids
                .into_iter()
                .map(|id| id_by_name.iter().find(|(_, &v)| v == id).map(|(name, _)| name.clone()).expect("id has a name"))
                .collect()
        };

        if round > self.config.stop_exploration_round {
            if self.frozen_super_arm.is_none() {
                if let Some((best_key, _)) = self
                    .super_arm_ema
                    .iter()
                    .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                {
                    self.frozen_super_arm = Some(best_key.clone());
                }
            }
            if let Some(frozen) = &self.frozen_super_arm {
                chosen_names = frozen.clone();
            }
        }
        chosen_names.sort();

        let recommendation_cost = recommendation_start.elapsed().as_secs_f64();

        let chosen_set: HashSet<String> = chosen_names.iter().cloned().collect();
        let to_drop: Vec<String> = self.chosen_last.difference(&chosen_set).cloned().collect();
        let to_add: Vec<String> = chosen_set.difference(&self.chosen_last).cloned().collect();

        for name in &to_drop {
            let table = self.arm_store.get(name).map(|a| a.table().to_string()).unwrap_or_default();
            self.port.drop_index(name, &table)?;
        }

        let mut created_this_round: Vec<String> = Vec::new();
        let mut creation_costs: FxHashMap<String, f64> = FxHashMap::default();
        for name in &to_add {
            let (table, key_cols, include_cols) = {
                let arm = self.arm_store.get(name).expect("to_add arm exists");
                (
                    arm.table().to_string(),
                    arm.fingerprint.key_columns.clone(),
                    arm.fingerprint.include_columns.iter().cloned().collect::<Vec<_>>(),
                )
            };
            match self.port.create_index(&table, &key_cols, &include_cols, name) {
                Ok(cost) => {
                    creation_costs.insert(name.clone(), cost);
                    created_this_round.push(name.clone());
                }
                Err(e) => {
                    self.rollback_created(&created_this_round);
                    return Err(e);
                }
            }
        }

        let mut gains: FxHashMap<String, f64> = FxHashMap::default();
        let mut execution_cost_total = 0.0;
        let use_hypothetical = round < self.config.hyp_rounds;

        for q in batch {
            let execution = if use_hypothetical {
                self.port.get_query_plan(&q.query_string)
            } else {
                self.port.execute_query(&q.query_string)
            };
            let execution = match execution {
                Ok(e) => e,
                Err(AdvisorError::PlanParseError(msg)) => {
                    tracing::warn!(query_id = q.id, error = %msg, "usage stats missing; query contributes zero reward");
                    continue;
                }
                Err(e) => {
                    self.rollback_created(&created_this_round);
                    return Err(e);
                }
            };
            execution_cost_total += execution.exec_cost;
            self.record_query_execution(q.id, &execution);

            let mut non_clustered_counts: HashMap<String, usize> = HashMap::new();
            for usage in &execution.non_clustered_usage {
                if let Some(table) = self.table_for_index_usage(&usage.index_name) {
                    *non_clustered_counts.entry(table).or_insert(0) += 1;
                }
            }
            for usage in &execution.non_clustered_usage {
                if self.arm_store.get(&usage.index_name).is_none() {
                    continue;
                }
                let Some(table) = self.table_for_index_usage(&usage.index_name) else {
                    continue;
                };
                let max_scan = self.query_store.max_scan_time(q.id, &table);
                let count = non_clustered_counts.get(&table).copied().unwrap_or(1).max(1) as f64;
                let own_cost = usage.cost(self.config.cost_unit);
                let reward = (max_scan - own_cost) / count;
                *gains.entry(usage.index_name.clone()).or_insert(0.0) += reward;
            }
        }

        let played: Vec<(Vec<f64>, ArmReward)> = chosen_names
            .iter()
            .filter_map(|name| {
                let id = *id_by_name.get(name)?;
                let ctx = context_by_id.get(&id)?.clone();
                let gain = gains.get(name).copied().unwrap_or(0.0);
                let creation_cost = creation_costs.get(name).copied().unwrap_or(0.0);
                Some((ctx, ArmReward { gain, creation_cost }))
            })
            .collect();
        self.bandit.update(&played);

        for name in &chosen_names {
            if let Some(arm) = self.arm_store.get_mut(name) {
                let gain = gains.get(name).copied().unwrap_or(0.0);
                arm.usage_last_batch = (arm.usage_last_batch + gain) / 2.0;
            }
        }

        let total_creation_cost: f64 = creation_costs.values().sum();
        let ema_entry = self.super_arm_ema.entry(chosen_names.clone()).or_insert(execution_cost_total);
        *ema_entry = SUPER_ARM_EMA_ALPHA * execution_cost_total + (1.0 - SUPER_ARM_EMA_ALPHA) * (*ema_entry);

        self.chosen_last = chosen_set;
        self.prev_new_count = Some(classification.new_this_round.len() as u64);

        let batch_time = round_start.elapsed().as_secs_f64();
        let memory_cost = self.port.current_pds_size()?;
        let batch_measure = if use_hypothetical {
            crate::report::ReportMeasure::HypBatchTime
        } else {
            crate::report::ReportMeasure::BatchTime
        };
        sink.emit(crate::report::RoundReport { round, measure: batch_measure, value: batch_time })?;
        sink.emit(crate::report::RoundReport {
            round,
            measure: crate::report::ReportMeasure::CreationCost,
            value: total_creation_cost,
        })?;
        sink.emit(crate::report::RoundReport {
            round,
            measure: crate::report::ReportMeasure::ExecutionCost,
            value: execution_cost_total,
        })?;
        sink.emit(crate::report::RoundReport {
            round,
            measure: crate::report::ReportMeasure::RecommendationCost,
            value: recommendation_cost,
        })?;
        sink.emit(crate::report::RoundReport {
            round,
            measure: crate::report::ReportMeasure::MemoryCost,
            value: memory_cost,
        })?;

        tracing::info!(round, chosen = ?chosen_names, "round complete");
        Ok(chosen_names)
    }

    /// Leaves the database clean at the end of a run (spec.md §4.6 "On
    /// the final round: drop all chosen indexes").
    pub fn finish(&mut self) -> Result<()> {
        self.port.drop_all_non_clustered()?;
        self.chosen_last.clear();
        Ok(())
    }
}
