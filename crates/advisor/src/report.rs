//! Per-round metric records and the sink trait that receives them
//! (spec.md §6 "Per-round report record"). Experiment orchestration and
//! CSV/plot rendering are external collaborators (spec.md §1); this
//! module only defines the abstract interface and two concrete sinks a
//! caller is expected to need.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The measures emitted once per round (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMeasure {
    BatchTime,
    CreationCost,
    ExecutionCost,
    RecommendationCost,
    MemoryCost,
    HypBatchTime,
}

/// One `(round, measure, value)` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: u64,
    pub measure: ReportMeasure,
    pub value: f64,
}

/// Abstract sink for round reports, matching the "experiment
/// orchestration... treated as external collaborators with abstract
/// interfaces" framing of spec.md §1.
pub trait ReportSink {
    fn emit(&mut self, record: RoundReport) -> Result<()>;
}

/// In-memory sink, useful for tests and in-process analysis.
#[derive(Debug, Default)]
pub struct VecReportSink {
    pub records: Vec<RoundReport>,
}

impl ReportSink for VecReportSink {
    fn emit(&mut self, record: RoundReport) -> Result<()> {
        self.records.push(record);
        Ok(())
    }
}

/// Appends one JSON object per line, matching the workload file's own
/// line-delimited JSON convention (spec.md §6).
pub struct JsonlReportSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonlReportSink<W> {
    pub fn new(writer: W) -> Self {
        JsonlReportSink { writer }
    }
}

impl<W: Write> ReportSink for JsonlReportSink<W> {
    fn emit(&mut self, record: RoundReport) -> Result<()> {
        let line = serde_json::to_string(&record)?;
        writeln!(self.writer, "{line}")?;
        Ok(())
    }
}
