//! Error types for the index advisor.
//!
//! Mirrors the error taxonomy the rest of the stack uses: a single
//! `thiserror`-derived enum with one variant per failure category, plus a
//! crate-wide `Result` alias.

use thiserror::Error;

/// Result type alias for advisor operations.
pub type Result<T> = std::result::Result<T, AdvisorError>;

/// Error kinds produced by the index advisor.
#[derive(Debug, Error)]
pub enum AdvisorError {
    /// A column, table, or fingerprint referenced during configuration or
    /// arm generation could not be resolved. Fatal at startup.
    #[error("config error: {0}")]
    ConfigError(String),

    /// The database port failed or timed out. Fatal for the round in
    /// progress; the round driver rolls back any indexes it created
    /// before propagating this.
    #[error("database port unavailable: {0}")]
    PortUnavailable(String),

    /// Usage statistics were missing from a query plan. Callers should
    /// treat this as informational: the affected query contributes zero
    /// reward and the round continues.
    #[error("could not parse query plan: {0}")]
    PlanParseError(String),

    /// The oracle returned a super-arm that violates its own budget
    /// invariant. Should be unreachable; treated as an assertion failure.
    #[error("oracle returned a super-arm exceeding its budget: {0}")]
    BudgetExceeded(String),

    /// `V` became singular despite `lambda > 0`. Recovered by
    /// reinitializing `V` to `lambda * I`; surfaced so callers can log it.
    #[error("bandit covariance matrix is singular: {0}")]
    ArithmeticError(String),

    /// A report sink failed to persist a round record.
    #[error("report sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config or report (de)serialization failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
