//! Online index advisor: a contextual combinatorial bandit (C²UCB) that
//! decides, round by round, which secondary indexes should exist so that
//! the cost of executing future queries plus the cost of building those
//! indexes is minimized under a memory or index-count budget.
//!
//! The crate is organized one module per responsibility:
//!
//! - [`error`] — `AdvisorError` and the crate's `Result` alias.
//! - [`config`] — `AdvisorConfig`, every recognized knob.
//! - [`port`] — the `DatabasePort` trait the core treats as an external
//!   collaborator, plus its supporting value types.
//! - [`query_store`] — per-query-id bookkeeping across rounds.
//! - [`arm`] — candidate indexes ("arms") and the store that owns them.
//! - [`arm_factory`] — candidate generation from a query's predicates and
//!   payload.
//! - [`context`] — per-arm context vector encoding.
//! - [`bandit`] — the C²UCB covariance/bias state and its update rules.
//! - [`oracle`] — budget-constrained super-arm selection with dominance
//!   pruning.
//! - [`round`] — the round driver that orchestrates all of the above.
//! - [`report`] — per-round metric records and the sink trait that
//!   receives them.
//!
//! [`testing`] is a `#[cfg(test)]`-free module (used by this crate's own
//! tests and by downstream integration tests) providing an in-memory
//! [`port::DatabasePort`] test double; it is not part of the advisor's
//! runtime behavior.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod arm;
pub mod arm_factory;
pub mod bandit;
pub mod config;
pub mod context;
pub mod error;
pub mod oracle;
pub mod port;
pub mod query_store;
pub mod report;
pub mod round;

pub mod testing;

pub use config::{AdvisorConfig, Budget, CostUnit};
pub use error::{AdvisorError, Result};
pub use port::DatabasePort;
pub use round::{IncomingQuery, RoundDriver};
