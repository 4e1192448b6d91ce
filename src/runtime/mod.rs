//! Runtime Module - executing runner trees
//!
//! Contains the runtime execution components:
//! - `runner`: Sequential / Parallel composition with tokio concurrency
//! - `context`: adapters, worker-pool bound, timeout, policy, cancellation
//! - `multi_error`: failure aggregation and leaf counting
//! - `report`: per-stage `{failed_count, elapsed}` summaries
//!
//! This module represents the "how" - runtime execution.
//! For static structure, see the `ast` module.

mod context;
mod multi_error;
mod report;
mod runner;

pub use context::{ExecutionPolicy, RunContext, DEFAULT_MAX_PARALLELISM};
pub use multi_error::{count_leaves, MultiError, RunError};
pub use report::{PipelineSummary, Report, Stage};
pub use runner::{Runnable, Runner, RunnerMode};
