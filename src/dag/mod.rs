//! DAG Module - transform dependency planning
//!
//! Contains:
//! - `plan`: TransformPlan built from declared transform inputs/outputs
//!
//! The plan is immutable after construction and validated before any
//! operation runs.

mod plan;

pub use plan::TransformPlan;
