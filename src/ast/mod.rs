//! AST Module - typed pipeline definition parsed from YAML
//!
//! Contains the static description of a pipeline run:
//! - `pipeline`: PipelineDef, ExtractDef, TransformDef, LoadDef, MigrateDef
//! - `schema`: TableSchema, Column, ColumnType
//!
//! These types describe the "what" (queries, scripts, tables, indexes).
//! Turning them into runnable stages is the job of [`crate::pipeline`].

mod pipeline;
mod schema;

pub use pipeline::{
    validate_identifier, ExtractDef, LoadDef, MigrateDef, PipelineDef, TransformDef, SCHEMA_V01,
};
pub use schema::{Column, ColumnType, TableSchema};
