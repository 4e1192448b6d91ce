//! RecSIS ELT - batch pipeline engine
//!
//! Copies data from the legacy study information system into the working
//! store, derives search documents there and publishes them into the search
//! index. Stages run in fixed order:
//!
//! ```text
//! extract    Parallel[ Extractor… ]                   source → working store
//! transform  Sequential[ Parallel[group 0], … ]       working store → working store
//! load       Sequential[ Loader… ]                    working store → search index
//! migrate    Sequential[ Migration ]                  working store → application schemas (opt-in)
//! ```
//!
//! ## Module Structure
//!
//! - `ast`: YAML pipeline definition (static structure)
//! - `dag`: transform dependency planning
//! - `operation`: extract / transform / load / migrate units of work
//! - `runtime`: runner tree, context, failure aggregation, reports
//! - `pipeline`: stage assembly and orchestration
//! - `adapter`: source, destination and search-index boundaries
//! - `event`: run trace
//! - `config`: connection and runtime settings
//! - `error`: error types with fix suggestions

pub mod adapter;
pub mod ast;
pub mod config;
pub mod dag;
pub mod error;
pub mod event;
pub mod operation;
pub mod pipeline;
pub mod runtime;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod test_fixtures;

pub use adapter::{Adapters, Document, Value};
pub use ast::PipelineDef;
pub use config::EltConfig;
pub use error::{EltError, FixSuggestion, OperationError};
pub use event::{Event, EventKind, EventLog};
pub use operation::{Extractor, Loader, Migration, Operation, OperationKind, Transformer};
pub use pipeline::Pipeline;
pub use runtime::{
    count_leaves, ExecutionPolicy, MultiError, PipelineSummary, Report, RunContext, RunError,
    Runnable, Runner, Stage,
};
