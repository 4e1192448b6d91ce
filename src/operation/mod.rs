//! Operation Module - the leaves of a runner tree
//!
//! An operation is a named unit of work of one of three kinds:
//! - [`Extractor`]: legacy source → working-store table (select, then insert)
//! - [`Transformer`]: one idempotent script inside the working store
//! - [`Loader`]: working-store table → search index (select, clear, publish)
//!
//! [`Migration`] is the odd one out: its steps share one transaction.
//!
//! Operations are immutable once built and receive their collaborators
//! through [`Adapters`] at run time.

mod extract;
mod load;
mod migrate;
mod transform;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::adapter::Adapters;
use crate::error::OperationError;

pub use extract::Extractor;
pub use load::Loader;
pub use migrate::{Migration, MIGRATION_NAME};
pub use transform::Transformer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Extract,
    Transform,
    Load,
    Migrate,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Extract => write!(f, "extract"),
            OperationKind::Transform => write!(f, "transform"),
            OperationKind::Load => write!(f, "load"),
            OperationKind::Migrate => write!(f, "migrate"),
        }
    }
}

/// A single named unit of work
#[async_trait]
pub trait Operation: Send + Sync {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    fn kind(&self) -> OperationKind;

    async fn run(&self, adapters: &Adapters) -> Result<(), OperationError>;
}

impl fmt::Debug for dyn Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.name())
    }
}
