//! Adapter Module - boundaries to the external collaborators
//!
//! Three roles, each a trait so the engine can be driven by real services or
//! by in-memory fakes:
//! - [`Source`]: read-only legacy system, used by the extract select phase
//! - [`Destination`] + [`Transaction`]: working store, used by every operation
//! - [`SearchIndex`]: publish target, used by the load publish phase
//!
//! Handles are injected through [`Adapters`], never held in globals.

mod document;
pub mod meilisearch;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use pg_escape::quote_identifier;

use crate::ast::TableSchema;
use crate::error::AdapterError;

pub use document::{field, Document, Value};
pub use meilisearch::MeiliIndex;
pub use postgres::{PgDestination, PgSource};

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Read-only tabular source
#[async_trait]
pub trait Source: Send + Sync {
    /// Run a statement with positional parameters and collect all rows
    async fn query(&self, statement: &str, params: &[Value]) -> AdapterResult<Vec<Document>>;

    /// Cheap connectivity check
    async fn ping(&self) -> AdapterResult<()> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }
}

/// Source for runs that never extract: every query fails without
/// connecting, so no source credentials are needed
#[derive(Debug, Default)]
pub struct DetachedSource;

#[async_trait]
impl Source for DetachedSource {
    async fn query(&self, _statement: &str, _params: &[Value]) -> AdapterResult<Vec<Document>> {
        Err(AdapterError::Connection(
            "source is not configured for this run (extract stage not selected)".to_string(),
        ))
    }
}

/// Transactional working store
#[async_trait]
pub trait Destination: Send + Sync {
    async fn begin(&self) -> AdapterResult<Box<dyn Transaction>>;

    /// Execute a (possibly multi-statement) script outside any explicit transaction
    async fn exec(&self, script: &str) -> AdapterResult<()>;

    async fn query(&self, statement: &str) -> AdapterResult<Vec<Document>>;

    /// Every row of `table` as a self-describing document
    async fn select_documents(&self, table: &str) -> AdapterResult<Vec<Document>> {
        self.query(&format!("SELECT * FROM {}", quote_identifier(table)))
            .await
    }

    async fn ping(&self) -> AdapterResult<()> {
        self.query("SELECT 1").await.map(|_| ())
    }
}

/// Open transaction on the working store.
///
/// Dropping a transaction without committing discards its changes.
#[async_trait]
pub trait Transaction: Send {
    async fn exec(&mut self, script: &str) -> AdapterResult<()>;

    /// Insert `rows` into `schema.table`, returning the number of rows written
    async fn bulk_insert(&mut self, schema: &TableSchema, rows: &[Document]) -> AdapterResult<u64>;

    async fn commit(self: Box<Self>) -> AdapterResult<()>;

    async fn rollback(self: Box<Self>) -> AdapterResult<()>;
}

/// Full-text search service
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Remove every document from `index`
    async fn clear_index(&self, index: &str) -> AdapterResult<()>;

    async fn add_documents(
        &self,
        index: &str,
        documents: &[Document],
        primary_key: Option<&str>,
    ) -> AdapterResult<()>;

    async fn health(&self) -> AdapterResult<()> {
        Ok(())
    }
}

/// The three handles a run works against
#[derive(Clone)]
pub struct Adapters {
    pub source: Arc<dyn Source>,
    pub destination: Arc<dyn Destination>,
    pub index: Arc<dyn SearchIndex>,
}

impl Adapters {
    pub fn new(
        source: Arc<dyn Source>,
        destination: Arc<dyn Destination>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            source,
            destination,
            index,
        }
    }
}

impl std::fmt::Debug for Adapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapters").finish_non_exhaustive()
    }
}
