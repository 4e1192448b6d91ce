//! Load: publish a working table into a search index
//!
//! Clearing and publishing are two separate calls; the index is briefly
//! empty between them.

use async_trait::async_trait;
use tracing::debug;

use crate::adapter::{Adapters, Destination, SearchIndex};
use crate::ast::LoadDef;
use crate::error::{AdapterError, LoadPhase, OperationError};

use super::{Operation, OperationKind};

#[derive(Debug, Clone)]
pub struct Loader {
    table: String,
    index: String,
    primary_key: Option<String>,
}

impl Loader {
    pub fn new(table: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            index: index.into(),
            primary_key: None,
        }
    }

    pub fn with_primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = Some(key.into());
        self
    }

    pub fn from_def(def: &LoadDef) -> Self {
        let loader = Self::new(def.table.clone(), def.index.clone());
        match &def.primary_key {
            Some(key) => loader.with_primary_key(key.clone()),
            None => loader,
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    fn fail(&self, phase: LoadPhase, cause: AdapterError) -> OperationError {
        OperationError::Load {
            table: self.table.clone(),
            index: self.index.clone(),
            phase,
            cause,
        }
    }

    /// Select every row of the table, clear the index, publish the rows.
    /// Returns the number of published documents.
    pub async fn load(
        &self,
        destination: &dyn Destination,
        search: &dyn SearchIndex,
    ) -> Result<usize, OperationError> {
        let documents = destination
            .select_documents(&self.table)
            .await
            .map_err(|e| self.fail(LoadPhase::Select, e))?;

        search
            .clear_index(&self.index)
            .await
            .map_err(|e| self.fail(LoadPhase::Publish, e))?;
        search
            .add_documents(&self.index, &documents, self.primary_key.as_deref())
            .await
            .map_err(|e| self.fail(LoadPhase::Publish, e))?;

        debug!(table = %self.table, index = %self.index, documents = documents.len(), "published");
        Ok(documents.len())
    }
}

#[async_trait]
impl Operation for Loader {
    fn name(&self) -> &str {
        &self.table
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Load
    }

    async fn run(&self, adapters: &Adapters) -> Result<(), OperationError> {
        self.load(adapters.destination.as_ref(), adapters.index.as_ref())
            .await
            .map(|_| ())
    }
}
