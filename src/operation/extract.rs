//! Extract: copy a query result from the legacy source into a working table

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::adapter::{
    postgres::{create_table_sql, drop_table_sql},
    AdapterResult, Adapters, Destination, Document, Source, Transaction, Value,
};
use crate::ast::{ExtractDef, TableSchema};
use crate::error::{AdapterError, ExtractPhase, OperationError};

use super::{Operation, OperationKind};

/// Replaces one destination table with the rows of one source query
#[derive(Debug, Clone)]
pub struct Extractor {
    name: String,
    query: String,
    params: Vec<Value>,
    schema: TableSchema,
}

impl Extractor {
    pub fn new(name: impl Into<String>, query: impl Into<String>, schema: TableSchema) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            params: Vec::new(),
            schema,
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn from_def(def: &ExtractDef) -> Self {
        Self::new(def.name.clone(), def.query.clone(), def.schema()).with_params(def.params.clone())
    }

    pub fn table(&self) -> &str {
        &self.schema.table
    }

    fn fail(&self, phase: ExtractPhase, cause: AdapterError) -> OperationError {
        OperationError::Extract {
            operation: self.name.clone(),
            phase,
            cause,
        }
    }

    /// Select from `source`, then drop, recreate and fill the table in one
    /// transaction. Returns the number of rows written.
    pub async fn extract(
        &self,
        source: &dyn Source,
        destination: &dyn Destination,
    ) -> Result<u64, OperationError> {
        let rows = source
            .query(&self.query, &self.params)
            .await
            .map_err(|e| self.fail(ExtractPhase::Select, e))?;
        debug!(operation = %self.name, rows = rows.len(), "selected");

        let mut tx = destination
            .begin()
            .await
            .map_err(|e| self.fail(ExtractPhase::Insert, e))?;

        match replace_table(tx.as_mut(), &self.schema, &rows).await {
            Ok(written) => {
                tx.commit()
                    .await
                    .map_err(|e| self.fail(ExtractPhase::Insert, e))?;
                Ok(written)
            }
            Err(cause) => {
                if let Err(e) = tx.rollback().await {
                    warn!(operation = %self.name, error = %e, "rollback failed");
                }
                Err(self.fail(ExtractPhase::Insert, cause))
            }
        }
    }
}

async fn replace_table(
    tx: &mut dyn Transaction,
    schema: &TableSchema,
    rows: &[Document],
) -> AdapterResult<u64> {
    tx.exec(&drop_table_sql(&schema.table)).await?;
    tx.exec(&create_table_sql(schema)).await?;
    tx.bulk_insert(schema, rows).await
}

#[async_trait]
impl Operation for Extractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Extract
    }

    async fn run(&self, adapters: &Adapters) -> Result<(), OperationError> {
        self.extract(adapters.source.as_ref(), adapters.destination.as_ref())
            .await
            .map(|_| ())
    }
}
