//! PostgreSQL source and destination
//!
//! - One connection per query / transaction; no long-lived pool.
//! - The destination caps concurrently open connections with a semaphore
//!   sized to `max_connections`.
//! - Bulk insert binds one array per column and expands it with `unnest`.

use std::sync::Arc;

use async_trait::async_trait;
use pg_escape::quote_identifier;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::{debug, warn};

use crate::ast::{ColumnType, TableSchema};
use crate::error::AdapterError;

use super::{field, AdapterResult, Destination, Document, Source, Transaction, Value};

/// Rows per `INSERT … SELECT FROM unnest(…)` statement
const BULK_CHUNK: usize = 10_000;

type BoxedParam = Box<dyn ToSql + Sync + Send>;

async fn connect(config: &Config) -> AdapterResult<Client> {
    let (client, connection) = config.connect(NoTls).await?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!(error = %e, "postgres connection closed with error");
        }
    });

    Ok(client)
}

// ═══════════════════════════════════════════════════════════════
// SOURCE
// ═══════════════════════════════════════════════════════════════

/// Read-only legacy system
pub struct PgSource {
    config: Config,
}

impl PgSource {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Source for PgSource {
    async fn query(&self, statement: &str, params: &[Value]) -> AdapterResult<Vec<Document>> {
        let client = connect(&self.config).await?;
        let prepared = client.prepare(statement).await?;

        let bound = prepared
            .params()
            .iter()
            .zip(params)
            .map(|(ty, value)| bind_param(value, ty))
            .collect::<AdapterResult<Vec<BoxedParam>>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = client.query(&prepared, &refs).await?;
        debug!(rows = rows.len(), "source query finished");
        rows.iter().map(row_to_document).collect()
    }
}

// ═══════════════════════════════════════════════════════════════
// DESTINATION
// ═══════════════════════════════════════════════════════════════

/// Working store with a bounded number of open connections
pub struct PgDestination {
    config: Config,
    connections: Arc<Semaphore>,
}

impl PgDestination {
    pub fn new(config: Config, max_connections: usize) -> Self {
        Self {
            config,
            connections: Arc::new(Semaphore::new(max_connections.max(1))),
        }
    }

    async fn open(&self) -> AdapterResult<(Client, OwnedSemaphorePermit)> {
        let permit = Arc::clone(&self.connections)
            .acquire_owned()
            .await
            .map_err(|_| AdapterError::Connection("connection limiter closed".to_string()))?;
        let client = connect(&self.config).await?;
        Ok((client, permit))
    }
}

#[async_trait]
impl Destination for PgDestination {
    async fn begin(&self) -> AdapterResult<Box<dyn Transaction>> {
        let (client, permit) = self.open().await?;
        client.batch_execute("BEGIN").await?;
        Ok(Box::new(PgTransaction {
            client,
            _permit: permit,
        }))
    }

    async fn exec(&self, script: &str) -> AdapterResult<()> {
        let (client, _permit) = self.open().await?;
        client.batch_execute(script).await?;
        Ok(())
    }

    async fn query(&self, statement: &str) -> AdapterResult<Vec<Document>> {
        let (client, _permit) = self.open().await?;
        let rows = client.query(statement, &[]).await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn select_documents(&self, table: &str) -> AdapterResult<Vec<Document>> {
        let (client, _permit) = self.open().await?;
        let rows = client.query(&select_documents_sql(table), &[]).await?;

        rows.iter()
            .map(|row| -> AdapterResult<Document> {
                match row.try_get::<_, serde_json::Value>(0)? {
                    serde_json::Value::Object(map) => {
                        Ok(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
                    }
                    other => Err(AdapterError::InvalidValue {
                        column: "to_jsonb".to_string(),
                        reason: format!("expected an object, got {other}"),
                    }),
                }
            })
            .collect()
    }
}

/// Transaction holding its own connection (and limiter permit) until commit
struct PgTransaction {
    client: Client,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn exec(&mut self, script: &str) -> AdapterResult<()> {
        self.client.batch_execute(script).await?;
        Ok(())
    }

    async fn bulk_insert(&mut self, schema: &TableSchema, rows: &[Document]) -> AdapterResult<u64> {
        let statement = self.client.prepare(&insert_sql(schema)).await?;
        let mut written = 0;

        for chunk in rows.chunks(BULK_CHUNK) {
            let columns = schema
                .columns
                .iter()
                .map(|column| column_param(&column.name, column.column_type, chunk))
                .collect::<AdapterResult<Vec<BoxedParam>>>()?;
            let refs: Vec<&(dyn ToSql + Sync)> = columns
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            written += self.client.execute(&statement, &refs).await?;
        }

        Ok(written)
    }

    async fn commit(self: Box<Self>) -> AdapterResult<()> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AdapterResult<()> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
// SQL GENERATION
// ═══════════════════════════════════════════════════════════════

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_identifier(table))
}

pub fn create_table_sql(schema: &TableSchema) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_identifier(&c.name), c.column_type.sql()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({columns})", quote_identifier(&schema.table))
}

pub fn insert_sql(schema: &TableSchema) -> String {
    let names = schema
        .column_names()
        .map(|n| quote_identifier(n).into_owned())
        .collect::<Vec<_>>()
        .join(", ");
    let arrays = schema
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("${}::{}", i + 1, c.column_type.array_cast()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({names}) SELECT * FROM unnest({arrays})",
        quote_identifier(&schema.table)
    )
}

/// `src.*` is always the whole row, even when the table has a column named like the alias
pub fn select_documents_sql(table: &str) -> String {
    format!("SELECT to_jsonb(src.*) FROM {} src", quote_identifier(table))
}

// ═══════════════════════════════════════════════════════════════
// VALUE CONVERSION
// ═══════════════════════════════════════════════════════════════

fn invalid(column: &str, reason: impl Into<String>) -> AdapterError {
    AdapterError::InvalidValue {
        column: column.to_string(),
        reason: reason.into(),
    }
}

/// Text form of a value with NUL characters removed (PostgreSQL rejects them)
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.replace('\0', "")),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => {
            Some(serde_json::Value::from(value.clone()).to_string())
        }
    }
}

fn as_int(column: &str, value: &Value) -> AdapterResult<Option<i64>> {
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_i64()
        .map(Some)
        .ok_or_else(|| invalid(column, format!("{} is not an integer", value.type_name())))
}

fn as_i32(column: &str, value: &Value) -> AdapterResult<Option<i32>> {
    as_int(column, value)?
        .map(|n| i32::try_from(n).map_err(|_| invalid(column, format!("{n} overflows int"))))
        .transpose()
}

fn as_double(column: &str, value: &Value) -> AdapterResult<Option<f64>> {
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_f64()
        .map(Some)
        .ok_or_else(|| invalid(column, format!("{} is not a number", value.type_name())))
}

fn as_boolean(column: &str, value: &Value) -> AdapterResult<Option<bool>> {
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_bool()
        .map(Some)
        .ok_or_else(|| invalid(column, format!("{} is not a boolean", value.type_name())))
}

/// Whole column of `rows` as one typed array parameter
fn column_param(column: &str, ty: ColumnType, rows: &[Document]) -> AdapterResult<BoxedParam> {
    let values = rows.iter().map(|row| field(row, column).unwrap_or(&Value::Null));

    Ok(match ty {
        ColumnType::Text | ColumnType::Varchar(_) => {
            Box::new(values.map(as_text).collect::<Vec<Option<String>>>())
        }
        ColumnType::Int => Box::new(
            values
                .map(|v| as_i32(column, v))
                .collect::<AdapterResult<Vec<_>>>()?,
        ),
        ColumnType::BigInt => Box::new(
            values
                .map(|v| as_int(column, v))
                .collect::<AdapterResult<Vec<_>>>()?,
        ),
        ColumnType::Double => Box::new(
            values
                .map(|v| as_double(column, v))
                .collect::<AdapterResult<Vec<_>>>()?,
        ),
        ColumnType::Bool => Box::new(
            values
                .map(|v| as_boolean(column, v))
                .collect::<AdapterResult<Vec<_>>>()?,
        ),
        ColumnType::Jsonb => Box::new(
            values
                .map(|v| (!v.is_null()).then(|| serde_json::Value::from(v.clone())))
                .collect::<Vec<_>>(),
        ),
    })
}

/// Convert a query parameter to the type the server inferred for it
fn bind_param(value: &Value, ty: &Type) -> AdapterResult<BoxedParam> {
    let column = "$param";
    Ok(match *ty {
        Type::BOOL => Box::new(as_boolean(column, value)?),
        Type::INT2 => Box::new(
            as_int(column, value)?
                .map(i16::try_from)
                .transpose()
                .map_err(|_| invalid(column, "value overflows smallint"))?,
        ),
        Type::INT4 => Box::new(as_i32(column, value)?),
        Type::INT8 => Box::new(as_int(column, value)?),
        Type::FLOAT4 => Box::new(as_double(column, value)?.map(|f| f as f32)),
        Type::FLOAT8 => Box::new(as_double(column, value)?),
        Type::JSON | Type::JSONB => Box::new(
            (!value.is_null()).then(|| serde_json::Value::from(value.clone())),
        ),
        _ => Box::new(as_text(value)),
    })
}

fn number(f: f64) -> Value {
    serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
}

/// Decode one row into a document, keeping column order
fn row_to_document(row: &Row) -> AdapterResult<Document> {
    let mut doc = Document::with_capacity(row.len());

    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let value = match *column.type_() {
            Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map_or(Value::Null, Value::Bool),
            Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(i64::from).into(),
            Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(i64::from).into(),
            Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.into(),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(idx)?
                .map_or(Value::Null, |f| number(f64::from(f))),
            Type::FLOAT8 => row
                .try_get::<_, Option<f64>>(idx)?
                .map_or(Value::Null, number),
            Type::JSON | Type::JSONB => row
                .try_get::<_, Option<serde_json::Value>>(idx)?
                .map_or(Value::Null, Value::from),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                row.try_get::<_, Option<String>>(idx)?.into()
            }
            ref other => {
                return Err(invalid(
                    name,
                    format!("unsupported column type '{other}', cast it to text in the query"),
                ))
            }
        };
        doc.insert(name.to_string(), value);
    }

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Column;
    use pretty_assertions::assert_eq;

    fn fak_schema() -> TableSchema {
        TableSchema::new(
            "fak",
            vec![
                Column::new("kod", ColumnType::Varchar(5)),
                Column::new("poradi", ColumnType::Int),
                Column::new("meta", ColumnType::Jsonb),
            ],
        )
    }

    #[test]
    fn ddl_quotes_identifiers() {
        assert_eq!(drop_table_sql("fak"), "DROP TABLE IF EXISTS fak");
        assert_eq!(drop_table_sql("Fak"), "DROP TABLE IF EXISTS \"Fak\"");
        assert_eq!(
            create_table_sql(&fak_schema()),
            "CREATE TABLE fak (kod VARCHAR(5), poradi INT, meta JSONB)"
        );
    }

    #[test]
    fn insert_binds_one_array_per_column() {
        assert_eq!(
            insert_sql(&fak_schema()),
            "INSERT INTO fak (kod, poradi, meta) SELECT * FROM unnest($1::text[], $2::int[], $3::jsonb[])"
        );
    }

    #[test]
    fn documents_are_projected_with_to_jsonb() {
        assert_eq!(
            select_documents_sql("povinn2searchable"),
            "SELECT to_jsonb(src.*) FROM povinn2searchable src"
        );
        // whole-row reference, never a bare alias a column could shadow
        assert_eq!(select_documents_sql("t"), "SELECT to_jsonb(src.*) FROM t src");
        assert!(!select_documents_sql("t").contains("to_jsonb(t)"));
    }

    #[test]
    fn text_values_lose_nul_characters() {
        assert_eq!(as_text(&Value::from("a\0b")), Some("ab".to_string()));
        assert_eq!(as_text(&Value::from(3i64)), Some("3".to_string()));
        assert_eq!(as_text(&Value::Null), None);
    }

    #[test]
    fn integer_conversion_reports_column() {
        let err = as_i32("poradi", &Value::from("abc")).unwrap_err();
        assert!(err.to_string().contains("poradi"));
        let err = as_i32("poradi", &Value::from(i64::MAX)).unwrap_err();
        assert!(err.to_string().contains("overflows"));
        assert_eq!(as_i32("poradi", &Value::from("12")).unwrap(), Some(12));
    }

    #[test]
    fn column_param_accepts_missing_fields_as_null() {
        let mut row = Document::new();
        row.insert("KOD".into(), "11320".into());
        assert!(column_param("poradi", ColumnType::Int, &[row.clone()]).is_ok());
        assert!(column_param("kod", ColumnType::Varchar(5), &[row]).is_ok());
    }
}
