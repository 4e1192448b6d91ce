//! Test Fixtures for the ELT engine
//!
//! In-memory stand-ins for the three adapters plus a configurable scripted
//! operation, so runners and pipelines can be exercised without a database
//! or a search service.
//!
//! # Usage
//!
//! ```rust,ignore
//! use recsis_elt::test_fixtures::*;
//!
//! let source = MemorySource::new().with_rows("SELECT * FROM FAK", vec![doc(&[("KOD", "1".into())])]);
//! let destination = MemoryDestination::new();
//! let index = RecordingIndex::new();
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::adapter::{
    field, AdapterResult, Adapters, Destination, Document, SearchIndex, Source, Transaction, Value,
};
use crate::ast::TableSchema;
use crate::error::{AdapterError, OperationError};
use crate::operation::{Operation, OperationKind};

/// Build a document from `(field, value)` pairs, keeping their order
pub fn doc(fields: &[(&str, Value)]) -> Document {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// `n` documents `{id: i, name: "row-i"}`
pub fn numbered_docs(n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| doc(&[("id", (i as i64).into()), ("name", format!("row-{i}").into())]))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// SOURCE
// ═══════════════════════════════════════════════════════════════════════════

enum Answer {
    Rows(Vec<Document>),
    Fail(String),
}

/// Source answering fixed statements with canned rows or connection errors
#[derive(Default)]
pub struct MemorySource {
    answers: FxHashMap<String, Answer>,
    queries: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, statement: &str, rows: Vec<Document>) -> Self {
        self.answers.insert(statement.to_string(), Answer::Rows(rows));
        self
    }

    pub fn with_failure(mut self, statement: &str, message: &str) -> Self {
        self.answers
            .insert(statement.to_string(), Answer::Fail(message.to_string()));
        self
    }

    /// Statements received so far, in arrival order
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl Source for MemorySource {
    async fn query(&self, statement: &str, _params: &[Value]) -> AdapterResult<Vec<Document>> {
        self.queries.lock().push(statement.to_string());
        match self.answers.get(statement) {
            Some(Answer::Rows(rows)) => Ok(rows.clone()),
            Some(Answer::Fail(message)) => Err(AdapterError::Connection(message.clone())),
            None if statement == "SELECT 1" => Ok(vec![doc(&[("?column?", 1i64.into())])]),
            None => Err(AdapterError::Other(format!("no canned answer for '{statement}'"))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DESTINATION
// ═══════════════════════════════════════════════════════════════════════════

type Tables = FxHashMap<String, Vec<Document>>;

static DROP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^DROP\s+(?:TABLE|VIEW)\s+(IF\s+EXISTS\s+)?(\w+)$").expect("valid regex")
});
static CREATE_AS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^CREATE\s+(?:TABLE|VIEW)\s+(\w+)\s+AS\s+SELECT\s+\*\s+FROM\s+(\w+)$")
        .expect("valid regex")
});
static CREATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^CREATE\s+TABLE\s+(\w+)\s*\(.*\)$").expect("valid regex"));
static SELECT_ALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^SELECT\s+\*\s+FROM\s+(\w+)$").expect("valid regex"));

/// Table lookups used by the statement interpreter
trait TableView {
    fn get(&self, name: &str) -> Option<Vec<Document>>;
    fn put(&mut self, name: &str, rows: Option<Vec<Document>>);
}

impl TableView for Tables {
    fn get(&self, name: &str) -> Option<Vec<Document>> {
        FxHashMap::get(self, name).cloned()
    }

    fn put(&mut self, name: &str, rows: Option<Vec<Document>>) {
        match rows {
            Some(rows) => {
                self.insert(name.to_string(), rows);
            }
            None => {
                self.remove(name);
            }
        }
    }
}

/// Uncommitted changes layered over the committed tables
struct Staged<'a> {
    base: &'a Tables,
    changes: &'a mut FxHashMap<String, Option<Vec<Document>>>,
}

impl TableView for Staged<'_> {
    fn get(&self, name: &str) -> Option<Vec<Document>> {
        match self.changes.get(name) {
            Some(change) => change.clone(),
            None => self.base.get(name).cloned(),
        }
    }

    fn put(&mut self, name: &str, rows: Option<Vec<Document>>) {
        self.changes.insert(name.to_string(), rows);
    }
}

/// Execute one statement of the small SQL subset the fixtures understand:
/// `DROP TABLE [IF EXISTS] t`, `CREATE TABLE t (…)`,
/// `CREATE TABLE t AS SELECT * FROM s`, `SELECT * FROM t` and `SELECT 1`.
fn interpret(tables: &mut dyn TableView, statement: &str) -> AdapterResult<Vec<Document>> {
    if statement.eq_ignore_ascii_case("SELECT 1") {
        return Ok(vec![doc(&[("?column?", 1i64.into())])]);
    }
    if let Some(caps) = DROP.captures(statement) {
        let name = &caps[2];
        if tables.get(name).is_none() && caps.get(1).is_none() {
            return Err(AdapterError::RelationNotFound(name.to_string()));
        }
        tables.put(name, None);
        return Ok(Vec::new());
    }
    if let Some(caps) = CREATE_AS.captures(statement) {
        let (name, from) = (&caps[1], &caps[2]);
        let rows = tables
            .get(from)
            .ok_or_else(|| AdapterError::RelationNotFound(from.to_string()))?;
        create(tables, name, rows)?;
        return Ok(Vec::new());
    }
    if let Some(caps) = CREATE.captures(statement) {
        create(tables, &caps[1], Vec::new())?;
        return Ok(Vec::new());
    }
    if let Some(caps) = SELECT_ALL.captures(statement) {
        return tables
            .get(&caps[1])
            .ok_or_else(|| AdapterError::RelationNotFound(caps[1].to_string()));
    }
    Err(AdapterError::Other(format!("unsupported statement: {statement}")))
}

fn create(tables: &mut dyn TableView, name: &str, rows: Vec<Document>) -> AdapterResult<()> {
    if tables.get(name).is_some() {
        return Err(AdapterError::Other(format!(
            "relation \"{name}\" already exists"
        )));
    }
    tables.put(name, Some(rows));
    Ok(())
}

fn statements(script: &str) -> impl Iterator<Item = &str> {
    script.split(';').map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Default)]
struct DestinationState {
    tables: Mutex<Tables>,
    failures: Vec<(String, String)>,
    executed: Mutex<Vec<String>>,
}

impl DestinationState {
    /// Record the statement and fail it when it matches an injected failure
    fn check(&self, statement: &str) -> AdapterResult<()> {
        self.executed.lock().push(statement.to_string());
        match self
            .failures
            .iter()
            .find(|(needle, _)| statement.contains(needle.as_str()))
        {
            Some((_, message)) => Err(AdapterError::Other(message.clone())),
            None => Ok(()),
        }
    }
}

/// Working store kept in memory, with per-transaction staging
#[derive(Clone, Default)]
pub struct MemoryDestination {
    state: Arc<DestinationState>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, rows: Vec<Document>) -> Self {
        self.state.tables.lock().insert(name.to_string(), rows);
        self
    }

    /// Fail every statement containing `needle` (bulk inserts render as
    /// `INSERT INTO <table>`)
    pub fn fail_on(mut self, needle: &str, message: &str) -> Self {
        // Only called while building, before the state is shared
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.failures.push((needle.to_string(), message.to_string()));
        }
        self
    }

    pub fn rows(&self, table: &str) -> Option<Vec<Document>> {
        self.state.tables.lock().get(table).cloned()
    }

    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.state.tables.lock().get(table).map(Vec::len)
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state.tables.lock().contains_key(table)
    }

    /// Every statement seen so far, committed or not
    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().clone()
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn begin(&self) -> AdapterResult<Box<dyn Transaction>> {
        self.state.check("BEGIN")?;
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            changes: FxHashMap::default(),
        }))
    }

    async fn exec(&self, script: &str) -> AdapterResult<()> {
        // A script runs as one implicit transaction
        let mut changes = FxHashMap::default();
        {
            let tables = self.state.tables.lock();
            let mut staged = Staged {
                base: &tables,
                changes: &mut changes,
            };
            for statement in statements(script) {
                self.state.check(statement)?;
                interpret(&mut staged, statement)?;
            }
        }
        apply(&mut self.state.tables.lock(), changes);
        Ok(())
    }

    async fn query(&self, statement: &str) -> AdapterResult<Vec<Document>> {
        let statement = statement.trim().trim_end_matches(';');
        self.state.check(statement)?;
        interpret(&mut *self.state.tables.lock(), statement)
    }
}

fn apply(tables: &mut Tables, changes: FxHashMap<String, Option<Vec<Document>>>) {
    for (name, rows) in changes {
        tables.put(&name, rows);
    }
}

struct MemoryTransaction {
    state: Arc<DestinationState>,
    changes: FxHashMap<String, Option<Vec<Document>>>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn exec(&mut self, script: &str) -> AdapterResult<()> {
        let tables = self.state.tables.lock();
        let mut staged = Staged {
            base: &tables,
            changes: &mut self.changes,
        };
        for statement in statements(script) {
            self.state.check(statement)?;
            interpret(&mut staged, statement)?;
        }
        Ok(())
    }

    async fn bulk_insert(&mut self, schema: &TableSchema, rows: &[Document]) -> AdapterResult<u64> {
        self.state.check(&format!("INSERT INTO {}", schema.table))?;

        let tables = self.state.tables.lock();
        let mut staged = Staged {
            base: &tables,
            changes: &mut self.changes,
        };
        let mut existing = staged
            .get(&schema.table)
            .ok_or_else(|| AdapterError::RelationNotFound(schema.table.clone()))?;

        existing.extend(rows.iter().map(|row| {
            schema
                .column_names()
                .map(|name| {
                    let value = field(row, name).cloned().unwrap_or(Value::Null);
                    (name.to_string(), value)
                })
                .collect::<Document>()
        }));
        staged.put(&schema.table, Some(existing));
        Ok(rows.len() as u64)
    }

    async fn commit(self: Box<Self>) -> AdapterResult<()> {
        self.state.check("COMMIT")?;
        let MemoryTransaction { state, changes } = *self;
        apply(&mut state.tables.lock(), changes);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AdapterResult<()> {
        self.state.executed.lock().push("ROLLBACK".to_string());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SEARCH INDEX
// ═══════════════════════════════════════════════════════════════════════════

/// One call received by [`RecordingIndex`]
#[derive(Debug, Clone, PartialEq)]
pub enum IndexCall {
    Clear(String),
    Add {
        index: String,
        documents: Vec<Document>,
        primary_key: Option<String>,
    },
}

/// Search index that records every call and keeps the resulting contents
#[derive(Clone, Default)]
pub struct RecordingIndex {
    calls: Arc<Mutex<Vec<IndexCall>>>,
    contents: Arc<Mutex<FxHashMap<String, Vec<Document>>>>,
    rejections: Arc<FxHashMap<String, u16>>,
}

impl RecordingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `add_documents` on `index` with the given HTTP status
    pub fn reject_add(mut self, index: &str, status: u16) -> Self {
        let mut rejections = (*self.rejections).clone();
        rejections.insert(index.to_string(), status);
        self.rejections = Arc::new(rejections);
        self
    }

    pub fn calls(&self) -> Vec<IndexCall> {
        self.calls.lock().clone()
    }

    pub fn documents(&self, index: &str) -> Vec<Document> {
        self.contents.lock().get(index).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SearchIndex for RecordingIndex {
    async fn clear_index(&self, index: &str) -> AdapterResult<()> {
        self.calls.lock().push(IndexCall::Clear(index.to_string()));
        self.contents.lock().remove(index);
        Ok(())
    }

    async fn add_documents(
        &self,
        index: &str,
        documents: &[Document],
        primary_key: Option<&str>,
    ) -> AdapterResult<()> {
        self.calls.lock().push(IndexCall::Add {
            index: index.to_string(),
            documents: documents.to_vec(),
            primary_key: primary_key.map(str::to_string),
        });
        if let Some(status) = self.rejections.get(index) {
            return Err(AdapterError::SearchRejected {
                index: index.to_string(),
                status: *status,
                message: "rejected by fixture".to_string(),
            });
        }
        self.contents
            .lock()
            .entry(index.to_string())
            .or_default()
            .extend_from_slice(documents);
        Ok(())
    }
}

/// Adapters over empty in-memory fakes
pub fn memory_adapters() -> Adapters {
    Adapters::new(
        Arc::new(MemorySource::new()),
        Arc::new(MemoryDestination::new()),
        Arc::new(RecordingIndex::new()),
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// SCRIPTED OPERATION
// ═══════════════════════════════════════════════════════════════════════════

/// Tracks how many scripted operations run at once and the highest value seen
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Operation with scripted behavior that counts its invocations
#[derive(Debug, Clone)]
pub struct ScriptedOperation {
    name: String,
    kind: OperationKind,
    failure: Option<String>,
    delay: Option<Duration>,
    panics: bool,
    invocations: Arc<AtomicUsize>,
    gauge: Option<Arc<ConcurrencyGauge>>,
}

impl ScriptedOperation {
    pub fn ok(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: OperationKind::Transform,
            failure: None,
            delay: None,
            panics: false,
            invocations: Arc::new(AtomicUsize::new(0)),
            gauge: None,
        }
    }

    /// Fails with `OperationError::Custom(message)`
    pub fn failing(name: &str, message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::ok(name)
        }
    }

    pub fn panicking(name: &str) -> Self {
        Self {
            panics: true,
            ..Self::ok(name)
        }
    }

    pub fn with_kind(mut self, kind: OperationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Operation for ScriptedOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OperationKind {
        self.kind
    }

    async fn run(&self, _adapters: &Adapters) -> Result<(), OperationError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(gauge) = &self.gauge {
            gauge.exit();
        }
        if self.panics {
            panic!("operation '{}' panicked", self.name);
        }
        match &self.failure {
            Some(message) => Err(OperationError::Custom(message.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_destination_interprets_scripts() {
        let dest = MemoryDestination::new().with_table("a", numbered_docs(3));

        dest.exec("DROP TABLE IF EXISTS b; CREATE TABLE b AS SELECT * FROM a;")
            .await
            .unwrap();

        assert_eq!(dest.row_count("b"), Some(3));
        assert_eq!(dest.query("SELECT * FROM b").await.unwrap().len(), 3);
        assert!(dest.exec("DROP TABLE missing").await.is_err());
    }

    #[tokio::test]
    async fn failed_script_applies_nothing() {
        let dest = MemoryDestination::new().with_table("a", numbered_docs(1));

        let err = dest
            .exec("DROP TABLE a; CREATE TABLE c AS SELECT * FROM nope")
            .await
            .unwrap_err();

        assert!(matches!(err, AdapterError::RelationNotFound(ref t) if t == "nope"));
        assert!(dest.has_table("a"));
    }

    #[tokio::test]
    async fn transaction_is_invisible_until_commit() {
        let dest = MemoryDestination::new();
        let mut tx = dest.begin().await.unwrap();
        tx.exec("CREATE TABLE t (id INT)").await.unwrap();
        assert!(!dest.has_table("t"));
        tx.commit().await.unwrap();
        assert!(dest.has_table("t"));
    }
}
