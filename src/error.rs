//! Error types with error codes and fix suggestions
//!
//! Error code ranges:
//! - ELT-000-009: Configuration errors
//! - ELT-010-019: Pipeline definition errors
//! - ELT-020-029: Dependency planning errors
//! - ELT-030-039: Adapter / connection errors
//! - ELT-040-049: Run outcome errors
//! - ELT-100-149: Operation (leaf) failures
//!
//! Three layers:
//! - [`EltError`]: fatal, stops the process before or after a run
//! - [`OperationError`]: one failed operation, a leaf for `count_leaves`
//! - [`AdapterError`]: the underlying cause coming from a store or the search index

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EltError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Fatal errors surfaced by the CLI.
#[derive(Error, Debug)]
pub enum EltError {
    // ═══════════════════════════════════════════
    // CONFIG ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[ELT-001] Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("[ELT-002] Config file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("[ELT-003] Missing password for {target} (set {env_var} or '{target}.password')")]
    MissingPassword { target: String, env_var: String },

    // ═══════════════════════════════════════════
    // PIPELINE DEFINITION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[ELT-010] Failed to parse pipeline definition: {0}")]
    PipelineParse(#[from] serde_yaml::Error),

    #[error("[ELT-011] Invalid schema version: expected '{expected}', got '{actual}'")]
    InvalidSchema { expected: String, actual: String },

    #[error("[ELT-012] Invalid {kind} name: '{name}'")]
    InvalidIdentifier { kind: String, name: String },

    #[error("[ELT-013] Duplicate {stage} operation '{name}'")]
    DuplicateOperation { stage: String, name: String },

    #[error("[ELT-014] Invalid column type '{value}'")]
    InvalidColumnType { value: String },

    #[error("[ELT-015] Extract '{operation}' declares no columns")]
    EmptySchema { operation: String },

    #[error("[ELT-016] Index '{index}' is loaded from both '{first}' and '{second}'")]
    DuplicateLoadTarget {
        index: String,
        first: String,
        second: String,
    },

    #[error("[ELT-017] Migrate step '{step}' has an empty script")]
    EmptyMigrateScript { step: String },

    // ═══════════════════════════════════════════
    // PLANNING ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[ELT-020] Cycle detected between transforms: {cycle}")]
    CycleDetected { cycle: String },

    #[error("[ELT-021] '{operation}' reads table '{table}' which nothing produces")]
    MissingProducer { operation: String, table: String },

    #[error("[ELT-022] Table '{table}' is produced by both '{first}' and '{second}'")]
    DuplicateProducer {
        table: String,
        first: String,
        second: String,
    },

    // ═══════════════════════════════════════════
    // ADAPTER ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[ELT-030] Cannot reach {target}: {source}")]
    Unreachable {
        target: String,
        #[source]
        source: AdapterError,
    },

    #[error("[ELT-031] Invalid search endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    // ═══════════════════════════════════════════
    // RUN OUTCOME (040-049)
    // ═══════════════════════════════════════════
    #[error("[ELT-040] Pipeline finished with {failed} failed operation(s)")]
    StagesFailed { failed: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EltError {
    /// Get the error code (e.g. "ELT-020")
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "ELT-001",
            Self::ConfigNotFound { .. } => "ELT-002",
            Self::MissingPassword { .. } => "ELT-003",
            Self::PipelineParse(_) => "ELT-010",
            Self::InvalidSchema { .. } => "ELT-011",
            Self::InvalidIdentifier { .. } => "ELT-012",
            Self::DuplicateOperation { .. } => "ELT-013",
            Self::InvalidColumnType { .. } => "ELT-014",
            Self::EmptySchema { .. } => "ELT-015",
            Self::DuplicateLoadTarget { .. } => "ELT-016",
            Self::EmptyMigrateScript { .. } => "ELT-017",
            Self::CycleDetected { .. } => "ELT-020",
            Self::MissingProducer { .. } => "ELT-021",
            Self::DuplicateProducer { .. } => "ELT-022",
            Self::Unreachable { .. } => "ELT-030",
            Self::InvalidEndpoint { .. } => "ELT-031",
            Self::StagesFailed { .. } => "ELT-040",
            Self::Io(_) => "ELT-090",
        }
    }
}

impl FixSuggestion for EltError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            EltError::Config { .. } => Some("Check the TOML syntax and field names of the config file"),
            EltError::ConfigNotFound { .. } => Some("Pass an existing file with --config"),
            EltError::MissingPassword { .. } => {
                Some("Export the password variable (a .env file next to the binary works too)")
            }
            EltError::PipelineParse(_) => Some("Check YAML syntax: indentation and quoting"),
            EltError::InvalidSchema { .. } => Some("Use 'schema: elt/pipeline@0.1'"),
            EltError::InvalidIdentifier { .. } => {
                Some("Use letters, digits and underscores only, not starting with a digit")
            }
            EltError::DuplicateOperation { .. } => Some("Give every operation of a stage a unique name"),
            EltError::InvalidColumnType { .. } => {
                Some("Use one of: text, varchar(N), int, bigint, double, bool, jsonb")
            }
            EltError::EmptySchema { .. } => Some("List the destination columns under 'columns:'"),
            EltError::DuplicateLoadTarget { .. } => Some(
                "Each load clears its index first: merge the tables in a transform and load that once",
            ),
            EltError::EmptyMigrateScript { .. } => Some("Remove the step or give it a script"),
            EltError::CycleDetected { .. } => {
                Some("Break the cycle: a transform cannot (transitively) read its own output")
            }
            EltError::MissingProducer { .. } => Some(
                "Add an extract or transform producing the table, or list it under external_tables",
            ),
            EltError::DuplicateProducer { .. } => Some("Every table must have exactly one producer"),
            EltError::Unreachable { .. } => Some("Check host, port and credentials of the adapter"),
            EltError::InvalidEndpoint { .. } => Some("Use an absolute URL such as http://localhost:7700"),
            EltError::StagesFailed { .. } => Some("Inspect the error lines above; each names the failed operation"),
            EltError::Io(_) => Some("Check file path and permissions"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// LEAF FAILURES
// ═══════════════════════════════════════════════════════════════

/// Phase of an extract operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractPhase {
    /// Reading rows from the legacy source
    Select,
    /// Replacing the destination table
    Insert,
}

impl fmt::Display for ExtractPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractPhase::Select => write!(f, "select"),
            ExtractPhase::Insert => write!(f, "insert"),
        }
    }
}

/// Phase of a load operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Reading documents from the working store
    Select,
    /// Clearing and filling the search index
    Publish,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadPhase::Select => write!(f, "select"),
            LoadPhase::Publish => write!(f, "publish"),
        }
    }
}

/// A single failed operation.
///
/// Every variant is a leaf failure: it is never split further when counting.
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("[ELT-100] Extract '{operation}' failed in {phase} phase: {cause}")]
    Extract {
        operation: String,
        phase: ExtractPhase,
        #[source]
        cause: AdapterError,
    },

    #[error("[ELT-110] Transform '{operation}' failed: {cause}")]
    Transform {
        operation: String,
        #[source]
        cause: AdapterError,
    },

    #[error("[ELT-120] Load '{table}' -> '{index}' failed in {phase} phase: {cause}")]
    Load {
        table: String,
        index: String,
        phase: LoadPhase,
        #[source]
        cause: AdapterError,
    },

    #[error("[ELT-140] Migration '{operation}' failed at step '{step}', nothing was applied: {cause}")]
    Migrate {
        operation: String,
        step: String,
        #[source]
        cause: AdapterError,
    },

    #[error("[ELT-130] Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("[ELT-131] Operation '{operation}' was cancelled")]
    Cancelled { operation: String },

    #[error("[ELT-132] Operation '{operation}' panicked: {message}")]
    Panicked { operation: String, message: String },

    /// Failure reported by an operation outside the three built-in kinds
    #[error("{0}")]
    Custom(String),
}

impl OperationError {
    /// Name of the operation (or table, for loads) the failure belongs to
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::Extract { operation, .. }
            | Self::Transform { operation, .. }
            | Self::Migrate { operation, .. }
            | Self::Timeout { operation, .. }
            | Self::Cancelled { operation }
            | Self::Panicked { operation, .. } => Some(operation),
            Self::Load { table, .. } => Some(table),
            Self::Custom(_) => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// ADAPTER CAUSES
// ═══════════════════════════════════════════════════════════════

/// Failure coming from an external collaborator.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("{0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("index '{index}' rejected request ({status}): {message}")]
    SearchRejected {
        index: String,
        status: u16,
        message: String,
    },

    #[error("relation \"{0}\" does not exist")]
    RelationNotFound(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invalid value for column '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("{0}")]
    Other(String),
}
