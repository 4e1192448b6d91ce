//! Pipeline definition parsed from YAML
//!
//! The definition is configuration data: extraction queries, transformation
//! scripts and table → index pairs. It carries no behavior of its own.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::adapter::Value;
use crate::error::{EltError, Result};

use super::schema::{Column, TableSchema};

/// Current pipeline schema tag
pub const SCHEMA_V01: &str = "elt/pipeline@0.1";

/// Table, index and operation names (compiled once)
static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"));

/// Search index uids also allow hyphens (`degree-plans`)
static INDEX_UID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,400}$").expect("index uid regex is valid"));

/// Whole pipeline: three stages plus tables that exist before the run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineDef {
    pub schema: String,
    /// Working-store tables transforms may read without anything producing them
    #[serde(default)]
    pub external_tables: Vec<String>,
    #[serde(default)]
    pub extract: Vec<ExtractDef>,
    #[serde(default)]
    pub transform: Vec<TransformDef>,
    #[serde(default)]
    pub load: Vec<LoadDef>,
    /// Copies into the application schemas, all-or-nothing
    #[serde(default)]
    pub migrate: Vec<MigrateDef>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractDef {
    pub name: String,
    /// Destination table, fully replaced on every run
    pub table: String,
    /// Statement executed against the legacy source
    pub query: String,
    #[serde(default)]
    pub params: Vec<Value>,
    pub columns: Vec<Column>,
}

impl ExtractDef {
    pub fn schema(&self) -> TableSchema {
        TableSchema::new(self.table.clone(), self.columns.clone())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformDef {
    pub name: String,
    /// Tables the script reads
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Table (or view) the script drops and recreates
    pub output: String,
    pub script: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoadDef {
    pub table: String,
    pub index: String,
    #[serde(default)]
    pub primary_key: Option<String>,
}

/// One script of the migrate stage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MigrateDef {
    pub name: String,
    pub script: String,
}

impl PipelineDef {
    /// Parse YAML and check the schema tag and identifiers
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let def: PipelineDef = serde_yaml::from_str(yaml)?;
        def.validate()?;
        Ok(def)
    }

    /// Structural checks that need no dependency analysis
    pub fn validate(&self) -> Result<()> {
        if self.schema != SCHEMA_V01 {
            return Err(EltError::InvalidSchema {
                expected: SCHEMA_V01.to_string(),
                actual: self.schema.clone(),
            });
        }

        for table in &self.external_tables {
            validate_identifier("table", table)?;
        }

        let mut names = FxHashSet::default();
        for op in &self.extract {
            validate_identifier("extract", &op.name)?;
            validate_identifier("table", &op.table)?;
            if op.columns.is_empty() {
                return Err(EltError::EmptySchema {
                    operation: op.name.clone(),
                });
            }
            for column in &op.columns {
                validate_identifier("column", &column.name)?;
            }
            if !names.insert(op.name.as_str()) {
                return Err(duplicate("extract", &op.name));
            }
        }

        names.clear();
        for op in &self.transform {
            validate_identifier("transform", &op.name)?;
            validate_identifier("table", &op.output)?;
            for input in &op.inputs {
                validate_identifier("table", input)?;
            }
            if !names.insert(op.name.as_str()) {
                return Err(duplicate("transform", &op.name));
            }
        }

        names.clear();
        let mut targets: FxHashMap<&str, &str> = FxHashMap::default();
        for op in &self.load {
            validate_identifier("table", &op.table)?;
            if !INDEX_UID.is_match(&op.index) {
                return Err(EltError::InvalidIdentifier {
                    kind: "index".to_string(),
                    name: op.index.clone(),
                });
            }
            if !names.insert(op.table.as_str()) {
                return Err(duplicate("load", &op.table));
            }
            // A load clears its index before publishing
            if let Some(first) = targets.insert(op.index.as_str(), op.table.as_str()) {
                return Err(EltError::DuplicateLoadTarget {
                    index: op.index.clone(),
                    first: first.to_string(),
                    second: op.table.clone(),
                });
            }
        }

        names.clear();
        for step in &self.migrate {
            validate_identifier("migrate", &step.name)?;
            if step.script.trim().is_empty() {
                return Err(EltError::EmptyMigrateScript {
                    step: step.name.clone(),
                });
            }
            if !names.insert(step.name.as_str()) {
                return Err(duplicate("migrate", &step.name));
            }
        }

        Ok(())
    }

    /// Total number of operations across all stages.
    ///
    /// The migrate steps share one transaction and count as one operation.
    pub fn operation_count(&self) -> usize {
        let migrate = usize::from(!self.migrate.is_empty());
        self.extract.len() + self.transform.len() + self.load.len() + migrate
    }
}

fn duplicate(stage: &str, name: &str) -> EltError {
    EltError::DuplicateOperation {
        stage: stage.to_string(),
        name: name.to_string(),
    }
}

/// Check a table/index/operation name against the identifier pattern
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(EltError::InvalidIdentifier {
            kind: kind.to_string(),
            name: name.to_string(),
        })
    }
}
