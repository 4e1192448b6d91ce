//! Destination table schema for extract operations
//!
//! Every extract replaces exactly one table, dropped and recreated with the
//! fixed column list declared here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EltError;

/// Column type in the working store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Text,
    Varchar(u32),
    Int,
    BigInt,
    Double,
    Bool,
    Jsonb,
}

impl ColumnType {
    /// SQL type used in `CREATE TABLE`
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Varchar(n) => format!("VARCHAR({n})"),
            ColumnType::Int => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Bool => "BOOLEAN".to_string(),
            ColumnType::Jsonb => "JSONB".to_string(),
        }
    }

    /// Array type used when binding a whole column as one parameter
    pub fn array_cast(&self) -> &'static str {
        match self {
            ColumnType::Text | ColumnType::Varchar(_) => "text[]",
            ColumnType::Int => "int[]",
            ColumnType::BigInt => "bigint[]",
            ColumnType::Double => "float8[]",
            ColumnType::Bool => "bool[]",
            ColumnType::Jsonb => "jsonb[]",
        }
    }
}

impl FromStr for ColumnType {
    type Err = EltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let invalid = || EltError::InvalidColumnType {
            value: s.to_string(),
        };

        match normalized.as_str() {
            "text" => Ok(ColumnType::Text),
            "int" | "integer" | "int4" => Ok(ColumnType::Int),
            "bigint" | "int8" => Ok(ColumnType::BigInt),
            "double" | "float8" | "double precision" => Ok(ColumnType::Double),
            "bool" | "boolean" => Ok(ColumnType::Bool),
            "jsonb" | "json" => Ok(ColumnType::Jsonb),
            other => {
                let size = other
                    .strip_prefix("varchar(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(invalid)?;
                let size: u32 = size.trim().parse().map_err(|_| invalid())?;
                if size == 0 {
                    return Err(invalid());
                }
                Ok(ColumnType::Varchar(size))
            }
        }
    }
}

impl TryFrom<String> for ColumnType {
    type Error = EltError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Text => write!(f, "text"),
            ColumnType::Varchar(n) => write!(f, "varchar({n})"),
            ColumnType::Int => write!(f, "int"),
            ColumnType::BigInt => write!(f, "bigint"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Bool => write!(f, "bool"),
            ColumnType::Jsonb => write!(f, "jsonb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Table name plus ordered column list
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}
