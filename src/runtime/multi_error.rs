//! Failure aggregation
//!
//! A runner never stops at the first failure it sees: it folds every child
//! error into a [`MultiError`], which may itself contain nested
//! `MultiError`s mirroring the runner tree. [`count_leaves`] is the only way
//! failures are tallied.

use std::fmt;

use thiserror::Error;

use crate::error::OperationError;

/// Outcome of a failed runnable: a leaf failure or an aggregate
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error(transparent)]
    Multi(#[from] MultiError),
}

impl RunError {
    /// Every leaf failure below this error, depth first
    pub fn leaves(&self) -> Vec<&OperationError> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a OperationError>) {
        match self {
            RunError::Operation(e) => out.push(e),
            RunError::Multi(multi) => {
                for child in &multi.0 {
                    child.collect_leaves(out);
                }
            }
        }
    }
}

/// Ordered collection of child errors; empty means success
#[derive(Debug, Default)]
pub struct MultiError(Vec<RunError>);

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: impl Into<RunError>) {
        self.0.push(err.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn errors(&self) -> &[RunError] {
        &self.0
    }

    /// `Ok` when nothing was collected
    pub fn into_result(self) -> Result<(), RunError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(RunError::Multi(self))
        }
    }
}

impl From<Vec<RunError>> for MultiError {
    fn from(errors: Vec<RunError>) -> Self {
        Self(errors)
    }
}

impl FromIterator<RunError> for MultiError {
    fn from_iter<I: IntoIterator<Item = RunError>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Errors: ")?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

/// Number of leaf failures in `err`, descending through every nesting level
pub fn count_leaves(err: Option<&RunError>) -> usize {
    match err {
        None => 0,
        Some(RunError::Operation(_)) => 1,
        Some(RunError::Multi(multi)) => multi.0.iter().map(|e| count_leaves(Some(e))).sum(),
    }
}
