//! Migrate: copy finished working tables into the application schemas
//!
//! Every step runs inside one destination transaction. The first failing
//! step rolls the whole migration back, so the targets are either fully
//! refreshed or untouched.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::adapter::{Adapters, Destination};
use crate::ast::MigrateDef;
use crate::error::{AdapterError, OperationError};

use super::{Operation, OperationKind};

/// Name the migration reports under
pub const MIGRATION_NAME: &str = "migrate";

/// Ordered scripts applied in a single transaction
#[derive(Debug, Clone)]
pub struct Migration {
    name: String,
    steps: Vec<MigrateDef>,
}

impl Migration {
    pub fn new(steps: Vec<MigrateDef>) -> Self {
        Self {
            name: MIGRATION_NAME.to_string(),
            steps,
        }
    }

    pub fn steps(&self) -> &[MigrateDef] {
        &self.steps
    }

    fn fail(&self, step: &str, cause: AdapterError) -> OperationError {
        OperationError::Migrate {
            operation: self.name.clone(),
            step: step.to_string(),
            cause,
        }
    }

    /// Run every step in order and commit; roll back at the first failure.
    /// Returns the number of applied steps.
    pub async fn migrate(&self, destination: &dyn Destination) -> Result<usize, OperationError> {
        let mut tx = destination.begin().await.map_err(|e| self.fail("begin", e))?;

        for step in &self.steps {
            debug!(step = %step.name, "migrating");
            if let Err(cause) = tx.exec(&step.script).await {
                if let Err(e) = tx.rollback().await {
                    warn!(step = %step.name, error = %e, "rollback failed");
                }
                return Err(self.fail(&step.name, cause));
            }
        }

        tx.commit().await.map_err(|e| self.fail("commit", e))?;
        Ok(self.steps.len())
    }
}

#[async_trait]
impl Operation for Migration {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Migrate
    }

    async fn run(&self, adapters: &Adapters) -> Result<(), OperationError> {
        self.migrate(adapters.destination.as_ref()).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{numbered_docs, MemoryDestination};

    fn step(name: &str, script: &str) -> MigrateDef {
        MigrateDef {
            name: name.to_string(),
            script: script.to_string(),
        }
    }

    fn destination() -> MemoryDestination {
        MemoryDestination::new()
            .with_table("webapp_courses", numbered_docs(2))
            .with_table("povinn2courses", numbered_docs(5))
            .with_table("filters", numbered_docs(3))
    }

    #[tokio::test]
    async fn applies_every_step_and_commits() {
        let dest = destination();
        let migration = Migration::new(vec![
            step(
                "courses",
                "DROP TABLE webapp_courses; CREATE TABLE webapp_courses AS SELECT * FROM povinn2courses",
            ),
            step(
                "filters",
                "DROP TABLE IF EXISTS webapp_filters; CREATE TABLE webapp_filters AS SELECT * FROM filters",
            ),
        ]);

        let applied = migration.migrate(&dest).await.unwrap();

        assert_eq!(applied, 2);
        assert_eq!(dest.row_count("webapp_courses"), Some(5));
        assert_eq!(dest.row_count("webapp_filters"), Some(3));
        assert_eq!(dest.executed().last().map(String::as_str), Some("COMMIT"));
    }

    #[tokio::test]
    async fn failing_step_rolls_back_earlier_steps() {
        let dest = destination();
        let migration = Migration::new(vec![
            step(
                "courses",
                "DROP TABLE webapp_courses; CREATE TABLE webapp_courses AS SELECT * FROM povinn2courses",
            ),
            step(
                "requisites",
                "CREATE TABLE webapp_requisites AS SELECT * FROM requisites",
            ),
            step(
                "filters",
                "CREATE TABLE webapp_filters AS SELECT * FROM filters",
            ),
        ]);

        let err = migration.migrate(&dest).await.unwrap_err();

        assert!(matches!(&err, OperationError::Migrate { step, .. } if step == "requisites"));
        assert!(err.to_string().contains("relation \"requisites\" does not exist"));
        assert_eq!(err.operation(), Some("migrate"));

        // first step was undone, third never ran
        assert_eq!(dest.rows("webapp_courses"), Some(numbered_docs(2)));
        assert!(!dest.has_table("webapp_requisites"));
        assert!(!dest.has_table("webapp_filters"));
        let executed = dest.executed();
        assert!(executed.contains(&"ROLLBACK".to_string()));
        assert!(!executed.contains(&"COMMIT".to_string()));
    }

    #[tokio::test]
    async fn failed_begin_names_the_phase() {
        let dest = destination().fail_on("BEGIN", "too many connections");
        let err = Migration::new(vec![step("courses", "SELECT 1")])
            .migrate(&dest)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("step 'begin'"));
        assert!(err.to_string().contains("too many connections"));
    }
}
