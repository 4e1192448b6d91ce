//! Pipeline assembler
//!
//! Turns a [`PipelineDef`] into four runner trees:
//! - extract: one Parallel group over every extractor
//! - transform: Sequential over Parallel groups computed by [`TransformPlan`]
//! - load: Sequential, one table → index copy at a time
//! - migrate: Sequential over at most one [`Migration`] (empty when the
//!   definition has no `migrate:` section)
//!
//! Running the pipeline runs the selected stages in that fixed order and
//! produces one [`Report`] per stage.

use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::{error, info, instrument, warn};

use crate::ast::PipelineDef;
use crate::dag::TransformPlan;
use crate::error::{EltError, Result};
use crate::event::{generate_run_id, EventKind};
use crate::operation::{Extractor, Loader, Migration, Transformer};
use crate::runtime::{
    ExecutionPolicy, PipelineSummary, Report, RunContext, Runnable, Runner, Stage,
};

/// Producer label used for tables that exist before the run
const EXTERNAL: &str = "external_tables";

/// The stage runners of one pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    extract: Runner,
    transform: Runner,
    load: Runner,
    migrate: Runner,
}

impl Pipeline {
    /// Validate `def` and build the stage runners
    pub fn assemble(def: &PipelineDef) -> Result<Self> {
        def.validate()?;

        // Tables available before the transform stage starts
        let mut base: FxHashMap<&str, &str> = FxHashMap::default();
        for table in &def.external_tables {
            base.insert(table.as_str(), EXTERNAL);
        }
        for op in &def.extract {
            if let Some(first) = base.insert(op.table.as_str(), op.name.as_str()) {
                return Err(EltError::DuplicateProducer {
                    table: op.table.clone(),
                    first: first.to_string(),
                    second: op.name.clone(),
                });
            }
        }

        let plan = TransformPlan::build(&def.transform, &base)?;

        for op in &def.load {
            let produced = base.contains_key(op.table.as_str())
                || def.transform.iter().any(|t| t.output == op.table);
            if !produced {
                return Err(EltError::MissingProducer {
                    operation: format!("load:{}", op.index),
                    table: op.table.clone(),
                });
            }
        }

        let extract = Runner::parallel(
            "extract",
            def.extract
                .iter()
                .map(|d| Runnable::operation(Extractor::from_def(d)))
                .collect(),
        );

        let transform = Runner::sequential(
            "transform",
            plan.groups()
                .iter()
                .enumerate()
                .map(|(n, group)| {
                    Runner::parallel(
                        format!("transform/group-{}", n + 1),
                        group
                            .iter()
                            .map(|&i| Runnable::operation(Transformer::from_def(&def.transform[i])))
                            .collect(),
                    )
                    .into()
                })
                .collect(),
        );

        let load = Runner::sequential(
            "load",
            def.load
                .iter()
                .map(|d| Runnable::operation(Loader::from_def(d)))
                .collect(),
        );

        let mut migrate = Vec::new();
        if !def.migrate.is_empty() {
            migrate.push(Runnable::operation(Migration::new(def.migrate.clone())));
        }

        Ok(Self::from_stages(extract, transform, load)
            .with_migrate(Runner::sequential("migrate", migrate)))
    }

    /// Hand-built stages (no dependency checks), without a migration
    pub fn from_stages(extract: Runner, transform: Runner, load: Runner) -> Self {
        Self {
            extract,
            transform,
            load,
            migrate: Runner::sequential("migrate", Vec::new()),
        }
    }

    pub fn with_migrate(mut self, migrate: Runner) -> Self {
        self.migrate = migrate;
        self
    }

    pub fn stage(&self, stage: Stage) -> &Runner {
        match stage {
            Stage::Extract => &self.extract,
            Stage::Transform => &self.transform,
            Stage::Load => &self.load,
            Stage::Migrate => &self.migrate,
        }
    }

    pub fn operation_count(&self) -> usize {
        Stage::ALL.iter().map(|&s| self.stage(s).leaf_count()).sum()
    }

    /// Run one stage to completion and summarize it
    #[instrument(name = "stage", skip(self, ctx), fields(stage = %stage))]
    pub async fn run_stage(&self, stage: Stage, ctx: &RunContext) -> Report {
        let runner = self.stage(stage);
        info!(operations = runner.leaf_count(), "Stage started");
        ctx.events().emit(EventKind::StageStarted { stage });

        let start = Instant::now();
        let outcome = runner.run(ctx).await;
        let report = Report::from_outcome(stage, &outcome, start.elapsed());

        if report.failed_count == 0 {
            info!("{report}");
        } else {
            error!("{report}");
        }
        ctx.events().emit(EventKind::StageCompleted {
            stage,
            failed_count: report.failed_count,
            duration_ms: report.elapsed.as_millis() as u64,
            skipped: false,
        });
        report
    }

    /// Run the selected stages in fixed order (extract → transform → load → migrate).
    ///
    /// Best-effort runs every selected stage regardless of earlier failures;
    /// fail-fast reports the stages after the first failing one as skipped.
    /// Under both policies a cancelled run skips the stages it has not
    /// started, and the migration is skipped once any earlier stage failed.
    pub async fn run(&self, ctx: &RunContext, stages: &[Stage]) -> PipelineSummary {
        let run_id = generate_run_id();
        let selected: Vec<Stage> = Stage::ALL
            .into_iter()
            .filter(|s| stages.contains(s))
            .collect();
        let operation_count = selected.iter().map(|&s| self.stage(s).leaf_count()).sum();

        info!(run_id = %run_id, policy = %ctx.policy(), operation_count, "Pipeline started");
        ctx.events().emit(EventKind::PipelineStarted {
            run_id: run_id.clone(),
            stages: selected.clone(),
            operation_count,
        });

        let start = Instant::now();
        let mut reports: Vec<Report> = Vec::with_capacity(selected.len());
        let mut halted = false;

        for stage in selected {
            let skip_reason = if ctx.cancellation().is_cancelled() {
                Some("run cancelled")
            } else if halted {
                Some("fail-fast after an earlier failure")
            } else if stage == Stage::Migrate && reports.iter().any(|r| r.failed_count > 0) {
                Some("earlier stages failed")
            } else {
                None
            };

            if let Some(reason) = skip_reason {
                let report = Report::skipped(stage);
                warn!(reason, "{report}");
                ctx.events().emit(EventKind::StageCompleted {
                    stage,
                    failed_count: 0,
                    duration_ms: 0,
                    skipped: true,
                });
                reports.push(report);
                continue;
            }

            let report = self.run_stage(stage, ctx).await;
            if ctx.policy() == ExecutionPolicy::FailFast && report.failed_count > 0 {
                halted = true;
            }
            reports.push(report);
        }

        let summary = PipelineSummary {
            run_id,
            reports,
            elapsed: start.elapsed(),
        };
        ctx.events().emit(EventKind::PipelineCompleted {
            failed_count: summary.total_failed(),
            duration_ms: summary.elapsed.as_millis() as u64,
        });
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RunnerMode;

    const YAML: &str = r#"
schema: elt/pipeline@0.1
external_tables: [filters]
extract:
  - { name: FAK, table: fak, query: "SELECT * FROM FAK", columns: [{ name: kod, type: text }] }
  - { name: USTAV, table: ustav, query: "SELECT * FROM USTAV", columns: [{ name: kod, type: text }] }
transform:
  - { name: ustav2json, inputs: [ustav, fak2json], output: ustav2json, script: "" }
  - { name: fak2json, inputs: [fak], output: fak2json, script: "" }
  - { name: filters2json, inputs: [filters], output: filters2json, script: "" }
load:
  - { table: ustav2json, index: departments }
  - { table: fak, index: faculties }
"#;

    #[test]
    fn assembles_stage_shapes() {
        let def = PipelineDef::from_yaml(YAML).unwrap();
        let pipeline = Pipeline::assemble(&def).unwrap();

        let extract = pipeline.stage(Stage::Extract);
        assert_eq!(extract.mode(), RunnerMode::Parallel);
        assert_eq!(extract.children().len(), 2);

        let transform = pipeline.stage(Stage::Transform);
        assert_eq!(transform.mode(), RunnerMode::Sequential);
        let groups: Vec<Vec<&str>> = transform
            .children()
            .iter()
            .map(|g| match g {
                Runnable::Runner(r) => r.children().iter().map(Runnable::label).collect(),
                Runnable::Operation(_) => panic!("expected group"),
            })
            .collect();
        assert_eq!(groups, vec![vec!["fak2json", "filters2json"], vec!["ustav2json"]]);

        let load = pipeline.stage(Stage::Load);
        assert_eq!(load.mode(), RunnerMode::Sequential);
        assert_eq!(pipeline.operation_count(), 7);
    }

    #[test]
    fn rejects_load_of_unknown_table() {
        let yaml = YAML.replace("table: fak, index: faculties", "table: nope, index: faculties");
        let def = PipelineDef::from_yaml(&yaml).unwrap();
        let err = Pipeline::assemble(&def).unwrap_err();
        assert_eq!(err.code(), "ELT-021");
        assert!(err.to_string().contains("'nope'"));
    }

    #[test]
    fn rejects_two_extracts_into_one_table() {
        let yaml = YAML.replace("table: ustav,", "table: fak,");
        let def = PipelineDef::from_yaml(&yaml).unwrap();
        let err = Pipeline::assemble(&def).unwrap_err();
        assert_eq!(err.code(), "ELT-022");
    }

    #[test]
    fn rejects_extract_over_external_table() {
        let yaml = YAML.replace("table: ustav,", "table: filters,");
        let def = PipelineDef::from_yaml(&yaml).unwrap();
        let err = Pipeline::assemble(&def).unwrap_err();
        assert!(err.to_string().contains("external_tables"));
    }

    #[test]
    fn migrate_steps_become_one_operation() {
        let def = PipelineDef::from_yaml(YAML).unwrap();
        let pipeline = Pipeline::assemble(&def).unwrap();
        assert!(pipeline.stage(Stage::Migrate).children().is_empty());

        let yaml = format!(
            "{YAML}migrate:\n  - {{ name: courses, script: \"SELECT 1\" }}\n  - {{ name: filters, script: \"SELECT 1\" }}\n"
        );
        let def = PipelineDef::from_yaml(&yaml).unwrap();
        let pipeline = Pipeline::assemble(&def).unwrap();

        let migrate = pipeline.stage(Stage::Migrate);
        assert_eq!(migrate.mode(), RunnerMode::Sequential);
        let labels: Vec<&str> = migrate.children().iter().map(Runnable::label).collect();
        assert_eq!(labels, vec!["migrate"]);
        assert_eq!(pipeline.operation_count(), 8);
    }

    #[test]
    fn rejects_two_loads_into_one_index() {
        let yaml = YAML.replace("table: fak, index: faculties", "table: fak, index: departments");
        // parsed without validation: assembly must still refuse it
        let def: PipelineDef = serde_yaml::from_str(&yaml).unwrap();
        let err = Pipeline::assemble(&def).unwrap_err();
        assert_eq!(err.code(), "ELT-016");
    }
}
