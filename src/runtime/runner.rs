//! Runner tree - Sequential / Parallel composition of operations
//!
//! - A `Runnable` is either a leaf operation or a nested `Runner`.
//! - Sequential awaits children in order; Parallel spawns one tokio task per
//!   child (JoinSet) and always waits for all of them.
//! - Leaves take a permit from the run-wide semaphore, runners never do, so
//!   nesting cannot deadlock the pool.
//! - Every leaf is wrapped in timeout, cancellation and panic capture.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::error::OperationError;
use crate::event::EventKind;
use crate::operation::Operation;

use super::context::{ExecutionPolicy, RunContext};
use super::multi_error::{MultiError, RunError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerMode {
    Sequential,
    Parallel,
}

/// Leaf operation or nested runner
#[derive(Clone)]
pub enum Runnable {
    Operation(Arc<dyn Operation>),
    Runner(Runner),
}

impl Runnable {
    pub fn operation(op: impl Operation + 'static) -> Self {
        Runnable::Operation(Arc::new(op))
    }

    /// Operation name or runner label
    pub fn label(&self) -> &str {
        match self {
            Runnable::Operation(op) => op.name(),
            Runnable::Runner(runner) => runner.label(),
        }
    }

    /// Number of leaf operations below (or at) this node
    pub fn leaf_count(&self) -> usize {
        match self {
            Runnable::Operation(_) => 1,
            Runnable::Runner(runner) => runner.leaf_count(),
        }
    }

    pub fn run<'a>(&'a self, ctx: &'a RunContext) -> BoxFuture<'a, Result<(), RunError>> {
        async move {
            match self {
                Runnable::Operation(op) => run_leaf(op.as_ref(), ctx).await.map_err(RunError::from),
                Runnable::Runner(runner) => runner.run(ctx).await,
            }
        }
        .boxed()
    }
}

impl From<Runner> for Runnable {
    fn from(runner: Runner) -> Self {
        Runnable::Runner(runner)
    }
}

impl<T: Operation + 'static> From<Arc<T>> for Runnable {
    fn from(op: Arc<T>) -> Self {
        Runnable::Operation(op)
    }
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Runnable::Operation(op) => write!(f, "{op:?}"),
            Runnable::Runner(runner) => fmt::Debug::fmt(runner, f),
        }
    }
}

/// Immutable composite of runnables
#[derive(Clone)]
pub struct Runner {
    mode: RunnerMode,
    label: Arc<str>,
    children: Arc<[Runnable]>,
}

impl Runner {
    pub fn sequential(label: impl Into<Arc<str>>, children: Vec<Runnable>) -> Self {
        Self::new(RunnerMode::Sequential, label, children)
    }

    pub fn parallel(label: impl Into<Arc<str>>, children: Vec<Runnable>) -> Self {
        Self::new(RunnerMode::Parallel, label, children)
    }

    fn new(mode: RunnerMode, label: impl Into<Arc<str>>, children: Vec<Runnable>) -> Self {
        Self {
            mode,
            label: label.into(),
            children: children.into(),
        }
    }

    pub fn mode(&self) -> RunnerMode {
        self.mode
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn children(&self) -> &[Runnable] {
        &self.children
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.children.iter().map(Runnable::leaf_count).sum()
    }

    /// Run every child, returning a `MultiError` of the failures
    #[instrument(name = "runner", skip_all, fields(label = %self.label, mode = ?self.mode))]
    pub async fn run(&self, ctx: &RunContext) -> Result<(), RunError> {
        match self.mode {
            RunnerMode::Sequential => self.run_sequential(ctx).await,
            RunnerMode::Parallel => self.run_parallel(ctx).await,
        }
    }

    async fn run_sequential(&self, ctx: &RunContext) -> Result<(), RunError> {
        let mut errors = MultiError::new();

        for (i, child) in self.children.iter().enumerate() {
            if let Err(e) = child.run(ctx).await {
                errors.push(e);
                if ctx.policy() == ExecutionPolicy::FailFast {
                    self.skip_rest(ctx, i + 1, child.label());
                    break;
                }
            }
        }

        errors.into_result()
    }

    fn skip_rest(&self, ctx: &RunContext, from: usize, failed: &str) {
        for skipped in &self.children[from..] {
            warn!(
                runnable = skipped.label(),
                after = failed,
                "skipped after failure (fail-fast)"
            );
            ctx.events().emit(EventKind::RunnableSkipped {
                label: skipped.label().into(),
                reason: format!("'{failed}' failed"),
            });
        }
    }

    async fn run_parallel(&self, ctx: &RunContext) -> Result<(), RunError> {
        let mut set = JoinSet::new();
        for child in self.children.iter().cloned() {
            let ctx = ctx.clone();
            set.spawn(async move { child.run(&ctx).await });
        }

        // Completion order, not launch order
        let mut errors = MultiError::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(join_error) => errors.push(OperationError::Panicked {
                    operation: self.label.to_string(),
                    message: join_error.to_string(),
                }),
            }
        }

        errors.into_result()
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.mode {
            RunnerMode::Sequential => "Sequential",
            RunnerMode::Parallel => "Parallel",
        };
        f.debug_tuple(name).field(&self.label).field(&self.children).finish()
    }
}

// ═══════════════════════════════════════════════════════════════
// LEAF EXECUTION
// ═══════════════════════════════════════════════════════════════

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run one operation under the pool permit, deadline and cancellation token
async fn run_leaf(op: &dyn Operation, ctx: &RunContext) -> Result<(), OperationError> {
    let name = op.name();
    let cancelled = || OperationError::Cancelled {
        operation: name.to_string(),
    };

    let _permit = tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => return Err(cancelled()),
        permit = ctx.limiter().acquire() => permit.map_err(|_| cancelled())?,
    };

    ctx.events().emit(EventKind::OperationStarted {
        operation: name.into(),
        kind: op.kind(),
    });
    let start = Instant::now();

    let guarded = async {
        let work = AssertUnwindSafe(op.run(ctx.adapters())).catch_unwind();
        let caught = match ctx.timeout() {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(caught) => caught,
                Err(_) => {
                    return Err(OperationError::Timeout {
                        operation: name.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    })
                }
            },
            None => work.await,
        };
        caught.unwrap_or_else(|payload| {
            Err(OperationError::Panicked {
                operation: name.to_string(),
                message: panic_message(payload.as_ref()),
            })
        })
    };

    let result = tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => Err(cancelled()),
        result = guarded => result,
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(()) => {
            info!(operation = name, kind = %op.kind(), duration_ms, "✅ {} '{}' finished", op.kind(), name);
            ctx.events().emit(EventKind::OperationCompleted {
                operation: name.into(),
                duration_ms,
            });
        }
        Err(e) => {
            error!(operation = name, kind = %op.kind(), duration_ms, "❌ {e}");
            ctx.events().emit(EventKind::OperationFailed {
                operation: name.into(),
                error: e.to_string(),
                duration_ms,
            });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{memory_adapters, ScriptedOperation};
    use std::time::Duration;

    fn ctx() -> RunContext {
        RunContext::new(memory_adapters())
    }

    #[tokio::test]
    async fn sequential_preserves_order_in_errors() {
        let runner = Runner::sequential(
            "seq",
            vec![
                Runnable::operation(ScriptedOperation::failing("a", "a")),
                Runnable::operation(ScriptedOperation::ok("ok")),
                Runnable::operation(ScriptedOperation::failing("b", "b")),
            ],
        );

        let err = runner.run(&ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "Errors: a, b");
    }

    #[tokio::test]
    async fn empty_runners_succeed() {
        assert!(Runner::parallel("p", vec![]).run(&ctx()).await.is_ok());
        assert!(Runner::sequential("s", vec![]).run(&ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn leaf_count_descends_into_children() {
        let runner = Runner::sequential(
            "outer",
            vec![
                Runner::parallel(
                    "inner",
                    vec![
                        Runnable::operation(ScriptedOperation::ok("a")),
                        Runnable::operation(ScriptedOperation::ok("b")),
                    ],
                )
                .into(),
                Runnable::operation(ScriptedOperation::ok("c")),
            ],
        );
        assert_eq!(runner.leaf_count(), 3);
        assert_eq!(runner.children()[0].label(), "inner");
    }

    #[tokio::test]
    async fn emits_operation_events() {
        let ctx = ctx();
        let runner = Runner::parallel(
            "p",
            vec![
                Runnable::operation(ScriptedOperation::ok("good")),
                Runnable::operation(ScriptedOperation::failing("bad", "nope")),
            ],
        );

        let _ = runner.run(&ctx).await;

        let events = ctx.events();
        assert_eq!(events.filter_operation("good").len(), 2);
        assert_eq!(
            events.count(|k| matches!(k, EventKind::OperationFailed { operation, .. } if &**operation == "bad")),
            1
        );
    }

    #[tokio::test]
    async fn timeout_becomes_leaf_failure() {
        let ctx = ctx().with_timeout(Some(Duration::from_millis(20)));
        let slow = Runnable::operation(ScriptedOperation::ok("slow").with_delay(Duration::from_secs(5)));

        let err = slow.run(&ctx).await.unwrap_err();

        assert!(matches!(
            err,
            RunError::Operation(OperationError::Timeout { timeout_ms: 20, .. })
        ));
    }

    #[test]
    fn panic_payloads_are_rendered() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic payload");
    }
}
