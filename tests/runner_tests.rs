//! # Runner Tests
//!
//! Composition semantics of the runner tree:
//! - Sequential / Parallel fan-out and fan-in
//! - best-effort vs fail-fast
//! - leaf counting through nested MultiErrors
//! - bounded worker pool, cancellation, panics

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use recsis_elt::test_fixtures::{memory_adapters, ConcurrencyGauge, ScriptedOperation};
use recsis_elt::{
    count_leaves, EventKind, ExecutionPolicy, OperationError, RunContext, RunError, Runnable,
    Runner,
};
use tokio_util::sync::CancellationToken;

// ============================================================================
// TEST HELPERS
// ============================================================================

fn ctx() -> RunContext {
    RunContext::new(memory_adapters())
}

fn leaf(op: &ScriptedOperation) -> Runnable {
    Runnable::operation(op.clone())
}

fn leaves(outcome: &Result<(), RunError>) -> usize {
    count_leaves(outcome.as_ref().err())
}

// ============================================================================
// SUCCESS
// ============================================================================

#[tokio::test]
async fn all_succeeding_runner_returns_ok() {
    let ops: Vec<_> = (0..4).map(|i| ScriptedOperation::ok(&format!("op{i}"))).collect();
    let runner = Runner::sequential(
        "outer",
        vec![
            Runner::parallel("p", ops[..2].iter().map(leaf).collect()).into(),
            Runner::sequential("s", ops[2..].iter().map(leaf).collect()).into(),
        ],
    );

    let outcome = runner.run(&ctx()).await;

    assert!(outcome.is_ok());
    assert_eq!(leaves(&outcome), 0);
    assert!(ops.iter().all(|p| p.invocations() == 1));
}

// ============================================================================
// BEST EFFORT
// ============================================================================

#[tokio::test]
async fn sequential_best_effort_invokes_every_child() {
    let ops = vec![
        ScriptedOperation::failing("first", "boom"),
        ScriptedOperation::ok("second"),
        ScriptedOperation::failing("third", "bang"),
        ScriptedOperation::ok("fourth"),
    ];
    let runner = Runner::sequential("seq", ops.iter().map(leaf).collect());

    let outcome = runner.run(&ctx()).await;

    let total: usize = ops.iter().map(ScriptedOperation::invocations).sum();
    assert_eq!(total, 4);
    assert_eq!(leaves(&outcome), 2);
    assert_eq!(outcome.unwrap_err().to_string(), "Errors: boom, bang");
}

#[tokio::test]
async fn parallel_counts_exactly_the_failed_children() {
    let ops: Vec<_> = (0..6)
        .map(|i| {
            let name = format!("op{i}");
            let op = if i % 3 == 0 {
                ScriptedOperation::failing(&name, &name)
            } else {
                ScriptedOperation::ok(&name)
            };
            op.with_delay(Duration::from_millis(10 * (6 - i as u64)))
        })
        .collect();
    let runner = Runner::parallel("par", ops.iter().map(leaf).collect());

    let outcome = runner.run(&ctx()).await;

    assert_eq!(leaves(&outcome), 2);
    assert!(ops.iter().all(|p| p.invocations() == 1));

    // Completion order is not launch order: compare as a set
    let mut messages: Vec<String> = match outcome.unwrap_err() {
        RunError::Multi(multi) => multi.errors().iter().map(ToString::to_string).collect(),
        other => panic!("expected MultiError, got {other:?}"),
    };
    messages.sort();
    assert_eq!(messages, vec!["op0", "op3"]);
}

#[tokio::test]
async fn nested_failures_are_counted_per_leaf() {
    // Sequential(Parallel(A fail, B ok), Parallel(C ok, D fail))
    let runner = Runner::sequential(
        "stage",
        vec![
            Runner::parallel(
                "g1",
                vec![
                    Runnable::operation(ScriptedOperation::failing("A", "a failed")),
                    Runnable::operation(ScriptedOperation::ok("B")),
                ],
            )
            .into(),
            Runner::parallel(
                "g2",
                vec![
                    Runnable::operation(ScriptedOperation::ok("C")),
                    Runnable::operation(ScriptedOperation::failing("D", "d failed")),
                ],
            )
            .into(),
        ],
    );

    let outcome = runner.run(&ctx()).await;

    assert_eq!(leaves(&outcome), 2);
    let err = outcome.unwrap_err();
    assert_eq!(err.leaves().len(), 2);
    assert_eq!(err.to_string(), "Errors: Errors: a failed, Errors: d failed");
}

// ============================================================================
// FAIL FAST
// ============================================================================

#[tokio::test]
async fn sequential_fail_fast_stops_after_first_failure() {
    let ops = vec![
        ScriptedOperation::ok("first"),
        ScriptedOperation::failing("second", "boom"),
        ScriptedOperation::ok("third"),
        ScriptedOperation::ok("fourth"),
    ];
    let ctx = ctx().with_policy(ExecutionPolicy::FailFast);
    let runner = Runner::sequential("seq", ops.iter().map(leaf).collect());

    let outcome = runner.run(&ctx).await;

    assert_eq!(leaves(&outcome), 1);
    assert_eq!(
        ops.iter().map(ScriptedOperation::invocations).collect::<Vec<_>>(),
        vec![1, 1, 0, 0]
    );
    assert_eq!(
        ctx.events()
            .count(|k| matches!(k, EventKind::RunnableSkipped { .. })),
        2
    );
}

#[tokio::test]
async fn fail_fast_never_abandons_parallel_siblings() {
    let slow = ScriptedOperation::ok("slow").with_delay(Duration::from_millis(50));
    let ctx = ctx().with_policy(ExecutionPolicy::FailFast);
    let runner = Runner::parallel(
        "par",
        vec![
            Runnable::operation(ScriptedOperation::failing("fast", "boom")),
            leaf(&slow),
        ],
    );

    let outcome = runner.run(&ctx).await;

    assert_eq!(leaves(&outcome), 1);
    assert_eq!(slow.invocations(), 1);
    assert_eq!(
        ctx.events()
            .count(|k| matches!(k, EventKind::OperationCompleted { operation, .. } if &**operation == "slow")),
        1
    );
}

// ============================================================================
// WORKER POOL
// ============================================================================

#[tokio::test]
async fn parallel_fan_out_respects_max_parallelism() {
    let gauge = ConcurrencyGauge::new();
    let ops: Vec<_> = (0..12)
        .map(|i| {
            ScriptedOperation::ok(&format!("op{i}"))
                .with_delay(Duration::from_millis(20))
                .with_gauge(Arc::clone(&gauge))
        })
        .collect();
    let runner = Runner::parallel("par", ops.iter().map(leaf).collect());

    let outcome = runner.run(&ctx().with_max_parallelism(3)).await;

    assert!(outcome.is_ok());
    assert!(gauge.peak() <= 3, "peak {}", gauge.peak());
    assert!(ops.iter().all(|p| p.invocations() == 1));
}

#[tokio::test]
async fn nested_parallel_runners_do_not_deadlock_a_single_permit() {
    let inner = |label: &str| -> Runnable {
        Runner::parallel(
            label.to_string(),
            vec![
                Runnable::operation(ScriptedOperation::ok(&format!("{label}-a"))),
                Runnable::operation(ScriptedOperation::ok(&format!("{label}-b"))),
            ],
        )
        .into()
    };
    let runner = Runner::parallel("outer", vec![inner("x"), inner("y")]);

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        runner.run(&ctx().with_max_parallelism(1)),
    )
    .await
    .expect("runner finished");

    assert!(outcome.is_ok());
}

// ============================================================================
// CANCELLATION, TIMEOUT, PANIC
// ============================================================================

#[tokio::test]
async fn cancellation_fails_running_and_pending_operations() {
    let token = CancellationToken::new();
    let ctx = ctx().with_cancellation(token.clone());
    let runner = Runner::sequential(
        "seq",
        vec![
            Runnable::operation(ScriptedOperation::ok("long").with_delay(Duration::from_secs(30))),
            Runnable::operation(ScriptedOperation::ok("next")),
        ],
    );

    let cancel = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    };
    let (outcome, ()) = tokio::join!(runner.run(&ctx), cancel);

    let err = outcome.unwrap_err();
    assert_eq!(err.leaves().len(), 2);
    assert!(err
        .leaves()
        .iter()
        .all(|e| matches!(e, OperationError::Cancelled { .. })));
}

#[tokio::test]
async fn timeout_is_one_leaf_failure() {
    let ctx = ctx().with_timeout(Some(Duration::from_millis(20)));
    let runner = Runner::parallel(
        "par",
        vec![
            Runnable::operation(ScriptedOperation::ok("hang").with_delay(Duration::from_secs(30))),
            Runnable::operation(ScriptedOperation::ok("quick")),
        ],
    );

    let outcome = runner.run(&ctx).await;

    assert_eq!(leaves(&outcome), 1);
    assert!(outcome.unwrap_err().to_string().contains("[ELT-130]"));
}

#[tokio::test]
async fn panicking_operation_becomes_a_leaf_failure() {
    let runner = Runner::parallel(
        "par",
        vec![
            Runnable::operation(ScriptedOperation::panicking("bad")),
            Runnable::operation(ScriptedOperation::ok("good")),
        ],
    );

    let outcome = runner.run(&ctx()).await;

    assert_eq!(leaves(&outcome), 1);
    let err = outcome.unwrap_err();
    assert!(matches!(
        err.leaves()[0],
        OperationError::Panicked { operation, .. } if operation == "bad"
    ));
}
