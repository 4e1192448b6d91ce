//! EventLog - append-only record of a pipeline run
//!
//! - Event: envelope with id + timestamp + kind
//! - EventKind: pipeline / stage / operation level variants
//! - EventLog: thread-safe, cheap to clone, shared by every runner task

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operation::OperationKind;
use crate::runtime::Stage;

/// Single event in the run log
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since run start (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // PIPELINE LEVEL
    // ═══════════════════════════════════════════
    PipelineStarted {
        run_id: String,
        stages: Vec<Stage>,
        operation_count: usize,
    },
    PipelineCompleted {
        failed_count: usize,
        duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // STAGE LEVEL
    // ═══════════════════════════════════════════
    StageStarted {
        stage: Stage,
    },
    StageCompleted {
        stage: Stage,
        failed_count: usize,
        duration_ms: u64,
        skipped: bool,
    },

    // ═══════════════════════════════════════════
    // OPERATION LEVEL
    // ═══════════════════════════════════════════
    OperationStarted {
        operation: Arc<str>,
        kind: OperationKind,
    },
    OperationCompleted {
        operation: Arc<str>,
        duration_ms: u64,
    },
    OperationFailed {
        operation: Arc<str>,
        error: String,
        duration_ms: u64,
    },
    /// Child of a sequential runner not started under the fail-fast policy
    RunnableSkipped {
        label: Arc<str>,
        reason: String,
    },
}

impl EventKind {
    /// Operation name if the event is operation-related
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::OperationStarted { operation, .. }
            | Self::OperationCompleted { operation, .. }
            | Self::OperationFailed { operation, .. } => Some(operation),
            _ => None,
        }
    }

    pub fn is_stage_event(&self) -> bool {
        matches!(self, Self::StageStarted { .. } | Self::StageCompleted { .. })
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append an event, returning its ID
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Zero-copy access to events via callback (holds the read lock)
    pub fn with_events<T>(&self, f: impl FnOnce(&[Event]) -> T) -> T {
        f(&self.events.read())
    }

    pub fn filter_operation(&self, operation: &str) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.operation() == Some(operation))
                .cloned()
                .collect()
        })
    }

    pub fn stage_events(&self) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.is_stage_event())
                .cloned()
                .collect()
        })
    }

    /// Count events matching a predicate (no allocation)
    pub fn count(&self, predicate: impl Fn(&EventKind) -> bool) -> usize {
        self.with_events(|events| events.iter().filter(|e| predicate(&e.kind)).count())
    }

    pub fn to_json(&self) -> Value {
        self.with_events(|events| serde_json::to_value(events).unwrap_or(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}
