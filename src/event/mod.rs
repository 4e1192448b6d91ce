//! Event Module - audit trail of a pipeline run
//!
//! Key types:
//! - `Event`: envelope with id + timestamp + kind
//! - `EventKind`: pipeline / stage / operation events
//! - `EventLog`: thread-safe, append-only log
//! - `write_trace`: NDJSON export for debugging

mod log;
mod trace;

pub use log::{Event, EventKind, EventLog};
pub use trace::{generate_run_id, write_trace};
