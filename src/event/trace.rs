//! NDJSON trace export

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use uuid::Uuid;

use crate::error::Result;

use super::EventLog;

/// Write every event of `log` to `path`, one JSON object per line
pub fn write_trace(log: &EventLog, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    log.with_events(|events| -> io::Result<()> {
        for event in events {
            serde_json::to_writer(&mut writer, event)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    })?;
    writer.flush()?;

    tracing::info!(path = %path.display(), events = log.len(), "Wrote trace file");
    Ok(())
}

/// Unique identifier for one pipeline run
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}
