//! Per-cycle timing ledger.
//!
//! Each calculator run is appended as one CSV row.

use crate::error::Result;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

/// How a calculator run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    /// Non-fatal error; the calculator retries next cycle.
    Skipped,
    /// Fatal error; the cycle was aborted.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingRecord {
    pub cycle: u64,
    pub calculator: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcome: Outcome,
}

/// Appends a record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn record(calculator: &str, outcome: Outcome) -> TimingRecord {
        TimingRecord {
            cycle: 1,
            calculator: calculator.to_string(),
            started_at: Utc::now(),
            elapsed_ms: 12,
            outcome,
        }
    }

    #[test]
    fn test_append_record_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timings.csv");

        append_record(&path, &record("obj_tim", Outcome::Ok)).unwrap();

        assert!(path.exists());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("cycle,calculator,started_at,elapsed_ms,outcome"));
    }

    #[test]
    fn test_append_record_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timings.csv");

        append_record(&path, &record("obj_tim", Outcome::Ok)).unwrap();
        append_record(&path, &record("obj_team", Outcome::Skipped)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3, "expected 1 header + 2 data rows");
        assert!(lines[0].contains("calculator"));
        assert!(lines[2].ends_with(",12,skipped"));
    }

    #[test]
    fn test_append_record_invalid_path_returns_error() {
        let result = append_record(
            Path::new("/nonexistent/dir/timings.csv"),
            &record("obj_tim", Outcome::Ok),
        );
        assert!(result.is_err());
    }
}
