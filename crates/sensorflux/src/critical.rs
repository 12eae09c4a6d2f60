//! Append-only critical-event log
//!
//! Whenever a reading's temperature exceeds the configured threshold, a
//! Critical Event Record is appended to a delimited text file. Records are
//! never mutated or deleted; the header row is written exactly once, when
//! the file is first created.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::Reading;

const HEADER: &str = "timestamp,id,temperature";

/// Append-only sink for threshold breaches.
#[derive(Debug, Clone)]
pub struct CriticalEventLog {
    path: PathBuf,
}

impl CriticalEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, creating the file (and parent directory) with a
    /// header row on first use. A failure here is reported to the caller but
    /// must never block the primary write path.
    pub fn append(&self, reading: &Reading) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let is_new = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if is_new {
            writeln!(file, "{}", HEADER)?;
        }
        writeln!(
            file,
            "{},{},{}",
            reading.iso_timestamp(),
            reading.sensor_id,
            reading.temperature
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn reading(temp: f32) -> Reading {
        Reading::new(
            "id_1",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            temp,
        )
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = CriticalEventLog::new(dir.path().join("critical.csv"));

        log.append(&reading(30.0)).unwrap();
        log.append(&reading(31.5)).unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,id,temperature");
        assert_eq!(lines[1], "2024-01-01T00:00:00,id_1,30");
        assert_eq!(lines[2], "2024-01-01T00:00:00,id_1,31.5");
    }

    #[test]
    fn test_creates_missing_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log = CriticalEventLog::new(dir.path().join("nested/data/critical.csv"));

        log.append(&reading(26.0)).unwrap();
        assert!(log.path().exists());
    }
}
