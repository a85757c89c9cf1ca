//! Reading history
//!
//! Captured readings are appended to a JSON-lines file, one object per line.

use crate::domain::models::CapturedReading;
use anyhow::Context;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Destination for captured readings.
pub trait ReadingSink {
    fn record(&mut self, capture: &CapturedReading) -> anyhow::Result<()>;
}

pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every reading recorded so far, oldest first. A missing file is empty.
    pub fn load_all(&self) -> anyhow::Result<Vec<CapturedReading>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("Malformed reading on line {}", index + 1))
            })
            .collect()
    }
}

impl ReadingSink for JsonLinesSink {
    fn record(&mut self, capture: &CapturedReading) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        let line = serde_json::to_string(capture)?;
        writeln!(file, "{line}")?;
        tracing::debug!(path = %self.path.display(), "Reading recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ChannelKind, DecodedReading};
    use chrono::{TimeZone, Utc};

    fn capture(weight_kg: f64) -> CapturedReading {
        let captured_at = Utc.with_ymd_and_hms(2024, 3, 1, 7, 30, 0).unwrap();
        CapturedReading {
            reading: DecodedReading::weight_only(weight_kg, captured_at),
            device_name: Some("MIBFS".to_string()),
            battery_percent: None,
            channel: ChannelKind::Notification,
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("readings.jsonl"));
        assert!(sink.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_records_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonLinesSink::new(dir.path().join("nested").join("readings.jsonl"));

        sink.record(&capture(70.2)).unwrap();
        sink.record(&capture(69.8)).unwrap();

        let readings = sink.load_all().unwrap();
        assert_eq!(readings, vec![capture(70.2), capture(69.8)]);

        let raw = fs::read_to_string(sink.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn test_malformed_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        fs::write(&path, "{\"not\": \"a reading\"}\n").unwrap();

        let error = JsonLinesSink::new(&path).load_all().unwrap_err();
        assert!(error.to_string().contains("line 1"));
    }
}
