// 📮 Dead-Letter Sink
// Append-only JSONL log of rejected records, kept for review and replay

use crate::error::{RecordError, Result};
use crate::parser::RawRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Pipeline stage that rejected a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parse,
    Normalize,
    /// Rejected by the in-file duplicate check before loading
    Load,
}

/// One rejected record. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub run_id: String,
    pub stage: Stage,
    pub source_file: String,
    pub line: usize,
    /// Stable reason code (`invalid_amount`, `invalid_timestamp`, ...)
    pub reason: String,
    pub detail: String,
    pub payload: RawRecord,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(run_id: &str, stage: Stage, record: &RawRecord, reason: &RecordError) -> Self {
        DeadLetterEntry {
            run_id: run_id.to_string(),
            stage,
            source_file: record.source_file.clone(),
            line: record.line,
            reason: reason.code().to_string(),
            detail: reason.to_string(),
            payload: record.clone(),
            failed_at: Utc::now(),
        }
    }
}

pub struct DeadLetterSink {
    path: PathBuf,
    written: usize,
    write_failures: usize,
}

impl DeadLetterSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        DeadLetterSink {
            path: path.into(),
            written: 0,
            write_failures: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry. A write failure is logged and counted, never returned.
    pub fn record(&mut self, entry: &DeadLetterEntry) {
        match self.append(entry) {
            Ok(()) => self.written += 1,
            Err(e) => {
                self.write_failures += 1;
                error!(
                    path = %self.path.display(),
                    source_file = %entry.source_file,
                    line = entry.line,
                    reason = %entry.reason,
                    error = %e,
                    "failed to write dead-letter entry"
                );
            }
        }
    }

    fn append(&self, entry: &DeadLetterEntry) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn write_failures(&self) -> usize {
        self.write_failures
    }

    pub fn read_entries(&self) -> Result<Vec<DeadLetterEntry>> {
        read_entries(&self.path)
    }
}

/// Read every entry back; a missing log is empty, corrupt lines are skipped
pub fn read_entries(path: &Path) -> Result<Vec<DeadLetterEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(fs::File::open(path)?);
    let mut entries = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DeadLetterEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(
                path = %path.display(),
                line = index + 1,
                error = %e,
                "skipping unreadable dead-letter line"
            ),
        }
    }

    Ok(entries)
}
