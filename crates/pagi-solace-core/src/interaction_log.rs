//! Interaction Log: append-only NDJSON record of every user and bot message.
//!
//! One JSON object per line: `{timestamp, session_id, speaker, message}`. Reads scan the
//! file and skip malformed lines. Export materializes every entry as CSV.

use crate::error::LogError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub session_id: String,
    pub speaker: Speaker,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub rows: usize,
}

pub struct InteractionLog {
    path: PathBuf,
    writer: Mutex<File>,
}

impl InteractionLog {
    /// Open (or create) the log at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, session_id: &str, speaker: Speaker, message: &str) -> Result<(), LogError> {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            session_id: session_id.to_string(),
            speaker,
            message: message.to_string(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut f = self.writer.lock().map_err(|_| LogError::Poisoned)?;
        f.write_all(line.as_bytes())?;
        f.flush()?;
        Ok(())
    }

    /// All well-formed entries in file order.
    pub fn entries(&self) -> Result<Vec<LogEntry>, LogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let f = File::open(&self.path)?;
        let mut out = Vec::new();
        for line in BufReader::new(f).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(e) => out.push(e),
                Err(e) => tracing::debug!(target: "pagi::solace::log", error = %e, "skipping malformed log line"),
            }
        }
        Ok(out)
    }

    pub fn query(&self, session_id: &str) -> Result<Vec<LogEntry>, LogError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.session_id == session_id)
            .collect())
    }

    /// Distinct session ids seen in the log.
    pub fn count_sessions(&self) -> Result<usize, LogError> {
        let ids: HashSet<String> = self.entries()?.into_iter().map(|e| e.session_id).collect();
        Ok(ids.len())
    }

    /// Write every entry to `output` as CSV. `None` when nothing has been logged yet.
    pub fn export(&self, output: impl AsRef<Path>) -> Result<Option<ExportSummary>, LogError> {
        let entries = self.entries()?;
        if entries.is_empty() {
            return Ok(None);
        }
        let output = output.as_ref();
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut w = csv::Writer::from_path(output)?;
        for e in &entries {
            w.serialize(e)?;
        }
        w.flush()?;
        Ok(Some(ExportSummary {
            path: output.to_path_buf(),
            rows: entries.len(),
        }))
    }
}
