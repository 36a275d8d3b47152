//! Access log - appends one decision record per confirmation cycle
//!
//! Records are written in JSONL format (one JSON object per line) to the
//! file specified in config. An empty path disables the log.

use crate::io::egress_channel::DecisionPayload;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

pub struct AccessLog {
    file_path: String,
}

impl AccessLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "access_log_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Build from a configured path, `None` when the path is empty
    pub fn from_path(file_path: &str) -> Option<Self> {
        if file_path.trim().is_empty() {
            return None;
        }
        Some(Self::new(file_path))
    }

    pub fn path(&self) -> &str {
        &self.file_path
    }

    /// Write a decision record. Returns true if successful.
    pub fn write_decision(&self, record: &DecisionPayload) -> bool {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                error!(cycle_id = %record.cycle_id, error = %e, "access_log_encode_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                debug!(
                    cycle_id = %record.cycle_id,
                    plate = %record.plate,
                    decision = %record.decision,
                    "access_logged"
                );
                true
            }
            Err(e) => {
                error!(cycle_id = %record.cycle_id, error = %e, "access_log_write_failed");
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
