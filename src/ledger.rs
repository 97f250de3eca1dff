use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

pub const LEDGER_FILE: &str = "master_log.json";

/// One completed remediation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub timestamp: String,
    pub error_file_path: String,
    pub fixed_file_path: String,
    pub diff_file_path: String,
    pub branch_name: String,
    pub root_cause: String,
    pub proposed_fix: String,
    #[serde(default)]
    pub pr_url: Option<String>,
}

/// Append-only run history persisted as a JSON array in
/// `<run_logs_dir>/master_log.json`.
pub struct RunLedger {
    path: PathBuf,
}

impl RunLedger {
    pub fn new(run_logs_dir: &Path) -> Self {
        Self {
            path: run_logs_dir.join(LEDGER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records. A missing file is an empty ledger; an unreadable
    /// one is an error so history is never silently discarded.
    pub fn load(&self) -> Result<Vec<RunRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Ledger(format!("failed to read {}: {e}", self.path.display()))
        })?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            Error::Ledger(format!("corrupted ledger {}: {e}", self.path.display()))
        })
    }

    pub fn append(&self, record: RunRecord) -> Result<()> {
        let mut records = self.load()?;
        info!(branch = %record.branch_name, total = records.len() + 1, "appending run record");
        records.push(record);
        self.save(&records)
    }

    /// Set `pr_url` on the most recent record, which must belong to `branch`
    /// and not already carry a URL.
    pub fn attach_pr_url(&self, branch: &str, pr_url: &str) -> Result<()> {
        let mut records = self.load()?;
        let last = records
            .last_mut()
            .ok_or_else(|| Error::Ledger("ledger is empty; nothing to update".to_string()))?;
        if last.branch_name != branch {
            return Err(Error::Ledger(format!(
                "most recent record is for branch {}, not {branch}",
                last.branch_name
            )));
        }
        if let Some(ref existing) = last.pr_url {
            return Err(Error::Ledger(format!(
                "record for {branch} already has pr_url {existing}"
            )));
        }
        last.pr_url = Some(pr_url.to_string());
        self.save(&records)
    }

    fn save(&self, records: &[RunRecord]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| Error::Ledger("ledger path has no parent".to_string()))?;
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Ledger(format!("failed to create {}: {e}", dir.display())))?;

        let content = serde_json::to_string_pretty(records)
            .map_err(|e| Error::Ledger(format!("failed to serialize ledger: {e}")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::Ledger(format!("failed to create temp file: {e}")))?;
        tmp.write_all(content.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| Error::Ledger(format!("failed to write ledger: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Ledger(format!("failed to replace ledger: {e}")))?;
        Ok(())
    }
}
