use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::{AnalysisResult, FixResult};

pub const RUN_DIR_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Per-run artifact directory under the run-logs directory.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    dir: PathBuf,
}

impl RunArtifacts {
    /// Create `<run_logs_dir>/<timestamp>/`. A second run in the same second
    /// gets a `-2`, `-3`, ... suffix instead of sharing a directory.
    pub fn create(run_logs_dir: &Path, started: DateTime<Local>) -> Result<Self> {
        std::fs::create_dir_all(run_logs_dir)?;
        let stamp = started.format(RUN_DIR_FORMAT).to_string();

        let mut dir = run_logs_dir.join(&stamp);
        let mut n = 2;
        while dir.exists() {
            dir = run_logs_dir.join(format!("{stamp}-{n}"));
            n += 1;
        }
        std::fs::create_dir(&dir)?;
        debug!(dir = %dir.display(), "created run directory");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_original(&self, relpath: &str, content: &str) -> Result<PathBuf> {
        self.write(&format!("original_{}", file_name(relpath)), content)
    }

    pub fn write_analysis(&self, analysis: &AnalysisResult) -> Result<PathBuf> {
        self.write_json("phase1_output.json", analysis)
    }

    pub fn write_fix(&self, fix: &FixResult) -> Result<PathBuf> {
        self.write_json("phase2_output.json", fix)
    }

    pub fn write_fixed(&self, relpath: &str, content: &str) -> Result<PathBuf> {
        self.write(&format!("fixed_{}", file_name(relpath)), content)
    }

    pub fn write_diff(&self, relpath: &str, diff: &str) -> Result<PathBuf> {
        self.write(&format!("diff_{}.patch", file_stem(relpath)), diff)
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        self.write(name, &json)
    }

    fn write(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

pub fn file_name(relpath: &str) -> String {
    Path::new(relpath)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| relpath.to_string())
}

pub fn file_stem(relpath: &str) -> String {
    Path::new(relpath)
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| relpath.to_string())
}
