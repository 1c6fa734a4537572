//! Per-day append-only audit log: one line per attempted record plus a final
//! summary, for operator remediation after a run.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::model::RunSummary;

pub struct AuditLog {
    file: File,
    path: PathBuf,
}

impl AuditLog {
    /// Open (or append to) today's log file in `dir`, named
    /// `YYYY-MM-DD_feeds_load.log`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log dir {}", dir.display()))?;
        let name = format!("{}_feeds_load.log", Local::now().format("%Y-%m-%d"));
        let path = dir.join(name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open audit log {}", path.display()))?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One line per attempted record: id, assigned id (if any), error text.
    pub fn record(&mut self, ad_id: i64, final_id: Option<i64>, error: Option<&str>) -> Result<()> {
        let final_id = final_id.map_or_else(String::new, |id| id.to_string());
        self.line(&format!("{} {} {}", ad_id, final_id, error.unwrap_or("")))
    }

    pub fn summary(&mut self, summary: &RunSummary) -> Result<()> {
        self.line(&format!(
            "FINISHED. ads loaded OK: {}. Errors: {}",
            summary.loaded_ok, summary.errors
        ))
    }

    fn line(&mut self, msg: &str) -> Result<()> {
        writeln!(
            self.file,
            "[{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            msg
        )
        .context("failed to write audit log line")?;
        self.file.flush().context("failed to flush audit log")
    }
}
