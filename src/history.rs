use crate::session::SessionSummary;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// One completed session in the log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRow {
    pub date: String,
    pub workout: String,
    pub exercises: usize,
    pub total_sets: u32,
    pub improvements: usize,
}

/// Append-only log of completed sessions, one CSV row each.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new() -> Option<Self> {
        crate::app_dirs::AppDirs::config_dir().map(|dir| Self {
            path: dir.join("log.csv"),
        })
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn append(&self, summary: &SessionSummary) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Emit the header only on first write
        let needs_header = !self.path.exists();

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);

        writer.serialize(HistoryRow {
            date: Local::now().format("%c").to_string(),
            workout: summary.workout_id.clone(),
            exercises: summary.exercise_count,
            total_sets: summary.total_sets,
            improvements: summary.improved.len(),
        })?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_all(&self) -> std::io::Result<Vec<HistoryRow>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row?);
        }
        Ok(rows)
    }
}
