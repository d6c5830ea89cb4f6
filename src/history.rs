//! Cull history, stored as JSON lines in `<dir>/.history.jsonl`.
//!
//! Every cull appends one record per duplicate group. Records of moved files
//! can be restored, which puts the files back and drops the records. Files
//! that cannot go back because their original path is taken stay recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

pub const HISTORY_FILE_NAME: &str = ".history.jsonl";
pub const DUPLICATES_DIR_NAME: &str = "duplicates";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode history record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No 'moved' history records to restore")]
    NothingToRestore,

    #[error("Invalid history index {index}; {available} record(s) available")]
    InvalidIndex { index: usize, available: usize },

    #[error("{} has no file name", .0.display())]
    NoFileName(PathBuf),
}

impl HistoryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        HistoryError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CullAction {
    Moved,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CulledFile {
    pub original: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved_to: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CullHistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub retained: PathBuf,
    pub culled: Vec<CulledFile>,
    pub action: CullAction,
}

/// Which moved records to undo. Indices count only `moved` records, oldest
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSelection {
    Latest,
    Record(usize),
    All,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Records processed.
    pub records: usize,
    pub restored: usize,
    pub skipped: usize,
    /// Records kept in the history because some of their files are still culled.
    pub kept: usize,
}

enum RestoreOutcome {
    Restored,
    SourceMissing,
    Occupied,
}

/// History file of one culled directory.
#[derive(Debug, Clone)]
pub struct History {
    root: PathBuf,
}

impl History {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn file(&self) -> PathBuf {
        self.root.join(HISTORY_FILE_NAME)
    }

    /// Default destination for moved duplicates.
    pub fn duplicates_dir(&self) -> PathBuf {
        self.root.join(DUPLICATES_DIR_NAME)
    }

    pub fn append(&self, record: &CullHistoryRecord) -> Result<(), HistoryError> {
        let path = self.file();
        let line = serde_json::to_string(record)?;
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| HistoryError::io(&path, e))?;
        writeln!(out, "{}", line).map_err(|e| HistoryError::io(&path, e))
    }

    fn read_lines(&self) -> Result<Vec<String>, HistoryError> {
        let path = self.file();
        let content = fs::read_to_string(&path).map_err(|e| HistoryError::io(&path, e))?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// All readable records in file order. Malformed lines are skipped.
    pub fn list(&self) -> Result<Vec<CullHistoryRecord>, HistoryError> {
        let records = self
            .read_lines()?
            .iter()
            .enumerate()
            .filter_map(|(i, line)| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    log::warn!("Skipping malformed history entry {}: {}", i, e);
                    None
                }
            })
            .collect();
        Ok(records)
    }

    /// Moves culled files back to where they came from and removes the
    /// restored records. Files whose source is gone or whose original path is
    /// taken again are skipped.
    pub fn restore(&self, selection: RestoreSelection) -> Result<RestoreSummary, HistoryError> {
        let lines = self.read_lines()?;
        let moved: Vec<(usize, CullHistoryRecord)> = lines
            .iter()
            .enumerate()
            .filter_map(|(i, line)| {
                serde_json::from_str::<CullHistoryRecord>(line)
                    .ok()
                    .filter(|record| record.action == CullAction::Moved)
                    .map(|record| (i, record))
            })
            .collect();

        if moved.is_empty() {
            return Err(HistoryError::NothingToRestore);
        }

        let selected: Vec<usize> = match selection {
            RestoreSelection::All => (0..moved.len()).collect(),
            RestoreSelection::Latest => vec![moved.len() - 1],
            RestoreSelection::Record(index) if index < moved.len() => vec![index],
            RestoreSelection::Record(index) => {
                return Err(HistoryError::InvalidIndex {
                    index,
                    available: moved.len(),
                });
            }
        };

        let mut summary = RestoreSummary::default();
        let mut rewritten: HashMap<usize, Option<String>> = HashMap::new();
        for &i in &selected {
            let (line_no, record) = &moved[i];
            log::info!(
                "Restoring {} file(s) from record {}",
                record.culled.len(),
                record.timestamp.to_rfc3339()
            );
            let mut still_culled = Vec::new();
            for file in &record.culled {
                match self.restore_file(file)? {
                    RestoreOutcome::Restored => summary.restored += 1,
                    RestoreOutcome::SourceMissing => summary.skipped += 1,
                    RestoreOutcome::Occupied => {
                        summary.skipped += 1;
                        still_culled.push(file.clone());
                    }
                }
            }

            let replacement = if still_culled.is_empty() {
                None
            } else {
                summary.kept += 1;
                Some(serde_json::to_string(&CullHistoryRecord {
                    culled: still_culled,
                    ..record.clone()
                })?)
            };
            rewritten.insert(*line_no, replacement);
            summary.records += 1;
        }

        let remaining: String = lines
            .iter()
            .enumerate()
            .filter_map(|(i, line)| match rewritten.get(&i) {
                Some(replacement) => replacement.as_deref(),
                None => Some(line.as_str()),
            })
            .map(|line| format!("{}\n", line))
            .collect();
        let path = self.file();
        fs::write(&path, remaining).map_err(|e| HistoryError::io(&path, e))?;

        Ok(summary)
    }

    fn restore_file(&self, file: &CulledFile) -> Result<RestoreOutcome, HistoryError> {
        let src = match &file.moved_to {
            Some(src) => src.clone(),
            None => {
                let name = file
                    .original
                    .file_name()
                    .ok_or_else(|| HistoryError::NoFileName(file.original.clone()))?;
                self.duplicates_dir().join(name)
            }
        };
        let dest = &file.original;

        if !src.exists() {
            log::warn!("Source file {} does not exist; skipping", src.display());
            return Ok(RestoreOutcome::SourceMissing);
        }
        if dest.exists() {
            log::warn!("{} already exists; skipping", dest.display());
            return Ok(RestoreOutcome::Occupied);
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| HistoryError::io(parent, e))?;
        }
        crate::cull::move_file(&src, dest)?;
        log::info!("Restored {} -> {}", src.display(), dest.display());
        Ok(RestoreOutcome::Restored)
    }
}
