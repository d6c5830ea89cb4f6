use chrono::Utc;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

use crate::history::{CullAction, CullHistoryRecord, CulledFile, HistoryError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CullMode {
    /// Move everything but the keeper into `target_dir`.
    Move { target_dir: PathBuf, dry_run: bool },
    Delete,
}

/// Creation time, falling back to modification time, then `UNIX_EPOCH`.
pub fn get_timestamp(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Sorts each group oldest first, so the first member is the one to keep.
/// Ties break on path.
pub fn rank_by_age(groups: &mut [Vec<PathBuf>]) {
    groups.par_iter_mut().for_each(|group| {
        let mut stamped: Vec<(SystemTime, PathBuf)> = group
            .drain(..)
            .map(|path| (get_timestamp(&path), path))
            .collect();
        stamped.sort();
        group.extend(stamped.into_iter().map(|(_, path)| path));
    });
}

/// A cull that stopped part way. `partial` lists the files that were already
/// moved or deleted, so they can still be recorded.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct CullError {
    pub partial: Option<CullHistoryRecord>,
    #[source]
    pub source: HistoryError,
}

/// Keeps `group[0]` and moves or deletes the rest. A dry run touches nothing
/// and reports where files would go. Files already inside the move target are
/// left where they are. Yields `None` when nothing in the group is culled.
pub fn cull_group(
    group: &[PathBuf],
    mode: &CullMode,
) -> Result<Option<CullHistoryRecord>, CullError> {
    let Some((retained, rest)) = group.split_first() else {
        return Ok(None);
    };

    let action = match mode {
        CullMode::Move { .. } => CullAction::Moved,
        CullMode::Delete => CullAction::Deleted,
    };
    let mut culled = Vec::with_capacity(rest.len());
    let result = cull_files(rest, mode, &mut culled);

    let record = (!culled.is_empty()).then(|| CullHistoryRecord {
        timestamp: Utc::now(),
        retained: retained.clone(),
        culled,
        action,
    });
    match result {
        Ok(()) => Ok(record),
        Err(source) => Err(CullError {
            partial: record,
            source,
        }),
    }
}

fn cull_files(
    rest: &[PathBuf],
    mode: &CullMode,
    culled: &mut Vec<CulledFile>,
) -> Result<(), HistoryError> {
    match mode {
        CullMode::Move { target_dir, dry_run } => {
            if !dry_run {
                fs::create_dir_all(target_dir).map_err(|e| HistoryError::io(target_dir, e))?;
            }
            let target = fs::canonicalize(target_dir).unwrap_or_else(|_| target_dir.clone());
            for dup in rest {
                let parent = dup.parent().unwrap_or(Path::new(""));
                if fs::canonicalize(parent).is_ok_and(|parent| parent.starts_with(&target)) {
                    log::debug!("{} is already culled", dup.display());
                    continue;
                }
                let name = dup
                    .file_name()
                    .ok_or_else(|| HistoryError::NoFileName(dup.clone()))?;
                let dest = unique_destination(target_dir, Path::new(name));
                if !dry_run {
                    move_file(dup, &dest)?;
                    log::debug!("moved {} -> {}", dup.display(), dest.display());
                }
                culled.push(CulledFile {
                    original: dup.clone(),
                    moved_to: Some(dest),
                });
            }
        }
        CullMode::Delete => {
            for dup in rest {
                fs::remove_file(dup).map_err(|e| HistoryError::io(dup, e))?;
                log::debug!("deleted {}", dup.display());
                culled.push(CulledFile {
                    original: dup.clone(),
                    moved_to: None,
                });
            }
        }
    }
    Ok(())
}

/// `dir/name`, or `dir/stem-N.ext` for the first free N when taken.
fn unique_destination(dir: &Path, name: &Path) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{}-{}{}", stem, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Rename, or copy then remove when the rename crosses filesystems.
pub(crate) fn move_file(src: &Path, dest: &Path) -> Result<(), HistoryError> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(src, dest).map_err(|e| HistoryError::io(dest, e))?;
            fs::remove_file(src).map_err(|e| HistoryError::io(src, e))
        }
        Err(e) => Err(HistoryError::io(src, e)),
    }
}
