use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanOptions {
    pub extensions: Vec<String>,
    pub follow_links: bool,
    pub max_depth: Option<usize>,
    /// Directories skipped entirely, e.g. where culled duplicates are kept.
    pub exclude: Vec<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extensions: ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            follow_links: false,
            max_depth: None,
            exclude: Vec::new(),
        }
    }
}

impl ScanOptions {
    fn excluded_dirs(&self) -> Vec<PathBuf> {
        self.exclude
            .iter()
            .map(|dir| fs::canonicalize(dir).unwrap_or_else(|_| dir.clone()))
            .collect()
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// Recursively walk each root, returning the image files it contains. Roots
/// that are files themselves are kept when their extension matches. The
/// result is sorted and free of repeats.
pub fn discover_images(roots: &[PathBuf], options: &ScanOptions) -> Result<Vec<PathBuf>, ScanError> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();
    let excluded = options.excluded_dirs();
    let is_excluded = |path: &Path| {
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        excluded.iter().any(|dir| path.starts_with(dir))
    };

    for root in roots {
        if !root.exists() {
            return Err(ScanError::InvalidPath {
                path: root.to_string_lossy().to_string(),
            });
        }

        if is_excluded(root) {
            log::debug!("skipping excluded root {}", root.display());
            continue;
        }

        if root.is_file() {
            if options.accepts(root) && seen.insert(root.clone()) {
                images.push(root.clone());
            }
            continue;
        }

        let mut walker = WalkDir::new(root).follow_links(options.follow_links);
        if let Some(depth) = options.max_depth {
            walker = walker.max_depth(depth);
        }

        let entries = walker
            .into_iter()
            .filter_entry(|entry| !(entry.file_type().is_dir() && is_excluded(entry.path())));
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            if entry.file_type().is_file() && options.accepts(path) && seen.insert(path.to_path_buf()) {
                images.push(path.to_path_buf());
            }
        }
    }

    images.sort();
    log::debug!("discovered {} image(s) under {} root(s)", images.len(), roots.len());
    Ok(images)
}

/// `paths` without any entry naming the same file as `file`, however either
/// side is spelled.
pub fn without_file(paths: Vec<PathBuf>, file: &Path) -> Vec<PathBuf> {
    let Ok(file) = fs::canonicalize(file) else {
        return paths.into_iter().filter(|path| path != file).collect();
    };
    paths
        .into_iter()
        .filter(|path| fs::canonicalize(path).map_or(true, |path| path != file))
        .collect()
}
