use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::DedupeError;

/// Numeric handle the registry hands out for a path.
pub type FileId = u64;

#[derive(Debug, Default)]
struct RegistryInner {
    // Indexed by id.
    paths: Vec<PathBuf>,
    ids: HashMap<PathBuf, FileId>,
}

/// Bidirectional path <-> id map shared by every hashing worker.
///
/// Ids are assigned monotonically from zero under a lock, so concurrent
/// inserts never hand out the same id twice. Inserting a path that is already
/// known still yields a fresh id; `id_of` keeps reporting the first one.
#[derive(Debug, Default)]
pub struct FingerprintRegistry {
    inner: Mutex<RegistryInner>,
}

impl FingerprintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // The map is never left half-updated, so a panic elsewhere does not
        // invalidate it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, path: impl Into<PathBuf>) -> FileId {
        let path = path.into();
        let mut inner = self.lock();
        let id = inner.paths.len() as FileId;
        inner.ids.entry(path.clone()).or_insert(id);
        inner.paths.push(path);
        id
    }

    pub fn lookup(&self, id: FileId) -> Result<PathBuf, DedupeError> {
        let inner = self.lock();
        usize::try_from(id)
            .ok()
            .and_then(|index| inner.paths.get(index))
            .cloned()
            .ok_or(DedupeError::UnknownId(id))
    }

    pub fn id_of(&self, path: &Path) -> Option<FileId> {
        self.lock().ids.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
