use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a single image could not be turned into pixels.
#[derive(Debug, Error)]
pub enum LoadErrorKind {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Other(String),
}

/// A path that failed to load. Recovered inside the hashing pipeline: the file
/// is skipped and the error is folded into [`LoadErrors`].
#[derive(Debug, Error)]
#[error("unable to load {}: {source}", .path.display())]
pub struct LoadError {
    pub path: PathBuf,
    #[source]
    pub source: LoadErrorKind,
}

impl LoadError {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<LoadErrorKind>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Every load failure of one batch, kept individually so callers can inspect
/// each cause.
#[derive(Debug, Default)]
pub struct LoadErrors {
    errors: Vec<LoadError>,
}

impl LoadErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: LoadError) {
        self.errors.push(error);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LoadError> {
        self.errors.iter()
    }

    /// Paths of every file that failed, in the order the failures arrived.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.errors.iter().map(LoadError::path)
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.paths().any(|p| p == path)
    }

    pub fn into_inner(self) -> Vec<LoadError> {
        self.errors
    }

    /// `None` when nothing failed, so reports can carry `Option<LoadErrors>`.
    pub fn into_option(self) -> Option<Self> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for LoadErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} file(s) could not be loaded", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for LoadErrors {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl FromIterator<LoadError> for LoadErrors {
    fn from_iter<I: IntoIterator<Item = LoadError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for LoadErrors {
    type Item = LoadError;
    type IntoIter = std::vec::IntoIter<LoadError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<'a> IntoIterator for &'a LoadErrors {
    type Item = &'a LoadError;
    type IntoIter = std::slice::Iter<'a, LoadError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

/// Fatal errors of the public operations. Per-file failures are not in here;
/// they travel next to the results as [`LoadErrors`].
#[derive(Debug, Error)]
pub enum DedupeError {
    #[error("unable to load target image: {0}")]
    TargetLoad(#[source] LoadError),

    /// A registry lookup for an ID that registry never handed out.
    #[error("unknown fingerprint id {0}")]
    UnknownId(u64),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DedupeError>;
