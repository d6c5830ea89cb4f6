//! Perceptual image deduplication.
//!
//! Images are fingerprinted concurrently, indexed in a vantage-point tree over
//! Hamming distance, and either grouped into near-duplicate sets or searched
//! for matches of one target image.

pub mod config;
pub mod core;
pub mod cull;
pub mod deduper;
pub mod error;
pub mod history;

pub use crate::config::{Config, ConfigError};
pub use crate::core::{
    CompareReport, Fingerprint, FsImageLoader, HashKind, HashProgress, Hasher, ImageLoader,
    PerceptualHasher, ProgressCallback, ScanOptions, discover_images, without_file,
};
pub use crate::deduper::{Deduper, DuplicateReport, compare, duplicates};
pub use crate::error::{DedupeError, LoadError, LoadErrorKind, LoadErrors, Result};
