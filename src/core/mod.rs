pub mod compare;
pub mod duplicate;
pub mod hash;
pub mod image;
pub mod pipeline;
pub mod registry;
pub mod scanner;
pub mod vptree;

pub use compare::{CompareEngine, CompareReport};
pub use duplicate::{DuplicateDetector, DuplicateGroup};
pub use hash::{Fingerprint, HashKind, Hasher, PerceptualHasher};
pub use image::{FsImageLoader, ImageLoader};
pub use pipeline::{HashOutput, HashPipeline, HashProgress, ProgressCallback};
pub use registry::{FileId, FingerprintRegistry};
pub use scanner::{ScanError, ScanOptions, discover_images, without_file};
pub use vptree::{Item, VpTree};
