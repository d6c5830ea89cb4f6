use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::core::compare::{CompareEngine, CompareReport};
use crate::core::duplicate::DuplicateDetector;
use crate::core::hash::{HashKind, Hasher, PerceptualHasher};
use crate::core::image::{FsImageLoader, ImageLoader};
use crate::core::pipeline::{HashPipeline, ProgressCallback};
use crate::core::vptree::VpTree;
use crate::error::{DedupeError, LoadErrors, Result};

/// Duplicate groups found in a batch of files.
#[derive(Debug, Default, Serialize)]
pub struct DuplicateReport {
    /// Each group starts with the file whose query formed it.
    pub groups: Vec<Vec<PathBuf>>,
    /// Number of files across all groups.
    pub total: usize,
    /// Files that could not be loaded; the groups cover the rest.
    #[serde(skip)]
    pub errors: Option<LoadErrors>,
}

/// Entry point for both batch deduplication and single-image lookup.
///
/// ```rust,no_run
/// use dedupe::{Deduper, HashKind};
/// use std::path::PathBuf;
///
/// let files = vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")];
/// let report = Deduper::new().duplicates(HashKind::Dct, &files).unwrap();
/// for group in &report.groups {
///     println!("{:?}", group);
/// }
/// ```
pub struct Deduper<L = FsImageLoader, H = PerceptualHasher> {
    loader: L,
    hasher: H,
    workers: usize,
    cancellation_token: Arc<AtomicBool>,
    progress: Option<ProgressCallback>,
}

impl Deduper {
    pub fn new() -> Self {
        Self::with_collaborators(FsImageLoader::new(), PerceptualHasher::new())
    }
}

impl Default for Deduper {
    fn default() -> Self {
        Self::new()
    }
}

impl<L, H> Deduper<L, H>
where
    L: ImageLoader,
    H: Hasher<L::Image>,
{
    pub fn with_collaborators(loader: L, hasher: H) -> Self {
        Self {
            loader,
            hasher,
            workers: 0,
            cancellation_token: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// Zero picks one worker per spare core.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_cancellation_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancellation_token)
    }

    fn pipeline(&self) -> HashPipeline<'_, L, H> {
        HashPipeline::new(&self.loader, &self.hasher)
            .with_workers(self.workers)
            .with_cancellation_token(Arc::clone(&self.cancellation_token))
            .with_progress(self.progress.as_ref())
    }

    /// Groups near-duplicate files. Files that fail to load are skipped and
    /// reported in `errors`.
    pub fn duplicates(&self, kind: HashKind, paths: &[PathBuf]) -> Result<DuplicateReport> {
        let output = self.pipeline().run(paths, kind);
        if output.cancelled {
            return Err(DedupeError::Cancelled);
        }

        let tree = VpTree::build(output.items);
        let (groups, total) = DuplicateDetector::new(kind.threshold()).group(&tree);

        let groups = groups
            .into_iter()
            .map(|group| {
                group
                    .members
                    .into_iter()
                    .map(|id| output.registry.lookup(id))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "found {} duplicate group(s) covering {} file(s)",
            groups.len(),
            total
        );

        Ok(DuplicateReport {
            groups,
            total,
            errors: output.errors,
        })
    }

    /// Files among `candidates` that look like `target`. Fails if the target
    /// itself cannot be loaded.
    pub fn compare(
        &self,
        kind: HashKind,
        target: &Path,
        candidates: &[PathBuf],
    ) -> Result<CompareReport> {
        CompareEngine::new(self.pipeline()).find_matches(target, candidates, kind)
    }
}

/// Groups near-duplicate images among `paths` with the default loader and
/// hasher.
pub fn duplicates(kind: HashKind, paths: &[PathBuf]) -> Result<DuplicateReport> {
    Deduper::new().duplicates(kind, paths)
}

/// Images among `candidates` that look like `target`, with the default loader
/// and hasher.
pub fn compare(kind: HashKind, target: &Path, candidates: &[PathBuf]) -> Result<CompareReport> {
    Deduper::new().compare(kind, target, candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::tests::{FakeHasher, FakeLoader};
    use image::{ImageBuffer, Rgb};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::TempDir;

    fn fake(entries: &[(&str, u64)]) -> Deduper<FakeLoader, FakeHasher> {
        Deduper::with_collaborators(FakeLoader::new(entries), FakeHasher)
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn group_sets(report: &DuplicateReport) -> BTreeSet<BTreeSet<PathBuf>> {
        report
            .groups
            .iter()
            .map(|group| group.iter().cloned().collect())
            .collect()
    }

    #[test]
    fn test_exact_duplicate_scenario() {
        let deduper = fake(&[("a.png", 42), ("b.png", 42)]);
        for kind in HashKind::ALL {
            let report = deduper.duplicates(kind, &paths(&["a.png", "b.png"])).unwrap();
            assert_eq!(report.groups.len(), 1);
            assert_eq!(report.total, 2);
            assert_eq!(
                group_sets(&report),
                BTreeSet::from([BTreeSet::from([PathBuf::from("a.png"), PathBuf::from("b.png")])])
            );
            assert!(report.errors.is_none());
        }
    }

    #[test]
    fn test_disjoint_scenario() {
        let deduper = fake(&[
            ("a.png", 0),
            ("b.png", u64::MAX),
            ("c.png", 0x0000_0000_ffff_ffff),
        ]);
        let report = deduper
            .duplicates(HashKind::Dct, &paths(&["a.png", "b.png", "c.png"]))
            .unwrap();
        assert!(report.groups.is_empty());
        assert_eq!(report.total, 0);
    }

    #[test]
    fn test_partial_failure_scenario() {
        let deduper = fake(&[("a.png", 0xf0f0), ("b.png", 0xf0f1), ("c.png", !0xf0f0)]);
        let report = deduper
            .duplicates(HashKind::Dct, &paths(&["a.png", "b.png", "c.png", "d.png"]))
            .unwrap();

        assert_eq!(
            group_sets(&report),
            BTreeSet::from([BTreeSet::from([PathBuf::from("a.png"), PathBuf::from("b.png")])])
        );
        assert_eq!(report.total, 2);
        let errors = report.errors.expect("d.png failure");
        assert_eq!(errors.len(), 1);
        assert!(errors.contains_path(Path::new("d.png")));
    }

    #[test]
    fn test_empty_input() {
        let report = fake(&[]).duplicates(HashKind::Dct, &[]).unwrap();
        assert!(report.groups.is_empty());
        assert_eq!(report.total, 0);
        assert!(report.errors.is_none());
    }

    #[test]
    fn test_input_order_does_not_change_groups() {
        let entries = [
            ("a1.png", 0u64),
            ("a2.png", 0b1),
            ("a3.png", 0b10),
            ("b1.png", 0xffff_ffff_0000_0000),
            ("b2.png", 0xffff_ffff_0000_0001),
            ("lone.png", 0x00ff_00ff_00ff_00ff),
        ];
        let deduper = fake(&entries);
        let mut forward: Vec<PathBuf> = entries.iter().map(|(p, _)| PathBuf::from(p)).collect();

        let first = group_sets(&deduper.duplicates(HashKind::Dct, &forward).unwrap());
        forward.reverse();
        let second = group_sets(&deduper.duplicates(HashKind::Dct, &forward).unwrap());
        forward.rotate_left(2);
        let third = group_sets(&deduper.duplicates(HashKind::Dct, &forward).unwrap());

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_worker_count_does_not_change_groups() {
        let mut rng = StdRng::seed_from_u64(11);
        let centres: Vec<u64> = (0..20).map(|_| rng.r#gen()).collect();
        let entries: Vec<(String, u64)> = (0..60)
            .map(|i| (format!("{}.png", i), centres[i / 3] ^ (1 << (i % 3))))
            .collect();
        let borrowed: Vec<(&str, u64)> = entries.iter().map(|(p, v)| (p.as_str(), *v)).collect();
        let input: Vec<PathBuf> = entries.iter().map(|(p, _)| PathBuf::from(p)).collect();

        let baseline = group_sets(
            &fake(&borrowed)
                .with_workers(1)
                .duplicates(HashKind::Dct, &input)
                .unwrap(),
        );
        for workers in [2, 5, 16] {
            let report = fake(&borrowed)
                .with_workers(workers)
                .duplicates(HashKind::Dct, &input)
                .unwrap();
            assert_eq!(group_sets(&report), baseline, "workers = {}", workers);
        }
        assert_eq!(baseline.len(), 20);
    }

    #[test]
    fn test_cancelled_run_is_an_error() {
        let deduper = fake(&[("a.png", 1)]);
        deduper
            .cancellation_token()
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let err = deduper.duplicates(HashKind::Dct, &paths(&["a.png"])).unwrap_err();
        assert!(matches!(err, DedupeError::Cancelled));
    }

    #[test]
    fn test_compare_scenario() {
        let deduper = fake(&[("t.png", 0xabcd), ("a.png", 0xabcd), ("b.png", !0xabcd)]);
        let report = deduper
            .compare(HashKind::Dct, Path::new("t.png"), &paths(&["a.png", "b.png"]))
            .unwrap();
        assert_eq!(report.matches, vec![PathBuf::from("a.png")]);
    }

    fn create_test_image(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let v = if (x * 4 / width + y * 4 / height) % 2 == 0 { 230 } else { 20 };
            Rgb([v, (x * 255 / width) as u8, (y * 255 / height) as u8])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn test_real_images_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let original = dir.join("original.png");
        let copy = dir.join("copy.png");
        let broken = dir.join("broken.png");
        create_test_image(&original, 64, 64);
        fs::copy(&original, &copy).unwrap();
        fs::write(&broken, b"not an image").unwrap();

        let files = vec![original.clone(), copy.clone(), broken.clone()];
        for kind in HashKind::ALL {
            let report = Deduper::new().with_workers(2).duplicates(kind, &files).unwrap();
            assert_eq!(report.total, 2, "{}", kind);
            assert_eq!(
                group_sets(&report),
                BTreeSet::from([BTreeSet::from([original.clone(), copy.clone()])])
            );
            assert!(report.errors.unwrap().contains_path(&broken));

            let matches = compare(kind, &original, &[copy.clone(), broken.clone()]).unwrap();
            assert_eq!(matches.matches, vec![copy.clone()]);
        }
    }
}
