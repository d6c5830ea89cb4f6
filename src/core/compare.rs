use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::core::hash::{HashKind, Hasher};
use crate::core::image::ImageLoader;
use crate::core::pipeline::HashPipeline;
use crate::core::vptree::{Item, VpTree};
use crate::error::{DedupeError, LoadErrors, Result};

/// Matches of one target image among a candidate set.
#[derive(Debug, Default, Serialize)]
pub struct CompareReport {
    pub matches: Vec<PathBuf>,
    /// Candidates that could not be loaded; the matches cover the rest.
    #[serde(skip)]
    pub errors: Option<LoadErrors>,
}

/// Looks up one image against a set of candidates.
pub struct CompareEngine<'a, L, H> {
    pipeline: HashPipeline<'a, L, H>,
}

impl<'a, L, H> CompareEngine<'a, L, H>
where
    L: ImageLoader,
    H: Hasher<L::Image>,
{
    pub fn new(pipeline: HashPipeline<'a, L, H>) -> Self {
        Self { pipeline }
    }

    /// Fails outright when the target cannot be loaded. Candidate failures do
    /// not abort the comparison and are returned in the report.
    pub fn find_matches(
        &self,
        target: &Path,
        candidates: &[PathBuf],
        kind: HashKind,
    ) -> Result<CompareReport> {
        let image = self
            .pipeline
            .loader()
            .load(target)
            .map_err(DedupeError::TargetLoad)?;
        let fingerprint = self.pipeline.hasher().compute(&image, kind);
        drop(image);

        let output = self.pipeline.run(candidates, kind);
        if output.cancelled {
            return Err(DedupeError::Cancelled);
        }

        let tree = VpTree::build(output.items);
        // Registered after the candidates so its id is fresh and never
        // collides with a tree member.
        let query = Item::new(output.registry.insert(target), fingerprint);

        let matches = tree
            .within(&query, kind.threshold())
            .into_iter()
            .map(|item| output.registry.lookup(item.id))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "{} match(es) for {} among {} candidate(s)",
            matches.len(),
            target.display(),
            candidates.len()
        );

        Ok(CompareReport {
            matches,
            errors: output.errors,
        })
    }
}
