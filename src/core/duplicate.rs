//! Duplicate grouping over a built vp-tree.
//!
//! Each not-yet-grouped item seeds a radius query; the seed plus every match
//! that is not already in an earlier group forms a new group. Membership is
//! relative to the seed, not verified pairwise.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::registry::FileId;
use crate::core::vptree::VpTree;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// The item whose radius query formed the group; always `members[0]`.
    pub seed: FileId,
    pub members: Vec<FileId>,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

pub struct DuplicateDetector {
    pub threshold: u32,
}

impl DuplicateDetector {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    /// Returns the groups in traversal order and the total number of grouped
    /// items. Items without any neighbour are left out entirely.
    pub fn group(&self, tree: &VpTree) -> (Vec<DuplicateGroup>, usize) {
        let mut grouped: HashSet<FileId> = HashSet::new();
        let mut groups = Vec::new();
        let mut total = 0;

        for item in tree.iter() {
            if grouped.contains(&item.id) {
                continue;
            }

            let matches: Vec<FileId> = tree
                .within(item, self.threshold)
                .into_iter()
                .map(|found| found.id)
                .filter(|id| !grouped.contains(id))
                .collect();
            if matches.is_empty() {
                continue;
            }

            let mut members = Vec::with_capacity(matches.len() + 1);
            members.push(item.id);
            members.extend(matches);
            grouped.extend(members.iter().copied());

            total += members.len();
            groups.push(DuplicateGroup {
                seed: item.id,
                members,
            });
        }

        log::debug!(
            "grouped {} item(s) into {} duplicate group(s)",
            total,
            groups.len()
        );
        (groups, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::Fingerprint;
    use crate::core::vptree::Item;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeSet;

    fn tree_of(hashes: &[u64]) -> VpTree {
        VpTree::build(
            hashes
                .iter()
                .enumerate()
                .map(|(id, hash)| Item::new(id as FileId, Fingerprint::single(*hash)))
                .collect(),
        )
    }

    fn as_sets(groups: &[DuplicateGroup]) -> BTreeSet<BTreeSet<FileId>> {
        groups
            .iter()
            .map(|group| group.members.iter().copied().collect())
            .collect()
    }

    #[test]
    fn test_exact_duplicates_form_one_group() {
        let tree = tree_of(&[0xabc, 0xabc]);
        let (groups, total) = DuplicateDetector::new(0).group(&tree);

        assert_eq!(groups.len(), 1);
        assert_eq!(total, 2);
        assert_eq!(groups[0].members[0], groups[0].seed);
        assert_eq!(
            as_sets(&groups),
            BTreeSet::from([BTreeSet::from([0, 1])])
        );
    }

    #[test]
    fn test_disjoint_items_form_no_groups() {
        let tree = tree_of(&[0, u64::MAX, 0x0000_ffff_ffff_0000]);
        let (groups, total) = DuplicateDetector::new(10).group(&tree);

        assert!(groups.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn test_empty_tree() {
        let (groups, total) = DuplicateDetector::new(10).group(&VpTree::default());
        assert!(groups.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn test_lonely_item_never_grouped() {
        // 0, 1 and 3 sit together; the last one is far away.
        let tree = tree_of(&[0, 0b1, 0b11, u64::MAX]);
        let (groups, total) = DuplicateDetector::new(2).group(&tree);

        assert_eq!(total, 3);
        assert!(groups.iter().all(|group| !group.members.contains(&3)));
    }

    #[test]
    fn test_chained_items_grouped_once() {
        // 0 -- 1 -- 2 each one bit apart: a seed in the middle takes both
        // neighbours, a seed at an end leaves the far end to form nothing.
        let tree = tree_of(&[0b000, 0b001, 0b011]);
        let (groups, total) = DuplicateDetector::new(1).group(&tree);

        let mut seen = HashSet::new();
        for group in &groups {
            assert!(group.len() >= 2);
            for id in &group.members {
                assert!(seen.insert(*id), "id {} in two groups", id);
            }
        }
        assert_eq!(total, groups.iter().map(DuplicateGroup::len).sum::<usize>());
    }

    #[test]
    fn test_exclusivity_on_random_input() {
        let mut rng = StdRng::seed_from_u64(99);
        let centres: Vec<u64> = (0..5).map(|_| rng.r#gen()).collect();
        let hashes: Vec<u64> = (0..400)
            .map(|_| {
                let mut value = centres[rng.gen_range(0..centres.len())];
                for _ in 0..rng.gen_range(0..6) {
                    value ^= 1 << rng.gen_range(0..64);
                }
                value
            })
            .collect();
        let tree = tree_of(&hashes);

        let detector = DuplicateDetector::new(6);
        let (groups, total) = detector.group(&tree);

        let mut seen = HashSet::new();
        for group in &groups {
            assert!(group.len() >= 2, "singleton group emitted");
            let seed = Item::new(group.seed, Fingerprint::single(hashes[group.seed as usize]));
            for id in &group.members {
                assert!(seen.insert(*id), "id {} in two groups", id);
                let member = Fingerprint::single(hashes[*id as usize]);
                assert!(seed.fingerprint.distance(&member) <= detector.threshold);
            }
        }
        assert_eq!(total, seen.len());
    }

    #[test]
    fn test_well_separated_groups_ignore_input_order() {
        let clusters = [0u64, 0xffff_0000_0000_0000, 0x0000_0000_ffff_ffff];
        let mut hashes = Vec::new();
        for centre in clusters {
            for bit in 0..4 {
                hashes.push(centre ^ (1 << bit));
            }
        }
        hashes.push(0x00ff_00ff_00ff_00ff);

        let forward = {
            let (groups, _) = DuplicateDetector::new(4).group(&tree_of(&hashes));
            as_sets(&groups)
                .into_iter()
                .map(|set| set.into_iter().map(|id| hashes[id as usize]).collect())
                .collect::<BTreeSet<BTreeSet<u64>>>()
        };

        let mut reversed = hashes.clone();
        reversed.reverse();
        let backward = {
            let (groups, _) = DuplicateDetector::new(4).group(&tree_of(&reversed));
            as_sets(&groups)
                .into_iter()
                .map(|set| set.into_iter().map(|id| reversed[id as usize]).collect())
                .collect::<BTreeSet<BTreeSet<u64>>>()
        };

        assert_eq!(forward.len(), 3);
        assert_eq!(forward, backward);
    }
}
