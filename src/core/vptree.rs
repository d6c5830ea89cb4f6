//! Vantage-point tree over perceptual fingerprints.
//!
//! Every node picks a pivot item and splits the remaining items by their
//! distance to it: those within the median distance go inside, the rest go
//! outside. Radius queries use the triangle inequality to skip whole subtrees
//! that cannot contain a match.
//!
//! Nodes are stored in one arena and refer to their children by index. The
//! tree is built in a single pass and never modified afterwards.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::hash::Fingerprint;
use crate::core::registry::FileId;

/// Seed used by [`VpTree::build`]; a fixed seed keeps the tree shape stable
/// for a given input order.
pub const DEFAULT_PIVOT_SEED: u64 = 0x5eed_d3d0_9e71_ce55;

/// A fingerprinted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: FileId,
    pub fingerprint: Fingerprint,
}

impl Item {
    pub fn new(id: FileId, fingerprint: Fingerprint) -> Self {
        Self { id, fingerprint }
    }

    pub fn distance(&self, other: &Item) -> u32 {
        self.fingerprint.distance(&other.fingerprint)
    }
}

type NodeIndex = usize;

#[derive(Debug)]
struct Node {
    pivot: Item,
    radius: u32,
    inside: Option<NodeIndex>,
    outside: Option<NodeIndex>,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Root,
    Inside(NodeIndex),
    Outside(NodeIndex),
}

#[derive(Debug, Default)]
pub struct VpTree {
    nodes: Vec<Node>,
    root: Option<NodeIndex>,
}

impl VpTree {
    pub fn build(items: Vec<Item>) -> Self {
        Self::build_with_seed(items, DEFAULT_PIVOT_SEED)
    }

    /// Builds the tree choosing each pivot uniformly at random from its
    /// partition, driven by `seed`.
    pub fn build_with_seed(items: Vec<Item>, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tree = VpTree {
            nodes: Vec::with_capacity(items.len()),
            root: None,
        };

        // Explicit work list instead of recursion: adversarial inputs can
        // produce linear depth.
        let mut pending = vec![(items, Slot::Root)];
        while let Some((mut items, slot)) = pending.pop() {
            if items.is_empty() {
                continue;
            }

            let pivot = items.swap_remove(rng.gen_range(0..items.len()));
            let index = tree.nodes.len();
            tree.attach(slot, index);

            if items.is_empty() {
                tree.nodes.push(Node {
                    pivot,
                    radius: 0,
                    inside: None,
                    outside: None,
                });
                continue;
            }

            let mut measured: Vec<(u32, Item)> = items
                .into_iter()
                .map(|item| (pivot.distance(&item), item))
                .collect();
            let median = measured.len() / 2;
            measured.select_nth_unstable_by_key(median, |(distance, _)| *distance);
            let radius = measured[median].0;

            let (inside, outside): (Vec<_>, Vec<_>) = measured
                .into_iter()
                .partition(|(distance, _)| *distance <= radius);

            tree.nodes.push(Node {
                pivot,
                radius,
                inside: None,
                outside: None,
            });
            pending.push((strip(outside), Slot::Outside(index)));
            pending.push((strip(inside), Slot::Inside(index)));
        }

        log::debug!(
            "built vp-tree with {} node(s), depth {}",
            tree.nodes.len(),
            tree.depth()
        );
        tree
    }

    fn attach(&mut self, slot: Slot, index: NodeIndex) {
        match slot {
            Slot::Root => self.root = Some(index),
            Slot::Inside(parent) => self.nodes[parent].inside = Some(index),
            Slot::Outside(parent) => self.nodes[parent].outside = Some(index),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack: Vec<(NodeIndex, usize)> = self.root.map(|r| (r, 1)).into_iter().collect();
        while let Some((index, level)) = stack.pop() {
            deepest = deepest.max(level);
            let node = &self.nodes[index];
            stack.extend(node.inside.map(|child| (child, level + 1)));
            stack.extend(node.outside.map(|child| (child, level + 1)));
        }
        deepest
    }

    /// Every item within `threshold` of `query`, except items sharing the
    /// query's id. Order follows the traversal, not the distance.
    pub fn within(&self, query: &Item, threshold: u32) -> Vec<&Item> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeIndex> = self.root.into_iter().collect();

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            let distance = node.pivot.distance(query);

            if distance <= threshold && node.pivot.id != query.id {
                found.push(&node.pivot);
            }

            // d - t <= r, without underflow.
            if let Some(inside) = node.inside {
                if distance <= node.radius.saturating_add(threshold) {
                    stack.push(inside);
                }
            }
            // d + t >= r
            if let Some(outside) = node.outside {
                if distance.saturating_add(threshold) >= node.radius {
                    stack.push(outside);
                }
            }
        }

        found
    }

    /// Pre-order traversal over every item. Each call starts a fresh walk.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            tree: self,
            stack: self.root.into_iter().collect(),
        }
    }
}

fn strip(measured: Vec<(u32, Item)>) -> Vec<Item> {
    measured.into_iter().map(|(_, item)| item).collect()
}

pub struct Iter<'a> {
    tree: &'a VpTree,
    stack: Vec<NodeIndex>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Item;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.stack.pop()?;
        let node = &self.tree.nodes[index];
        // Outside first so inside is visited first.
        self.stack.extend(node.outside);
        self.stack.extend(node.inside);
        Some(&node.pivot)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.stack.len(), Some(self.tree.nodes.len()))
    }
}

impl<'a> IntoIterator for &'a VpTree {
    type Item = &'a Item;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
