//! Flat arena layout for a trained tree.
//!
//! Grounded on SPEC_FULL.md §4.5/§11: the original gates a contiguous
//! array representation behind a compile-time `#ifdef`; this crate makes
//! it an always-on post-load pass instead. [`FlatArena::build`] walks the
//! recursive [`Node`] structure once, allocates one contiguous arena
//! indexed by node id, and rewrites every interior node's child
//! references to index into that arena. `VocabTree` builds one arena per
//! trained root and caches it behind a `RefCell`, rebuilding lazily
//! whenever a mutation (`add_image`, `compute_tfidf_weights`,
//! `normalize`, ...) invalidates the cached copy, so routing and scoring
//! always see the current posting lists without re-walking boxed
//! children on every query.

use crate::descriptor::{distance_sq, Descriptor};
use crate::node::{Node, PostingEntry};

/// One arena-resident node, referencing children and itself by node id
/// (equal to its index into [`FlatArena::nodes`]).
#[derive(Debug, Clone)]
pub enum FlatNode {
    Interior {
        centroid: Descriptor,
        /// Child node ids, `None` for an empty branch slot.
        children: Vec<Option<u64>>,
    },
    Leaf {
        centroid: Descriptor,
        leaf_weight: f32,
        postings: Vec<PostingEntry>,
    },
}

impl FlatNode {
    pub fn centroid(&self) -> &Descriptor {
        match self {
            FlatNode::Interior { centroid, .. } => centroid,
            FlatNode::Leaf { centroid, .. } => centroid,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, FlatNode::Leaf { .. })
    }
}

/// A contiguous, id-indexed copy of a trained tree, built once and
/// reused across many routing/scoring calls.
#[derive(Debug, Clone)]
pub struct FlatArena {
    nodes: Vec<FlatNode>,
    root: u64,
}

impl FlatArena {
    /// Flatten `root` (as assigned by [`Node::compute_ids`]) into an
    /// arena indexed by node id.
    pub fn build(root: &Node) -> Self {
        let mut nodes: Vec<Option<FlatNode>> = Vec::new();
        flatten_into(root, &mut nodes);
        let nodes = nodes
            .into_iter()
            .map(|slot| slot.expect("every id in [0, total_node_count) is assigned exactly once"))
            .collect();
        FlatArena {
            nodes,
            root: root.id(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    pub fn node(&self, id: u64) -> &FlatNode {
        &self.nodes[id as usize]
    }

    /// Route `v` to its nearest-leaf id, descending from the arena root.
    pub fn route(&self, v: &[u8]) -> u64 {
        let mut current = self.root;
        loop {
            match &self.nodes[current as usize] {
                FlatNode::Leaf { .. } => return current,
                FlatNode::Interior { children, .. } => {
                    let mut best_id = None;
                    let mut best_dist = u64::MAX;
                    for child in children.iter().flatten() {
                        let d = distance_sq(self.nodes[*child as usize].centroid(), v);
                        if d < best_dist {
                            best_dist = d;
                            best_id = Some(*child);
                        }
                    }
                    current = best_id.expect("interior node has at least one non-empty child");
                }
            }
        }
    }

    pub fn for_each_leaf<F: FnMut(u64, &FlatNode)>(&self, mut f: F) {
        for (id, node) in self.nodes.iter().enumerate() {
            if node.is_leaf() {
                f(id as u64, node);
            }
        }
    }
}

fn flatten_into(node: &Node, out: &mut Vec<Option<FlatNode>>) {
    let id = node.id() as usize;
    if out.len() <= id {
        out.resize_with(id + 1, || None);
    }
    let flat = match node {
        Node::Leaf(l) => FlatNode::Leaf {
            centroid: l.centroid.clone(),
            leaf_weight: l.leaf_weight,
            postings: l.postings.clone(),
        },
        Node::Interior(i) => {
            let children = i
                .children
                .iter()
                .map(|c| c.as_ref().map(|n| n.id()))
                .collect();
            for child in i.children.iter().flatten() {
                flatten_into(child, out);
            }
            FlatNode::Interior {
                centroid: i.centroid.clone(),
                children,
            }
        }
    };
    out[id] = Some(flat);
}
