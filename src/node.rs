//! Tagged node variants for the vocabulary tree.
//!
//! The original (`VocabLib/VocabTree.h`) models `VocabTreeInteriorNode`
//! and `VocabTreeLeaf` as subclasses of an abstract `VocabTreeNode`,
//! dispatched virtually through every recursive operation. Per
//! SPEC_FULL.md §9/§11 this crate replaces that with a single `Node`
//! sum type matched on at each traversal — no dynamic dispatch, no
//! owning raw pointers.

use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;

/// One entry of a leaf's inverted file: a database image and its
/// (weighted) count at that leaf.
///
/// Within one leaf's posting list, entries are kept sorted by
/// `image_id` with at most one entry per `image_id`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostingEntry {
    pub image_id: u32,
    pub count: f32,
}

/// An interior node: a centroid plus up to `bf` children, indexed by
/// branch slot. An empty slot (`None`) is a distinct state from "no
/// node" dereference hazards in the original — clusters that ended up
/// empty during training simply have no child there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interior {
    pub id: u64,
    pub centroid: Descriptor,
    pub children: Vec<Option<Node>>,
    /// Diagnostic-only weight (SPEC_FULL.md §4.6); never consulted by the
    /// standard scoring path, which treats interior contribution as 0.
    #[serde(default)]
    pub diagnostic_weight: f32,
}

/// A leaf: one visual word. Carries its centroid, its IDF weight, and
/// the posting list of database images that contain this word.
///
/// The original's mutable `m_score` accumulator field is intentionally
/// absent here (SPEC_FULL.md §3/§11): per-call scores live in a scratch
/// vector passed through the traversal instead, so the tree itself stays
/// read-only during scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaf {
    pub id: u64,
    pub centroid: Descriptor,
    pub leaf_weight: f32,
    pub postings: Vec<PostingEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Interior(Interior),
    Leaf(Leaf),
}

impl Node {
    pub fn id(&self) -> u64 {
        match self {
            Node::Interior(i) => i.id,
            Node::Leaf(l) => l.id,
        }
    }

    pub fn centroid(&self) -> &Descriptor {
        match self {
            Node::Interior(i) => &i.centroid,
            Node::Leaf(l) => &l.centroid,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// Assign ids to this node and its subtree in DFS pre-order,
    /// starting at `next_id`. Returns the next free id after the
    /// subtree, matching `VocabTreeInteriorNode::ComputeIDs`/
    /// `VocabTreeLeaf::ComputeIDs`.
    pub fn compute_ids(&mut self, next_id: u64) -> u64 {
        match self {
            Node::Leaf(l) => {
                l.id = next_id;
                next_id + 1
            }
            Node::Interior(i) => {
                i.id = next_id;
                let mut id = next_id + 1;
                for child in i.children.iter_mut().flatten() {
                    id = child.compute_ids(id);
                }
                id
            }
        }
    }

    pub fn count_nodes(&self) -> u64 {
        match self {
            Node::Leaf(_) => 1,
            Node::Interior(i) => {
                1 + i
                    .children
                    .iter()
                    .flatten()
                    .map(|c| c.count_nodes())
                    .sum::<u64>()
            }
        }
    }

    pub fn count_leaves(&self) -> u64 {
        match self {
            Node::Leaf(_) => 1,
            Node::Interior(i) => i.children.iter().flatten().map(|c| c.count_leaves()).sum(),
        }
    }

    pub fn for_each_leaf<F: FnMut(&Leaf)>(&self, f: &mut F) {
        match self {
            Node::Leaf(l) => f(l),
            Node::Interior(i) => {
                for child in i.children.iter().flatten() {
                    child.for_each_leaf(f);
                }
            }
        }
    }

    pub fn for_each_leaf_mut<F: FnMut(&mut Leaf)>(&mut self, f: &mut F) {
        match self {
            Node::Leaf(l) => f(l),
            Node::Interior(i) => {
                for child in i.children.iter_mut().flatten() {
                    child.for_each_leaf_mut(f);
                }
            }
        }
    }
}
