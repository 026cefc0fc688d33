//! The populated vocabulary tree: routing, weighting, normalization,
//! scoring, and the top-level retrieval API.
//!
//! Grounded line-for-line on `original_source/VocabLib/VocabTree.cpp`'s
//! `PushAndScoreFeature`/`ComputeTFIDFWeights`/`ComputeDatabaseVector
//! Magnitude`/`NormalizeDatabase`/`ScoreQuery`, reworked per
//! SPEC_FULL.md §9/§11: no virtual dispatch, no mutable per-node score
//! field (replaced by a per-call scratch vector keyed by leaf id),
//! enforced ascending `AddImage` ids, and a verified (not assumed)
//! `Combine`. Query-time routing and scoring descend the cached
//! [`crate::flat::FlatArena`] rather than the recursive [`Node`] tree
//! (SPEC_FULL.md §4.5); only database population (`add_image`, which
//! must mutate posting lists in place) still walks `Node` directly.

use std::cell::RefCell;

use log::{debug, info};
use rand::rngs::ThreadRng;
use rayon::prelude::*;

use crate::builder::build_tree;
use crate::descriptor::{distance_sq, Descriptor, DistanceType};
use crate::error::{Result, VocabError};
use crate::flat::{FlatArena, FlatNode};
use crate::node::{Interior, Leaf, Node, PostingEntry};
use crate::store::DescriptorStore;

/// The hierarchical visual-word vocabulary tree.
#[derive(Debug, Clone)]
pub struct VocabTree {
    root: Option<Node>,
    bf: usize,
    depth: usize,
    dim: usize,
    total_node_count: u64,
    distance_type: DistanceType,
    database_image_count: u32,
    last_image_id: Option<u32>,
    weights_computed: bool,
    normalized: bool,
    /// Cached flat-arena view of `root`, rebuilt lazily after any
    /// mutation invalidates it (see [`Self::invalidate_arena`]).
    arena: RefCell<Option<FlatArena>>,
}

impl VocabTree {
    /// An empty, untrained tree. `distance_type` defaults to `Min`,
    /// matching the original's `VocabTree()` constructor default.
    pub fn empty() -> Self {
        Self {
            root: None,
            bf: 0,
            depth: 0,
            dim: 0,
            total_node_count: 0,
            distance_type: DistanceType::Min,
            database_image_count: 0,
            last_image_id: None,
            weights_computed: false,
            normalized: false,
            arena: RefCell::new(None),
        }
    }

    pub fn bf(&self) -> usize {
        self.bf
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn total_node_count(&self) -> u64 {
        self.total_node_count
    }

    pub fn distance_type(&self) -> DistanceType {
        self.distance_type
    }

    pub fn database_image_count(&self) -> u32 {
        self.database_image_count
    }

    pub fn is_trained(&self) -> bool {
        self.root.is_some()
    }

    pub fn set_distance_type(&mut self, dtype: DistanceType) {
        self.distance_type = dtype;
    }

    fn require_trained(&self) -> Result<&Node> {
        self.root
            .as_ref()
            .ok_or_else(|| VocabError::StateViolation("tree has not been built/read yet".into()))
    }

    fn require_trained_mut(&mut self) -> Result<&mut Node> {
        if self.root.is_none() {
            return Err(VocabError::StateViolation(
                "tree has not been built/read yet".into(),
            ));
        }
        Ok(self.root.as_mut().unwrap())
    }

    /// Drop the cached flat arena so the next routing/scoring call
    /// rebuilds it from the (just-mutated) `root`.
    fn invalidate_arena(&mut self) {
        *self.arena.get_mut() = None;
    }

    /// Rebuild the cached flat arena from `root` if it isn't already
    /// present. Always applied after Build/Read and after any mutation
    /// invalidates the previous copy (SPEC_FULL.md §4.5/§11): routing and
    /// scoring never walk the recursive `Node` tree directly.
    fn ensure_arena(&self) -> Result<()> {
        if self.arena.borrow().is_none() {
            let root = self.require_trained()?;
            *self.arena.borrow_mut() = Some(FlatArena::build(root));
        }
        Ok(())
    }

    /// Learn a balanced `bf`-ary tree of depth `depth` from `descriptors`
    /// via recursive hierarchical k-means with `restarts` random
    /// restarts per clustering round. No posting lists are populated.
    pub fn build(dim: usize, depth: usize, bf: usize, restarts: usize, descriptors: &[Descriptor]) -> Result<Self> {
        if descriptors.iter().any(|d| d.len() != dim) {
            return Err(VocabError::InvalidInput(format!(
                "all descriptors must have length {}",
                dim
            )));
        }
        let mut store = DescriptorStore::new(dim);
        let handles: Vec<_> = descriptors.iter().map(|d| store.push(d)).collect();

        info!(
            "building tree: {} descriptors, depth {}, branching factor {}, {} restarts",
            handles.len(),
            depth,
            bf,
            restarts
        );

        let mut rng: ThreadRng = rand::thread_rng();
        let mut root = build_tree(&store, &handles, depth, bf, restarts, &mut rng)?;
        let total_node_count = root.compute_ids(0);
        let arena = FlatArena::build(&root);

        Ok(Self {
            root: Some(root),
            bf,
            depth,
            dim,
            total_node_count,
            distance_type: DistanceType::Min,
            database_image_count: 0,
            last_image_id: None,
            weights_computed: false,
            normalized: false,
            arena: RefCell::new(Some(arena)),
        })
    }

    /// Find the leaf a descriptor routes to (read-only: no mutation, no
    /// posting-list update). At each interior node the non-empty child
    /// with the smallest squared-Euclidean distance to `v` wins, ties
    /// broken by lowest child slot index.
    ///
    /// Used only by tests as a cross-check against arena routing
    /// ([`FlatArena::route`]); production read-path routing goes through
    /// the cached arena (see [`Self::score_query`]).
    #[cfg(test)]
    fn route<'a>(node: &'a Node, v: &[u8]) -> &'a Leaf {
        match node {
            Node::Leaf(l) => l,
            Node::Interior(i) => {
                let idx = Self::nearest_child(i, v);
                Self::route(i.children[idx].as_ref().unwrap(), v)
            }
        }
    }

    fn route_mut<'a>(node: &'a mut Node, v: &[u8]) -> &'a mut Leaf {
        match node {
            Node::Leaf(l) => l,
            Node::Interior(i) => {
                let idx = Self::nearest_child(i, v);
                Self::route_mut(i.children[idx].as_mut().unwrap(), v)
            }
        }
    }

    fn nearest_child(interior: &Interior, v: &[u8]) -> usize {
        let mut best_idx = None;
        let mut best_dist = u64::MAX;
        for (idx, child) in interior.children.iter().enumerate() {
            if let Some(c) = child {
                let d = distance_sq(c.centroid(), v);
                if d < best_dist {
                    best_dist = d;
                    best_idx = Some(idx);
                }
            }
        }
        best_idx.expect("interior node has at least one non-empty child")
    }

    /// Route one descriptor for scoring only (no posting-list mutation),
    /// accumulating into `scratch` at the matched leaf's id. Routes
    /// against the cached arena rather than walking `Node` children.
    fn push_and_score_query_arena(arena: &FlatArena, v: &[u8], scratch: &mut [f32]) {
        let leaf_id = arena.route(v);
        if let FlatNode::Leaf { leaf_weight, .. } = arena.node(leaf_id) {
            scratch[leaf_id as usize] += leaf_weight;
        }
    }

    /// Route one descriptor, accumulate into `scratch`, and append it to
    /// the matched leaf's posting list for `image_id` (matches
    /// `AddFeatureToInvertedFile`'s append-or-increment-last rule; valid
    /// only because `AddImage` enforces strictly ascending `image_id`s).
    fn push_and_score_add(root: &mut Node, v: &[u8], image_id: u32, scratch: &mut [f32]) {
        let leaf = Self::route_mut(root, v);
        scratch[leaf.id as usize] += leaf.leaf_weight;
        match leaf.postings.last_mut() {
            Some(last) if last.image_id == image_id => {
                last.count += leaf.leaf_weight;
            }
            _ => leaf.postings.push(PostingEntry {
                image_id,
                count: leaf.leaf_weight,
            }),
        }
    }

    /// Magnitude contributed by one leaf's score, per SPEC_FULL.md §4.4.
    fn leaf_magnitude_term(distance_type: DistanceType, score: f32) -> f64 {
        match distance_type {
            DistanceType::Dot => (score as f64) * (score as f64),
            DistanceType::Min => score as f64,
        }
    }

    fn magnitude_from_scratch(&self, scratch: &[f32]) -> f64 {
        let root = self.root.as_ref().unwrap();
        let mut mag = 0.0f64;
        root.for_each_leaf(&mut |leaf| {
            mag += Self::leaf_magnitude_term(self.distance_type, scratch[leaf.id as usize]);
        });
        match self.distance_type {
            DistanceType::Dot => mag.sqrt(),
            DistanceType::Min => mag,
        }
    }

    fn magnitude_from_scratch_arena(&self, arena: &FlatArena, scratch: &[f32]) -> f64 {
        let mut mag = 0.0f64;
        arena.for_each_leaf(|id, _| {
            mag += Self::leaf_magnitude_term(self.distance_type, scratch[id as usize]);
        });
        match self.distance_type {
            DistanceType::Dot => mag.sqrt(),
            DistanceType::Min => mag,
        }
    }

    /// Add one image's descriptors to the database's inverted file.
    ///
    /// `image_id` must be strictly greater than every previously added
    /// image id (see SPEC_FULL.md §4.4/§5). Returns the image's
    /// pre-normalization magnitude; the magnitude itself is not stored —
    /// call [`VocabTree::normalize`] once every image for this batch has
    /// been added.
    pub fn add_image(&mut self, image_id: u32, descriptors: &[Descriptor]) -> Result<f64> {
        if self.weights_computed {
            return Err(VocabError::StateViolation(
                "cannot add images after compute_tfidf_weights; clear_database first".into(),
            ));
        }
        if let Some(last) = self.last_image_id {
            if image_id <= last {
                return Err(VocabError::StateViolation(format!(
                    "image ids must be strictly increasing: got {} after {}",
                    image_id, last
                )));
            }
        }

        if descriptors.is_empty() {
            self.last_image_id = Some(image_id);
            self.database_image_count = self.database_image_count.max(image_id + 1);
            return Ok(0.0);
        }

        let total_node_count = self.total_node_count as usize;
        let root = self.require_trained_mut()?;
        let mut scratch = vec![0f32; total_node_count];
        for d in descriptors {
            Self::push_and_score_add(root, d, image_id, &mut scratch);
        }

        let magnitude = self.magnitude_from_scratch(&scratch);

        self.last_image_id = Some(image_id);
        self.database_image_count = self.database_image_count.max(image_id + 1);
        self.invalidate_arena();

        debug!(
            "added image {} ({} descriptors, magnitude {:.4})",
            image_id,
            descriptors.len(),
            magnitude
        );

        Ok(magnitude)
    }

    /// Total (unweighted) descriptor mass routed into the tree so far —
    /// sum over leaves of their posting counts, matching
    /// `VocabTreeLeaf::CountFeatures`.
    fn count_features(&self) -> f64 {
        let root = self.root.as_ref().unwrap();
        let mut total = 0.0f64;
        root.for_each_leaf(&mut |leaf| {
            total += leaf.postings.iter().map(|p| p.count as f64).sum::<f64>();
        });
        total
    }

    /// Compute TF·IDF leaf weights from the current posting lists and
    /// multiply them into every stored count.
    ///
    /// One-shot: transitions the tree from `Pending` to `Weighted`. A
    /// second call is rejected rather than silently re-multiplying
    /// counts (SPEC_FULL.md §4.4/§11).
    pub fn compute_tfidf_weights(&mut self, n: u32) -> Result<()> {
        if self.weights_computed {
            return Err(VocabError::StateViolation(
                "compute_tfidf_weights already applied; it is one-shot".into(),
            ));
        }
        self.require_trained()?;

        info!("computing TF-IDF weights for {} features", self.count_features());

        let root = self.root.as_mut().unwrap();
        root.for_each_leaf_mut(&mut |leaf| {
            let df = leaf.postings.len();
            leaf.leaf_weight = if n == 0 || df == 0 {
                0.0
            } else {
                (n as f64 / df as f64).ln() as f32
            };
            for entry in leaf.postings.iter_mut() {
                entry.count *= leaf.leaf_weight;
            }
        });

        self.weights_computed = true;
        self.invalidate_arena();
        Ok(())
    }

    /// Normalize every posting count for images in
    /// `[first_id, first_id + count)` by that image's magnitude (L2 norm
    /// for `Dot`, L1 norm for `Min`).
    pub fn normalize(&mut self, first_id: u32, count: u32) -> Result<()> {
        self.require_trained()?;
        if count == 0 {
            return Ok(());
        }

        let distance_type = self.distance_type;
        let root = self.root.as_mut().unwrap();

        let mut mags = vec![0f64; count as usize];
        root.for_each_leaf(&mut |leaf| {
            for entry in &leaf.postings {
                if entry.image_id >= first_id && entry.image_id < first_id + count {
                    let idx = (entry.image_id - first_id) as usize;
                    mags[idx] += Self::leaf_magnitude_term(distance_type, entry.count);
                }
            }
        });
        if distance_type == DistanceType::Dot {
            for m in mags.iter_mut() {
                *m = m.sqrt();
            }
        }

        root.for_each_leaf_mut(&mut |leaf| {
            for entry in leaf.postings.iter_mut() {
                if entry.image_id >= first_id && entry.image_id < first_id + count {
                    let idx = (entry.image_id - first_id) as usize;
                    if mags[idx] > 0.0 {
                        entry.count = (entry.count as f64 / mags[idx]) as f32;
                    }
                }
            }
        });

        self.normalized = true;
        self.invalidate_arena();
        Ok(())
    }

    /// Clear the database (all posting lists) back to empty. Leaf
    /// weights are left as-is, matching `VocabTreeLeaf::ClearDatabase`
    /// (which only clears `m_image_list`).
    pub fn clear_database(&mut self) -> Result<()> {
        let root = self.require_trained_mut()?;
        root.for_each_leaf_mut(&mut |leaf| leaf.postings.clear());
        self.database_image_count = 0;
        self.last_image_id = None;
        self.weights_computed = false;
        self.normalized = false;
        self.invalidate_arena();
        Ok(())
    }

    /// Reset every leaf's weight to 1.0 (the constant-weight diagnostic
    /// mode), matching `VocabTreeLeaf::SetConstantLeafWeights`. Posting
    /// counts are left untouched; re-running TF·IDF afterward requires
    /// clearing the database first since weighting is one-shot.
    pub fn set_constant_leaf_weights(&mut self) -> Result<()> {
        let root = self.require_trained_mut()?;
        root.for_each_leaf_mut(&mut |leaf| leaf.leaf_weight = 1.0);
        self.invalidate_arena();
        Ok(())
    }

    /// Set a diagnostic weight on every interior node. Never consulted
    /// by the standard scoring path.
    pub fn set_interior_node_weight(&mut self, weight: f32) -> Result<()> {
        fn walk(node: &mut Node, weight: f32) {
            if let Node::Interior(i) = node {
                i.diagnostic_weight = weight;
                for child in i.children.iter_mut().flatten() {
                    walk(child, weight);
                }
            }
        }
        let root = self.require_trained_mut()?;
        walk(root, weight);
        self.invalidate_arena();
        Ok(())
    }

    /// Score `query_descriptors` against every database image, returning
    /// a dense vector indexed by `image_id` (length
    /// `database_image_count`).
    pub fn score_query(&self, query_descriptors: &[Descriptor], normalize: bool) -> Result<Vec<f32>> {
        self.require_trained()?;
        self.ensure_arena()?;
        let arena_slot = self.arena.borrow();
        let arena = arena_slot.as_ref().expect("ensure_arena just populated it");

        let mut scratch = vec![0f32; self.total_node_count as usize];
        for d in query_descriptors {
            Self::push_and_score_query_arena(arena, d, &mut scratch);
        }

        let mag = self.magnitude_from_scratch_arena(arena, &scratch);
        let mag_inv = if normalize {
            if mag > 0.0 {
                1.0 / mag
            } else {
                0.0
            }
        } else {
            1.0
        };

        let mut q = vec![0f32; self.total_node_count as usize];
        arena.for_each_leaf(|id, _| {
            q[id as usize] = scratch[id as usize] * mag_inv as f32;
        });

        let mut leaves: Vec<(u64, &Vec<PostingEntry>)> = Vec::new();
        arena.for_each_leaf(|id, node| {
            if let FlatNode::Leaf { postings, .. } = node {
                leaves.push((id, postings));
            }
        });

        let distance_type = self.distance_type;
        let n_images = self.database_image_count as usize;

        let partials: Vec<Vec<f32>> = leaves
            .par_iter()
            .fold(
                || vec![0f32; n_images],
                |mut acc, (id, postings)| {
                    let qv = q[*id as usize];
                    if qv != 0.0 {
                        for entry in postings.iter() {
                            let img = entry.image_id as usize;
                            if img < acc.len() {
                                acc[img] += match distance_type {
                                    DistanceType::Dot => qv * entry.count,
                                    DistanceType::Min => qv.min(entry.count),
                                };
                            }
                        }
                    }
                    acc
                },
            )
            .collect();

        let mut scores = vec![0f32; n_images];
        for partial in partials {
            for (s, p) in scores.iter_mut().zip(partial) {
                *s += p;
            }
        }

        Ok(scores)
    }

    /// Append `other`'s posting lists into `self`'s, under the
    /// requirement that both trees share identical topology: same `bf`,
    /// `depth`, `dim`, `total_node_count`, `distance_type`, and
    /// byte-identical centroids at every node id (verified here, not
    /// assumed — SPEC_FULL.md §11).
    pub fn combine(&mut self, other: &VocabTree) -> Result<()> {
        if self.bf != other.bf
            || self.depth != other.depth
            || self.dim != other.dim
            || self.total_node_count != other.total_node_count
            || self.distance_type != other.distance_type
        {
            return Err(VocabError::InvalidInput(
                "cannot combine trees with different topology or distance type".into(),
            ));
        }

        let self_root = self.require_trained()?;
        let other_root = other.require_trained()?;
        if !centroids_match(self_root, other_root) {
            return Err(VocabError::InvalidInput(
                "cannot combine trees whose node centroids differ".into(),
            ));
        }

        let mut other_postings: Vec<(u64, Vec<PostingEntry>)> = Vec::new();
        other_root.for_each_leaf(&mut |leaf| {
            if !leaf.postings.is_empty() {
                other_postings.push((leaf.id, leaf.postings.clone()));
            }
        });

        let root = self.root.as_mut().unwrap();
        for (leaf_id, mut incoming) in other_postings {
            root.for_each_leaf_mut(&mut |leaf| {
                if leaf.id == leaf_id {
                    leaf.postings.append(&mut incoming);
                    leaf.postings.sort_by_key(|p| p.image_id);
                    incoming = Vec::new();
                }
            });
        }

        self.database_image_count = self.database_image_count.max(other.database_image_count);
        self.last_image_id = match (self.last_image_id, other.last_image_id) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        self.weights_computed = false;
        self.normalized = false;
        self.invalidate_arena();

        Ok(())
    }

    pub(crate) fn root(&self) -> Option<&Node> {
        self.root.as_ref()
    }

    pub(crate) fn from_parts(
        root: Node,
        bf: usize,
        depth: usize,
        dim: usize,
        total_node_count: u64,
        distance_type: DistanceType,
        database_image_count: u32,
    ) -> Self {
        let mut weights_computed = false;
        root.for_each_leaf(&mut |leaf| {
            if leaf.leaf_weight != 1.0 {
                weights_computed = true;
            }
        });
        let arena = FlatArena::build(&root);
        Self {
            root: Some(root),
            bf,
            depth,
            dim,
            total_node_count,
            distance_type,
            database_image_count,
            last_image_id: if database_image_count == 0 {
                None
            } else {
                Some(database_image_count - 1)
            },
            weights_computed,
            normalized: false,
            arena: RefCell::new(Some(arena)),
        }
    }
}

fn centroids_match(a: &Node, b: &Node) -> bool {
    match (a, b) {
        (Node::Leaf(la), Node::Leaf(lb)) => la.id == lb.id && la.centroid == lb.centroid,
        (Node::Interior(ia), Node::Interior(ib)) => {
            ia.id == ib.id
                && ia.centroid == ib.centroid
                && ia.children.len() == ib.children.len()
                && ia
                    .children
                    .iter()
                    .zip(ib.children.iter())
                    .all(|(ca, cb)| match (ca, cb) {
                        (Some(x), Some(y)) => centroids_match(x, y),
                        (None, None) => true,
                        _ => false,
                    })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_descriptors() -> Vec<Descriptor> {
        (0u8..8).map(|v| vec![v, v, v, v]).collect()
    }

    #[test]
    fn routes_new_descriptor_to_nearest_leaf() {
        let tree = VocabTree::build(4, 1, 2, 3, &toy_descriptors()).unwrap();
        let root = tree.root().unwrap();
        let leaf = VocabTree::route(root, &[3, 3, 3, 3]);
        // every descriptor in {0,1,2,3} should route the same way (3,3,3,3) does
        let leaf0 = VocabTree::route(root, &[0, 0, 0, 0]);
        assert_eq!(leaf.id, leaf0.id);
    }

    #[test]
    fn tfidf_weight_matches_worked_example() {
        // image 0 all in leaf A, image 1 all in leaf B, image 2 split.
        let mut tree = VocabTree::build(4, 1, 2, 3, &toy_descriptors()).unwrap();
        let root = tree.root().unwrap();
        let leaf_a = VocabTree::route(root, &[0, 0, 0, 0]).id;
        let leaf_b = VocabTree::route(root, &[7, 7, 7, 7]).id;
        assert_ne!(leaf_a, leaf_b);

        let da = descriptor_routing_to(&tree, leaf_a);
        let db = descriptor_routing_to(&tree, leaf_b);

        tree.add_image(0, &[da.clone(), da.clone()]).unwrap();
        tree.add_image(1, &[db.clone(), db.clone()]).unwrap();
        tree.add_image(2, &[da, db]).unwrap();

        tree.compute_tfidf_weights(3).unwrap();

        let root = tree.root().unwrap();
        let mut weight_a = 0.0;
        let mut weight_b = 0.0;
        root.for_each_leaf(&mut |leaf| {
            if leaf.id == leaf_a {
                weight_a = leaf.leaf_weight;
            }
            if leaf.id == leaf_b {
                weight_b = leaf.leaf_weight;
            }
        });
        let expected = (3.0f32 / 2.0).ln();
        assert!((weight_a - expected).abs() < 1e-5);
        assert!((weight_b - expected).abs() < 1e-5);
    }

    #[test]
    fn add_image_rejects_non_ascending_ids() {
        let mut tree = VocabTree::build(4, 1, 2, 3, &toy_descriptors()).unwrap();
        tree.add_image(2, &[vec![0, 0, 0, 0]]).unwrap();
        let err = tree.add_image(1, &[vec![0, 0, 0, 0]]).unwrap_err();
        assert!(matches!(err, VocabError::StateViolation(_)));
    }

    #[test]
    fn compute_tfidf_weights_is_one_shot() {
        let mut tree = VocabTree::build(4, 1, 2, 3, &toy_descriptors()).unwrap();
        tree.add_image(0, &[vec![0, 0, 0, 0]]).unwrap();
        tree.compute_tfidf_weights(1).unwrap();
        let err = tree.compute_tfidf_weights(1).unwrap_err();
        assert!(matches!(err, VocabError::StateViolation(_)));
    }

    #[test]
    fn distance_min_self_retrieval_scores_one() {
        let mut tree = VocabTree::build(4, 1, 2, 5, &toy_descriptors()).unwrap();
        tree.set_distance_type(DistanceType::Min);
        let descs = vec![vec![0u8, 0, 0, 0], vec![7, 7, 7, 7], vec![7, 7, 7, 7]];
        tree.add_image(0, &descs).unwrap();
        tree.compute_tfidf_weights(1).unwrap();
        tree.normalize(0, 1).unwrap();

        let scores = tree.score_query(&descs, true).unwrap();
        assert_eq!(scores.len(), 1);
        assert!((scores[0] - 1.0).abs() < 1e-4, "expected ~1.0, got {}", scores[0]);
    }

    #[test]
    fn distance_dot_orthogonal_images_score_zero() {
        let mut tree = VocabTree::build(4, 1, 2, 5, &toy_descriptors()).unwrap();
        tree.set_distance_type(DistanceType::Dot);
        let root = tree.root().unwrap();
        let leaf_a = VocabTree::route(root, &[0, 0, 0, 0]).id;
        let leaf_b = VocabTree::route(root, &[7, 7, 7, 7]).id;
        let da = descriptor_routing_to(&tree, leaf_a);
        let db = descriptor_routing_to(&tree, leaf_b);

        tree.add_image(0, &[da.clone(), da]).unwrap();
        tree.add_image(1, &[db.clone(), db]).unwrap();
        tree.compute_tfidf_weights(2).unwrap();
        tree.normalize(0, 2).unwrap();

        let query = vec![descriptor_routing_to(&tree, leaf_a)];
        let scores = tree.score_query(&query, true).unwrap();
        assert!(scores[1].abs() < 1e-6);
    }

    #[test]
    fn score_query_sees_images_added_after_the_arena_was_first_built() {
        let mut tree = VocabTree::build(4, 1, 2, 5, &toy_descriptors()).unwrap();
        tree.set_distance_type(DistanceType::Min);
        let root = tree.root().unwrap();
        let leaf_a = VocabTree::route(root, &[0, 0, 0, 0]).id;
        let da = descriptor_routing_to(&tree, leaf_a);

        // Force the arena to build before any posting lists exist.
        let empty_scores = tree.score_query(&[da.clone()], false).unwrap();
        assert_eq!(empty_scores.len(), 0);

        tree.add_image(0, &[da.clone(), da.clone()]).unwrap();
        tree.compute_tfidf_weights(1).unwrap();
        tree.normalize(0, 1).unwrap();

        let scores = tree.score_query(&[da], true).unwrap();
        assert_eq!(scores.len(), 1);
        assert!((scores[0] - 1.0).abs() < 1e-4, "expected ~1.0, got {}", scores[0]);
    }

    #[test]
    fn combine_rejects_mismatched_topology() {
        let mut a = VocabTree::build(4, 1, 2, 3, &toy_descriptors()).unwrap();
        let b = VocabTree::build(4, 1, 3, 3, &toy_descriptors()).unwrap();
        let err = a.combine(&b).unwrap_err();
        assert!(matches!(err, VocabError::InvalidInput(_)));
    }

    fn descriptor_routing_to(tree: &VocabTree, leaf_id: u64) -> Descriptor {
        let root = tree.root().unwrap();
        let mut centroid = None;
        root.for_each_leaf(&mut |leaf| {
            if leaf.id == leaf_id {
                centroid = Some(leaf.centroid.clone());
            }
        });
        centroid.unwrap()
    }
}
