//! Approximate nearest-centroid index used inside one k-means round.
//!
//! Built fresh over the current `k` means at the start of every round
//! (`ApproxMeansIndex::build`) and queried once per training descriptor.
//! Grounded on the original's `kmeans_kd.cpp`, which builds an ANN kd-tree
//! over `double`-valued means (cluster centroids are never rounded to
//! bytes mid-round — only the byte-valued input descriptors get cast up
//! to float for the distance computation, via `fill_vector_float`) and
//! calls `annkPriSearch(vec, 1, &nn, &dist, 0.0)` with `annMaxPtsVisit(512)`
//! — a priority-search nearest neighbor bounded to 512 node visits, error
//! bound 0.0. The traversal shape (recurse into the nearer child first,
//! prune the farther child once the running best distance rules it out,
//! track how many leaves have been visited) is the standard bounded
//! best-first kd-tree search.

use crate::descriptor::distance_sq_f64;

/// Default priority-search visit budget, matching `annMaxPtsVisit(512)`.
pub const DEFAULT_VISIT_BUDGET: usize = 512;

struct KdNode {
    /// Index into `points`/`ids` for a leaf; `usize::MAX` for an interior
    /// node.
    point_idx: usize,
    split_dim: usize,
    split_val: f64,
    left: Option<usize>,
    right: Option<usize>,
}

/// A small kd-tree over a set of double-precision mean vectors
/// (centroids), supporting a bounded-visit approximate nearest-neighbor
/// query against byte-valued descriptors.
pub struct ApproxMeansIndex {
    dim: usize,
    points: Vec<Vec<f64>>,
    nodes: Vec<KdNode>,
    root: Option<usize>,
    visit_budget: usize,
    error_bound: f64,
}

impl ApproxMeansIndex {
    /// Build an index over `means` (each of length `dim`), with a
    /// priority-search visit budget and an error bound in `[0.0, 0.1]`
    /// (see SPEC_FULL.md §4.2).
    pub fn build(means: &[Vec<f64>], dim: usize) -> Self {
        Self::build_with_budget(means, dim, DEFAULT_VISIT_BUDGET, 0.0)
    }

    pub fn build_with_budget(
        means: &[Vec<f64>],
        dim: usize,
        visit_budget: usize,
        error_bound: f64,
    ) -> Self {
        let mut idx = Self {
            dim,
            points: means.to_vec(),
            nodes: Vec::new(),
            root: None,
            visit_budget,
            error_bound,
        };
        let order: Vec<usize> = (0..means.len()).collect();
        idx.root = idx.build_recurse(order, 0);
        idx
    }

    fn build_recurse(&mut self, mut indices: Vec<usize>, depth: usize) -> Option<usize> {
        if indices.is_empty() {
            return None;
        }
        if indices.len() == 1 {
            let node = KdNode {
                point_idx: indices[0],
                split_dim: 0,
                split_val: 0.0,
                left: None,
                right: None,
            };
            self.nodes.push(node);
            return Some(self.nodes.len() - 1);
        }

        let split_dim = depth % self.dim;
        indices.sort_by(|&a, &b| {
            self.points[a][split_dim]
                .partial_cmp(&self.points[b][split_dim])
                .expect("centroid components are never NaN")
        });
        let mid = indices.len() / 2;
        let split_val = self.points[indices[mid]][split_dim];

        let right_indices = indices.split_off(mid);
        let left_indices = indices;

        let left = self.build_recurse(left_indices, depth + 1);
        let right = self.build_recurse(right_indices, depth + 1);

        let node = KdNode {
            point_idx: usize::MAX,
            split_dim,
            split_val,
            left,
            right,
        };
        self.nodes.push(node);
        Some(self.nodes.len() - 1)
    }

    /// Approximate nearest centroid to `query`: returns (index into the
    /// original `means` slice, squared distance).
    pub fn nearest(&self, query: &[u8]) -> (usize, f64) {
        let mut best_idx = 0usize;
        let mut best_dist = f64::MAX;
        let mut visits = 0usize;
        if let Some(root) = self.root {
            self.search(root, query, 0, &mut best_idx, &mut best_dist, &mut visits);
        }
        (best_idx, best_dist)
    }

    fn search(
        &self,
        node_idx: usize,
        query: &[u8],
        depth: usize,
        best_idx: &mut usize,
        best_dist: &mut f64,
        visits: &mut usize,
    ) {
        if *visits >= self.visit_budget {
            return;
        }
        let node = &self.nodes[node_idx];

        if node.left.is_none() && node.right.is_none() {
            *visits += 1;
            let dist = distance_sq_f64(&self.points[node.point_idx], query);
            if dist < *best_dist {
                *best_dist = dist;
                *best_idx = node.point_idx;
            }
            return;
        }

        let q = query[node.split_dim] as f64;
        let (near, far) = if q < node.split_val {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(n) = near {
            self.search(n, query, depth + 1, best_idx, best_dist, visits);
        }

        // Prune the far side unless it could still hold a closer point,
        // relaxed by `error_bound` (0.0 means exact pruning).
        let plane_dist = (q - node.split_val).abs();
        let plane_dist_sq = plane_dist * plane_dist;
        let threshold = *best_dist * (1.0 + self.error_bound);
        if let Some(f) = far {
            if plane_dist_sq <= threshold {
                self.search(f, query, depth + 1, best_idx, best_dist, visits);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_exact_nearest_with_small_set() {
        let means = vec![
            vec![0.0, 0.0, 0.0, 0.0],
            vec![10.0, 10.0, 10.0, 10.0],
            vec![100.0, 100.0, 100.0, 100.0],
        ];
        let idx = ApproxMeansIndex::build(&means, 4);
        let (nn, _) = idx.nearest(&[9, 9, 9, 9]);
        assert_eq!(nn, 1);

        let (nn2, _) = idx.nearest(&[1, 0, 0, 1]);
        assert_eq!(nn2, 0);

        let (nn3, _) = idx.nearest(&[99, 100, 101, 100]);
        assert_eq!(nn3, 2);
    }

    #[test]
    fn finds_nearest_with_fractional_centroid() {
        let means = vec![vec![0.1, 0.1], vec![9.9, 9.9]];
        let idx = ApproxMeansIndex::build(&means, 2);
        let (nn, dist) = idx.nearest(&[0, 0]);
        assert_eq!(nn, 0);
        assert!((dist - (0.1 * 0.1 * 2.0)).abs() < 1e-9);
    }

    #[test]
    fn single_mean_always_wins() {
        let means = vec![vec![5.0, 5.0]];
        let idx = ApproxMeansIndex::build(&means, 2);
        let (nn, d) = idx.nearest(&[0, 0]);
        assert_eq!(nn, 0);
        assert_eq!(d, 50.0);
    }
}
