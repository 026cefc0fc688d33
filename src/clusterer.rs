//! Single k-means clustering round, with random restarts.
//!
//! Grounded on `donkeyteethUX-abow/src/vocab.rs`'s `cluster`/
//! `initialize_clusters`/`desc_mean` (random centroid seeding, converge-
//! by-assignment-equality loop), generalized from Hamming distance over
//! bit-packed ORB descriptors to squared Euclidean distance over
//! byte-valued SIFT-style descriptors per `original_source/VocabLib/
//! kmeans_kd.cpp`. The per-round assignment step uses an
//! [`ApproxMeansIndex`] exactly as the original's OpenMP loop uses an ANN
//! kd-tree, and is parallelized with `rayon` in place of OpenMP. Centroids
//! are carried in double precision across rounds (`mean_f64`), rounded to
//! bytes only once, for the returned [`ClusterResult::means`] — the
//! original's `double *means` array is never rounded mid-convergence
//! either.

use rand::seq::index::sample;
use rand::Rng;
use rayon::prelude::*;

use crate::ann::ApproxMeansIndex;
use crate::descriptor::{mean_f64, round_descriptor};
use crate::error::{Result, VocabError};
use crate::store::{DescriptorStore, Handle};

/// Upper bound on Lloyd's-algorithm rounds within one restart, guarding
/// against pathological non-convergence.
const MAX_ROUNDS: usize = 100;

/// Result of one k-means restart (or of the best of several restarts).
pub struct ClusterResult {
    /// `k` centroids, each `dim` bytes, rounded from the double-precision
    /// centroids the round loop converged to. A centroid whose
    /// corresponding cluster ended up empty still holds its last computed
    /// value, but callers must consult `cluster_sizes` to recognize it as
    /// empty.
    pub means: Vec<Vec<u8>>,
    /// `assignment[i]` is the cluster index chosen for `handles[i]`.
    pub assignment: Vec<usize>,
    /// Number of points assigned to each cluster; a `0` marks an empty
    /// cluster (see SPEC_FULL.md §4.2 step 3).
    pub cluster_sizes: Vec<usize>,
    /// Sum of squared distances from each point to its assigned centroid.
    pub distortion: f64,
}

/// Run `restarts` independent k-means clusterings of `handles` into `k`
/// clusters and return the one with the lowest distortion.
///
/// `handles.len()` must be `>= k`; this is enforced by `TreeBuilder`
/// before calling in, and checked here defensively.
pub fn cluster<R: Rng>(
    store: &DescriptorStore,
    handles: &[Handle],
    k: usize,
    restarts: usize,
    rng: &mut R,
) -> Result<ClusterResult> {
    if handles.len() < k {
        return Err(VocabError::ResourceExhausted(format!(
            "cannot form {} clusters from {} points",
            k,
            handles.len()
        )));
    }
    if restarts == 0 {
        return Err(VocabError::InvalidInput(
            "restarts must be at least 1".to_string(),
        ));
    }

    let mut best: Option<ClusterResult> = None;
    for _ in 0..restarts {
        let result = cluster_once(store, handles, k, rng);
        match &best {
            Some(b) if b.distortion <= result.distortion => {}
            _ => best = Some(result),
        }
    }
    Ok(best.expect("at least one restart ran"))
}

fn cluster_once<R: Rng>(
    store: &DescriptorStore,
    handles: &[Handle],
    k: usize,
    rng: &mut R,
) -> ClusterResult {
    let dim = store.dim();
    let n = handles.len();

    let seed_indices: Vec<usize> = sample(rng, n, k).into_iter().collect();
    let mut means: Vec<Vec<f64>> = seed_indices
        .iter()
        .map(|&i| store.get(handles[i]).iter().map(|&b| b as f64).collect())
        .collect();

    let mut assignment = vec![usize::MAX; n];
    let mut cluster_sizes = vec![0usize; k];
    let mut distortion = 0f64;

    for _round in 0..MAX_ROUNDS {
        let index = ApproxMeansIndex::build(&means, dim);

        let points: Vec<&[u8]> = handles.iter().map(|&h| store.get(h)).collect();
        let assigned: Vec<(usize, f64)> = points
            .par_iter()
            .map(|p| index.nearest(p))
            .collect();

        let mut changed = false;
        distortion = 0.0;
        for (i, (cluster_idx, dist)) in assigned.iter().enumerate() {
            if assignment[i] != *cluster_idx {
                changed = true;
            }
            assignment[i] = *cluster_idx;
            distortion += dist;
        }

        cluster_sizes = vec![0usize; k];
        for &a in &assignment {
            cluster_sizes[a] += 1;
        }

        if !changed {
            break;
        }

        let mut groups: Vec<Vec<&[u8]>> = vec![Vec::new(); k];
        for (i, &a) in assignment.iter().enumerate() {
            groups[a].push(points[i]);
        }
        for (c, group) in groups.iter().enumerate() {
            if !group.is_empty() {
                means[c] = mean_f64(group, dim);
            }
        }
    }

    let byte_means: Vec<Vec<u8>> = means.iter().map(|m| round_descriptor(m)).collect();

    ClusterResult {
        means: byte_means,
        assignment,
        cluster_sizes,
        distortion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn store_with(descs: &[[u8; 4]]) -> (DescriptorStore, Vec<Handle>) {
        let mut store = DescriptorStore::new(4);
        let handles: Vec<Handle> = descs.iter().map(|d| store.push(d)).collect();
        (store, handles)
    }

    #[test]
    fn eight_descriptors_split_into_two_natural_clusters() {
        let descs: Vec<[u8; 4]> = (0u8..8)
            .map(|v| [v, v, v, v])
            .collect();
        let (store, handles) = store_with(&descs);
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let result = cluster(&store, &handles, 2, 3, &mut rng).unwrap();

        let mut groups: Vec<Vec<usize>> = vec![Vec::new(), Vec::new()];
        for (i, &c) in result.assignment.iter().enumerate() {
            groups[c].push(i);
        }
        groups.sort_by_key(|g| g[0]);
        assert_eq!(groups[0], vec![0, 1, 2, 3]);
        assert_eq!(groups[1], vec![4, 5, 6, 7]);
    }

    #[test]
    fn too_few_points_is_resource_exhausted() {
        let (store, handles) = store_with(&[[0, 0, 0, 0], [1, 1, 1, 1]]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let err = cluster(&store, &handles, 5, 1, &mut rng).unwrap_err();
        assert!(matches!(err, VocabError::ResourceExhausted(_)));
    }
}
