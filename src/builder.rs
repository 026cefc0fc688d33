//! Recursive hierarchical k-means tree construction.
//!
//! Grounded on `donkeyteethUX-abow/src/vocab.rs`'s `cluster()` (the
//! recursive partition-then-recurse shape, next-node-id bookkeeping) and
//! `original_source/VocabLib/VocabTree.cpp`'s `BuildRecurse` depth/size
//! base cases (stop recursing at the depth limit or on a singleton
//! cluster).

use log::debug;
use rand::Rng;

use crate::clusterer::cluster;
use crate::descriptor::mean;
use crate::error::{Result, VocabError};
use crate::node::{Interior, Leaf, Node};
use crate::store::{DescriptorStore, Handle};

/// Build a balanced `bf`-ary tree of depth `depth` from `handles` by
/// recursive hierarchical k-means.
///
/// Fails with [`VocabError::ResourceExhausted`] if `handles.len() < bf`
/// (cannot even form the root-level clusters).
pub fn build_tree<R: Rng>(
    store: &DescriptorStore,
    handles: &[Handle],
    depth: usize,
    bf: usize,
    restarts: usize,
    rng: &mut R,
) -> Result<Node> {
    if handles.len() < bf {
        return Err(VocabError::ResourceExhausted(format!(
            "need at least {} training descriptors to form the root's {} \
             clusters, got {}",
            bf,
            bf,
            handles.len()
        )));
    }
    if depth == 0 {
        return Err(VocabError::InvalidInput(
            "tree depth must be at least 1".to_string(),
        ));
    }
    build_subtree(store, handles, 0, depth, bf, restarts, rng)
}

fn build_subtree<R: Rng>(
    store: &DescriptorStore,
    handles: &[Handle],
    depth_curr: usize,
    depth: usize,
    bf: usize,
    restarts: usize,
    rng: &mut R,
) -> Result<Node> {
    debug!(
        "clustering {} descriptors at depth {} (branching factor {})",
        handles.len(),
        depth_curr,
        bf
    );

    let centroid = mean(
        &handles.iter().map(|&h| store.get(h)).collect::<Vec<_>>(),
        store.dim(),
    );

    let result = cluster(store, handles, bf, restarts, rng)?;

    let mut children: Vec<Option<Node>> = Vec::with_capacity(bf);
    for c in 0..bf {
        if result.cluster_sizes[c] == 0 {
            children.push(None);
            continue;
        }

        let member_handles: Vec<Handle> = result
            .assignment
            .iter()
            .enumerate()
            .filter(|&(_, &a)| a == c)
            .map(|(i, _)| handles[i])
            .collect();

        let can_recurse = depth_curr + 1 < depth && member_handles.len() > 1;
        if can_recurse {
            let child = build_subtree(
                store,
                &member_handles,
                depth_curr + 1,
                depth,
                bf,
                restarts,
                rng,
            )?;
            children.push(Some(child));
        } else {
            children.push(Some(Node::Leaf(Leaf {
                id: 0,
                centroid: result.means[c].clone(),
                leaf_weight: 1.0,
                postings: Vec::new(),
            })));
        }
    }

    Ok(Node::Interior(Interior {
        id: 0,
        centroid,
        children,
        diagnostic_weight: 0.0,
    }))
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
    fn depth_one_bf_two_yields_two_leaves() {
        let descs: Vec<[u8; 4]> = (0u8..8).map(|v| [v, v, v, v]).collect();
        let (store, handles) = store_with(&descs);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut root = build_tree(&store, &handles, 1, 2, 3, &mut rng).unwrap();
        root.compute_ids(0);

        assert_eq!(root.count_leaves(), 2);
        assert_eq!(root.count_nodes(), 3);

        if let Node::Interior(i) = &root {
            assert_eq!(i.children.len(), 2);
            for child in i.children.iter().flatten() {
                assert!(child.is_leaf());
            }
        } else {
            unreachable!("root must be interior");
        }
    }

    #[test]
    fn fails_when_fewer_points_than_branching_factor() {
        let (store, handles) = store_with(&[[0, 0, 0, 0]]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let err = build_tree(&store, &handles, 1, 4, 1, &mut rng).unwrap_err();
        assert!(matches!(err, VocabError::ResourceExhausted(_)));
    }

    #[test]
    fn depth_limit_stops_recursion() {
        let descs: Vec<[u8; 4]> = (0u8..16).map(|v| [v, v, v, v]).collect();
        let (store, handles) = store_with(&descs);
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mut root = build_tree(&store, &handles, 2, 2, 2, &mut rng).unwrap();
        root.compute_ids(0);
        // depth 2, bf 2 => up to 4 leaves under 2 interior children + root
        assert!(root.count_leaves() <= 4);
        assert!(root.count_nodes() >= 1 + root.count_leaves());
    }
}
