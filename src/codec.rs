//! On-disk binary layout for a [`VocabTree`], fixed little-endian.
//!
//! The original serializes node records host-endian via raw `fwrite`;
//! per SPEC_FULL.md §4.5/§11 this crate fixes the byte order instead of
//! inheriting that portability hazard, and writes the same DFS
//! pre-order record shape by hand with `byteorder` rather than `bincode`
//! so the file format is a stable contract independent of the in-memory
//! `Node` representation.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::descriptor::DistanceType;
use crate::error::{Result, VocabError};
use crate::node::{Interior, Leaf, Node, PostingEntry};
use crate::tree::VocabTree;

const TAG_INTERIOR: u8 = 0;
const TAG_LEAF: u8 = 1;

/// Write `tree` to `w` in the fixed little-endian layout described in
/// SPEC_FULL.md §4.5.
pub fn write<W: Write>(tree: &VocabTree, w: &mut W) -> Result<()> {
    w.write_i32::<LittleEndian>(tree.bf() as i32)?;
    w.write_i32::<LittleEndian>(tree.depth() as i32)?;
    w.write_i32::<LittleEndian>(tree.dim() as i32)?;
    w.write_i32::<LittleEndian>(tree.distance_type() as i32)?;
    w.write_u64::<LittleEndian>(tree.total_node_count())?;

    match tree.root() {
        Some(root) => write_node(root, w)?,
        None => {
            return Err(VocabError::StateViolation(
                "cannot write an untrained tree".into(),
            ))
        }
    }
    Ok(())
}

fn write_node<W: Write>(node: &Node, w: &mut W) -> Result<()> {
    match node {
        Node::Interior(i) => write_interior(i, w),
        Node::Leaf(l) => write_leaf(l, w),
    }
}

fn write_interior<W: Write>(interior: &Interior, w: &mut W) -> Result<()> {
    w.write_u8(TAG_INTERIOR)?;
    w.write_all(&interior.centroid)?;
    w.write_u64::<LittleEndian>(interior.id)?;

    let mut presence = 0u32;
    for (i, child) in interior.children.iter().enumerate() {
        if child.is_some() {
            presence |= 1 << i;
        }
    }
    w.write_u32::<LittleEndian>(presence)?;

    for child in interior.children.iter().flatten() {
        write_node(child, w)?;
    }
    Ok(())
}

fn write_leaf<W: Write>(leaf: &Leaf, w: &mut W) -> Result<()> {
    w.write_u8(TAG_LEAF)?;
    w.write_all(&leaf.centroid)?;
    w.write_u64::<LittleEndian>(leaf.id)?;
    w.write_f32::<LittleEndian>(leaf.leaf_weight)?;
    w.write_u32::<LittleEndian>(leaf.postings.len() as u32)?;
    for entry in &leaf.postings {
        w.write_u32::<LittleEndian>(entry.image_id)?;
        w.write_f32::<LittleEndian>(entry.count)?;
    }
    Ok(())
}

/// Read a [`VocabTree`] from `r`, inverse of [`write`].
///
/// The returned tree's `database_image_count` is recovered as one past
/// the maximum `image_id` seen across all posting lists.
pub fn read<R: Read>(r: &mut R) -> Result<VocabTree> {
    let bf = r.read_i32::<LittleEndian>()?;
    let depth = r.read_i32::<LittleEndian>()?;
    let dim = r.read_i32::<LittleEndian>()?;
    let distance_type_raw = r.read_i32::<LittleEndian>()?;
    let total_node_count = r.read_u64::<LittleEndian>()?;

    if bf < 1 || depth < 1 || dim < 1 {
        return Err(VocabError::InvalidInput(
            "tree file header has non-positive bf/depth/dim".into(),
        ));
    }
    let distance_type = DistanceType::from_i32(distance_type_raw).ok_or_else(|| {
        VocabError::InvalidInput(format!("unknown distance_type tag {}", distance_type_raw))
    })?;

    let dim = dim as usize;
    let mut max_image_id: Option<u32> = None;
    let root = read_node(r, dim, bf as usize, &mut max_image_id)?;

    let database_image_count = max_image_id.map(|m| m + 1).unwrap_or(0);

    Ok(VocabTree::from_parts(
        root,
        bf as usize,
        depth as usize,
        dim,
        total_node_count,
        distance_type,
        database_image_count,
    ))
}

fn read_node<R: Read>(
    r: &mut R,
    dim: usize,
    bf: usize,
    max_image_id: &mut Option<u32>,
) -> Result<Node> {
    let tag = r.read_u8()?;
    let mut centroid = vec![0u8; dim];
    r.read_exact(&mut centroid)?;
    let id = r.read_u64::<LittleEndian>()?;

    match tag {
        TAG_INTERIOR => {
            let presence = r.read_u32::<LittleEndian>()?;
            let mut children = Vec::with_capacity(bf);
            for i in 0..bf {
                if presence & (1 << i) != 0 {
                    children.push(Some(read_node(r, dim, bf, max_image_id)?));
                } else {
                    children.push(None);
                }
            }
            Ok(Node::Interior(Interior {
                id,
                centroid,
                children,
                diagnostic_weight: 0.0,
            }))
        }
        TAG_LEAF => {
            let leaf_weight = r.read_f32::<LittleEndian>()?;
            let n_postings = r.read_u32::<LittleEndian>()?;
            let mut postings = Vec::with_capacity(n_postings as usize);
            for _ in 0..n_postings {
                let image_id = r.read_u32::<LittleEndian>()?;
                let count = r.read_f32::<LittleEndian>()?;
                *max_image_id = Some(max_image_id.map_or(image_id, |m| m.max(image_id)));
                postings.push(PostingEntry { image_id, count });
            }
            Ok(Node::Leaf(Leaf {
                id,
                centroid,
                leaf_weight,
                postings,
            }))
        }
        other => Err(VocabError::InvalidInput(format!(
            "unknown node tag {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;

    fn toy_descriptors() -> Vec<Descriptor> {
        (0u8..8).map(|v| vec![v, v, v, v]).collect()
    }

    #[test]
    fn round_trips_empty_database() {
        let tree = VocabTree::build(4, 1, 2, 3, &toy_descriptors()).unwrap();
        let mut buf = Vec::new();
        write(&tree, &mut buf).unwrap();
        let read_back = read(&mut &buf[..]).unwrap();

        assert_eq!(read_back.bf(), tree.bf());
        assert_eq!(read_back.depth(), tree.depth());
        assert_eq!(read_back.dim(), tree.dim());
        assert_eq!(read_back.total_node_count(), tree.total_node_count());
        assert_eq!(read_back.database_image_count(), 0);
    }

    #[test]
    fn round_trips_populated_database() {
        let mut tree = VocabTree::build(4, 1, 2, 3, &toy_descriptors()).unwrap();
        tree.add_image(0, &[vec![0, 0, 0, 0]]).unwrap();
        tree.add_image(1, &[vec![7, 7, 7, 7]]).unwrap();
        tree.compute_tfidf_weights(2).unwrap();

        let mut buf = Vec::new();
        write(&tree, &mut buf).unwrap();
        let read_back = read(&mut &buf[..]).unwrap();

        assert_eq!(read_back.database_image_count(), 2);

        let scores_before = tree.score_query(&[vec![0, 0, 0, 0]], true).unwrap();
        let scores_after = read_back.score_query(&[vec![0, 0, 0, 0]], true).unwrap();
        assert_eq!(scores_before, scores_after);
    }
}
