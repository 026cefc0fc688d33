use serde::{Deserialize, Serialize};

/// A local-feature descriptor: `dim` unsigned-byte components.
///
/// Equality and ordering are irrelevant to this crate; only squared
/// Euclidean distance between descriptors matters.
pub type Descriptor = Vec<u8>;

/// Squared Euclidean distance between two descriptors of equal length.
///
/// Accumulated in `u64`: for dim up to a few thousand and byte-valued
/// components, `dim * 255 * 255` comfortably fits, which `u32` would not
/// for the larger end of plausible `dim` values.
#[inline]
pub fn distance_sq(a: &[u8], b: &[u8]) -> u64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).fold(0u64, |acc, (&x, &y)| {
        let d = x as i64 - y as i64;
        acc + (d * d) as u64
    })
}

/// Component-wise arithmetic mean of a non-empty collection of
/// same-length descriptors, rounded to the nearest byte.
pub fn mean(descriptors: &[&[u8]], dim: usize) -> Descriptor {
    round_descriptor(&mean_f64(descriptors, dim))
}

/// Component-wise arithmetic mean of a non-empty collection of
/// same-length descriptors, kept in double precision.
///
/// Used by the k-means round loop (`clusterer::cluster_once`), which must
/// carry centroids as floating point across rounds rather than rounding
/// to a byte after every recompute — `original_source/VocabLib/
/// kmeans_kd.cpp` accumulates its `double *means` the same way, only
/// converting to bytes once, at final centroid storage (see
/// [`round_descriptor`]).
pub fn mean_f64(descriptors: &[&[u8]], dim: usize) -> Vec<f64> {
    let mut sums = vec![0f64; dim];
    for d in descriptors {
        for (s, &v) in sums.iter_mut().zip(d.iter()) {
            *s += v as f64;
        }
    }
    let n = descriptors.len() as f64;
    sums.into_iter().map(|s| s / n).collect()
}

/// Round a double-precision centroid down to the byte-valued
/// [`Descriptor`] representation used for storage, clamping to
/// `[0, 255]`.
pub fn round_descriptor(values: &[f64]) -> Descriptor {
    values.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8).collect()
}

/// Squared Euclidean distance between a floating-point centroid and a
/// byte-valued descriptor, used by the k-means assignment step so that
/// nearest-centroid lookups see the same float precision the centroid is
/// carried in across rounds (`original_source/VocabLib/kmeans_kd.cpp`'s
/// `fill_vector_float`/`annkPriSearch` pairing of a `double` kd-tree with
/// byte-valued input points).
#[inline]
pub fn distance_sq_f64(centroid: &[f64], query: &[u8]) -> f64 {
    debug_assert_eq!(centroid.len(), query.len());
    centroid
        .iter()
        .zip(query)
        .fold(0f64, |acc, (&c, &q)| {
            let d = c - q as f64;
            acc + d * d
        })
}

/// The similarity measure used to score a query against the database.
///
/// Must be identical at build-db time and at query time; the tree
/// records which one it was built with and `VocabTree` refuses to mix
/// them (see [`crate::error::VocabError::StateViolation`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum DistanceType {
    /// similarity = sum of per-word products, vectors L2-normalized.
    Dot = 0,
    /// similarity = sum of per-word minimums (histogram intersection),
    /// vectors L1-normalized.
    Min = 1,
}

impl DistanceType {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(DistanceType::Dot),
            1 => Some(DistanceType::Min),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_sq_basic() {
        let a = [0u8, 0, 0, 0];
        let b = [3u8, 4, 0, 0];
        assert_eq!(distance_sq(&a, &b), 9 + 16);
    }

    #[test]
    fn mean_rounds_to_nearest() {
        let a = [0u8, 255];
        let b = [1u8, 0];
        let m = mean(&[&a, &b], 2);
        assert_eq!(m, vec![1, 128]);
    }

    #[test]
    fn mean_f64_keeps_fractional_precision() {
        let a = [0u8, 255];
        let b = [1u8, 0];
        let b2 = [1u8, 0];
        let m = mean_f64(&[&a, &b, &b2], 2);
        assert!((m[0] - (2.0 / 3.0)).abs() < 1e-9);
        assert!((m[1] - 85.0).abs() < 1e-9);
    }

    #[test]
    fn round_descriptor_clamps_to_byte_range() {
        let rounded = round_descriptor(&[-1.0, 256.0, 127.6]);
        assert_eq!(rounded, vec![0, 255, 128]);
    }

    #[test]
    fn distance_sq_f64_matches_integer_distance() {
        let centroid = [1.0f64, 2.0, 3.0];
        let query = [0u8, 0, 0];
        assert_eq!(distance_sq_f64(&centroid, &query), 1.0 + 4.0 + 9.0);
    }
}
