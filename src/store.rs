//! Chunked, append-only storage for training descriptors.
//!
//! The clusterer and tree builder work with arrays of descriptor
//! *handles* rather than owned copies; `DescriptorStore` guarantees those
//! handles stay valid for as long as the store is alive, while keeping
//! any single allocation bounded (mirroring the original's chunked
//! `MAX_ARRAY_SIZE` allocation loop in `VocabLearn.cpp`).

/// Maximum descriptor bytes per chunk (2**23, matching the original's
/// `MAX_ARRAY_SIZE`).
const MAX_CHUNK_BYTES: usize = 8 * 1024 * 1024;

/// A stable handle to one descriptor held by a [`DescriptorStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    chunk: usize,
    offset: usize,
}

/// Owns contiguous byte storage for training descriptors, chunked so that
/// no single allocation exceeds [`MAX_CHUNK_BYTES`].
///
/// Iteration order equals insertion order. There is no resize or delete:
/// the store exists to back one `Build` call.
pub struct DescriptorStore {
    dim: usize,
    chunks: Vec<Vec<u8>>,
    handles: Vec<Handle>,
}

impl DescriptorStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            chunks: vec![Vec::new()],
            handles: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Append one descriptor of length `dim`, returning a stable handle.
    pub fn push(&mut self, descriptor: &[u8]) -> Handle {
        debug_assert_eq!(descriptor.len(), self.dim);

        let mut chunk_idx = self.chunks.len() - 1;
        if self.chunks[chunk_idx].len() + self.dim > MAX_CHUNK_BYTES {
            self.chunks.push(Vec::with_capacity(MAX_CHUNK_BYTES));
            chunk_idx += 1;
        }

        let offset = self.chunks[chunk_idx].len();
        self.chunks[chunk_idx].extend_from_slice(descriptor);

        let handle = Handle {
            chunk: chunk_idx,
            offset,
        };
        self.handles.push(handle);
        handle
    }

    /// Append many descriptors from one flat buffer of `n * dim` bytes.
    pub fn extend_flat(&mut self, flat: &[u8]) -> Vec<Handle> {
        flat.chunks_exact(self.dim).map(|d| self.push(d)).collect()
    }

    #[inline]
    pub fn get(&self, handle: Handle) -> &[u8] {
        &self.chunks[handle.chunk][handle.offset..handle.offset + self.dim]
    }

    pub fn handles(&self) -> &[Handle] {
        &self.handles
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.handles.iter().map(move |&h| self.get(h))
    }
}
