//! A hierarchical visual-word vocabulary tree for image retrieval:
//! learn a branching k-means tree over local-feature descriptors,
//! populate it as an inverted file over a database of images, weight it
//! by TF·IDF, and score queries against the database by bag-of-words
//! similarity.
//!
//! The pieces, bottom-up:
//!  - [`descriptor`] / [`store`]: the raw descriptor type and its
//!    chunked training-time storage.
//!  - [`ann`] / [`clusterer`] / [`builder`]: approximate nearest-centroid
//!    search, one k-means round, and recursive tree construction.
//!  - [`node`] / [`tree`]: the tree's node representation and the
//!    populated-database API (`VocabTree`).
//!  - [`flat`]: a contiguous arena view of a trained tree, for
//!    repeated-query callers.
//!  - [`codec`]: the on-disk binary tree format.
//!  - [`keyfile`]: text/binary descriptor file I/O for the CLI drivers.
//!  - [`error`]: the crate's error type.

pub mod ann;
pub mod builder;
pub mod clusterer;
pub mod codec;
pub mod descriptor;
pub mod error;
pub mod flat;
pub mod keyfile;
pub mod node;
pub mod store;
pub mod tree;

pub use descriptor::{Descriptor, DistanceType};
pub use error::{BowResult, Result, VocabError};
pub use tree::VocabTree;
