//! Populate a vocabulary tree's inverted file from a list of database
//! images, optionally weighting and normalizing it.
//!
//! Mirrors the original `VocabBuildDB` driver's argument surface
//! (SPEC_FULL.md §6).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::{error, info};

use vocabtree::keyfile::read_list_file;
use vocabtree::{codec, keyfile, DistanceType};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DistanceArg {
    Dot,
    Min,
}

impl From<DistanceArg> for DistanceType {
    fn from(v: DistanceArg) -> Self {
        match v {
            DistanceArg::Dot => DistanceType::Dot,
            DistanceArg::Min => DistanceType::Min,
        }
    }
}

/// Build (or extend) a database of images against a trained vocabulary
/// tree.
#[derive(Parser, Debug)]
#[command(name = "vocab-build-db")]
struct Args {
    /// Path to a list file naming one key file per database image, in
    /// the order images should receive ids.
    list: PathBuf,

    /// Input tree file (trained, from `vocab-learn`).
    tree_in: PathBuf,

    /// Output tree file, with the populated inverted file.
    tree_out: PathBuf,

    /// Skip TF-IDF weighting.
    #[arg(long)]
    no_tfidf: bool,

    /// Skip per-image normalization.
    #[arg(long)]
    no_normalize: bool,

    /// Image id assigned to the first key file in the list.
    #[arg(long, default_value_t = 0)]
    start_id: u32,

    /// Minimum feature scale kept from each key file.
    #[arg(long, default_value_t = 1.4)]
    min_scale: f32,

    /// Similarity measure to record on the tree.
    #[arg(long, value_enum)]
    distance_type: Option<DistanceArg>,
}

fn run(args: Args) -> vocabtree::Result<()> {
    let mut file = std::fs::File::open(&args.tree_in)?;
    let mut tree = codec::read(&mut file)?;

    if let Some(dtype) = args.distance_type {
        tree.set_distance_type(dtype.into());
    }

    let key_paths = read_list_file(&args.list)?;
    info!("adding {} images to the database", key_paths.len());

    let mut image_id = args.start_id;
    for path in &key_paths {
        let keys = keyfile::read_keys_filtered(path, args.min_scale)?;
        let descriptors: Vec<_> = keys.into_iter().map(|k| k.descriptor).collect();
        let magnitude = tree.add_image(image_id, &descriptors)?;
        info!(
            "image {} ({}): {} descriptors, magnitude {:.4}",
            image_id,
            path.display(),
            descriptors.len(),
            magnitude
        );
        image_id += 1;
    }

    if !args.no_tfidf {
        tree.compute_tfidf_weights(key_paths.len() as u32)?;
    }
    if !args.no_normalize {
        tree.normalize(args.start_id, key_paths.len() as u32)?;
    }

    let mut out = std::fs::File::create(&args.tree_out)?;
    codec::write(&tree, &mut out)?;
    info!("wrote database tree to {}", args.tree_out.display());

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("vocab-build-db failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

