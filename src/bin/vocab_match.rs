//! Score a list of query images against a populated database tree and
//! report the top matches for each.
//!
//! Mirrors `VocabMatch`'s driver surface (SPEC_FULL.md §6).

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::{error, info};

use vocabtree::keyfile::read_list_file;
use vocabtree::{codec, keyfile, DistanceType, VocabError};

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

/// Score every query image's key file against a database tree.
#[derive(Parser, Debug)]
#[command(name = "vocab-match")]
struct Args {
    /// Database tree file (populated and weighted).
    tree: PathBuf,

    /// Path to a list file naming one key file per database image, in
    /// the same order used to build the tree. Checked against the
    /// tree's recorded image count; not re-read.
    db_list: PathBuf,

    /// Path to a list file naming one key file per query image.
    query_list: PathBuf,

    /// Number of top-scoring database images reported per query.
    num_neighbors: usize,

    /// Output match file.
    out: PathBuf,

    /// Override the tree's recorded similarity measure.
    #[arg(long, value_enum)]
    distance_type: Option<DistanceArg>,

    /// Skip per-query normalization.
    #[arg(long)]
    no_normalize: bool,

    /// Minimum feature scale kept from each query key file.
    #[arg(long, default_value_t = 0.0)]
    min_scale: f32,
}

fn run(args: Args) -> vocabtree::Result<()> {
    let mut file = std::fs::File::open(&args.tree)?;
    let mut tree = codec::read(&mut file)?;
    if let Some(dtype) = args.distance_type {
        tree.set_distance_type(dtype.into());
    }

    let db_paths = read_list_file(&args.db_list)?;
    if db_paths.len() as u32 != tree.database_image_count() {
        return Err(VocabError::InvalidInput(format!(
            "db_list names {} images but tree holds {}",
            db_paths.len(),
            tree.database_image_count()
        )));
    }

    let query_paths = read_list_file(&args.query_list)?;
    info!(
        "scoring {} query images against a database of {} images",
        query_paths.len(),
        db_paths.len()
    );

    let mut out = std::fs::File::create(&args.out)?;

    for (query_idx, path) in query_paths.iter().enumerate() {
        let keys = keyfile::read_keys_filtered(path, args.min_scale)?;
        let descriptors: Vec<_> = keys.into_iter().map(|k| k.descriptor).collect();
        let scores = tree.score_query(&descriptors, !args.no_normalize)?;

        let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        ranked.truncate(args.num_neighbors);

        for (db_idx, score) in ranked {
            writeln!(out, "{} {} {:.6}", query_idx, db_idx, score)?;
        }
    }

    info!("wrote matches to {}", args.out.display());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("vocab-match failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
