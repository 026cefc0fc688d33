//! Learn a vocabulary tree from a list of key files.
//!
//! Mirrors the original `VocabLearn` driver's argument surface
//! (SPEC_FULL.md §6).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use vocabtree::keyfile::{read_list_file, KEY_DESCRIPTOR_DIM};
use vocabtree::{keyfile, VocabTree};

/// Learn a hierarchical k-means vocabulary tree from training key files.
#[derive(Parser, Debug)]
#[command(name = "vocab-learn")]
struct Args {
    /// Path to a list file naming one key file per line.
    list: PathBuf,

    /// Tree depth.
    depth: usize,

    /// Branching factor at every interior node.
    branching_factor: usize,

    /// Random restarts per k-means clustering round.
    #[arg(default_value_t = 1)]
    restarts: usize,

    /// Output tree file.
    out: PathBuf,

    /// Minimum feature scale kept from each key file.
    #[arg(long, default_value_t = 0.0)]
    min_scale: f32,
}

fn run(args: Args) -> vocabtree::Result<()> {
    let key_paths = read_list_file(&args.list)?;
    info!("training on {} key files", key_paths.len());

    let mut descriptors = Vec::new();
    for path in &key_paths {
        let keys = keyfile::read_keys_filtered(path, args.min_scale)?;
        descriptors.extend(keys.into_iter().map(|k| k.descriptor));
    }
    info!("loaded {} training descriptors", descriptors.len());

    let tree = VocabTree::build(
        KEY_DESCRIPTOR_DIM,
        args.depth,
        args.branching_factor,
        args.restarts,
        &descriptors,
    )?;

    let mut out = std::fs::File::create(&args.out)?;
    vocabtree::codec::write(&tree, &mut out)?;
    info!(
        "wrote tree with {} nodes to {}",
        tree.total_node_count(),
        args.out.display()
    );

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("vocab-learn failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
