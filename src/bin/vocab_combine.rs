//! Merge several database trees built over the same vocabulary into one.
//!
//! Mirrors `VocabCombine`'s driver surface (SPEC_FULL.md §6). All input
//! trees must share the same topology (see [`vocabtree::VocabTree::combine`]).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use vocabtree::codec;

/// Combine two or more database trees sharing the same vocabulary.
#[derive(Parser, Debug)]
#[command(name = "vocab-combine")]
struct Args {
    /// Output tree file.
    out: PathBuf,

    /// Input tree files, combined in order.
    #[arg(required = true, num_args = 2..)]
    inputs: Vec<PathBuf>,
}

fn run(args: Args) -> vocabtree::Result<()> {
    let mut inputs = args.inputs.into_iter();
    let first_path = inputs.next().expect("clap enforces at least 2 inputs");
    let mut base = codec::read(&mut std::fs::File::open(&first_path)?)?;
    info!("base tree: {}", first_path.display());

    for path in inputs {
        let other = codec::read(&mut std::fs::File::open(&path)?)?;
        base.combine(&other)?;
        info!("combined in {}", path.display());
    }

    let mut out = std::fs::File::create(&args.out)?;
    codec::write(&base, &mut out)?;
    info!(
        "wrote combined tree ({} images) to {}",
        base.database_image_count(),
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
            error!("vocab-combine failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
