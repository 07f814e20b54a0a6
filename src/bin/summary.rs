use std::path::PathBuf;

use adaptive_abc::{
    error::{ABCErr, ABCResult},
    storage::{
        filesystem::{load_generation_file, FileSystem},
        Storage,
    },
    Generation,
};
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Summary {
    /// Checkpoint file, or a directory of them (the latest is used)
    #[clap(value_parser)]
    path: PathBuf,
}

/// Print the control values and posterior moments of a saved generation
///
/// ```
/// export RUST_LOG=error,adaptive_abc=info
/// cargo run --release --bin abc-summary -- ./out/fit
/// ```
fn main() -> ABCResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let summary = Summary::parse();
    let gen = load(&summary.path)?;

    println!("Generation:      {}", gen.number);
    println!("Threshold:       {}", gen.threshold);
    println!("Shrink step:     {}", gen.shrink_step);
    println!("Failed attempts: {}", gen.failed_attempts);
    println!("Particles:       {}", gen.pop.len());
    println!("Acceptance:      {}", gen.pop.acceptance());
    println!("Mean:            {:?}", gen.pop.mean());
    println!("Variance:        {:?}", gen.pop.variance());

    Ok(())
}

fn load(path: &PathBuf) -> ABCResult<Generation> {
    if path.is_dir() {
        FileSystem::new(path.clone())
            .load_previous_gen()?
            .ok_or_else(|| ABCErr::StorageError(format!("No generations saved in {:?}", path)))
    } else {
        log::info!("Loading generation from {:?}", path);
        load_generation_file(path)
    }
}
