//! Runs one side-tuning experiment on synthetic data and prints its CSV row.
//!
//! Usage: `ferrite-sidetune [experiment.json] [results.csv]`

use ferrite_sidetune::experiment::{synthetic_dataset, ExperimentSpec};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Offset between the model seed and the synthetic data seed.
const DATA_SEED_OFFSET: u64 = 1_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let spec = match args.next() {
        Some(path) => ExperimentSpec::load_json(&path)?,
        None => ExperimentSpec::toy(),
    };
    tracing::info!(run = %spec.name, "loaded experiment");

    let mut rng = StdRng::seed_from_u64(spec.seed.wrapping_add(DATA_SEED_OFFSET));
    let train = synthetic_dataset(&spec, 8, &mut rng)?;
    let val = synthetic_dataset(&spec, 4, &mut rng)?;
    let test = synthetic_dataset(&spec, 4, &mut rng)?;

    let (_, report) = spec.run(&train, &val, &test)?;
    println!("{}", report.csv_row());
    if let Some(csv) = args.next() {
        report.append_csv(&csv)?;
    }
    Ok(())
}
