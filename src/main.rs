// src/main.rs
use anyhow::{anyhow, Result};
use clap::Parser;
use itertools::Itertools;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pusa_calc::batch::process_batch;
use pusa_calc::cli::{Cli, Commands};
use pusa_calc::io::OutputSpec;
use pusa_calc::model::{Kernel, ModelId, ModelRegistry};
use pusa_calc::processing::{ParallelProcessor, ProcessOptions};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let processor = ParallelProcessor::new(None);
    let output = cli.output.to_string_lossy().to_string();
    let options = ProcessOptions {
        output: OutputSpec::from_flags(
            cli.float,
            cli.scale_factor,
            &cli.compress,
            cli.compress_level,
            !cli.no_tiled,
        ),
        input_scale_factor: cli.input_scale_factor,
    };

    match &cli.command {
        Commands::Predict {
            model_source,
            parameter,
            bands,
        } => {
            let registry = ModelRegistry::new();
            registry.initialize_from_path(model_source)?;
            let predictor = registry.predictor(parameter)?;
            info!(
                model = %predictor.params().model,
                training_points = predictor.params().n_training(),
                features = predictor.params().n_features(),
                "model ready"
            );

            let options = ProcessOptions {
                output: options.output.float32(),
                ..options
            };
            let summary = processor.process(&predictor, &paths(bands), &output, &options)?;
            println!(
                "{}",
                json!({ "parameter": parameter, "band": summary.band, "mean": summary.mean })
            );
        }
        Commands::Index {
            index,
            bands,
            ocvi_exponent,
        } => {
            if bands.len() != index.bands().len() {
                return Err(anyhow!(
                    "{} needs {} bands ({}), got {}",
                    index.label(),
                    index.bands().len(),
                    index.bands().iter().join(", "),
                    bands.len()
                ));
            }
            let calculator = index.calculator(*ocvi_exponent);
            let summary = processor.process(calculator.as_ref(), &paths(bands), &output, &options)?;
            println!("{}", serde_json::to_string(&summary)?);
        }
        Commands::Inspect { model_source } => {
            let registry = ModelRegistry::new();
            let store = registry.initialize_from_path(model_source)?;
            for (name, tensor) in store.variables() {
                println!("{:<28} {:<8} {:?}", name, tensor.kind(), tensor.shape());
            }
            for (name, diag) in store.diagnostics() {
                println!("! {}: {}", name, diag);
            }
            for model in ModelId::ALL {
                match store.parameter_set(model) {
                    Ok(set) => println!(
                        "{} -> {}: {} training points x {} features, {} kernel",
                        model,
                        model.band_name(),
                        set.n_training(),
                        set.n_features(),
                        match set.kernel {
                            Kernel::Weighted { .. } => "weighted",
                            Kernel::Unweighted => "unweighted",
                        }
                    ),
                    Err(e) => println!("{} -> {}: unavailable ({})", model, model.band_name(), e),
                }
            }
            return Ok(());
        }
        Commands::Batch { config } => {
            let summaries = process_batch(config)?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
            return Ok(());
        }
    }

    info!("Processing complete: {}", cli.output.display());
    Ok(())
}

fn paths(bands: &[std::path::PathBuf]) -> Vec<String> {
    bands
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect()
}
