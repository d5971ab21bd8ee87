use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use extraction::{BatchStatus, Orchestrator, OrchestratorConfig, Result};
use featurization::{Descriptor, DescriptorConfig, DescriptorEngine, FeaturizationError, MeanColour};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Learn image dictionaries and extract pyramid descriptors.
#[derive(Parser)]
#[command(name = "featurize", version, about)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Learn a dictionary from a set of training images
    Learn {
        /// JSON descriptor configuration; defaults are used when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Where to write the learned model
        #[arg(long)]
        model: PathBuf,
        /// Approximate number of training patches over all images
        #[arg(long, default_value_t = 50_000)]
        patches: usize,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Extract one descriptor per image into an output directory
    Extract {
        /// Learned model written by `featurize learn`
        #[arg(long, required_unless_present = "mean_colour")]
        model: Option<PathBuf>,
        #[arg(long)]
        output: PathBuf,
        /// Error log, `<output>/errors.log` by default
        #[arg(long)]
        errors: Option<PathBuf>,
        /// Worker threads, all cores by default
        #[arg(long)]
        workers: Option<usize>,
        /// Use the per-channel mean colour instead of a learned model
        #[arg(long)]
        mean_colour: bool,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
}

fn learn(config: Option<PathBuf>, model: PathBuf, patches: usize, images: Vec<PathBuf>) -> Result<ExitCode> {
    let config = match config {
        Some(path) => DescriptorConfig::from_json_file(&path)?,
        None => DescriptorConfig::default(),
    };
    let mut engine = DescriptorEngine::new(config)?;

    info!(images = images.len(), patches, "learning dictionary");
    engine.learn(&images, patches)?;
    engine.save_to(&model)?;
    info!(model = %model.display(), dimension = engine.dimension(), "model saved");
    Ok(ExitCode::SUCCESS)
}

fn extract(
    model: Option<PathBuf>,
    output: PathBuf,
    errors: Option<PathBuf>,
    workers: Option<usize>,
    mean_colour: bool,
    images: Vec<PathBuf>,
) -> Result<ExitCode> {
    let descriptor: Box<dyn Descriptor> = match (mean_colour, model) {
        (true, _) => Box::new(MeanColour::default()),
        (false, Some(path)) => Box::new(DescriptorEngine::load_from(&path)?),
        (false, None) => {
            let message = "--model is required unless --mean-colour is given";
            return Err(FeaturizationError::InvalidConfig(message.into()).into());
        }
    };

    let mut config = OrchestratorConfig::new(&output);
    config.worker_count = workers;
    if let Some(errors) = errors {
        config.error_log = errors;
    }

    let orchestrator = Orchestrator::from_config(&config)?;
    let report = orchestrator.run(&*descriptor, &images)?;

    info!(
        total = report.total,
        succeeded = report.succeeded,
        skipped = report.skipped,
        failed = report.failed,
        "batch finished"
    );
    match report.status() {
        BatchStatus::Failed => {
            warn!(log = %config.error_log.display(), "every image failed");
            Ok(ExitCode::FAILURE)
        }
        _ => Ok(ExitCode::SUCCESS),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let outcome = match cli.command {
        Commands::Learn {
            config,
            model,
            patches,
            images,
        } => learn(config, model, patches, images),
        Commands::Extract {
            model,
            output,
            errors,
            workers,
            mean_colour,
            images,
        } => extract(model, output, errors, workers, mean_colour, images),
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "featurize failed");
            ExitCode::FAILURE
        }
    }
}
