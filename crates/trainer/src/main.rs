//! healthcast CLI
//!
//! Deterministic train / predict pipeline for tabular health-survey regression.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use healthcast_trainer::{
    importance_report, write_predictions, Dataset, EventFileSink, FanoutSink, MetricsSink,
    Pipeline, PipelineConfig, StopReason, TracingSink, TrainingReport,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "healthcast")]
#[command(author = "Healthcast Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deterministic feature-selected MLP regression for health-survey data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Random seed for every stage
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Maximum number of epochs
    #[arg(long, global = true)]
    epochs: Option<usize>,

    /// Checkpoint location
    #[arg(long, global = true)]
    save_path: Option<PathBuf>,

    /// Compute device (cpu or accelerator)
    #[arg(long, global = true)]
    device: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model and keep the best checkpoint
    Train {
        /// Training CSV (header row, last column is the target)
        #[arg(long)]
        train: PathBuf,

        /// Optional test CSV; checked for column alignment and predicted when --output is given
        #[arg(long)]
        test: Option<PathBuf>,

        /// Prediction output CSV
        #[arg(long, requires = "test")]
        output: Option<PathBuf>,
    },

    /// Predict a test CSV from the saved checkpoint
    Predict {
        #[arg(long)]
        test: PathBuf,

        #[arg(short, long, default_value = "pred.csv")]
        output: PathBuf,
    },

    /// Train, then predict from the saved checkpoint
    Run {
        #[arg(long)]
        train: PathBuf,

        #[arg(long)]
        test: PathBuf,

        #[arg(short, long, default_value = "pred.csv")]
        output: PathBuf,
    },

    /// Print the feature importance ranking without training
    Rank {
        #[arg(long)]
        train: PathBuf,

        /// Number of features to list
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

fn load_config(args: &CommonArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_from_file(path)?,
        None => PipelineConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid HEALTHCAST_* environment override")?;

    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(epochs) = args.epochs {
        config.n_epochs = epochs;
    }
    if let Some(path) = &args.save_path {
        config.save_path = path.clone();
    }
    if let Some(device) = &args.device {
        config.set("device", device)?;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn subscriber<W>(filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(writer)
        .finish()
}

fn init_logging(config: &PipelineConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { config.log_level.as_str() };
    tracing::subscriber::set_global_default(subscriber(env_filter(level), std::io::stdout))
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn build_sink(config: &PipelineConfig) -> FanoutSink {
    let mut sink = FanoutSink::new()
        .with(TracingSink)
        .with(MetricsSink::new("healthcast"));

    if let Some(dir) = &config.events_dir {
        match EventFileSink::create(dir) {
            Ok(events) => {
                info!("Writing scalar events to {}", events.path().display());
                sink.push(Box::new(events));
            }
            Err(err) => warn!("Scalar event log unavailable: {}", err),
        }
    }
    sink
}

fn load_table(path: &Path, what: &str) -> Result<Dataset> {
    info!("Loading {} data from: {}", what, path.display());
    let dataset =
        Dataset::from_csv(path).with_context(|| format!("Failed to load {} data", what))?;
    info!("Loaded {} rows with {} columns", dataset.len(), dataset.width);
    for (name, (min, max)) in dataset.header.iter().zip(dataset.feature_stats()) {
        debug!("  {:<24} [{:.4}, {:.4}]", name, min, max);
    }
    Ok(dataset)
}

fn log_report(report: &TrainingReport) {
    info!("═══════════════════════════════════════════");
    match report.stop_reason {
        StopReason::EarlyStopped => info!("Stopped early after {} epochs", report.epochs_run()),
        StopReason::Exhausted => info!("Finished all {} epochs", report.epochs_run()),
    }
    if let Some(epoch) = report.best_epoch {
        info!("  Best loss: {:.4} (epoch {})", report.best_loss(), epoch + 1);
    }
    info!("  Optimizer steps: {}", report.steps);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    // log_level is only known once the config is loaded
    let bootstrap = subscriber(
        env_filter(if cli.common.verbose { "debug" } else { "info" }),
        std::io::stdout,
    );
    let config = tracing::subscriber::with_default(bootstrap, || load_config(&cli.common))?;
    init_logging(&config, cli.common.verbose)?;

    info!("healthcast v{}", env!("CARGO_PKG_VERSION"));
    info!("═══════════════════════════════════════════");
    info!("  Seed: {}", config.seed);
    info!("  Epochs: {} (patience {})", config.n_epochs, config.early_stop);
    info!("  Batch size: {}", config.batch_size);
    info!("  Learning rate: {} (momentum {})", config.learning_rate, config.momentum);
    info!("  Checkpoint: {}", config.save_path.display());

    let target_name = config.target_name.clone();
    let pipeline = Pipeline::new(config.clone())?;

    match cli.command {
        Command::Train {
            train,
            test,
            output,
        } => {
            let train_raw = load_table(&train, "training")?;
            let test_raw = test.as_deref().map(|p| load_table(p, "test")).transpose()?;

            let data = pipeline.prepare(&train_raw, test_raw.as_ref())?;
            let mut sink = build_sink(&config);
            let report = pipeline.train(&data, &mut sink).context("Training failed")?;
            log_report(&report);

            if let (Some(test_raw), Some(output)) = (test_raw, output) {
                let preds = pipeline.predict_from_checkpoint(&test_raw)?;
                write_predictions(&output, &preds, &target_name)?;
            }
        }
        Command::Predict { test, output } => {
            let test_raw = load_table(&test, "test")?;
            let preds = pipeline
                .predict_from_checkpoint(&test_raw)
                .context("Prediction failed")?;
            write_predictions(&output, &preds, &target_name)?;
        }
        Command::Run {
            train,
            test,
            output,
        } => {
            let train_raw = load_table(&train, "training")?;
            let test_raw = load_table(&test, "test")?;
            let mut sink = build_sink(&config);
            let (report, _) = pipeline
                .run(&train_raw, &test_raw, &output, &mut sink)
                .context("Pipeline run failed")?;
            log_report(&report);
        }
        Command::Rank { train, limit } => {
            let train_raw = load_table(&train, "training")?;
            let ranking = pipeline.rank_dataset(&train_raw)?;

            info!("Feature importance ({:?} ranker):", config.ranker);
            for entry in importance_report(&ranking, train_raw.feature_names(), limit) {
                info!("  {:>4} {:<24} {:.6}", entry.index, entry.name, entry.score);
            }
        }
    }

    info!("✓ Done");
    Ok(())
}
