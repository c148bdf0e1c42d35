use brainage::config::{BrainAgeConfig, Split};
use brainage::dataset::{get_image_dataloaders, prefetch_samples, split_loader};
use brainage::telemetry::init_tracing;
use brainage::{Result, Trainer};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[derive(Parser)]
#[command(author, version, about = "Brain age regression from T1w MRI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Options shared by every subcommand. Flags override the config file.
#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    num_workers: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Train, then evaluate the best checkpoint on the test split
    Train {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long, allow_hyphen_values = true)]
        img_size: Option<i64>,
        #[arg(long)]
        lr: Option<f64>,
    },
    /// Report MSE and MAE of a checkpoint on one split
    Evaluate {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long)]
        checkpoint: PathBuf,
        #[arg(long, value_enum, default_value_t = Split::Test)]
        split: Split,
    },
    /// Predict the age of one subject
    Predict {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long)]
        checkpoint: PathBuf,
        #[arg(long)]
        subject_id: String,
    },
}

fn load_config(common: &CommonArgs) -> Result<BrainAgeConfig> {
    let mut config = match &common.config {
        Some(path) => BrainAgeConfig::from_file(path)?,
        None => BrainAgeConfig::default(),
    };
    if let Some(dir) = &common.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(n) = common.num_workers {
        config.num_workers = n;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Train {
            common,
            epochs,
            batch_size,
            img_size,
            lr,
        } => {
            let mut config = load_config(&common)?;
            if let Some(epochs) = epochs {
                config.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(img_size) = img_size {
                config.img_size = img_size;
            }
            if let Some(lr) = lr {
                config.learning_rate = lr;
            }
            config.validate()?;

            let loaders = get_image_dataloaders::<f32>(&config)?;
            let mut trainer = Trainer::<f32>::new(config.clone())?;
            trainer.fit(&loaders)?;

            if config.checkpoint_path.exists() {
                trainer.load_checkpoint(&config.checkpoint_path)?;
            } else {
                warn!("no checkpoint was written, evaluating the last weights");
            }
            let metrics = trainer.evaluate(&loaders.test)?;
            info!(mse = metrics.mse, mae = metrics.mae, n = metrics.num_samples, "test");
            println!("test: {}", metrics);
        }
        Command::Evaluate {
            common,
            checkpoint,
            split,
        } => {
            let config = load_config(&common)?;
            let mut trainer = Trainer::<f32>::from_checkpoint(config, &checkpoint)?;
            let loader = split_loader::<f32>(trainer.config(), split)?;
            let metrics = trainer.evaluate(&loader)?;
            info!(%split, mse = metrics.mse, mae = metrics.mae, "evaluation finished");
            println!("{}: {}", split, metrics);
        }
        Command::Predict {
            common,
            checkpoint,
            subject_id,
        } => {
            let config = load_config(&common)?;
            let mut trainer = Trainer::<f32>::from_checkpoint(config, &checkpoint)?;
            let inputs = prefetch_samples::<f32>(trainer.config(), std::slice::from_ref(&subject_id))?;
            let ages = trainer.predict(inputs)?;
            for age in ages {
                println!("{}\t{:.2}", subject_id, age);
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("failed to initialise logging: {}", e);
    }

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
