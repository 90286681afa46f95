//! Train the CAPTCHA reader.

use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_core::Device;
use clap::Parser;
use tracing::info;
use yomu_trainer::{run_training, TrainingConfig};

/// CLI arguments
#[derive(Parser)]
#[command(name = "train")]
#[command(about = "Train a CRNN + CTC model to read CAPTCHA images")]
#[command(version)]
struct Cli {
    /// Directory of PNG files named after their text
    #[arg(short, long, env = "YOMU_DATA_DIR", default_value = "data/captcha_images_v2")]
    data_dir: PathBuf,

    /// Where the trained model and reports are written
    #[arg(short, long, env = "YOMU_OUTPUT_DIR", default_value = "models/captcha")]
    output_dir: PathBuf,

    /// JSON training configuration; flags below override it
    #[arg(short, long, env = "YOMU_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Epochs without validation improvement before stopping
    #[arg(long)]
    patience: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Share of samples used for training
    #[arg(long)]
    train_fraction: Option<f32>,

    /// Force CPU even if a CUDA device is available
    #[arg(long)]
    cpu: bool,
}

impl Cli {
    fn training_config(&self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)
                .with_context(|| format!("failed to read config {}", path.display()))?,
            None => TrainingConfig::default(),
        };
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            config.learning_rate = v;
        }
        if let Some(v) = self.patience {
            config.patience = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.train_fraction {
            config.train_fraction = v;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = cli.training_config()?;
    let device = if cli.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    info!("Training on {:?}", device);

    let run = run_training(config, &cli.data_dir, &cli.output_dir, device)?;
    info!(
        "Done: {} epochs, best val_loss {:?}, validation accuracy {:.1}%",
        run.history.epochs.len(),
        run.history.best_val_loss,
        run.report.accuracy * 100.0
    );
    Ok(())
}
