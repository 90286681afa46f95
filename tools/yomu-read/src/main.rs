//! Reads CAPTCHA images with a trained model and prints one JSON line per image.

use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_core::Device;
use clap::Parser;
use serde::Serialize;
use tracing::debug;
use yomu_core::{Prediction, Reader, YomuError};

#[derive(Debug, Serialize)]
struct ReadOutput {
    path: PathBuf,
    text: Option<String>,
    confidence: f32,
    error: Option<String>,
}

impl ReadOutput {
    fn from_result(path: PathBuf, result: std::result::Result<Prediction, YomuError>) -> Self {
        match result {
            Ok(pred) => Self {
                path,
                text: Some(pred.text),
                confidence: pred.confidence,
                error: None,
            },
            Err(e) => Self {
                path,
                text: None,
                confidence: 0.0,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Parser)]
#[command(name = "yomu-read")]
#[command(about = "Read text from CAPTCHA images")]
#[command(version)]
struct Cli {
    /// Directory written by `train`
    #[arg(short, long, env = "YOMU_MODEL_DIR", default_value = "models/captcha")]
    model_dir: PathBuf,

    /// Force CPU even if a CUDA device is available
    #[arg(long)]
    cpu: bool,

    /// Image files to read
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let device = if cli.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    let reader = Reader::load(&cli.model_dir, device)
        .with_context(|| format!("failed to load model from {}", cli.model_dir.display()))?;
    debug!("Alphabet: {:?}", reader.vocab().characters());

    for path in cli.images {
        let result = reader.read_file(&path);
        let output = ReadOutput::from_result(path, result);
        println!("{}", serde_json::to_string(&output)?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_read_serializes_error() {
        let err = YomuError::InvalidLabel("bad".into());
        let output = ReadOutput::from_result(PathBuf::from("x.png"), Err(err));
        let json: serde_json::Value = serde_json::to_value(&output).unwrap();
        assert_eq!(json["path"], "x.png");
        assert!(json["text"].is_null());
        assert_eq!(json["confidence"], 0.0);
        assert!(json["error"].as_str().unwrap().contains("bad"));
    }

    #[test]
    fn test_prediction_serializes_text() {
        let pred = Prediction {
            text: "2b827".into(),
            codes: vec![0, 1, 2, 3, 4],
            confidence: 0.5,
        };
        let output = ReadOutput::from_result(PathBuf::from("y.png"), Ok(pred));
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["text"], "2b827");
        assert_eq!(json["confidence"], 0.5);
        assert!(json["error"].is_null());
    }
}
