//! Inference from a trained model directory.
//!
//! A model directory holds the weights, the vocabulary and a small model
//! card with the layer configuration and the longest training label.

use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::SampleEncoder;
use crate::decode::{GreedyDecoder, Prediction};
use crate::error::{Result, YomuError};
use crate::model::{CaptchaModel, ModelConfig};
use crate::vocab::Vocabulary;

pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const VOCAB_FILE: &str = "vocab.json";
pub const MODEL_CARD_FILE: &str = "model.json";

/// Everything besides weights and vocabulary needed to rebuild the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCard {
    pub model: ModelConfig,
    /// Predictions are truncated to this many characters.
    pub max_label_len: usize,
}

impl ModelCard {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// A loaded model ready to read CAPTCHA images.
pub struct Reader {
    model: CaptchaModel,
    decoder: GreedyDecoder,
    encoder: SampleEncoder,
    device: Device,
}

impl Reader {
    pub fn new(model: CaptchaModel, vocab: Vocabulary, max_label_len: usize, device: Device) -> Self {
        let config = model.config();
        let encoder = SampleEncoder::new(config.image_width as u32, config.image_height as u32);
        Self {
            model,
            decoder: GreedyDecoder::new(vocab).with_max_length(max_label_len),
            encoder,
            device,
        }
    }

    /// Load `model.json`, `vocab.json` and `model.safetensors` from `dir`.
    pub fn load<P: AsRef<Path>>(dir: P, device: Device) -> Result<Self> {
        let dir = dir.as_ref();
        let weights = dir.join(WEIGHTS_FILE);
        if !weights.exists() {
            return Err(YomuError::InvalidConfig(format!(
                "model weights not found at {}",
                weights.display()
            )));
        }

        let card = ModelCard::load(dir.join(MODEL_CARD_FILE))?;
        let vocab = Vocabulary::load(dir.join(VOCAB_FILE))?;
        let model = CaptchaModel::load(&card.model, vocab.num_classes(), &weights, &device)?;
        debug!("Loaded model from {:?} ({} classes)", dir, vocab.num_classes());

        Ok(Self::new(model, vocab, card.max_label_len, device))
    }

    pub fn vocab(&self) -> &Vocabulary {
        self.decoder.vocab()
    }

    /// Read a batch of image files.
    pub fn read_files(&self, paths: &[PathBuf]) -> Result<Vec<Prediction>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let mut pixels = Vec::new();
        for path in paths {
            pixels.extend(self.encoder.encode_image(path)?);
        }
        let images = Tensor::from_vec(
            pixels,
            (
                paths.len(),
                1,
                self.encoder.height as usize,
                self.encoder.width as usize,
            ),
            &self.device,
        )?;
        self.read_tensor(&images)
    }

    pub fn read_file<P: AsRef<Path>>(&self, path: P) -> Result<Prediction> {
        let mut preds = self.read_files(&[path.as_ref().to_path_buf()])?;
        preds
            .pop()
            .ok_or_else(|| YomuError::ShapeMismatch("model returned no prediction".into()))
    }

    /// Decode an already encoded `(B, 1, H, W)` image batch.
    pub fn read_tensor(&self, images: &Tensor) -> Result<Vec<Prediction>> {
        let log_probs = self.model.forward(images)?;
        self.decoder.decode_batch(&log_probs)
    }
}
