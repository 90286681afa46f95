//! Training configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use yomu_core::{ModelConfig, Result, YomuError};

/// Hyper-parameters for one training run. Missing JSON fields take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Share of samples used for training; the rest is validation.
    pub train_fraction: f32,
    /// Shuffle samples before the split and training batches every epoch.
    pub shuffle: bool,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    /// Epochs without validation improvement before stopping.
    pub patience: usize,
    /// Minimum validation loss decrease that counts as improvement.
    pub min_delta: f32,
    pub seed: u64,
    pub model: ModelConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.9,
            shuffle: true,
            batch_size: 16,
            epochs: 100,
            learning_rate: 1e-3,
            patience: 10,
            min_delta: 0.0,
            seed: 42,
            model: ModelConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(YomuError::InvalidConfig(format!(
                "train_fraction must be within (0, 1), got {}",
                self.train_fraction
            )));
        }
        if self.batch_size == 0 {
            return Err(YomuError::InvalidConfig("batch_size must be positive".into()));
        }
        if self.epochs == 0 {
            return Err(YomuError::InvalidConfig("epochs must be positive".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(YomuError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.min_delta < 0.0 {
            return Err(YomuError::InvalidConfig("min_delta must be >= 0".into()));
        }
        self.model.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = TrainingConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.batch_size, 16);
        assert_eq!(cfg.patience, 10);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: TrainingConfig =
            serde_json::from_str(r#"{"epochs": 5, "model": {"lstm1_units": 32}}"#).unwrap();
        assert_eq!(cfg.epochs, 5);
        assert_eq!(cfg.batch_size, 16);
        assert_eq!(cfg.model.lstm1_units, 32);
        assert_eq!(cfg.model.image_width, 200);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = TrainingConfig {
            seed: 7,
            ..TrainingConfig::default()
        };
        cfg.save(&path).unwrap();
        assert_eq!(TrainingConfig::load(&path).unwrap(), cfg);
    }

    #[test]
    fn test_rejects_invalid_values() {
        for cfg in [
            TrainingConfig {
                train_fraction: 1.0,
                ..TrainingConfig::default()
            },
            TrainingConfig {
                batch_size: 0,
                ..TrainingConfig::default()
            },
            TrainingConfig {
                learning_rate: 0.0,
                ..TrainingConfig::default()
            },
        ] {
            assert!(matches!(cfg.validate(), Err(YomuError::InvalidConfig(_))));
        }
    }
}
