//! Training history and evaluation reports written next to the model.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use yomu_core::RecognitionMetrics;

pub const HISTORY_FILE: &str = "history.json";
pub const PREDICTIONS_FILE: &str = "predictions.json";
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f32,
    pub val_loss: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f32>,
    pub stopped_early: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub label: String,
    pub predicted: String,
    pub confidence: f32,
}

impl PredictionRecord {
    pub fn is_correct(&self) -> bool {
        self.label == self.predicted
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub metrics: RecognitionMetrics,
    pub accuracy: f32,
    pub cer: f32,
    pub predictions: Vec<PredictionRecord>,
}

impl EvaluationReport {
    pub fn push(&mut self, label: &str, predicted: String, confidence: f32) {
        self.metrics.update(&predicted, label);
        self.accuracy = self.metrics.accuracy();
        self.cer = self.metrics.cer();
        self.predictions.push(PredictionRecord {
            label: label.to_string(),
            predicted,
            confidence,
        });
    }

    /// Log the first `limit` predictions against their labels.
    pub fn log_samples(&self, limit: usize) {
        for record in self.predictions.iter().take(limit) {
            let mark = if record.is_correct() { "ok" } else { "xx" };
            info!(
                "[{}] {} -> {} ({:.2})",
                mark, record.label, record.predicted, record.confidence
            );
        }
        info!(
            "Validation: {}/{} read exactly ({:.1}%), CER {:.3}",
            self.metrics.exact_matches,
            self.metrics.samples,
            self.accuracy * 100.0,
            self.cer
        );
    }
}

pub fn save_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> anyhow::Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_tracks_metrics() {
        let mut report = EvaluationReport::default();
        report.push("2b827", "2b827".into(), 0.9);
        report.push("bny23", "bn23".into(), 0.4);
        assert_eq!(report.predictions.len(), 2);
        assert!(report.predictions[0].is_correct());
        assert!(!report.predictions[1].is_correct());
        assert!((report.accuracy - 0.5).abs() < 1e-6);
        assert!((report.cer - 0.1).abs() < 1e-6);
    }
}
