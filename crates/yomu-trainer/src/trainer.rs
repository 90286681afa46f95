//! Training loop for the CRNN model.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use candle_core::Device;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use tracing::{debug, info, warn};
use yomu_core::dataset::shuffle_in_place;
use yomu_core::reader::{ModelCard, MODEL_CARD_FILE, VOCAB_FILE, WEIGHTS_FILE};
use yomu_core::{
    load_samples, max_label_len, split_data, CaptchaModel, Dataset, DatasetStats, GreedyDecoder,
    ModelSummary, Sample, SampleEncoder, TrainingModel, Vocabulary, YomuError,
};

use crate::config::TrainingConfig;
use crate::early_stopping::{EarlyStopping, Progress};
use crate::report::{
    save_json, EpochRecord, EvaluationReport, TrainingHistory, CONFIG_FILE, HISTORY_FILE,
    PREDICTIONS_FILE,
};

/// Number of validation predictions echoed to the log.
const LOGGED_PREDICTIONS: usize = 16;

pub struct Trainer {
    config: TrainingConfig,
    vocab: Vocabulary,
    max_label_len: usize,
    model: TrainingModel,
    varmap: VarMap,
    optimizer: AdamW,
    device: Device,
}

impl Trainer {
    pub fn new(
        config: TrainingConfig,
        vocab: Vocabulary,
        max_label_len: usize,
        device: Device,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let (model, varmap) = CaptchaModel::with_varmap(&config.model, vocab.num_classes(), &device)?;
        let optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        Ok(Self {
            model: TrainingModel::new(model, vocab.blank()),
            config,
            vocab,
            max_label_len,
            varmap,
            optimizer,
            device,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// The trainable weights.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn summary(&self) -> ModelSummary {
        self.model.prediction_model().summary()
    }

    /// One pass over `data` with dropout on. Returns the sample-weighted mean loss.
    pub fn train_epoch(&mut self, data: &Dataset, epoch: usize) -> anyhow::Result<f32> {
        let mut order: Vec<usize> = (0..data.len()).collect();
        if self.config.shuffle {
            shuffle_in_place(&mut order, self.config.seed.wrapping_add(epoch as u64));
        }
        let batches = data.batches_in_order(&order, self.config.batch_size, &self.device)?;

        let mut total = 0.0f32;
        let mut seen = 0usize;
        for (step, batch) in batches.iter().enumerate() {
            let out = self
                .model
                .forward_t(&batch.images, Some(batch.targets()), true)?;
            let loss = out.loss.context("training forward produced no loss")?;
            self.optimizer.backward_step(&loss)?;

            let value = loss.to_scalar::<f32>()?;
            total += value * batch.len() as f32;
            seen += batch.len();
            debug!("Epoch {}, step {}/{}, loss {:.4}", epoch, step + 1, batches.len(), value);
        }

        Ok(total / seen.max(1) as f32)
    }

    /// Mean loss over `data` with dropout off and no weight updates.
    pub fn evaluate_loss(&self, data: &Dataset) -> anyhow::Result<f32> {
        let mut total = 0.0f32;
        let mut seen = 0usize;
        for batch in data.batches(self.config.batch_size, &self.device)? {
            let out = self
                .model
                .forward_t(&batch.images, Some(batch.targets()), false)?;
            let loss = out.loss.context("evaluation forward produced no loss")?;
            total += loss.to_scalar::<f32>()? * batch.len() as f32;
            seen += batch.len();
        }
        Ok(total / seen.max(1) as f32)
    }

    /// Train with early stopping on validation loss.
    ///
    /// Each improvement is checkpointed to `checkpoint`; when training ends
    /// the best checkpoint is restored.
    pub fn fit(
        &mut self,
        train: &Dataset,
        valid: &Dataset,
        checkpoint: &Path,
    ) -> anyhow::Result<TrainingHistory> {
        if train.is_empty() || valid.is_empty() {
            anyhow::bail!(
                "need both training and validation samples (got {} / {})",
                train.len(),
                valid.len()
            );
        }

        let mut stopper = EarlyStopping::new(self.config.patience, self.config.min_delta);
        let mut history = TrainingHistory::default();
        let epochs = self.config.epochs;

        for epoch in 1..=epochs {
            let started = Instant::now();
            let loss = self.train_epoch(train, epoch)?;
            let val_loss = self.evaluate_loss(valid)?;
            history.epochs.push(EpochRecord {
                epoch,
                loss,
                val_loss,
            });
            info!(
                "Epoch {}/{} - loss: {:.4} - val_loss: {:.4} ({:.1}s)",
                epoch,
                epochs,
                loss,
                val_loss,
                started.elapsed().as_secs_f32()
            );

            match stopper.update(epoch, val_loss) {
                Progress::Improved => {
                    self.varmap.save(checkpoint)?;
                    debug!("val_loss improved to {:.4}, checkpoint saved", val_loss);
                }
                Progress::Waiting { wait } => {
                    debug!("val_loss did not improve for {} epoch(s)", wait);
                }
                Progress::Stop => {
                    info!("Early stopping at epoch {}", epoch);
                    history.stopped_early = true;
                    break;
                }
            }
        }

        history.best_epoch = stopper.best_epoch();
        history.best_val_loss = stopper.best();
        match stopper.best_epoch() {
            Some(best) if history.epochs.last().map(|e| e.epoch) != Some(best) => {
                info!("Restoring best weights from epoch {}", best);
                self.varmap.load(checkpoint)?;
            }
            Some(_) => {}
            None => {
                warn!("Validation loss never improved; keeping final weights");
                self.varmap.save(checkpoint)?;
            }
        }

        Ok(history)
    }

    /// Greedy-decode `data` with the inference graph and score it.
    pub fn evaluate(&self, data: &Dataset) -> anyhow::Result<EvaluationReport> {
        let decoder = GreedyDecoder::new(self.vocab.clone()).with_max_length(self.max_label_len);
        let model = self.model.prediction_model();
        let mut report = EvaluationReport::default();

        for batch in data.batches(self.config.batch_size, &self.device)? {
            let log_probs = model.forward(&batch.images)?;
            for (label, pred) in batch.texts.iter().zip(decoder.decode_batch(&log_probs)?) {
                report.push(label, pred.text, pred.confidence);
            }
        }

        Ok(report)
    }

    /// Write vocabulary, model card and configuration next to the weights.
    pub fn save_artifacts(&self, dir: &Path) -> anyhow::Result<()> {
        self.vocab.save(dir.join(VOCAB_FILE))?;
        ModelCard {
            model: self.config.model.clone(),
            max_label_len: self.max_label_len,
        }
        .save(dir.join(MODEL_CARD_FILE))?;
        self.config.save(dir.join(CONFIG_FILE))?;
        Ok(())
    }
}

/// Every label must fit in the encoder's time steps, counting the blank CTC
/// needs between repeated characters.
pub fn check_label_lengths(samples: &[Sample], time_steps: usize) -> yomu_core::Result<()> {
    for sample in samples {
        let chars: Vec<char> = sample.label.chars().collect();
        if chars.is_empty() {
            return Err(YomuError::InvalidLabel(format!(
                "{:?} has an empty label",
                sample.path
            )));
        }
        let repeats = chars.windows(2).filter(|w| w[0] == w[1]).count();
        if chars.len() + repeats > time_steps {
            return Err(YomuError::InvalidLabel(format!(
                "label {:?} needs {} time steps, model produces {}",
                sample.label,
                chars.len() + repeats,
                time_steps
            )));
        }
    }
    Ok(())
}

/// Output of a full training run.
#[derive(Debug)]
pub struct TrainingRun {
    pub output_dir: PathBuf,
    pub history: TrainingHistory,
    pub report: EvaluationReport,
}

/// Load data, train, restore the best weights, evaluate and write artifacts.
pub fn run_training(
    config: TrainingConfig,
    data_dir: &Path,
    output_dir: &Path,
    device: Device,
) -> anyhow::Result<TrainingRun> {
    config.validate()?;

    let samples = load_samples(data_dir)
        .with_context(|| format!("failed to load samples from {}", data_dir.display()))?;
    let vocab = Vocabulary::from_labels(samples.iter().map(|s| &s.label));
    DatasetStats::compute(&samples, &vocab).log();
    check_label_lengths(&samples, config.model.time_steps())?;

    let (train_samples, valid_samples) =
        split_data(&samples, config.train_fraction, config.shuffle, config.seed)?;
    info!(
        "Split into {} training and {} validation samples",
        train_samples.len(),
        valid_samples.len()
    );

    let encoder = SampleEncoder::new(
        config.model.image_width as u32,
        config.model.image_height as u32,
    );
    let train = Dataset::encode(&train_samples, &encoder, &vocab)?;
    let valid = Dataset::encode(&valid_samples, &encoder, &vocab)?;

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let mut trainer = Trainer::new(config, vocab, max_label_len(&samples), device)?;
    info!("Model summary:\n{}", trainer.summary());
    trainer.save_artifacts(output_dir)?;

    let history = trainer.fit(&train, &valid, &output_dir.join(WEIGHTS_FILE))?;
    save_json(&history, output_dir.join(HISTORY_FILE))?;

    let report = trainer.evaluate(&valid)?;
    report.log_samples(LOGGED_PREDICTIONS);
    save_json(&report, output_dir.join(PREDICTIONS_FILE))?;

    info!("Model saved to {:?}", output_dir);
    Ok(TrainingRun {
        output_dir: output_dir.to_path_buf(),
        history,
        report,
    })
}
