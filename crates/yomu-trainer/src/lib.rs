//! # Yomu Trainer
//!
//! Trains the CRNN reader on a directory of labelled CAPTCHA images: split,
//! batch, optimize the CTC loss with early stopping, then evaluate the
//! inference graph and write the model directory `yomu-read` loads.

pub mod config;
pub mod early_stopping;
pub mod report;
pub mod trainer;

pub use config::TrainingConfig;
pub use early_stopping::{EarlyStopping, Progress};
pub use report::{EpochRecord, EvaluationReport, PredictionRecord, TrainingHistory};
pub use trainer::{check_label_lengths, run_training, Trainer, TrainingRun};
