//! # Yomu Core
//!
//! Reads text from CAPTCHA images with a convolutional-recurrent network
//! trained under a CTC loss. Provides the vocabulary, dataset pipeline,
//! CRNN model, CTC loss stage and greedy decoder.
//!
//! ## Quick Start
//!
//! ```rust
//! use yomu_core::{GreedyDecoder, Vocabulary};
//!
//! let vocab = Vocabulary::from_labels(["2b827", "bny23"]);
//! let codes = vocab.encode("n2b83").unwrap();
//! assert_eq!(vocab.decode(&codes), "n2b83");
//!
//! // One frame per code, blanks between repeats.
//! let decoder = GreedyDecoder::new(vocab).with_max_length(5);
//! let pred = decoder.decode_path(&codes, &[0.0; 5]);
//! assert_eq!(pred.text, "n2b83");
//! ```
pub mod ctc;
pub mod dataset;
pub mod decode;
pub mod error;
pub mod metrics;
pub mod model;
pub mod reader;
pub mod vocab;

// Re-export primary API
pub use ctc::{CtcLayer, CtcLoss, CtcOutput, CtcTargets};
pub use dataset::{
    load_samples, max_label_len, split_data, Batch, Dataset, DatasetStats, EncodedSample, Sample,
    SampleEncoder,
};
pub use decode::{GreedyDecoder, Prediction};
pub use error::{Result, YomuError};
pub use metrics::{edit_distance, RecognitionMetrics};
pub use model::{CaptchaModel, ModelConfig, ModelSummary, TrainingModel};
pub use reader::{ModelCard, Reader};
pub use vocab::Vocabulary;
