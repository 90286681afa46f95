//! Greedy CTC decoding.
//!
//! Best class per time step → collapse repeats → drop blanks → truncate to
//! the longest label seen in training → characters via the vocabulary.

use candle_core::{DType, Tensor, D};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::vocab::Vocabulary;

/// One decoded sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub text: String,
    pub codes: Vec<u32>,
    /// Mean probability of the emitted symbols, 0.0 when nothing was emitted.
    pub confidence: f32,
}

/// Collapse a best path: keep a symbol when it differs from its predecessor
/// and is not blank. Returns the positions of the kept frames.
pub fn collapse_best_path(path: &[u32], blank: u32) -> Vec<usize> {
    let mut kept = Vec::new();
    let mut prev = blank;
    for (t, &code) in path.iter().enumerate() {
        if code != blank && code != prev {
            kept.push(t);
        }
        prev = code;
    }
    kept
}

/// Greedy decoder bound to a vocabulary.
#[derive(Debug, Clone)]
pub struct GreedyDecoder {
    vocab: Vocabulary,
    max_length: Option<usize>,
}

impl GreedyDecoder {
    pub fn new(vocab: Vocabulary) -> Self {
        Self {
            vocab,
            max_length: None,
        }
    }

    /// Truncate every prediction to `max_length` symbols.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Decode a single best path of scores already reduced to the host.
    pub fn decode_path(&self, path: &[u32], log_scores: &[f32]) -> Prediction {
        let mut kept = collapse_best_path(path, self.vocab.blank());
        if let Some(max) = self.max_length {
            kept.truncate(max);
        }

        let codes: Vec<u32> = kept.iter().map(|&t| path[t]).collect();
        let confidence = if kept.is_empty() {
            0.0
        } else {
            kept.iter().map(|&t| log_scores[t].exp()).sum::<f32>() / kept.len() as f32
        };

        Prediction {
            text: self.vocab.decode(&codes),
            codes,
            confidence,
        }
    }

    /// Decode `(B, T, C)` log-probabilities.
    pub fn decode_batch(&self, log_probs: &Tensor) -> Result<Vec<Prediction>> {
        let log_probs = log_probs.to_dtype(DType::F32)?;
        let paths: Vec<Vec<u32>> = log_probs.argmax(D::Minus1)?.to_vec2()?;
        let scores: Vec<Vec<f32>> = log_probs.max(D::Minus1)?.to_vec2()?;

        Ok(paths
            .iter()
            .zip(scores.iter())
            .map(|(path, score)| self.decode_path(path, score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn decoder() -> GreedyDecoder {
        // a=0 b=1 c=2, blank=3
        GreedyDecoder::new(Vocabulary::from_chars(['a', 'b', 'c']))
    }

    #[test]
    fn test_collapse_repeats_and_blanks() {
        let kept = collapse_best_path(&[3, 0, 0, 3, 1, 1, 1, 3], 3);
        assert_eq!(kept, vec![1, 4]);
    }

    #[test]
    fn test_blank_separates_repeats() {
        let p = decoder().decode_path(&[0, 3, 0, 0, 2], &[0.0; 5]);
        assert_eq!(p.text, "aac");
        assert_eq!(p.codes, vec![0, 0, 2]);
        assert!((p.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_truncates_to_max_length() {
        let p = decoder()
            .with_max_length(2)
            .decode_path(&[0, 1, 2, 0], &[0.0; 4]);
        assert_eq!(p.text, "ab");
    }

    #[test]
    fn test_all_blank_is_empty() {
        let p = decoder().decode_path(&[3, 3, 3], &[-0.1; 3]);
        assert!(p.text.is_empty());
        assert_eq!(p.confidence, 0.0);
    }

    #[test]
    fn test_decode_batch_from_tensor() {
        // Two frames favour 'c', then blank, then 'a'.
        let hot = |c: usize| {
            let mut row = vec![0.1f32.ln(); 4];
            row[c] = 0.7f32.ln();
            row
        };
        let data = [hot(2), hot(2), hot(3), hot(0)].concat();
        let lp = Tensor::from_vec(data, (1, 4, 4), &Device::Cpu).unwrap();

        let preds = decoder().decode_batch(&lp).unwrap();
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].text, "ca");
        assert!((preds[0].confidence - 0.7).abs() < 1e-5);
    }
}
