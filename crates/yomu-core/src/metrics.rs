//! Recognition metrics: sequence accuracy and character error rate.

use serde::{Deserialize, Serialize};

/// Levenshtein distance over characters.
pub fn edit_distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// Running totals over (prediction, reference) pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionMetrics {
    pub samples: usize,
    pub exact_matches: usize,
    pub char_errors: usize,
    pub reference_chars: usize,
}

impl RecognitionMetrics {
    pub fn update(&mut self, predicted: &str, reference: &str) {
        self.samples += 1;
        if predicted == reference {
            self.exact_matches += 1;
        }
        self.char_errors += edit_distance(predicted, reference);
        self.reference_chars += reference.chars().count();
    }

    /// Fraction of samples read exactly.
    #[must_use]
    pub fn accuracy(&self) -> f32 {
        if self.samples == 0 {
            0.0
        } else {
            self.exact_matches as f32 / self.samples as f32
        }
    }

    /// Character error rate.
    #[must_use]
    pub fn cer(&self) -> f32 {
        if self.reference_chars == 0 {
            0.0
        } else {
            self.char_errors as f32 / self.reference_chars as f32
        }
    }
}
