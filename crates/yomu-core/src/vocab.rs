//! Character vocabulary for CTC targets.
//!
//! Characters map to codes `0..n` in sorted order. Code `n` is the CTC
//! blank, so a model over this vocabulary emits `n + 1` classes.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, YomuError};

/// Bijection between label characters and integer codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "VocabFile", into = "VocabFile")]
pub struct Vocabulary {
    chars: Vec<char>,
    char_to_code: HashMap<char, u32>,
}

#[derive(Serialize, Deserialize)]
struct VocabFile {
    characters: Vec<char>,
}

impl From<VocabFile> for Vocabulary {
    fn from(file: VocabFile) -> Self {
        Self::from_chars(file.characters)
    }
}

impl From<Vocabulary> for VocabFile {
    fn from(vocab: Vocabulary) -> Self {
        Self {
            characters: vocab.chars,
        }
    }
}

impl Vocabulary {
    /// Build the vocabulary from the set of characters used by `labels`.
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: BTreeSet<char> = labels
            .into_iter()
            .flat_map(|l| l.as_ref().chars().collect::<Vec<_>>())
            .collect();
        Self::from_chars(set)
    }

    /// Build from an explicit character list. Duplicates are dropped and the
    /// remaining characters sorted, so the mapping is independent of order.
    pub fn from_chars<I: IntoIterator<Item = char>>(chars: I) -> Self {
        let chars: Vec<char> = chars.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let char_to_code = chars
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i as u32))
            .collect();
        Self {
            chars,
            char_to_code,
        }
    }

    /// The alphabet in code order.
    pub fn characters(&self) -> &[char] {
        &self.chars
    }

    /// Number of real characters (excluding blank).
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Code of the CTC blank symbol (always the last class).
    pub fn blank(&self) -> u32 {
        self.chars.len() as u32
    }

    /// Output classes a model needs: every character plus blank.
    pub fn num_classes(&self) -> usize {
        self.chars.len() + 1
    }

    /// Encode a label into character codes.
    pub fn encode(&self, label: &str) -> Result<Vec<u32>> {
        label
            .chars()
            .map(|ch| {
                self.char_to_code
                    .get(&ch)
                    .copied()
                    .ok_or_else(|| YomuError::UnknownCharacter {
                        ch,
                        label: label.to_string(),
                    })
            })
            .collect()
    }

    /// Map codes back to text. Blank and out-of-range codes are skipped.
    pub fn decode(&self, codes: &[u32]) -> String {
        codes
            .iter()
            .filter_map(|&c| self.chars.get(c as usize))
            .collect()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
