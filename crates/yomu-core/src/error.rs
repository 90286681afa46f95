use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during Yomu core operations.
#[derive(Debug, Error)]
pub enum YomuError {
    /// No usable samples were found.
    #[error("no images found in {path:?}")]
    EmptyDataset {
        /// The directory that was scanned.
        path: PathBuf,
    },

    /// A label contains a character outside the vocabulary.
    #[error("character {ch:?} in label {label:?} is not in the vocabulary")]
    UnknownCharacter {
        /// The offending character.
        ch: char,
        /// The label it was found in.
        label: String,
    },

    /// A label cannot be used as a CTC target.
    #[error("invalid label: {0}")]
    InvalidLabel(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Tensor dimensions do not agree.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// An image file could not be decoded.
    #[error("failed to decode image {path:?}: {source}")]
    Image {
        /// The image path.
        path: PathBuf,
        /// The decoder error.
        #[source]
        source: image::ImageError,
    },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Candle ML framework error.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for Yomu operations.
pub type Result<T> = std::result::Result<T, YomuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = YomuError::UnknownCharacter {
            ch: '!',
            label: "ab!c".into(),
        };
        assert!(err.to_string().contains("'!'"));
        assert!(err.to_string().contains("ab!c"));

        let err = YomuError::EmptyDataset {
            path: PathBuf::from("captchas"),
        };
        assert!(err.to_string().contains("captchas"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<YomuError>();
    }
}
