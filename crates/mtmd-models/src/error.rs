//! Error types for model construction and evaluation.

use std::path::PathBuf;

use mtmd_layers::LayerError;
use thiserror::Error;

/// The main error type for mtmd-models operations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Invalid hyper-parameters.
    #[error("Configuration error: {message}")]
    Config {
        /// A description of the configuration error.
        message: String,
    },

    /// Inconsistent feature columns or input matrix.
    #[error("Feature error: {message}")]
    Feature {
        /// A description of the feature error.
        message: String,
    },

    /// Model name that does not correspond to any architecture.
    #[error("Unknown model: {name}")]
    UnknownModel {
        /// The name that was requested.
        name: String,
    },

    /// I/O error while reading a configuration file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON configuration.
    #[error("Parse error: {0}")]
    Parse(#[source] serde_json::Error),

    /// Error raised by a layer.
    #[error(transparent)]
    Layer(#[from] LayerError),
}

impl ModelError {
    /// Shorthand for a [`ModelError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        ModelError::Config {
            message: message.into(),
        }
    }

    /// Shorthand for a [`ModelError::Feature`].
    pub fn feature(message: impl Into<String>) -> Self {
        ModelError::Feature {
            message: message.into(),
        }
    }
}

/// Result type alias for model operations.
pub type ModelResult<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModelError::config("num_experts must be greater than 1");
        assert_eq!(
            err.to_string(),
            "Configuration error: num_experts must be greater than 1"
        );

        let err = ModelError::UnknownModel {
            name: "PLE".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown model: PLE");
    }

    #[test]
    fn test_layer_error_is_transparent() {
        let err: ModelError = LayerError::config("bad heads").into();
        assert!(matches!(err, ModelError::Layer(_)));
        assert_eq!(err.to_string(), "Configuration error: bad heads");
    }
}
