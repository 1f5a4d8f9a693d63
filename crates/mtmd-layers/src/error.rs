//! Error types for the mtmd-layers crate.
//!
//! Errors raised while building layers or running them on malformed tensors.

use thiserror::Error;

/// Failure of a layer constructor or forward pass.
#[derive(Debug, Error)]
pub enum LayerError {
    /// Whole-shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Last-axis width differs from what the layer was built for.
    #[error("Invalid input dimension: expected {expected}, got {actual}")]
    InvalidInputDimension {
        expected: usize,
        actual: usize,
    },

    /// Any other failure inside a forward pass.
    #[error("Forward pass error: {message}")]
    ForwardError {
        message: String,
    },

    /// Invalid layer hyperparameters.
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// Bad id, out-of-range row or invalid pooling input.
    #[error("Embedding lookup error: {message}")]
    EmbeddingError {
        message: String,
    },
}

impl LayerError {
    /// Shorthand for a [`LayerError::ConfigError`].
    pub fn config(message: impl Into<String>) -> Self {
        LayerError::ConfigError {
            message: message.into(),
        }
    }

    /// Shorthand for a [`LayerError::ForwardError`].
    pub fn forward(message: impl Into<String>) -> Self {
        LayerError::ForwardError {
            message: message.into(),
        }
    }
}

pub type LayerResult<T> = Result<T, LayerError>;

/// Checks that `input` is 2D with `expected` columns.
pub(crate) fn expect_2d(
    layer: &str,
    input: &crate::tensor::Tensor,
    expected: usize,
) -> LayerResult<()> {
    if input.ndim() != 2 {
        return Err(LayerError::forward(format!(
            "{} expects 2D input, got {}D",
            layer,
            input.ndim()
        )));
    }
    if input.shape()[1] != expected {
        return Err(LayerError::InvalidInputDimension {
            expected,
            actual: input.shape()[1],
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn test_error_display() {
        let err = LayerError::ShapeMismatch {
            expected: vec![32, 64],
            actual: vec![32, 128],
        };
        assert!(err.to_string().contains("Shape mismatch"));

        let err = LayerError::InvalidInputDimension {
            expected: 64,
            actual: 128,
        };
        assert!(err.to_string().contains("Invalid input dimension"));

        let err = LayerError::config("num_experts must be greater than 1");
        assert_eq!(
            err.to_string(),
            "Configuration error: num_experts must be greater than 1"
        );
    }

    #[test]
    fn test_expect_2d() {
        assert!(expect_2d("Dense", &Tensor::zeros(&[2, 4]), 4).is_ok());
        assert!(matches!(
            expect_2d("Dense", &Tensor::zeros(&[2, 4, 1]), 4),
            Err(LayerError::ForwardError { .. })
        ));
        assert!(matches!(
            expect_2d("Dense", &Tensor::zeros(&[2, 3]), 4),
            Err(LayerError::InvalidInputDimension {
                expected: 4,
                actual: 3
            })
        ));
    }
}
