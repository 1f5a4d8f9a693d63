//! The [`Layer`] trait shared by every building block.
//!
//! This module defines the core [`Layer`] trait shared by every building block
//! in the crate. Gradients are computed by an external framework, so a layer
//! only describes its forward computation and its parameters.

use crate::error::LayerError;
use crate::tensor::Tensor;

/// A neural network layer.
///
/// Each layer must be able to:
/// - Perform an inference forward pass (`forward`)
/// - Perform a training-mode forward pass (`forward_train`), where stochastic
///   or stateful sub-layers (dropout, batch normalization) behave differently
/// - list its parameters for counting and inspection
///
/// # Example
///
/// ```
/// use mtmd_layers::dense::Dense;
/// use mtmd_layers::layer::Layer;
/// use mtmd_layers::tensor::Tensor;
///
/// let layer = Dense::new(128, 64);
/// let input = Tensor::zeros(&[2, 128]);
/// let output = layer.forward(&input).unwrap();
/// assert_eq!(output.shape(), &[2, 64]);
/// ```
pub trait Layer: Send + Sync {
    /// Performs an inference forward pass through the layer.
    ///
    /// # Errors
    ///
    /// Fails with [`LayerError`] when the input does not fit the layer.
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError>;

    /// Performs a training-mode forward pass.
    ///
    /// Layers with dropout or batch statistics override this; the default
    /// delegates to [`Layer::forward`].
    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.forward(input)
    }

    /// Learnable tensors, in a stable order.
    fn parameters(&self) -> Vec<&Tensor>;

    /// Mutable view of the same parameters.
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    /// Penalty this layer adds to the model loss.
    ///
    /// Zero unless the layer carries a regularizer.
    fn regularization_loss(&self) -> f32 {
        0.0
    }

    /// Short name used in logs.
    fn name(&self) -> &str {
        "Layer"
    }

    fn is_training(&self) -> bool {
        true
    }

    /// Switches dropout and batch statistics on or off.
    fn set_training(&mut self, _training: bool) {}

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}
