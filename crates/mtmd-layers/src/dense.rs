//! Fully connected projection over the last axis.

use rand::Rng;

use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::layer::Layer;
use crate::regularizer::Regularizer;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// `y = x W + b` with `W: [in, out]` and an optional `b: [out]`.
///
/// Any leading axes are kept, so `[B, F, in]` maps to `[B, F, out]`.
///
/// # Example
///
/// ```
/// use mtmd_layers::dense::Dense;
/// use mtmd_layers::layer::Layer;
/// use mtmd_layers::tensor::Tensor;
///
/// let layer = Dense::new(128, 64);
/// let y = layer.forward(&Tensor::zeros(&[4, 3, 128])).unwrap();
/// assert_eq!(y.shape(), &[4, 3, 64]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    weights: Tensor,
    /// `None` for bias-free projections.
    bias: Option<Tensor>,
    kernel_regularizer: Regularizer,
    in_features: usize,
    out_features: usize,
}

impl Dense {
    /// Kaiming-uniform weights from the thread-local generator, zero bias.
    /// Seeded models go through [`Dense::new_with_options`].
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self::new_with_options(
            in_features,
            out_features,
            Initializer::KaimingUniform,
            true,
            Regularizer::None,
            &mut rand::thread_rng(),
        )
    }

    /// Like [`Dense::new`] but bias-free.
    pub fn new_no_bias(in_features: usize, out_features: usize) -> Self {
        Self::new_with_options(
            in_features,
            out_features,
            Initializer::KaimingUniform,
            false,
            Regularizer::None,
            &mut rand::thread_rng(),
        )
    }

    /// Draws the kernel from `rng` with `weight_init`. The bias, when
    /// `use_bias` is set, starts at zero.
    pub fn new_with_options<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        weight_init: Initializer,
        use_bias: bool,
        kernel_regularizer: Regularizer,
        rng: &mut R,
    ) -> Self {
        let weights = weight_init.initialize(&[in_features, out_features], rng);
        let bias = use_bias.then(|| Tensor::zeros(&[out_features]));
        Self {
            weights,
            bias,
            kernel_regularizer,
            in_features,
            out_features,
        }
    }

    /// Wraps existing parameters. `weights` must be 2D and `bias` must match
    /// its column count.
    pub fn from_weights(weights: Tensor, bias: Option<Tensor>) -> Result<Self, LayerError> {
        if weights.ndim() != 2 {
            return Err(LayerError::config(format!(
                "Weights must be 2D, got {}D",
                weights.ndim()
            )));
        }
        if let Some(b) = &bias {
            if b.shape() != [weights.shape()[1]] {
                return Err(LayerError::ShapeMismatch {
                    expected: vec![weights.shape()[1]],
                    actual: b.shape().to_vec(),
                });
            }
        }
        let in_features = weights.shape()[0];
        let out_features = weights.shape()[1];
        Ok(Self {
            weights,
            bias,
            kernel_regularizer: Regularizer::None,
            in_features,
            out_features,
        })
    }

    /// Penalty on the kernel, reported by `regularization_loss`.
    pub fn with_kernel_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.kernel_regularizer = regularizer;
        self
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Kernel, `[in_features, out_features]`.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// Returns the bias, if the layer has one.
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Returns whether this layer adds a bias.
    pub fn use_bias(&self) -> bool {
        self.bias.is_some()
    }
}

impl Layer for Dense {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        if input.ndim() < 2 {
            return Err(LayerError::forward(format!(
                "Dense expects at least 2D input, got {}D",
                input.ndim()
            )));
        }
        let last = input.shape()[input.ndim() - 1];
        if last != self.in_features {
            return Err(LayerError::InvalidInputDimension {
                expected: self.in_features,
                actual: last,
            });
        }

        let leading = &input.shape()[..input.ndim() - 1];
        let rows: usize = leading.iter().product();
        let flat = input.reshape(&[rows, self.in_features]);
        let mut output = flat.matmul(&self.weights);
        if let Some(bias) = &self.bias {
            output = output.add(bias);
        }

        let mut out_shape = leading.to_vec();
        out_shape.push(self.out_features);
        Ok(output.reshape(&out_shape))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = vec![&self.weights];
        if let Some(bias) = &self.bias {
            params.push(bias);
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = vec![&mut self.weights];
        if let Some(bias) = &mut self.bias {
            params.push(bias);
        }
        params
    }

    fn regularization_loss(&self) -> f32 {
        self.kernel_regularizer.loss(&self.weights)
    }

    fn name(&self) -> &str {
        "Dense"
    }
}
