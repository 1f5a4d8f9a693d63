//! Per-row and per-batch feature normalisation.
//!
//! [`BatchNorm`] follows the DNN blocks; [`LayerNorm`] is available to attention.

use ndarray::Axis;

use crate::error::LayerError;
use crate::layer::Layer;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Normalises each row over its last axis.
///
/// Statistics are taken over the last axis of every row,
/// followed by the affine gamma/beta.
///
/// Per row:
/// `y = (x - mean) / sqrt(var + eps) * gamma + beta`
///
/// # Example
///
/// ```
/// use mtmd_layers::normalization::LayerNorm;
/// use mtmd_layers::layer::Layer;
/// use mtmd_layers::tensor::Tensor;
///
/// let layer_norm = LayerNorm::new(4);
/// let input = Tensor::from_data(&[2, 4], vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 8.0]);
/// let output = layer_norm.forward(&input).unwrap();
/// assert_eq!(output.shape(), &[2, 4]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerNorm {
    /// gamma
    gamma: Tensor,
    /// beta
    beta: Tensor,
    eps: f32,
    normalized_shape: usize,
}

impl LayerNorm {
    /// Layer norm with `eps = 1e-5`, unit gamma and zero beta.
    ///
    /// # Arguments
    ///
    /// * `normalized_shape` - width of the last axis
    pub fn new(normalized_shape: usize) -> Self {
        Self::with_eps(normalized_shape, 1e-5)
    }

    /// Layer norm with an explicit epsilon.
    pub fn with_eps(normalized_shape: usize, eps: f32) -> Self {
        Self {
            gamma: Tensor::ones(&[normalized_shape]),
            beta: Tensor::zeros(&[normalized_shape]),
            eps,
            normalized_shape,
        }
    }

    /// Returns the normalized dimension.
    pub fn normalized_shape(&self) -> usize {
        self.normalized_shape
    }

    /// Returns the scale parameter.
    pub fn gamma(&self) -> &Tensor {
        &self.gamma
    }

    /// Returns the shift parameter.
    pub fn beta(&self) -> &Tensor {
        &self.beta
    }
}

impl Layer for LayerNorm {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        let last = input.shape().last().copied().unwrap_or(0);
        if last != self.normalized_shape {
            return Err(LayerError::InvalidInputDimension {
                expected: self.normalized_shape,
                actual: last,
            });
        }

        let axis = Axis(input.ndim() - 1);
        let mut out = input.view().to_owned();
        let n = self.normalized_shape as f32;
        for mut lane in out.lanes_mut(axis) {
            let mean = lane.sum() / n;
            let var = lane.fold(0.0, |acc, &x| acc + (x - mean) * (x - mean)) / n;
            let inv_std = 1.0 / (var + self.eps).sqrt();
            for (x, (&g, &b)) in lane
                .iter_mut()
                .zip(self.gamma.data().iter().zip(self.beta.data().iter()))
            {
                *x = (*x - mean) * inv_std * g + b;
            }
        }
        Ok(Tensor::from_array(out))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.gamma, &self.beta]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.gamma, &mut self.beta]
    }

    fn name(&self) -> &str {
        "LayerNorm"
    }
}

/// Batch Normalization layer over `[batch, num_features]` inputs.
///
/// Training-mode forward normalizes with the batch statistics and folds them
/// into the running estimates:
/// `running = (1 - momentum) * running + momentum * batch`.
/// Inference uses the running estimates. The running variance tracks the
/// unbiased batch variance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNorm {
    /// gamma
    gamma: Tensor,
    /// beta
    beta: Tensor,
    /// Used in eval mode
    running_mean: Tensor,
    /// Used in eval mode
    running_var: Tensor,
    /// Weight of the old running value per update
    momentum: f32,
    eps: f32,
    num_features: usize,
    training: bool,
}

impl BatchNorm {
    /// Creates a new Batch Normalization layer with momentum 0.1 and eps 1e-5.
    pub fn new(num_features: usize) -> Self {
        Self::with_params(num_features, 0.1, 1e-5)
    }

    /// Batch norm with explicit momentum and epsilon.
    ///
    /// # Arguments
    ///
    /// * `num_features` - Number of features (channels)
    /// * `momentum` - Weight of the current batch in the running statistics
    /// * `eps` - added to the variance before the square root
    pub fn with_params(num_features: usize, momentum: f32, eps: f32) -> Self {
        Self {
            gamma: Tensor::ones(&[num_features]),
            beta: Tensor::zeros(&[num_features]),
            running_mean: Tensor::zeros(&[num_features]),
            running_var: Tensor::ones(&[num_features]),
            momentum,
            eps,
            num_features,
            training: true,
        }
    }

    /// Width of the normalised axis.
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Returns the running mean and variance.
    pub fn running_stats(&self) -> (&Tensor, &Tensor) {
        (&self.running_mean, &self.running_var)
    }

    fn check_input(&self, input: &Tensor) -> Result<(), LayerError> {
        crate::error::expect_2d("BatchNorm", input, self.num_features)
    }

    fn normalize(&self, input: &Tensor, mean: &Tensor, var: &Tensor) -> Tensor {
        let inv_std = var.map(|v| 1.0 / (v.max(0.0) + self.eps).sqrt());
        input
            .sub(mean)
            .mul(&inv_std)
            .mul(&self.gamma)
            .add(&self.beta)
    }
}

impl Layer for BatchNorm {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.check_input(input)?;
        Ok(self.normalize(input, &self.running_mean, &self.running_var))
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.check_input(input)?;
        if !self.training {
            return self.forward(input);
        }
        let batch = input.shape()[0];
        if batch == 0 {
            return Ok(input.clone());
        }

        let mean = input.mean_axis(0);
        let centered = input.sub(&mean);
        let var = centered.sqr().mean_axis(0);

        let m = self.momentum;
        let unbiased = if batch > 1 {
            var.scale(batch as f32 / (batch - 1) as f32)
        } else {
            var.clone()
        };
        self.running_mean = self.running_mean.scale(1.0 - m).add(&mean.scale(m));
        self.running_var = self.running_var.scale(1.0 - m).add(&unbiased.scale(m));

        Ok(self.normalize(input, &mean, &var))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.gamma, &self.beta]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.gamma, &mut self.beta]
    }

    fn name(&self) -> &str {
        "BatchNorm"
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_norm_zero_mean_unit_var() {
        let ln = LayerNorm::new(4);
        let input = Tensor::from_data(&[2, 4], vec![1.0, 2.0, 3.0, 4.0, 10.0, 10.0, 10.0, 30.0]);
        let out = ln.forward(&input).unwrap();
        for row in out.data().chunks(4) {
            let mean: f32 = row.iter().sum::<f32>() / 4.0;
            let var: f32 = row.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / 4.0;
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_layer_norm_rank3_and_bad_dim() {
        let ln = LayerNorm::new(3);
        let out = ln.forward(&Tensor::ones(&[2, 5, 3])).unwrap();
        assert_eq!(out.shape(), &[2, 5, 3]);
        assert!(out.data().iter().all(|x| x.abs() < 1e-6));
        assert!(ln.forward(&Tensor::ones(&[2, 4])).is_err());
    }

    #[test]
    fn test_batch_norm_train_uses_batch_stats() {
        let mut bn = BatchNorm::new(2);
        let input = Tensor::from_data(&[2, 2], vec![1.0, 10.0, 3.0, 30.0]);
        let out = bn.forward_train(&input).unwrap();
        assert!((out.data()[0] + 1.0).abs() < 1e-3);
        assert!((out.data()[2] - 1.0).abs() < 1e-3);

        let (mean, var) = bn.running_stats();
        assert!((mean.data()[0] - 0.2).abs() < 1e-6);
        assert!((mean.data()[1] - 2.0).abs() < 1e-5);
        // unbiased variance of [1, 3] is 2: 0.9 * 1 + 0.1 * 2
        assert!((var.data()[0] - 1.1).abs() < 1e-6);
    }

    #[test]
    fn test_batch_norm_inference_uses_running_stats() {
        let bn = BatchNorm::new(3);
        let input = Tensor::from_data(&[1, 3], vec![1.0, 2.0, 3.0]);
        let out = bn.forward(&input).unwrap();
        for (o, i) in out.data().iter().zip(input.data()) {
            assert!((o - i).abs() < 1e-4);
        }
    }

    #[test]
    fn test_batch_norm_eval_mode_train_forward_keeps_stats() {
        let mut bn = BatchNorm::new(1);
        bn.set_training(false);
        bn.forward_train(&Tensor::from_data(&[2, 1], vec![5.0, 7.0]))
            .unwrap();
        assert_eq!(bn.running_stats().0.data(), &[0.0]);
    }

    #[test]
    fn test_batch_norm_rejects_wrong_width() {
        let bn = BatchNorm::new(3);
        assert!(bn.forward(&Tensor::ones(&[2, 4])).is_err());
    }
}
