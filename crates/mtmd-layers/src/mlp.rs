//! Multi-layer perceptron (DNN block) implementation.
//!
//! This module provides the [`MLP`] struct: a stack of hidden layers, each of
//! which is `Dense -> [BatchNorm] -> activation -> Dropout`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::activation::{Activation, ActivationType};
use crate::dense::Dense;
use crate::dropout::Dropout;
use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::layer::Layer;
use crate::normalization::BatchNorm;
use crate::regularizer::Regularizer;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Widths and block options of a DNN.
///
/// # Example
///
/// ```
/// use mtmd_layers::activation::ActivationType;
/// use mtmd_layers::mlp::MLPConfig;
///
/// let config = MLPConfig::new(128, vec![256, 128])
///     .with_activation(ActivationType::ReLU)
///     .with_dropout(0.1)
///     .with_batch_norm(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MLPConfig {
    pub input_dim: usize,
    /// Output width of every hidden layer
    pub hidden_units: Vec<usize>,
    /// Activation applied after every hidden layer
    pub activation: ActivationType,
    /// Drop probability after every block
    pub dropout_rate: f32,
    /// Whether to batch-normalize before the activation
    pub use_bn: bool,
    /// Standard deviation of the normal kernel initializer
    pub init_std: f32,
    /// L2 penalty on the dense kernels
    pub l2_reg: f32,
    /// Seed for weights and dropout masks when built standalone
    pub seed: u64,
}

impl MLPConfig {
    /// Creates a new MLP configuration.
    ///
    /// # Arguments
    ///
    /// * `input_dim` - width of the incoming rows
    /// * `hidden_units` - Width of each hidden layer, in order
    pub fn new(input_dim: usize, hidden_units: Vec<usize>) -> Self {
        Self {
            input_dim,
            hidden_units,
            activation: ActivationType::ReLU,
            dropout_rate: 0.0,
            use_bn: false,
            init_std: 1e-4,
            l2_reg: 0.0,
            seed: 1024,
        }
    }

    /// Sets the hidden activation.
    pub fn with_activation(mut self, activation: ActivationType) -> Self {
        self.activation = activation;
        self
    }

    /// Drop probability applied after each block in training mode.
    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout_rate = rate;
        self
    }

    /// Enables or disables batch normalization.
    pub fn with_batch_norm(mut self, use_bn: bool) -> Self {
        self.use_bn = use_bn;
        self
    }

    /// Sets the kernel initializer standard deviation.
    pub fn with_init_std(mut self, init_std: f32) -> Self {
        self.init_std = init_std;
        self
    }

    /// Sets the L2 penalty on dense kernels.
    pub fn with_l2_reg(mut self, l2_reg: f32) -> Self {
        self.l2_reg = l2_reg;
        self
    }

    /// Sets the seed used by [`MLPConfig::build`].
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Checks widths, dropout range and that there is at least one block.
    pub fn validate(&self) -> Result<(), LayerError> {
        if self.input_dim == 0 {
            return Err(LayerError::config("Input dimension must be positive"));
        }
        if self.hidden_units.is_empty() {
            return Err(LayerError::config("hidden_units is empty!!"));
        }
        if let Some(i) = self.hidden_units.iter().position(|&d| d == 0) {
            return Err(LayerError::config(format!(
                "Layer {} has zero output dimension",
                i
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(LayerError::config("Dropout rate must be in [0, 1)"));
        }
        if !self.init_std.is_finite() || self.init_std < 0.0 {
            return Err(LayerError::config("init_std must be finite and non-negative"));
        }
        Ok(())
    }

    /// Builds the MLP, drawing weights from a generator seeded with `seed`.
    pub fn build(self) -> Result<MLP, LayerError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        MLP::with_rng(self, &mut rng)
    }
}

/// One hidden layer of the block.
#[derive(Debug, Clone)]
struct HiddenLayer {
    dense: Dense,
    bn: Option<BatchNorm>,
    activation: Activation,
    dropout: Dropout,
}

/// DNN blocks of `Dense -> BatchNorm? -> activation -> dropout`.
///
/// # Example
///
/// ```
/// use mtmd_layers::layer::Layer;
/// use mtmd_layers::mlp::MLPConfig;
/// use mtmd_layers::tensor::Tensor;
///
/// let mlp = MLPConfig::new(128, vec![64, 10]).build().unwrap();
///
/// let input = Tensor::zeros(&[4, 128]);
/// let output = mlp.forward(&input).unwrap();
/// assert_eq!(output.shape(), &[4, 10]);
/// ```
#[derive(Debug, Clone)]
pub struct MLP {
    layers: Vec<HiddenLayer>,
    config: MLPConfig,
    training: bool,
}

impl MLP {
    /// Creates an MLP whose weights are drawn from `rng`.
    ///
    /// Dropout masks get their own generators, seeded from `rng` as well.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn with_rng(config: MLPConfig, rng: &mut StdRng) -> Result<Self, LayerError> {
        config.validate()?;

        let mut layers = Vec::with_capacity(config.hidden_units.len());
        let mut prev_dim = config.input_dim;
        for &units in &config.hidden_units {
            // kernel ~ N(0, init_std), bias ~ U(-1/sqrt(fan_in), 1/sqrt(fan_in))
            let kernel = Initializer::normal(config.init_std).initialize(&[prev_dim, units], rng);
            let bound = 1.0 / (prev_dim as f32).sqrt();
            let bias = Initializer::Uniform {
                low: -bound,
                high: bound,
            }
            .initialize(&[units], rng);
            let dense = Dense::from_weights(kernel, Some(bias))?
                .with_kernel_regularizer(Regularizer::l2(config.l2_reg));
            let bn = config.use_bn.then(|| BatchNorm::new(units));
            let dropout = Dropout::new(config.dropout_rate, rng.gen())?;
            layers.push(HiddenLayer {
                dense,
                bn,
                activation: config.activation.build(),
                dropout,
            });
            prev_dim = units;
        }

        Ok(Self {
            layers,
            config,
            training: true,
        })
    }

    /// Returns the number of hidden layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn config(&self) -> &MLPConfig {
        &self.config
    }

    pub fn input_dim(&self) -> usize {
        self.config.input_dim
    }

    /// Returns the output dimension (the last hidden width).
    pub fn output_dim(&self) -> usize {
        self.config.hidden_units.last().copied().unwrap_or(0)
    }
}

impl Layer for MLP {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        let mut x = input.clone();
        for layer in &self.layers {
            x = layer.dense.forward(&x)?;
            if let Some(bn) = &layer.bn {
                x = bn.forward(&x)?;
            }
            x = layer.activation.forward(&x)?;
        }
        Ok(x)
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let mut x = input.clone();
        for layer in &mut self.layers {
            x = layer.dense.forward_train(&x)?;
            if let Some(bn) = &mut layer.bn {
                x = bn.forward_train(&x)?;
            }
            x = layer.activation.forward_train(&x)?;
            x = layer.dropout.forward_train(&x)?;
        }
        Ok(x)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = Vec::new();
        for layer in &self.layers {
            params.extend(layer.dense.parameters());
            if let Some(bn) = &layer.bn {
                params.extend(bn.parameters());
            }
            params.extend(layer.activation.parameters());
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = Vec::new();
        for layer in &mut self.layers {
            params.extend(layer.dense.parameters_mut());
            if let Some(bn) = &mut layer.bn {
                params.extend(bn.parameters_mut());
            }
            params.extend(layer.activation.parameters_mut());
        }
        params
    }

    fn regularization_loss(&self) -> f32 {
        self.layers
            .iter()
            .map(|layer| layer.dense.regularization_loss())
            .sum()
    }

    fn name(&self) -> &str {
        "MLP"
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        for layer in &mut self.layers {
            if let Some(bn) = &mut layer.bn {
                bn.set_training(training);
            }
            layer.dropout.set_training(training);
        }
    }
}
