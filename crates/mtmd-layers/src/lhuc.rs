//! LHUC (Learning Hidden Unit Contributions) domain adaptation block.
//!
//! Maps a conditioning vector (a domain embedding, or an attention output
//! over it) to a per-unit multiplier for a tower's hidden activations.

use rand::Rng;

use crate::activation::{relu, sigmoid};
use crate::dense::Dense;
use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::layer::Layer;
use crate::regularizer::Regularizer;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Configuration for [`DomainLhuc`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LhucConfig {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub output_dim: usize,
    /// Multiplier applied after the sigmoid; outputs lie in `(0, scale)`
    pub scale: f32,
}

impl LhucConfig {
    /// Hidden width 128 and scale 2.0, so an untrained block is close to the identity gate.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            hidden_dim: 128,
            output_dim,
            scale: 2.0,
        }
    }

    pub fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn validate(&self) -> Result<(), LayerError> {
        if self.input_dim == 0 || self.hidden_dim == 0 || self.output_dim == 0 {
            return Err(LayerError::config(format!(
                "LHUC dimensions must be positive, got {} -> {} -> {}",
                self.input_dim, self.hidden_dim, self.output_dim
            )));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(LayerError::config(format!(
                "LHUC scale must be positive, got {}",
                self.scale
            )));
        }
        Ok(())
    }
}

/// `scale * sigmoid(relu(x W1) W2)` with bias-free projections.
///
/// # Example
///
/// ```
/// use mtmd_layers::layer::Layer;
/// use mtmd_layers::lhuc::{DomainLhuc, LhucConfig};
/// use mtmd_layers::tensor::Tensor;
/// use rand::rngs::StdRng;
/// use rand::SeedableRng;
///
/// let mut rng = StdRng::seed_from_u64(1024);
/// let lhuc = DomainLhuc::new(LhucConfig::new(8, 64), &mut rng).unwrap();
/// let gate = lhuc.forward(&Tensor::ones(&[4, 8])).unwrap();
/// assert_eq!(gate.shape(), &[4, 64]);
/// assert!(gate.data().iter().all(|&g| g > 0.0 && g < 2.0));
/// ```
#[derive(Debug, Clone)]
pub struct DomainLhuc {
    hidden: Dense,
    output: Dense,
    config: LhucConfig,
}

impl DomainLhuc {
    pub fn new<R: Rng + ?Sized>(config: LhucConfig, rng: &mut R) -> Result<Self, LayerError> {
        config.validate()?;
        let hidden = Dense::new_with_options(
            config.input_dim,
            config.hidden_dim,
            Initializer::KaimingUniform,
            false,
            Regularizer::None,
            rng,
        );
        let output = Dense::new_with_options(
            config.hidden_dim,
            config.output_dim,
            Initializer::KaimingUniform,
            false,
            Regularizer::None,
            rng,
        );
        Ok(Self {
            hidden,
            output,
            config,
        })
    }

    pub fn config(&self) -> &LhucConfig {
        &self.config
    }

    pub fn output_dim(&self) -> usize {
        self.config.output_dim
    }
}

impl Layer for DomainLhuc {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        crate::error::expect_2d("DomainLhuc", input, self.config.input_dim)?;
        let h = relu(&self.hidden.forward(input)?);
        let gate = sigmoid(&self.output.forward(&h)?);
        if self.config.scale == 1.0 {
            Ok(gate)
        } else {
            Ok(gate.scale(self.config.scale))
        }
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.hidden.parameters();
        params.extend(self.output.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.hidden.parameters_mut();
        params.extend(self.output.parameters_mut());
        params
    }

    fn name(&self) -> &str {
        "DomainLhuc"
    }
}
