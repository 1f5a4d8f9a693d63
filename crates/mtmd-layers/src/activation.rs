//! Element-wise nonlinearities and the name-to-activation mapping used by configs.
//!
//! This module provides the activation functions used by the DNN blocks
//! (ReLU, Sigmoid, Tanh, GELU, PReLU) plus a last-axis Softmax, and the
//! [`ActivationType`] selector that parses their configuration names.

use std::fmt;
use std::str::FromStr;

use crate::error::LayerError;
use crate::layer::Layer;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// ReLU.
///
/// `max(0, x)`.
///
/// # Example
///
/// ```
/// use mtmd_layers::activation::ReLU;
/// use mtmd_layers::layer::Layer;
/// use mtmd_layers::tensor::Tensor;
///
/// let relu = ReLU::new();
/// let input = Tensor::from_data(&[1, 4], vec![-1.0, 0.0, 1.0, 2.0]);
/// let output = relu.forward(&input).unwrap();
/// assert_eq!(output.data(), &[0.0, 0.0, 1.0, 2.0]);
/// ```
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReLU;

impl ReLU {
    pub fn new() -> Self {
        Self
    }
}

impl Layer for ReLU {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        Ok(relu(input))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "ReLU"
    }
}

/// Logistic sigmoid.
///
/// `1 / (1 + exp(-x))`.
///
/// # Example
///
/// ```
/// use mtmd_layers::activation::Sigmoid;
/// use mtmd_layers::layer::Layer;
/// use mtmd_layers::tensor::Tensor;
///
/// let sigmoid = Sigmoid::new();
/// let output = sigmoid.forward(&Tensor::zeros(&[2, 2])).unwrap();
/// assert!((output.data()[0] - 0.5).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Sigmoid;

impl Sigmoid {
    pub fn new() -> Self {
        Self
    }
}

impl Layer for Sigmoid {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        Ok(sigmoid(input))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "Sigmoid"
    }
}

/// `tanh(x)`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Tanh;

impl Tanh {
    pub fn new() -> Self {
        Self
    }
}

impl Layer for Tanh {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        Ok(input.map(f32::tanh))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "Tanh"
    }
}

/// Gaussian Error Linear Unit (GELU), tanh approximation.
///
/// Computes `0.5 * x * (1 + tanh(sqrt(2/pi) * (x + 0.044715 * x^3)))`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GELU;

impl GELU {
    pub fn new() -> Self {
        Self
    }
}

impl Layer for GELU {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        let sqrt_2_over_pi = (2.0 / std::f32::consts::PI).sqrt();
        Ok(input.map(|x| {
            let inner = sqrt_2_over_pi * (x + 0.044715 * x * x * x);
            0.5 * x * (1.0 + inner.tanh())
        }))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "GELU"
    }
}

/// Parametric ReLU with a single learnable negative slope.
///
/// Computes `f(x) = x` for `x >= 0` and `alpha * x` otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PReLU {
    /// Learnable slope, shape `[1]`
    alpha: Tensor,
}

impl PReLU {
    /// Creates a PReLU layer with the given initial slope.
    pub fn new(initial_alpha: f32) -> Self {
        Self {
            alpha: Tensor::full(&[1], initial_alpha),
        }
    }

    /// Returns the current slope.
    pub fn alpha(&self) -> f32 {
        self.alpha.data()[0]
    }
}

impl Default for PReLU {
    fn default() -> Self {
        Self::new(0.25)
    }
}

impl Layer for PReLU {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        let alpha = self.alpha();
        Ok(input.map(|x| if x >= 0.0 { x } else { alpha * x }))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.alpha]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.alpha]
    }

    fn name(&self) -> &str {
        "PReLU"
    }
}

/// Softmax over the last axis.
///
/// # Example
///
/// ```
/// use mtmd_layers::activation::Softmax;
/// use mtmd_layers::layer::Layer;
/// use mtmd_layers::tensor::Tensor;
///
/// let softmax = Softmax::new();
/// let out = softmax.forward(&Tensor::from_data(&[1, 2], vec![0.0, 0.0])).unwrap();
/// assert_eq!(out.data(), &[0.5, 0.5]);
/// ```
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Softmax;

impl Softmax {
    /// Creates a new Softmax layer.
    pub fn new() -> Self {
        Self
    }
}

impl Layer for Softmax {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        if input.ndim() == 0 {
            return Err(LayerError::forward("Softmax requires at least one axis"));
        }
        Ok(input.softmax())
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "Softmax"
    }
}

pub(crate) fn relu(input: &Tensor) -> Tensor {
    input.map(|x| x.max(0.0))
}

pub(crate) fn sigmoid(input: &Tensor) -> Tensor {
    input.map(|x| 1.0 / (1.0 + (-x).exp()))
}

/// Activation function selector for DNN blocks.
///
/// Parsed case-insensitively from `relu`, `sigmoid`, `tanh`, `gelu`, `prelu`
/// and `linear` / `none`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ActivationType {
    /// Rectified Linear Unit
    #[default]
    ReLU,
    /// Sigmoid function
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
    /// Gaussian Error Linear Unit
    GELU,
    /// Parametric ReLU
    PReLU,
    /// No activation (identity)
    None,
}

impl ActivationType {
    /// Instantiates a fresh activation layer of this type.
    pub fn build(self) -> Activation {
        match self {
            ActivationType::ReLU => Activation::ReLU(ReLU::new()),
            ActivationType::Sigmoid => Activation::Sigmoid(Sigmoid::new()),
            ActivationType::Tanh => Activation::Tanh(Tanh::new()),
            ActivationType::GELU => Activation::GELU(GELU::new()),
            ActivationType::PReLU => Activation::PReLU(PReLU::default()),
            ActivationType::None => Activation::Identity,
        }
    }
}

impl FromStr for ActivationType {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(ActivationType::ReLU),
            "sigmoid" => Ok(ActivationType::Sigmoid),
            "tanh" => Ok(ActivationType::Tanh),
            "gelu" => Ok(ActivationType::GELU),
            "prelu" => Ok(ActivationType::PReLU),
            "linear" | "none" | "identity" => Ok(ActivationType::None),
            other => Err(LayerError::config(format!(
                "Activation layer {} is not implemented",
                other
            ))),
        }
    }
}

impl fmt::Display for ActivationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivationType::ReLU => "relu",
            ActivationType::Sigmoid => "sigmoid",
            ActivationType::Tanh => "tanh",
            ActivationType::GELU => "gelu",
            ActivationType::PReLU => "prelu",
            ActivationType::None => "linear",
        };
        f.write_str(name)
    }
}

/// An instantiated activation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Activation {
    ReLU(ReLU),
    Sigmoid(Sigmoid),
    Tanh(Tanh),
    GELU(GELU),
    PReLU(PReLU),
    Identity,
}

impl Layer for Activation {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        match self {
            Self::ReLU(a) => a.forward(input),
            Self::Sigmoid(a) => a.forward(input),
            Self::Tanh(a) => a.forward(input),
            Self::GELU(a) => a.forward(input),
            Self::PReLU(a) => a.forward(input),
            Self::Identity => Ok(input.clone()),
        }
    }

    fn parameters(&self) -> Vec<&Tensor> {
        match self {
            Self::PReLU(a) => a.parameters(),
            _ => vec![],
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        match self {
            Self::PReLU(a) => a.parameters_mut(),
            _ => vec![],
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::ReLU(a) => a.name(),
            Self::Sigmoid(a) => a.name(),
            Self::Tanh(a) => a.name(),
            Self::GELU(a) => a.name(),
            Self::PReLU(a) => a.name(),
            Self::Identity => "Identity",
        }
    }
}
