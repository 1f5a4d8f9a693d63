//! Neural network layers for multi-task, multi-domain recommendation models.
//!
//! This crate provides the building blocks the models in `mtmd-models` are
//! composed from:
//!
//! - **Tensor**: A row-major `f32` tensor with `ndarray`-backed kernels
//! - **Dense / MLP**: Fully connected layers and DNN blocks with optional
//!   batch normalization and dropout
//! - **MMoE**: shared experts with per-task softmax gates
//! - **Attention**: Field-level self-attention and task-to-domain target attention
//! - **LHUC**: Domain-conditioned gating of hidden units
//! - **Embeddings**: Dense embedding tables with pooled lookups
//! - **Prediction**: Per-task bias and output link
//!
//! # Usage
//!
//! ```
//! use mtmd_layers::prelude::*;
//!
//! let mlp = MLPConfig::new(128, vec![64, 32])
//!     .with_activation(ActivationType::ReLU)
//!     .build()
//!     .unwrap();
//!
//! let input = Tensor::zeros(&[32, 128]); // batch of 32
//! let output = mlp.forward(&input).unwrap();
//! assert_eq!(output.shape(), &[32, 32]);
//! ```
//!
//! # The `Layer` trait
//!
//! All layers implement the [`Layer`] trait, which separates inference
//! (`forward`) from training-mode evaluation (`forward_train`):
//!
//! ```
//! use mtmd_layers::prelude::*;
//!
//! fn infer<L: Layer>(layer: &L, input: &Tensor) -> Tensor {
//!     layer.forward(input).unwrap()
//! }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

pub mod activation;
pub mod attention;
pub mod dense;
pub mod dropout;
pub mod embedding;
pub mod error;
pub mod initializer;
pub mod layer;
pub mod lhuc;
pub mod mlp;
pub mod mmoe;
pub mod normalization;
pub mod prediction;
pub mod regularizer;
pub mod tensor;

pub use activation::{Activation, ActivationType, PReLU, ReLU, Sigmoid, Softmax, Tanh, GELU};
pub use attention::{AttentionConfig, SelfAttention, TargetAttention};
pub use dense::Dense;
pub use dropout::Dropout;
pub use embedding::{ids_from_tensor, EmbeddingTable, PoolingMode, PADDING_ID};
pub use error::{LayerError, LayerResult};
pub use initializer::Initializer;
pub use layer::Layer;
pub use lhuc::{DomainLhuc, LhucConfig};
pub use mlp::{MLPConfig, MLP};
pub use mmoe::{Expert, Gate, MMoE, MMoEConfig};
pub use normalization::{BatchNorm, LayerNorm};
pub use prediction::{PredictionLayer, TaskType};
pub use regularizer::Regularizer;
pub use tensor::Tensor;

/// Everything a model crate usually needs.
pub mod prelude {
    pub use crate::activation::{ActivationType, ReLU, Sigmoid, Softmax, Tanh, GELU};
    pub use crate::attention::{AttentionConfig, SelfAttention, TargetAttention};
    pub use crate::dense::Dense;
    pub use crate::embedding::{EmbeddingTable, PoolingMode};
    pub use crate::error::LayerError;
    pub use crate::initializer::Initializer;
    pub use crate::layer::Layer;
    pub use crate::lhuc::{DomainLhuc, LhucConfig};
    pub use crate::mlp::{MLPConfig, MLP};
    pub use crate::mmoe::{MMoE, MMoEConfig};
    pub use crate::normalization::{BatchNorm, LayerNorm};
    pub use crate::prediction::{PredictionLayer, TaskType};
    pub use crate::regularizer::Regularizer;
    pub use crate::tensor::Tensor;
}
