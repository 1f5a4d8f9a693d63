//! Multi-head attention layers.
//!
//! [`SelfAttention`] is the AutoInt interacting layer: every feature field
//! attends over every other field. [`TargetAttention`] lets a task
//! representation attend over a domain embedding; both vectors are split into
//! `head_num` tokens so the attention map is `[batch, head_num, head_num]`.

use rand::Rng;

use crate::activation::relu;
use crate::dense::Dense;
use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::layer::Layer;
use crate::normalization::LayerNorm;
use crate::regularizer::Regularizer;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Options shared by the attention layers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttentionConfig {
    /// Number of attention heads
    pub head_num: usize,
    /// Add a projection of the input to the attention output
    pub use_residual: bool,
    /// Divide scores by `sqrt(head_dim)`
    pub scaling: bool,
    /// Apply layer normalization to the output (target attention only)
    pub use_layer_norm: bool,
}

impl AttentionConfig {
    pub fn new(head_num: usize) -> Self {
        Self {
            head_num,
            use_residual: true,
            scaling: true,
            use_layer_norm: false,
        }
    }

    pub fn with_residual(mut self, use_residual: bool) -> Self {
        self.use_residual = use_residual;
        self
    }

    pub fn with_scaling(mut self, scaling: bool) -> Self {
        self.scaling = scaling;
        self
    }

    pub fn with_layer_norm(mut self, use_layer_norm: bool) -> Self {
        self.use_layer_norm = use_layer_norm;
        self
    }

    /// Checks that `dim` splits evenly into heads and returns the head size.
    pub fn head_dim(&self, dim: usize) -> Result<usize, LayerError> {
        if self.head_num == 0 {
            return Err(LayerError::config("head_num must be a positive integer"));
        }
        if dim == 0 || dim % self.head_num != 0 {
            return Err(LayerError::config(format!(
                "embedding size {} is not an integer multiple of head_num {}",
                dim, self.head_num
            )));
        }
        Ok(dim / self.head_num)
    }
}

fn projection<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Dense {
    Dense::new_with_options(
        in_dim,
        out_dim,
        Initializer::GlorotUniform,
        false,
        Regularizer::None,
        rng,
    )
}

/// Scaled dot-product attention over `[batch, tokens, head_dim]` tensors.
fn attend(q: &Tensor, k: &Tensor, v: &Tensor, scale: f32) -> Tensor {
    let scores = q.bmm(&k.transpose_last2()).scale(scale);
    scores.softmax().bmm(v)
}

/// Multi-head self-attention over feature fields.
///
/// Input and output are `[batch, fields, embedding_dim]`. The output passes
/// through a ReLU after the optional residual projection.
///
/// # Example
///
/// ```
/// use mtmd_layers::attention::{AttentionConfig, SelfAttention};
/// use mtmd_layers::layer::Layer;
/// use mtmd_layers::tensor::Tensor;
/// use rand::rngs::StdRng;
/// use rand::SeedableRng;
///
/// let mut rng = StdRng::seed_from_u64(1024);
/// let layer = SelfAttention::new(8, AttentionConfig::new(2), &mut rng).unwrap();
/// let out = layer.forward(&Tensor::ones(&[4, 3, 8])).unwrap();
/// assert_eq!(out.shape(), &[4, 3, 8]);
/// ```
#[derive(Debug, Clone)]
pub struct SelfAttention {
    w_query: Dense,
    w_key: Dense,
    w_value: Dense,
    w_res: Option<Dense>,
    config: AttentionConfig,
    embedding_dim: usize,
    head_dim: usize,
}

impl SelfAttention {
    /// Creates a self-attention layer for fields of width `embedding_dim`.
    ///
    /// # Errors
    ///
    /// Returns a config error if `embedding_dim` does not split into heads.
    pub fn new<R: Rng + ?Sized>(
        embedding_dim: usize,
        config: AttentionConfig,
        rng: &mut R,
    ) -> Result<Self, LayerError> {
        let head_dim = config.head_dim(embedding_dim)?;
        let w_query = projection(embedding_dim, embedding_dim, rng);
        let w_key = projection(embedding_dim, embedding_dim, rng);
        let w_value = projection(embedding_dim, embedding_dim, rng);
        let w_res = config
            .use_residual
            .then(|| projection(embedding_dim, embedding_dim, rng));
        Ok(Self {
            w_query,
            w_key,
            w_value,
            w_res,
            config,
            embedding_dim,
            head_dim,
        })
    }

    /// Returns the field width.
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }
}

impl Layer for SelfAttention {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        if input.ndim() != 3 {
            return Err(LayerError::forward(format!(
                "SelfAttention expects 3D input, got {}D",
                input.ndim()
            )));
        }
        if input.shape()[2] != self.embedding_dim {
            return Err(LayerError::InvalidInputDimension {
                expected: self.embedding_dim,
                actual: input.shape()[2],
            });
        }

        let q = self.w_query.forward(input)?;
        let k = self.w_key.forward(input)?;
        let v = self.w_value.forward(input)?;
        let scale = if self.config.scaling {
            1.0 / (self.head_dim as f32).sqrt()
        } else {
            1.0
        };

        let heads: Vec<Tensor> = (0..self.config.head_num)
            .map(|h| {
                let start = h * self.head_dim;
                attend(
                    &q.narrow(2, start, self.head_dim),
                    &k.narrow(2, start, self.head_dim),
                    &v.narrow(2, start, self.head_dim),
                    scale,
                )
            })
            .collect();
        let mut output = Tensor::concat(&heads.iter().collect::<Vec<_>>(), 2);

        if let Some(w_res) = &self.w_res {
            output = output.add(&w_res.forward(input)?);
        }
        Ok(relu(&output))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = Vec::new();
        params.extend(self.w_query.parameters());
        params.extend(self.w_key.parameters());
        params.extend(self.w_value.parameters());
        if let Some(w_res) = &self.w_res {
            params.extend(w_res.parameters());
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = Vec::new();
        params.extend(self.w_query.parameters_mut());
        params.extend(self.w_key.parameters_mut());
        params.extend(self.w_value.parameters_mut());
        if let Some(w_res) = &mut self.w_res {
            params.extend(w_res.parameters_mut());
        }
        params
    }

    fn name(&self) -> &str {
        "SelfAttention"
    }
}

/// Attention of a task representation over a domain embedding.
///
/// `query` is `[batch, query_dim]`, `key` is `[batch, key_dim]`; the output is
/// `[batch, key_dim]`. Queries, keys and values are ReLU projections to
/// `key_dim`, each viewed as `head_num` tokens of width `key_dim / head_num`.
#[derive(Debug, Clone)]
pub struct TargetAttention {
    w_query: Dense,
    w_key: Dense,
    w_value: Dense,
    layer_norm: Option<LayerNorm>,
    config: AttentionConfig,
    query_dim: usize,
    key_dim: usize,
    head_dim: usize,
}

impl TargetAttention {
    /// Creates a target-attention layer.
    ///
    /// # Errors
    ///
    /// Returns a config error if `key_dim` does not split into heads or
    /// `query_dim` is zero.
    pub fn new<R: Rng + ?Sized>(
        query_dim: usize,
        key_dim: usize,
        config: AttentionConfig,
        rng: &mut R,
    ) -> Result<Self, LayerError> {
        if query_dim == 0 {
            return Err(LayerError::config("query_dim must be positive"));
        }
        let head_dim = config.head_dim(key_dim)?;
        Ok(Self {
            w_query: projection(query_dim, key_dim, rng),
            w_key: projection(key_dim, key_dim, rng),
            w_value: projection(key_dim, key_dim, rng),
            layer_norm: config.use_layer_norm.then(|| LayerNorm::new(key_dim)),
            config,
            query_dim,
            key_dim,
            head_dim,
        })
    }

    /// Returns the output width.
    pub fn key_dim(&self) -> usize {
        self.key_dim
    }

    /// Attends `query` over `key`.
    pub fn attend(&self, query: &Tensor, key: &Tensor) -> Result<Tensor, LayerError> {
        crate::error::expect_2d("TargetAttention query", query, self.query_dim)?;
        crate::error::expect_2d("TargetAttention key", key, self.key_dim)?;
        let batch = query.shape()[0];
        if key.shape()[0] != batch {
            return Err(LayerError::ShapeMismatch {
                expected: vec![batch, self.key_dim],
                actual: key.shape().to_vec(),
            });
        }

        let heads = [batch, self.config.head_num, self.head_dim];
        let q = relu(&self.w_query.forward(query)?);
        let k = relu(&self.w_key.forward(key)?);
        let v = relu(&self.w_value.forward(key)?);
        let scale = if self.config.scaling {
            1.0 / (self.head_dim as f32).sqrt()
        } else {
            1.0
        };

        let mut output = attend(&q.reshape(&heads), &k.reshape(&heads), &v.reshape(&heads), scale)
            .reshape(&[batch, self.key_dim]);
        if self.config.use_residual {
            output = output.add(&q);
        }
        if let Some(ln) = &self.layer_norm {
            output = ln.forward(&output)?;
        }
        Ok(output)
    }
}

impl Layer for TargetAttention {
    /// Splits `[batch, query_dim + key_dim]` into query and key and attends.
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        crate::error::expect_2d("TargetAttention", input, self.query_dim + self.key_dim)?;
        let query = input.narrow(1, 0, self.query_dim);
        let key = input.narrow(1, self.query_dim, self.key_dim);
        self.attend(&query, &key)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = Vec::new();
        params.extend(self.w_query.parameters());
        params.extend(self.w_key.parameters());
        params.extend(self.w_value.parameters());
        if let Some(ln) = &self.layer_norm {
            params.extend(ln.parameters());
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = Vec::new();
        params.extend(self.w_query.parameters_mut());
        params.extend(self.w_key.parameters_mut());
        params.extend(self.w_value.parameters_mut());
        if let Some(ln) = &mut self.layer_norm {
            params.extend(ln.parameters_mut());
        }
        params
    }

    fn name(&self) -> &str {
        "TargetAttention"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_head_dim_validation() {
        assert_eq!(AttentionConfig::new(4).head_dim(8).unwrap(), 2);
        assert!(AttentionConfig::new(3).head_dim(8).is_err());
        assert!(AttentionConfig::new(0).head_dim(8).is_err());
    }

    #[test]
    fn test_attend_rows_are_convex_combinations() {
        let q = Tensor::from_data(&[1, 2, 1], vec![1.0, -1.0]);
        let k = Tensor::from_data(&[1, 2, 1], vec![1.0, 2.0]);
        let v = Tensor::from_data(&[1, 2, 1], vec![10.0, 20.0]);
        let out = attend(&q, &k, &v, 1.0);
        for &x in out.data() {
            assert!((10.0..=20.0).contains(&x));
        }
        // first query prefers the larger key, second the smaller
        assert!(out.data()[0] > 15.0 && out.data()[1] < 15.0);
    }

    #[test]
    fn test_self_attention_shape_and_relu() {
        let mut rng = StdRng::seed_from_u64(3);
        let layer = SelfAttention::new(8, AttentionConfig::new(4), &mut rng).unwrap();
        let input = Tensor::randn_with(&[2, 5, 8], 0.0, 1.0, &mut rng);
        let out = layer.forward(&input).unwrap();
        assert_eq!(out.shape(), &[2, 5, 8]);
        assert!(out.data().iter().all(|&x| x >= 0.0));
        // four [8, 8] projections including the residual
        assert_eq!(layer.num_parameters(), 4 * 64);
    }

    #[test]
    fn test_self_attention_without_residual() {
        let mut rng = StdRng::seed_from_u64(3);
        let config = AttentionConfig::new(2).with_residual(false);
        let layer = SelfAttention::new(4, config, &mut rng).unwrap();
        assert_eq!(layer.parameters().len(), 3);
        assert!(layer.forward(&Tensor::ones(&[1, 2, 5])).is_err());
        assert!(layer.forward(&Tensor::ones(&[2, 4])).is_err());
    }

    #[test]
    fn test_self_attention_rejects_bad_heads() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(SelfAttention::new(6, AttentionConfig::new(4), &mut rng).is_err());
    }

    #[test]
    fn test_target_attention_shape() {
        let mut rng = StdRng::seed_from_u64(11);
        let layer = TargetAttention::new(6, 8, AttentionConfig::new(4), &mut rng).unwrap();
        let query = Tensor::randn_with(&[3, 6], 0.0, 1.0, &mut rng);
        let key = Tensor::randn_with(&[3, 8], 0.0, 1.0, &mut rng);
        let out = layer.attend(&query, &key).unwrap();
        assert_eq!(out.shape(), &[3, 8]);

        let joined = Tensor::concat(&[&query, &key], 1);
        assert_eq!(layer.forward(&joined).unwrap(), out);
    }

    #[test]
    fn test_target_attention_layer_norm() {
        let mut rng = StdRng::seed_from_u64(5);
        let config = AttentionConfig::new(2).with_layer_norm(true);
        let layer = TargetAttention::new(4, 4, config, &mut rng).unwrap();
        let query = Tensor::randn_with(&[2, 4], 0.0, 1.0, &mut rng);
        let key = Tensor::randn_with(&[2, 4], 0.0, 1.0, &mut rng);
        let out = layer.attend(&query, &key).unwrap();
        for row in out.data().chunks(4) {
            let mean: f32 = row.iter().sum::<f32>() / 4.0;
            assert!(mean.abs() < 1e-4);
        }
    }

    #[test]
    fn test_target_attention_batch_mismatch() {
        let mut rng = StdRng::seed_from_u64(5);
        let layer = TargetAttention::new(4, 4, AttentionConfig::new(2), &mut rng).unwrap();
        let err = layer
            .attend(&Tensor::ones(&[2, 4]), &Tensor::ones(&[3, 4]))
            .unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
    }
}
