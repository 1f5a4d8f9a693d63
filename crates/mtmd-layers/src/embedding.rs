//! Embedding tables and pooled lookups.
//!
//! An [`EmbeddingTable`] is a dense `[vocabulary_size, dim]` matrix indexed by
//! integer ids. Variable-length id lists are reduced with a [`PoolingMode`];
//! id `0` is reserved for padding and never contributes to a pooled result.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::layer::Layer;
use crate::regularizer::Regularizer;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Id used to pad variable-length sequences.
pub const PADDING_ID: usize = 0;

/// A dense embedding table.
///
/// # Example
///
/// ```
/// use mtmd_layers::embedding::EmbeddingTable;
/// use mtmd_layers::initializer::Initializer;
/// use rand::rngs::StdRng;
/// use rand::SeedableRng;
///
/// let mut rng = StdRng::seed_from_u64(0);
/// let table = EmbeddingTable::new(10, 4, Initializer::normal(1e-4), &mut rng);
/// let out = table.lookup(&[1, 2, 9]).unwrap();
/// assert_eq!(out.shape(), &[3, 4]);
/// assert!(table.lookup(&[10]).is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingTable {
    /// Embedding matrix of shape [vocabulary_size, dim]
    weights: Tensor,
    /// Penalty on the looked-up rows
    regularizer: Regularizer,
    vocabulary_size: usize,
    dim: usize,
}

impl EmbeddingTable {
    /// Creates a table with weights drawn from `init`.
    pub fn new<R: Rng + ?Sized>(
        vocabulary_size: usize,
        dim: usize,
        init: Initializer,
        rng: &mut R,
    ) -> Self {
        Self {
            weights: init.initialize(&[vocabulary_size, dim], rng),
            regularizer: Regularizer::None,
            vocabulary_size,
            dim,
        }
    }

    /// Creates a table from an explicit weight matrix.
    ///
    /// # Errors
    ///
    /// Returns a config error if `weights` is not 2D.
    pub fn from_weights(weights: Tensor) -> Result<Self, LayerError> {
        if weights.ndim() != 2 {
            return Err(LayerError::config(format!(
                "Embedding weights must be 2D, got {}D",
                weights.ndim()
            )));
        }
        let vocabulary_size = weights.shape()[0];
        let dim = weights.shape()[1];
        Ok(Self {
            weights,
            regularizer: Regularizer::None,
            vocabulary_size,
            dim,
        })
    }

    /// Sets the embedding regularizer.
    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.regularizer = regularizer;
        self
    }

    /// Returns the number of rows.
    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary_size
    }

    /// Returns the embedding dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Returns the embedding matrix.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// Returns the row for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::EmbeddingError`] if `id` is out of range.
    pub fn row(&self, id: usize) -> Result<&[f32], LayerError> {
        if id >= self.vocabulary_size {
            return Err(LayerError::EmbeddingError {
                message: format!(
                    "id {} out of range for vocabulary of size {}",
                    id, self.vocabulary_size
                ),
            });
        }
        Ok(&self.weights.data()[id * self.dim..(id + 1) * self.dim])
    }

    /// Looks up one row per id, giving `[ids.len(), dim]`.
    pub fn lookup(&self, ids: &[usize]) -> Result<Tensor, LayerError> {
        let mut output = Vec::with_capacity(ids.len() * self.dim);
        for &id in ids {
            output.extend_from_slice(self.row(id)?);
        }
        Ok(Tensor::from_data(&[ids.len(), self.dim], output))
    }

    /// Looks up and pools id lists, one list per sample, giving `[batch, dim]`.
    ///
    /// Padding ids are skipped. A list with no real ids pools to zeros; `Mean`
    /// divides by the number of real ids.
    pub fn lookup_pooled(
        &self,
        id_lists: &[Vec<usize>],
        pooling: PoolingMode,
    ) -> Result<Tensor, LayerError> {
        let dim = self.dim;
        let mut output = vec![0.0; id_lists.len() * dim];

        for (i, ids) in id_lists.iter().enumerate() {
            let out = &mut output[i * dim..(i + 1) * dim];
            let mut count = 0usize;
            for &id in ids.iter().filter(|&&id| id != PADDING_ID) {
                let emb = self.row(id)?;
                match pooling {
                    PoolingMode::Sum | PoolingMode::Mean => {
                        for (o, &v) in out.iter_mut().zip(emb) {
                            *o += v;
                        }
                    }
                    PoolingMode::Max => {
                        for (o, &v) in out.iter_mut().zip(emb) {
                            *o = if count == 0 { v } else { o.max(v) };
                        }
                    }
                }
                count += 1;
            }
            if pooling == PoolingMode::Mean && count > 0 {
                let inv = 1.0 / count as f32;
                out.iter_mut().for_each(|o| *o *= inv);
            }
        }

        Ok(Tensor::from_data(&[id_lists.len(), dim], output))
    }

    /// Regularization loss of the rows referenced by `ids`.
    pub fn lookup_regularization(&self, ids: &[usize]) -> Result<f32, LayerError> {
        if self.regularizer == Regularizer::None {
            return Ok(0.0);
        }
        Ok(self.regularizer.loss(&self.lookup(ids)?))
    }
}

impl Layer for EmbeddingTable {
    /// Treats every element of `input` as an id and appends the embedding axis.
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        let ids = ids_from_tensor(input)?;
        let looked_up = self.lookup(&ids)?;
        let mut shape = input.shape().to_vec();
        shape.push(self.dim);
        Ok(looked_up.reshape(&shape))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weights]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.weights]
    }

    fn regularization_loss(&self) -> f32 {
        self.regularizer.loss(&self.weights)
    }

    fn name(&self) -> &str {
        "EmbeddingTable"
    }
}

/// Converts float-encoded ids to indices.
///
/// # Errors
///
/// Negative or non-finite values are an [`LayerError::EmbeddingError`].
pub fn ids_from_tensor(input: &Tensor) -> Result<Vec<usize>, LayerError> {
    input
        .data()
        .iter()
        .map(|&x| {
            if x.is_finite() && x >= 0.0 {
                Ok(x as usize)
            } else {
                Err(LayerError::EmbeddingError {
                    message: format!("invalid id {}", x),
                })
            }
        })
        .collect()
}

/// Reduction applied to variable-length id lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PoolingMode {
    /// Sum pooling
    Sum,
    /// Mean pooling
    #[default]
    Mean,
    /// Max pooling
    Max,
}

impl FromStr for PoolingMode {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(PoolingMode::Sum),
            "mean" | "avg" => Ok(PoolingMode::Mean),
            "max" => Ok(PoolingMode::Max),
            other => Err(LayerError::config(format!("unknown combiner {}", other))),
        }
    }
}

impl fmt::Display for PoolingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PoolingMode::Sum => "sum",
            PoolingMode::Mean => "mean",
            PoolingMode::Max => "max",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> EmbeddingTable {
        // row i = [i, -i]
        let data = (0..5).flat_map(|i| [i as f32, -(i as f32)]).collect();
        EmbeddingTable::from_weights(Tensor::from_data(&[5, 2], data)).unwrap()
    }

    #[test]
    fn test_lookup() {
        let out = table().lookup(&[3, 1]).unwrap();
        assert_eq!(out.data(), &[3.0, -3.0, 1.0, -1.0]);
    }

    #[test]
    fn test_lookup_out_of_range() {
        assert!(matches!(
            table().lookup(&[5]),
            Err(LayerError::EmbeddingError { .. })
        ));
    }

    #[test]
    fn test_pooled_skips_padding() {
        let t = table();
        let lists = vec![vec![1, 3, 0, 0], vec![0, 0, 0, 0], vec![4, 2, 0, 0]];

        let sum = t.lookup_pooled(&lists, PoolingMode::Sum).unwrap();
        assert_eq!(sum.data(), &[4.0, -4.0, 0.0, 0.0, 6.0, -6.0]);

        let mean = t.lookup_pooled(&lists, PoolingMode::Mean).unwrap();
        assert_eq!(mean.data(), &[2.0, -2.0, 0.0, 0.0, 3.0, -3.0]);

        let max = t.lookup_pooled(&lists, PoolingMode::Max).unwrap();
        assert_eq!(max.data(), &[3.0, -1.0, 0.0, 0.0, 4.0, -2.0]);
    }

    #[test]
    fn test_layer_forward_appends_dim() {
        let ids = Tensor::from_data(&[2, 1], vec![2.0, 4.0]);
        let out = table().forward(&ids).unwrap();
        assert_eq!(out.shape(), &[2, 1, 2]);
        assert_eq!(out.data(), &[2.0, -2.0, 4.0, -4.0]);
    }

    #[test]
    fn test_invalid_float_ids() {
        let ids = Tensor::from_data(&[1], vec![-1.0]);
        assert!(ids_from_tensor(&ids).is_err());
        let ids = Tensor::from_data(&[2], vec![1.9, 0.0]);
        assert_eq!(ids_from_tensor(&ids).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_regularization() {
        let t = table().with_regularizer(Regularizer::L2(0.5));
        assert_eq!(t.lookup_regularization(&[1, 2]).unwrap(), 5.0);
        assert_eq!(table().lookup_regularization(&[1, 2]).unwrap(), 0.0);
    }

    #[test]
    fn test_pooling_mode_parse() {
        assert_eq!("sum".parse::<PoolingMode>().unwrap(), PoolingMode::Sum);
        assert_eq!("MEAN".parse::<PoolingMode>().unwrap(), PoolingMode::Mean);
        assert!("median".parse::<PoolingMode>().is_err());
    }
}
