//! Regularization utilities for learnable parameters.

use serde::{Deserialize, Serialize};

use crate::tensor::Tensor;

/// Regularizer types supported for layer parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub enum Regularizer {
    /// No regularization.
    #[default]
    None,
    /// L1 regularization with coefficient.
    L1(f32),
    /// L2 regularization with coefficient.
    L2(f32),
    /// Combined L1 + L2 regularization.
    L1L2 { l1: f32, l2: f32 },
}

impl Regularizer {
    /// L2 regularizer, or `None` when the coefficient is zero.
    pub fn l2(lambda: f32) -> Self {
        if lambda == 0.0 {
            Regularizer::None
        } else {
            Regularizer::L2(lambda)
        }
    }

    /// Returns the regularization loss for the given parameter tensor.
    pub fn loss(&self, param: &Tensor) -> f32 {
        match *self {
            Regularizer::None => 0.0,
            Regularizer::L1(lambda) => param.map(f32::abs).sum() * lambda,
            Regularizer::L2(lambda) => param.sqr().sum() * lambda,
            Regularizer::L1L2 { l1, l2 } => {
                param.map(f32::abs).sum() * l1 + param.sqr().sum() * l2
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regularizer_losses() {
        let w = Tensor::from_data(&[2, 2], vec![1.0, -2.0, 3.0, -4.0]);
        assert_eq!(Regularizer::None.loss(&w), 0.0);
        assert_eq!(Regularizer::L1(0.5).loss(&w), 5.0);
        assert_eq!(Regularizer::L2(0.1).loss(&w), 3.0);
        let both = Regularizer::L1L2 { l1: 1.0, l2: 1.0 }.loss(&w);
        assert_eq!(both, 40.0);
    }

    #[test]
    fn test_l2_zero_is_none() {
        assert_eq!(Regularizer::l2(0.0), Regularizer::None);
        assert_eq!(Regularizer::l2(1e-5), Regularizer::L2(1e-5));
    }
}
