//! Inverted dropout.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::LayerError;
use crate::layer::Layer;
use crate::tensor::Tensor;

/// Dropout layer.
///
/// During training each element is zeroed with probability `rate` and the
/// survivors are scaled by `1 / (1 - rate)`, so inference is the identity.
/// The mask generator is owned by the layer and seeded at construction.
#[derive(Debug, Clone)]
pub struct Dropout {
    rate: f32,
    rng: StdRng,
    training: bool,
}

impl Dropout {
    /// Creates a dropout layer.
    ///
    /// # Errors
    ///
    /// Returns a config error if `rate` is outside `[0, 1)`.
    pub fn new(rate: f32, seed: u64) -> Result<Self, LayerError> {
        if !(0.0..1.0).contains(&rate) {
            return Err(LayerError::config(format!(
                "Dropout rate must be in [0, 1), got {}",
                rate
            )));
        }
        Ok(Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
            training: true,
        })
    }

    /// Returns the drop probability.
    pub fn rate(&self) -> f32 {
        self.rate
    }
}

impl Layer for Dropout {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        Ok(input.clone())
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        if !self.training || self.rate == 0.0 {
            return Ok(input.clone());
        }
        let keep = 1.0 - self.rate;
        let scale = 1.0 / keep;
        let mut output = input.clone();
        for x in output.data_mut() {
            if self.rng.gen::<f32>() < keep {
                *x *= scale;
            } else {
                *x = 0.0;
            }
        }
        Ok(output)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "Dropout"
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
    fn test_dropout_rate_validation() {
        assert!(Dropout::new(0.0, 0).is_ok());
        assert!(Dropout::new(0.5, 0).is_ok());
        assert!(Dropout::new(1.0, 0).is_err());
        assert!(Dropout::new(-0.1, 0).is_err());
    }

    #[test]
    fn test_dropout_inference_is_identity() {
        let dropout = Dropout::new(0.5, 7).unwrap();
        let input = Tensor::ones(&[4, 4]);
        assert_eq!(dropout.forward(&input).unwrap(), input);
    }

    #[test]
    fn test_dropout_train_zeroes_and_scales() {
        let mut dropout = Dropout::new(0.5, 7).unwrap();
        let out = dropout.forward_train(&Tensor::ones(&[50, 20])).unwrap();
        assert!(out.data().iter().all(|&x| x == 0.0 || x == 2.0));
        let zeros = out.data().iter().filter(|&&x| x == 0.0).count();
        assert!(zeros > 300 && zeros < 700, "dropped {} of 1000", zeros);
    }

    #[test]
    fn test_dropout_eval_mode_train_forward() {
        let mut dropout = Dropout::new(0.9, 1).unwrap();
        dropout.set_training(false);
        let input = Tensor::ones(&[3, 3]);
        assert_eq!(dropout.forward_train(&input).unwrap(), input);
    }
}
