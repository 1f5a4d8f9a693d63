//! Task output layer.

use std::fmt;
use std::str::FromStr;

use crate::activation::sigmoid;
use crate::error::LayerError;
use crate::layer::Layer;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Kind of target a task predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Click-style probability, squashed with a sigmoid
    Binary,
    /// Real-valued target, left as is
    Regression,
}

impl FromStr for TaskType {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binary" => Ok(TaskType::Binary),
            "regression" => Ok(TaskType::Regression),
            other => Err(LayerError::config(format!(
                "task must be binary or regression, {} is illegal",
                other
            ))),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskType::Binary => "binary",
            TaskType::Regression => "regression",
        })
    }
}

/// Adds a learnable scalar bias to a task logit, then applies the task link.
///
/// # Example
///
/// ```
/// use mtmd_layers::layer::Layer;
/// use mtmd_layers::prediction::{PredictionLayer, TaskType};
/// use mtmd_layers::tensor::Tensor;
///
/// let layer = PredictionLayer::new(TaskType::Binary);
/// let out = layer.forward(&Tensor::zeros(&[3, 1])).unwrap();
/// assert_eq!(out.data(), &[0.5, 0.5, 0.5]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionLayer {
    task: TaskType,
    bias: Option<Tensor>,
}

impl PredictionLayer {
    /// Creates a prediction layer with a zero-initialized bias.
    pub fn new(task: TaskType) -> Self {
        Self::with_bias(task, true)
    }

    pub fn with_bias(task: TaskType, use_bias: bool) -> Self {
        Self {
            task,
            bias: use_bias.then(|| Tensor::zeros(&[1])),
        }
    }

    pub fn task(&self) -> TaskType {
        self.task
    }
}

impl Layer for PredictionLayer {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        crate::error::expect_2d("PredictionLayer", input, 1)?;
        let logit = match &self.bias {
            Some(bias) => input.add(bias),
            None => input.clone(),
        };
        Ok(match self.task {
            TaskType::Binary => sigmoid(&logit),
            TaskType::Regression => logit,
        })
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.bias.iter().collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.bias.iter_mut().collect()
    }

    fn name(&self) -> &str {
        "PredictionLayer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_parse() {
        assert_eq!("binary".parse::<TaskType>().unwrap(), TaskType::Binary);
        assert_eq!("regression".parse::<TaskType>().unwrap(), TaskType::Regression);
        let err = "multiclass".parse::<TaskType>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: task must be binary or regression, multiclass is illegal"
        );
    }

    #[test]
    fn test_regression_is_identity() {
        let layer = PredictionLayer::new(TaskType::Regression);
        let input = Tensor::from_data(&[2, 1], vec![-3.0, 4.5]);
        assert_eq!(layer.forward(&input).unwrap(), input);
    }

    #[test]
    fn test_binary_in_unit_interval() {
        let layer = PredictionLayer::new(TaskType::Binary);
        let out = layer
            .forward(&Tensor::from_data(&[3, 1], vec![-50.0, 0.0, 50.0]))
            .unwrap();
        assert!(out.data().iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert!(out.data()[0] < 1e-6 && out.data()[2] > 1.0 - 1e-6);
    }

    #[test]
    fn test_bias_parameter() {
        let mut layer = PredictionLayer::new(TaskType::Regression);
        assert_eq!(layer.num_parameters(), 1);
        layer.parameters_mut()[0].data_mut()[0] = 2.0;
        let out = layer.forward(&Tensor::zeros(&[1, 1])).unwrap();
        assert_eq!(out.data(), &[2.0]);

        assert_eq!(
            PredictionLayer::with_bias(TaskType::Binary, false).num_parameters(),
            0
        );
    }

    #[test]
    fn test_rejects_wide_input() {
        let layer = PredictionLayer::new(TaskType::Binary);
        assert!(layer.forward(&Tensor::zeros(&[2, 2])).is_err());
    }
}
