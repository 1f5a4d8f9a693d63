//! Multi-gate mixture of experts.
//!
//! Every task shares the same pool of [`Expert`] DNNs and owns one [`Gate`].
//! A gate scores the experts from the raw input and the task representation
//! is the softmax-weighted sum of expert outputs:
//!
//! ```text
//! experts: [B, E, D]    gate_k: [B, E] -> [B, 1, E]
//! mixture_k = bmm(gate_k, experts) -> [B, D]
//! ```
//!
//! # Example
//!
//! ```
//! use mtmd_layers::mmoe::{MMoE, MMoEConfig};
//! use mtmd_layers::tensor::Tensor;
//!
//! // 3 experts shared by 2 tasks
//! let config = MMoEConfig::new(64, 3, 2) // input width, experts, tasks
//!     .with_expert_hidden_units(vec![32, 16])
//!     .with_gate_hidden_units(vec![8]);
//!
//! let mmoe = config.build().unwrap();
//!
//! let input = Tensor::ones(&[8, 64]);
//! let outputs = mmoe.forward_multi(&input).unwrap();
//! assert_eq!(outputs.len(), 2);
//! assert_eq!(outputs[0].shape(), &[8, 16]);
//! ```

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::activation::ActivationType;
use crate::dense::Dense;
use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::layer::Layer;
use crate::mlp::{MLPConfig, MLP};
use crate::regularizer::Regularizer;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// One DNN in the shared expert pool.
///
/// All experts in an MMoE layer share the same architecture but have
/// different parameters.
#[derive(Debug, Clone)]
pub struct Expert {
    dnn: MLP,
}

impl Expert {
    /// Creates an expert from a DNN configuration, drawing weights from `rng`.
    pub fn new(config: MLPConfig, rng: &mut StdRng) -> Result<Self, LayerError> {
        Ok(Self {
            dnn: MLP::with_rng(config, rng)?,
        })
    }

    /// Returns the input dimension.
    pub fn input_dim(&self) -> usize {
        self.dnn.input_dim()
    }

    /// Returns the output dimension.
    pub fn output_dim(&self) -> usize {
        self.dnn.output_dim()
    }
}

impl Layer for Expert {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.dnn.forward(input)
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.dnn.forward_train(input)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.dnn.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.dnn.parameters_mut()
    }

    fn regularization_loss(&self) -> f32 {
        self.dnn.regularization_loss()
    }

    fn name(&self) -> &str {
        "Expert"
    }

    fn is_training(&self) -> bool {
        self.dnn.is_training()
    }

    fn set_training(&mut self, training: bool) {
        self.dnn.set_training(training);
    }
}

/// A gating network for one task.
///
/// Computes `softmax(final(dnn(x)))`, a `[batch, num_experts]` tensor whose
/// rows sum to one. Without a gate DNN the projection reads `x` directly.
#[derive(Debug, Clone)]
pub struct Gate {
    dnn: Option<MLP>,
    final_layer: Dense,
    num_experts: usize,
}

impl Gate {
    /// Creates a gate.
    ///
    /// `dnn_config` is `None` when the gate has no hidden layers; `input_dim`
    /// is then the width the projection reads.
    pub fn new(
        input_dim: usize,
        dnn_config: Option<MLPConfig>,
        num_experts: usize,
        l2_reg: f32,
        rng: &mut StdRng,
    ) -> Result<Self, LayerError> {
        let dnn = dnn_config.map(|c| MLP::with_rng(c, rng)).transpose()?;
        let final_in = dnn.as_ref().map_or(input_dim, MLP::output_dim);
        let final_layer = Dense::new_with_options(
            final_in,
            num_experts,
            Initializer::KaimingUniform,
            false,
            Regularizer::l2(l2_reg),
            rng,
        );
        Ok(Self {
            dnn,
            final_layer,
            num_experts,
        })
    }

    /// Returns the number of experts this gate weighs.
    pub fn num_experts(&self) -> usize {
        self.num_experts
    }

    /// Returns whether the gate has a hidden DNN.
    pub fn has_dnn(&self) -> bool {
        self.dnn.is_some()
    }
}

impl Layer for Gate {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        let hidden = match &self.dnn {
            Some(dnn) => dnn.forward(input)?,
            None => input.clone(),
        };
        Ok(self.final_layer.forward(&hidden)?.softmax())
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let hidden = match &mut self.dnn {
            Some(dnn) => dnn.forward_train(input)?,
            None => input.clone(),
        };
        Ok(self.final_layer.forward_train(&hidden)?.softmax())
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self
            .dnn
            .as_ref()
            .map(|d| d.parameters())
            .unwrap_or_default();
        params.extend(self.final_layer.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self
            .dnn
            .as_mut()
            .map(|d| d.parameters_mut())
            .unwrap_or_default();
        params.extend(self.final_layer.parameters_mut());
        params
    }

    fn regularization_loss(&self) -> f32 {
        self.dnn.as_ref().map_or(0.0, |d| d.regularization_loss())
            + self.final_layer.regularization_loss()
    }

    fn name(&self) -> &str {
        "Gate"
    }

    fn set_training(&mut self, training: bool) {
        if let Some(dnn) = &mut self.dnn {
            dnn.set_training(training);
        }
    }
}

/// Configuration for the MMoE layer.
///
/// # Example
///
/// ```
/// use mtmd_layers::mmoe::MMoEConfig;
///
/// let config = MMoEConfig::new(32, 4, 2)
///     .with_expert_hidden_units(vec![256, 128])
///     .with_gate_hidden_units(vec![64]);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MMoEConfig {
    /// Input dimension
    pub input_dim: usize,
    /// Experts shared by all tasks
    pub num_experts: usize,
    /// One gate per task
    pub num_tasks: usize,
    /// Expert DNN widths
    pub expert_hidden_units: Vec<usize>,
    /// Hidden layer units for each gate DNN; empty for a projection-only gate
    pub gate_hidden_units: Vec<usize>,
    /// Activation for expert and gate hidden layers
    pub activation: ActivationType,
    /// Dropout rate inside the DNN blocks
    pub dropout_rate: f32,
    /// Whether the DNN blocks batch-normalize
    pub use_bn: bool,
    /// Standard deviation of the DNN kernel initializer
    pub init_std: f32,
    /// L2 penalty on every kernel in the layer
    pub l2_reg: f32,
    /// Seed used by [`MMoEConfig::build`]
    pub seed: u64,
}

impl MMoEConfig {
    /// Defaults: `[256, 128]` experts, a `[64]` gate DNN, ReLU, no dropout,
    /// no penalty and seed 1024.
    pub fn new(input_dim: usize, num_experts: usize, num_tasks: usize) -> Self {
        Self {
            input_dim,
            num_experts,
            num_tasks,
            expert_hidden_units: vec![256, 128],
            gate_hidden_units: vec![64],
            activation: ActivationType::ReLU,
            dropout_rate: 0.0,
            use_bn: false,
            init_std: 1e-4,
            l2_reg: 0.0,
            seed: 1024,
        }
    }

    /// Hidden widths of every expert; the last one is the mixture width.
    pub fn with_expert_hidden_units(mut self, units: Vec<usize>) -> Self {
        self.expert_hidden_units = units;
        self
    }

    /// Sets the hidden layer units for each gate DNN.
    pub fn with_gate_hidden_units(mut self, units: Vec<usize>) -> Self {
        self.gate_hidden_units = units;
        self
    }

    /// Sets the DNN activation.
    pub fn with_activation(mut self, activation: ActivationType) -> Self {
        self.activation = activation;
        self
    }

    /// Sets the DNN dropout rate.
    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout_rate = rate;
        self
    }

    /// Enables or disables batch normalization in the DNN blocks.
    pub fn with_batch_norm(mut self, use_bn: bool) -> Self {
        self.use_bn = use_bn;
        self
    }

    /// Sets the DNN kernel initializer standard deviation.
    pub fn with_init_std(mut self, init_std: f32) -> Self {
        self.init_std = init_std;
        self
    }

    /// Sets the L2 penalty on kernels.
    pub fn with_l2_reg(mut self, l2_reg: f32) -> Self {
        self.l2_reg = l2_reg;
        self
    }

    /// Sets the seed used by [`MMoEConfig::build`].
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Rejects empty pools, zero widths and dropout outside `[0, 1)`.
    pub fn validate(&self) -> Result<(), LayerError> {
        if self.input_dim == 0 {
            return Err(LayerError::config("Input dimension must be positive"));
        }
        if self.num_tasks <= 1 {
            return Err(LayerError::config("num_tasks must be greater than 1"));
        }
        if self.num_experts <= 1 {
            return Err(LayerError::config("num_experts must be greater than 1"));
        }
        if self.expert_hidden_units.is_empty() {
            return Err(LayerError::config("expert_dnn_hidden_units is empty!!"));
        }
        self.dnn_config(self.expert_hidden_units.clone()).validate()?;
        if !self.gate_hidden_units.is_empty() {
            self.dnn_config(self.gate_hidden_units.clone()).validate()?;
        }
        Ok(())
    }

    /// Builds the MMoE layer, drawing weights from a generator seeded with `seed`.
    pub fn build(self) -> Result<MMoE, LayerError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        MMoE::with_rng(self, &mut rng)
    }

    /// Expert output dimension: the last expert hidden width.
    pub fn expert_output_dim(&self) -> usize {
        self.expert_hidden_units.last().copied().unwrap_or(0)
    }

    fn dnn_config(&self, hidden_units: Vec<usize>) -> MLPConfig {
        MLPConfig::new(self.input_dim, hidden_units)
            .with_activation(self.activation)
            .with_dropout(self.dropout_rate)
            .with_batch_norm(self.use_bn)
            .with_init_std(self.init_std)
            .with_l2_reg(self.l2_reg)
    }
}

/// Shared experts plus one softmax gate per task.
///
/// For each input:
/// 1. All experts process the input, and their outputs are stacked to
///    `[batch, num_experts, expert_dim]`
/// 2. every gate turns the input into softmax weights over experts
/// 3. The task output is `[batch, 1, num_experts] x [batch, num_experts, expert_dim]`
///    with the middle axis dropped
#[derive(Debug, Clone)]
pub struct MMoE {
    experts: Vec<Expert>,
    gates: Vec<Gate>,
    config: MMoEConfig,
    training: bool,
}

impl MMoE {
    /// Creates an MMoE layer whose weights are drawn from `rng`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn with_rng(config: MMoEConfig, rng: &mut StdRng) -> Result<Self, LayerError> {
        config.validate()?;

        let experts = (0..config.num_experts)
            .map(|_| Expert::new(config.dnn_config(config.expert_hidden_units.clone()), rng))
            .collect::<Result<Vec<_>, _>>()?;

        let gates = (0..config.num_tasks)
            .map(|_| {
                let dnn = (!config.gate_hidden_units.is_empty())
                    .then(|| config.dnn_config(config.gate_hidden_units.clone()));
                Gate::new(config.input_dim, dnn, config.num_experts, config.l2_reg, rng)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            experts,
            gates,
            config,
            training: true,
        })
    }

    /// Size of the expert pool.
    pub fn num_experts(&self) -> usize {
        self.config.num_experts
    }

    /// Number of gates, one per task.
    pub fn num_tasks(&self) -> usize {
        self.config.num_tasks
    }

    /// Returns the input dimension.
    pub fn input_dim(&self) -> usize {
        self.config.input_dim
    }

    /// Width of every mixture (last expert hidden unit).
    pub fn expert_output_dim(&self) -> usize {
        self.config.expert_output_dim()
    }

    /// Shared experts.
    pub fn experts(&self) -> &[Expert] {
        &self.experts
    }

    /// Per-task gates, in task order.
    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    pub fn config(&self) -> &MMoEConfig {
        &self.config
    }

    fn check_input(&self, input: &Tensor) -> Result<(), LayerError> {
        crate::error::expect_2d("MMoE", input, self.config.input_dim)
    }

    /// Gate weights for every task, each `[batch, num_experts]`.
    pub fn gate_weights(&self, input: &Tensor) -> Result<Vec<Tensor>, LayerError> {
        self.check_input(input)?;
        self.gates.iter().map(|gate| gate.forward(input)).collect()
    }

    /// One `[batch, expert_output_dim]` mixture per task, in task order.
    /// A batch of one keeps its batch axis.
    pub fn forward_multi(&self, input: &Tensor) -> Result<Vec<Tensor>, LayerError> {
        self.check_input(input)?;

        let expert_outs = self
            .experts
            .iter()
            .map(|expert| expert.forward(input))
            .collect::<Result<Vec<_>, _>>()?;
        let stacked = Tensor::stack(&expert_outs.iter().collect::<Vec<_>>(), 1);

        self.gates
            .iter()
            .map(|gate| gate.forward(input).map(|w| self.mix(&w, &stacked)))
            .collect()
    }

    /// Training-mode forward pass for all tasks.
    pub fn forward_multi_train(&mut self, input: &Tensor) -> Result<Vec<Tensor>, LayerError> {
        self.check_input(input)?;

        let mut expert_outs = Vec::with_capacity(self.experts.len());
        for expert in &mut self.experts {
            expert_outs.push(expert.forward_train(input)?);
        }
        let stacked = Tensor::stack(&expert_outs.iter().collect::<Vec<_>>(), 1);

        let mut gate_weights = Vec::with_capacity(self.gates.len());
        for gate in &mut self.gates {
            gate_weights.push(gate.forward_train(input)?);
        }

        Ok(gate_weights
            .iter()
            .map(|weights| self.mix(weights, &stacked))
            .collect())
    }

    /// `[B, E] x [B, E, D] -> [B, D]` via a batched matmul.
    fn mix(&self, gate_weights: &Tensor, stacked_experts: &Tensor) -> Tensor {
        let batch = gate_weights.shape()[0];
        let weights = gate_weights.reshape(&[batch, 1, self.config.num_experts]);
        weights
            .bmm(stacked_experts)
            .reshape(&[batch, self.expert_output_dim()])
    }
}

impl Layer for MMoE {
    /// First task's mixture only, so MMoE can sit in a plain `Layer` stack.
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.forward_multi(input)?
            .into_iter()
            .next()
            .ok_or_else(|| LayerError::forward("MMoE has no tasks"))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = Vec::new();
        for expert in &self.experts {
            params.extend(expert.parameters());
        }
        for gate in &self.gates {
            params.extend(gate.parameters());
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = Vec::new();
        for expert in &mut self.experts {
            params.extend(expert.parameters_mut());
        }
        for gate in &mut self.gates {
            params.extend(gate.parameters_mut());
        }
        params
    }

    fn regularization_loss(&self) -> f32 {
        let experts: f32 = self.experts.iter().map(|e| e.regularization_loss()).sum();
        let gates: f32 = self.gates.iter().map(|g| g.regularization_loss()).sum();
        experts + gates
    }

    fn name(&self) -> &str {
        "MMoE"
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        for expert in &mut self.experts {
            expert.set_training(training);
        }
        for gate in &mut self.gates {
            gate.set_training(training);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> MMoEConfig {
        MMoEConfig::new(6, 3, 2)
            .with_expert_hidden_units(vec![8, 4])
            .with_gate_hidden_units(vec![5])
            .with_init_std(0.5)
    }

    #[test]
    fn test_rejects_degenerate_config() {
        assert!(MMoEConfig::new(6, 1, 2).validate().is_err());
        assert!(MMoEConfig::new(6, 3, 1).validate().is_err());
        assert!(MMoEConfig::new(0, 3, 2).validate().is_err());
        assert!(MMoEConfig::new(6, 3, 2)
            .with_expert_hidden_units(vec![])
            .validate()
            .is_err());
        assert!(MMoEConfig::new(6, 3, 2)
            .with_gate_hidden_units(vec![0])
            .validate()
            .is_err());
    }

    #[test]
    fn test_one_mixture_per_task() {
        let mmoe = small_config().build().unwrap();
        let outputs = mmoe.forward_multi(&Tensor::ones(&[5, 6])).unwrap();
        assert_eq!(outputs.len(), 2);
        for out in &outputs {
            assert_eq!(out.shape(), &[5, 4]);
        }
    }

    #[test]
    fn test_mmoe_batch_of_one_keeps_batch_axis() {
        let mmoe = small_config().build().unwrap();
        let outputs = mmoe.forward_multi(&Tensor::ones(&[1, 6])).unwrap();
        assert_eq!(outputs[0].shape(), &[1, 4]);
    }

    #[test]
    fn test_gate_weights_sum_to_one() {
        let mmoe = small_config().build().unwrap();
        let input = Tensor::from_data(&[2, 6], (0..12).map(|x| x as f32 * 0.3).collect());
        for weights in mmoe.gate_weights(&input).unwrap() {
            assert_eq!(weights.shape(), &[2, 3]);
            for row in weights.data().chunks(3) {
                assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
                assert!(row.iter().all(|&w| w > 0.0));
            }
        }
    }

    #[test]
    fn test_mixture_is_gate_weighted_sum() {
        let mmoe = small_config().build().unwrap();
        let input = Tensor::from_data(&[2, 6], (0..12).map(|x| x as f32 * 0.1).collect());
        let experts: Vec<Tensor> = mmoe
            .experts()
            .iter()
            .map(|e| e.forward(&input).unwrap())
            .collect();
        let weights = mmoe.gate_weights(&input).unwrap();
        let outputs = mmoe.forward_multi(&input).unwrap();

        for (task, out) in outputs.iter().enumerate() {
            for b in 0..2 {
                for d in 0..4 {
                    let expected: f32 = (0..3)
                        .map(|e| weights[task].data()[b * 3 + e] * experts[e].data()[b * 4 + d])
                        .sum();
                    assert!((out.data()[b * 4 + d] - expected).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_gate_without_dnn_reads_input() {
        let mmoe = small_config()
            .with_gate_hidden_units(vec![])
            .build()
            .unwrap();
        assert!(!mmoe.gates()[0].has_dnn());
        // bias-free [6, 3] projection only
        assert_eq!(mmoe.gates()[0].num_parameters(), 18);
        let outputs = mmoe.forward_multi(&Tensor::ones(&[3, 6])).unwrap();
        assert_eq!(outputs[1].shape(), &[3, 4]);
    }

    #[test]
    fn test_wrong_input_width() {
        let mmoe = small_config().build().unwrap();
        assert!(mmoe.forward_multi(&Tensor::ones(&[2, 7])).is_err());
        assert!(mmoe.forward_multi(&Tensor::ones(&[6])).is_err());
    }

    #[test]
    fn test_mmoe_parameters_and_regularization() {
        let mmoe = small_config().with_l2_reg(0.01).build().unwrap();
        // expert: 6*8+8 + 8*4+4 = 92; gate: 6*5+5 + 5*3 = 50
        assert_eq!(mmoe.num_parameters(), 3 * 92 + 2 * 50);
        assert!(mmoe.regularization_loss() > 0.0);

        let unregularized = small_config().build().unwrap();
        assert_eq!(unregularized.regularization_loss(), 0.0);
    }

    #[test]
    fn test_set_training_reaches_experts() {
        let mut mmoe = small_config().with_dropout(0.5).build().unwrap();
        let input = Tensor::ones(&[4, 6]);
        assert_eq!(mmoe.forward_multi_train(&input).unwrap().len(), 2);
        mmoe.set_training(false);
        assert!(!mmoe.is_training());
        assert_eq!(
            mmoe.forward_multi_train(&input).unwrap(),
            mmoe.forward_multi(&input).unwrap()
        );
    }

    #[test]
    fn test_mmoe_layer_trait_returns_first_task() {
        let mmoe = small_config().build().unwrap();
        let input = Tensor::ones(&[2, 6]);
        assert_eq!(
            mmoe.forward(&input).unwrap(),
            mmoe.forward_multi(&input).unwrap()[0]
        );
    }
}
