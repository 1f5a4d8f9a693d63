//! Shared MMoE backbone.
//!
//! Both model variants run the same pipeline and differ only in how a task's
//! tower output is conditioned on the domain before its logit:
//!
//! ```text
//! X ─► FeatureInput ─► [SelfAttention × L] ─► MMoE ─┬─► tower_0 ─► (domain) ─► logit_0 ─► predict_0
//!                                                   └─► tower_1 ─► (domain) ─► logit_1 ─► predict_1
//! ```
//!
//! The steps are exposed individually so a model can inject its conditioning
//! between [`MmoeBackbone::tower`] and [`MmoeBackbone::logit_and_predict`].

use mtmd_layers::{
    AttentionConfig, Dense, Initializer, Layer, MLPConfig, MMoE, MMoEConfig, PredictionLayer,
    Regularizer, SelfAttention, TaskType, Tensor, MLP,
};
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::config::MmoeConfig;
use crate::error::{ModelError, ModelResult};
use crate::feature::FeatureColumn;
use crate::input::{combined_dnn_input, FeatureInput};

/// The part both models share, from raw columns up to the task heads.
#[derive(Debug, Clone)]
pub struct MmoeBackbone {
    input: FeatureInput,
    interacting: Vec<SelfAttention>,
    mmoe: MMoE,
    towers: Vec<MLP>,
    logits: Vec<Dense>,
    predictions: Vec<PredictionLayer>,
    task_names: Vec<String>,
    task_types: Vec<TaskType>,
    domain_column: String,
}

impl MmoeBackbone {
    /// Builds the backbone, drawing every weight from `rng`.
    ///
    /// # Errors
    ///
    /// Fails if `config` does not validate against `columns`.
    pub fn new(
        columns: &[FeatureColumn],
        config: &MmoeConfig,
        rng: &mut StdRng,
    ) -> ModelResult<Self> {
        config.validate(columns)?;
        let activation = config.activation()?;
        let task_types = config.parsed_task_types()?;
        let num_tasks = config.num_tasks();

        let input = FeatureInput::new(
            columns,
            config.dnn_feature_columns(columns),
            config.init_std,
            config.l2_reg_embedding,
            rng,
        )?;
        let input_dim = input.input_dim();

        let interacting = if config.use_self_attention() {
            let dim = input.embedding_dim()?;
            let att = AttentionConfig::new(config.att_head_num)
                .with_residual(config.att_use_residual);
            (0..config.att_layer_num)
                .map(|_| SelfAttention::new(dim, att, rng))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        let mmoe_config = MMoEConfig::new(input_dim, config.num_experts, num_tasks)
            .with_expert_hidden_units(config.expert_dnn_hidden_units.clone())
            .with_gate_hidden_units(config.gate_dnn_hidden_units.clone())
            .with_activation(activation)
            .with_dropout(config.dnn_dropout)
            .with_batch_norm(config.dnn_use_bn)
            .with_init_std(config.init_std)
            .with_l2_reg(config.l2_reg_dnn)
            .with_seed(config.seed);
        let mmoe = MMoE::with_rng(mmoe_config, rng)?;
        let expert_dim = mmoe.expert_output_dim();

        let towers = if config.tower_dnn_hidden_units.is_empty() {
            Vec::new()
        } else {
            (0..num_tasks)
                .map(|_| {
                    let tower = MLPConfig::new(expert_dim, config.tower_dnn_hidden_units.clone())
                        .with_activation(activation)
                        .with_dropout(config.dnn_dropout)
                        .with_batch_norm(config.dnn_use_bn)
                        .with_init_std(config.init_std)
                        .with_l2_reg(config.l2_reg_dnn);
                    MLP::with_rng(tower, rng)
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        let tower_dim = towers.first().map_or(expert_dim, MLP::output_dim);

        let logits = (0..num_tasks)
            .map(|_| {
                Dense::new_with_options(
                    tower_dim,
                    1,
                    Initializer::KaimingUniform,
                    false,
                    Regularizer::l2(config.l2_reg_dnn),
                    rng,
                )
            })
            .collect();
        let predictions = task_types.iter().map(|&t| PredictionLayer::new(t)).collect();

        info!(
            num_tasks,
            num_experts = config.num_experts,
            input_dim,
            expert_dim,
            tower_dim,
            self_attention_layers = interacting.len(),
            domain_column = %config.domain_column,
            "Built MMoE backbone"
        );

        Ok(Self {
            input,
            interacting,
            mmoe,
            towers,
            logits,
            predictions,
            task_names: config.task_names.clone(),
            task_types,
            domain_column: config.domain_column.clone(),
        })
    }

    pub fn num_tasks(&self) -> usize {
        self.task_names.len()
    }

    pub fn task_names(&self) -> &[String] {
        &self.task_names
    }

    pub fn task_types(&self) -> &[TaskType] {
        &self.task_types
    }

    pub fn feature_input(&self) -> &FeatureInput {
        &self.input
    }

    pub fn mmoe(&self) -> &MMoE {
        &self.mmoe
    }

    /// Whether tasks have tower DNNs (and hence domain conditioning).
    pub fn has_towers(&self) -> bool {
        !self.towers.is_empty()
    }

    /// Width of a tower output, or of a mixture when there are no towers.
    pub fn tower_dim(&self) -> usize {
        self.towers
            .first()
            .map_or(self.mmoe.expert_output_dim(), MLP::output_dim)
    }

    /// Domain id of every sample in `x`.
    pub fn domain_ids(&self, x: &Tensor) -> ModelResult<Vec<usize>> {
        self.input.domain_ids(x, &self.domain_column)
    }

    /// `[B, input_dim]` input of the experts and gates.
    pub fn dnn_input(&self, x: &Tensor) -> ModelResult<Tensor> {
        let (sparse, dense) = self.input.input_from_feature_columns(x)?;
        if self.interacting.is_empty() {
            return combined_dnn_input(&sparse, &dense);
        }

        let fields: Vec<&Tensor> = sparse.iter().collect();
        let mut att = Tensor::concat(&fields, 1);
        for layer in &self.interacting {
            att = layer.forward(&att)?;
        }
        let att = att.flatten_from_1();
        if dense.is_empty() {
            Ok(att)
        } else {
            let mut parts = vec![&att];
            parts.extend(dense.iter());
            Ok(Tensor::concat(&parts, 1))
        }
    }

    /// One gate-weighted expert mixture per task, each `[B, expert_dim]`.
    pub fn mixtures(&self, dnn_input: &Tensor) -> ModelResult<Vec<Tensor>> {
        Ok(self.mmoe.forward_multi(dnn_input)?)
    }

    /// Training-mode [`MmoeBackbone::mixtures`].
    pub fn mixtures_train(&mut self, dnn_input: &Tensor) -> ModelResult<Vec<Tensor>> {
        Ok(self.mmoe.forward_multi_train(dnn_input)?)
    }

    fn check_task(&self, task: usize) -> ModelResult<()> {
        if task >= self.num_tasks() {
            return Err(ModelError::config(format!(
                "task {} out of range for {} tasks",
                task,
                self.num_tasks()
            )));
        }
        Ok(())
    }

    /// Runs task `task`'s tower over its mixture.
    ///
    /// # Errors
    ///
    /// Fails if the backbone has no towers.
    pub fn tower(&self, task: usize, mixture: &Tensor) -> ModelResult<Tensor> {
        self.check_task(task)?;
        let tower = self
            .towers
            .get(task)
            .ok_or_else(|| ModelError::config("tower_dnn_hidden_units is empty"))?;
        Ok(tower.forward(mixture)?)
    }

    /// Training-mode [`MmoeBackbone::tower`].
    pub fn tower_train(&mut self, task: usize, mixture: &Tensor) -> ModelResult<Tensor> {
        self.check_task(task)?;
        let tower = self
            .towers
            .get_mut(task)
            .ok_or_else(|| ModelError::config("tower_dnn_hidden_units is empty"))?;
        Ok(tower.forward_train(mixture)?)
    }

    /// Projects `hidden` to task `task`'s logit and applies its output link,
    /// giving `[B, 1]`.
    pub fn logit_and_predict(&self, task: usize, hidden: &Tensor) -> ModelResult<Tensor> {
        self.check_task(task)?;
        let logit = self.logits[task].forward(hidden)?;
        Ok(self.predictions[task].forward(&logit)?)
    }

    /// Concatenates per-task `[B, 1]` predictions into `[B, num_tasks]`.
    pub fn concat_predictions(&self, predictions: &[Tensor]) -> ModelResult<Tensor> {
        if predictions.len() != self.num_tasks() {
            return Err(ModelError::config(format!(
                "expected {} task outputs, got {}",
                self.num_tasks(),
                predictions.len()
            )));
        }
        let parts: Vec<&Tensor> = predictions.iter().collect();
        let out = Tensor::concat(&parts, 1);
        debug!(shape = ?out.shape(), "MMoE forward");
        Ok(out)
    }

    /// Runs the whole pipeline; `condition(task, tower_out)` gates each
    /// tower output before its logit.
    ///
    /// Without towers the mixtures feed the logits unconditioned.
    pub fn forward_with<F>(&self, x: &Tensor, mut condition: F) -> ModelResult<Tensor>
    where
        F: FnMut(usize, &Tensor) -> ModelResult<Tensor>,
    {
        let dnn_input = self.dnn_input(x)?;
        debug!(input = ?dnn_input.shape(), "MMoE dnn input");
        let mixtures = self.mixtures(&dnn_input)?;

        let mut outputs = Vec::with_capacity(mixtures.len());
        for (task, mixture) in mixtures.iter().enumerate() {
            let hidden = if self.has_towers() {
                condition(task, &self.tower(task, mixture)?)?
            } else {
                mixture.clone()
            };
            outputs.push(self.logit_and_predict(task, &hidden)?);
        }
        self.concat_predictions(&outputs)
    }

    /// Training-mode [`MmoeBackbone::forward_with`].
    pub fn forward_train_with<F>(&mut self, x: &Tensor, mut condition: F) -> ModelResult<Tensor>
    where
        F: FnMut(usize, &Tensor) -> ModelResult<Tensor>,
    {
        let dnn_input = self.dnn_input(x)?;
        let mixtures = self.mixtures_train(&dnn_input)?;

        let mut outputs = Vec::with_capacity(mixtures.len());
        for (task, mixture) in mixtures.iter().enumerate() {
            let hidden = if self.has_towers() {
                let tower_out = self.tower_train(task, mixture)?;
                condition(task, &tower_out)?
            } else {
                mixture.clone()
            };
            outputs.push(self.logit_and_predict(task, &hidden)?);
        }
        self.concat_predictions(&outputs)
    }

    /// Puts dropout and batch normalization into training or inference mode.
    pub fn set_training(&mut self, training: bool) {
        self.mmoe.set_training(training);
        for tower in &mut self.towers {
            tower.set_training(training);
        }
    }

    /// L2 penalty of the embedding tables, experts, gates, towers and logit
    /// projections.
    pub fn regularization_loss(&self) -> f32 {
        self.input.regularization_loss()
            + self.mmoe.regularization_loss()
            + self.towers.iter().map(|t| t.regularization_loss()).sum::<f32>()
            + self.logits.iter().map(|l| l.regularization_loss()).sum::<f32>()
    }

    pub fn num_parameters(&self) -> usize {
        self.input.num_parameters()
            + self.interacting.iter().map(|l| l.num_parameters()).sum::<usize>()
            + self.mmoe.num_parameters()
            + self.towers.iter().map(|t| t.num_parameters()).sum::<usize>()
            + self.logits.iter().map(|l| l.num_parameters()).sum::<usize>()
            + self.predictions.iter().map(|p| p.num_parameters()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{DenseFeat, SparseFeat};
    use rand::SeedableRng;

    fn columns() -> Vec<FeatureColumn> {
        vec![
            SparseFeat::new("user_id", 20, 8).into(),
            SparseFeat::new("item_id", 30, 8).into(),
            SparseFeat::new("domain", 4, 8).into(),
            DenseFeat::new("price", 1).into(),
        ]
    }

    fn small_config() -> MmoeConfig {
        MmoeConfig::new(3, "domain")
            .with_expert_hidden_units(vec![16, 8])
            .with_gate_hidden_units(vec![4])
            .with_tower_hidden_units(vec![6])
            .with_init_std(0.1)
    }

    fn batch(n: usize) -> Tensor {
        let mut data = Vec::with_capacity(n * 4);
        for i in 0..n {
            data.extend_from_slice(&[(i % 20) as f32, (i % 30) as f32, (i % 4) as f32, 0.5]);
        }
        Tensor::from_data(&[n, 4], data)
    }

    fn backbone(config: &MmoeConfig) -> MmoeBackbone {
        let mut rng = StdRng::seed_from_u64(config.seed);
        MmoeBackbone::new(&columns(), config, &mut rng).unwrap()
    }

    #[test]
    fn test_dnn_input_carries_domain_by_default() {
        let backbone = backbone(&small_config());
        assert_eq!(backbone.feature_input().input_dim(), 8 + 8 + 8 + 1);
        let x = batch(5);
        assert_eq!(backbone.dnn_input(&x).unwrap().shape(), &[5, 25]);

        let mut other_domain = x.clone();
        other_domain.data_mut()[2] = 3.0;
        assert_ne!(
            backbone.dnn_input(&x).unwrap(),
            backbone.dnn_input(&other_domain).unwrap()
        );

        let without = backbone_with(small_config().with_domain_id_as_feature(false));
        assert_eq!(without.feature_input().input_dim(), 8 + 8 + 1);
        assert_eq!(
            without.dnn_input(&x).unwrap(),
            without.dnn_input(&other_domain).unwrap()
        );
    }

    fn backbone_with(config: MmoeConfig) -> MmoeBackbone {
        backbone(&config)
    }

    #[test]
    fn test_self_attention_input() {
        let backbone = backbone_with(small_config().with_flag("usetrans"));
        let input = backbone.dnn_input(&batch(3)).unwrap();
        assert_eq!(input.shape(), &[3, 25]);
        // dense value is appended after the attention output
        assert!(input.data()[24] == 0.5 && input.data()[49] == 0.5);
    }

    #[test]
    fn test_steps_shapes() {
        let backbone = backbone(&small_config());
        let input = backbone.dnn_input(&batch(4)).unwrap();
        let mixtures = backbone.mixtures(&input).unwrap();
        assert_eq!(mixtures.len(), 2);
        assert!(mixtures.iter().all(|m| m.shape() == [4, 8]));

        let tower = backbone.tower(1, &mixtures[1]).unwrap();
        assert_eq!(tower.shape(), &[4, 6]);
        let p = backbone.logit_and_predict(1, &tower).unwrap();
        assert_eq!(p.shape(), &[4, 1]);
        assert!(backbone.tower(2, &mixtures[1]).is_err());
    }

    #[test]
    fn test_forward_with_identity_condition() {
        let backbone = backbone(&small_config());
        let out = backbone
            .forward_with(&batch(7), |_, t| Ok(t.clone()))
            .unwrap();
        assert_eq!(out.shape(), &[7, 2]);
        assert!(out.data().iter().all(|&p| p > 0.0 && p < 1.0));
    }

    #[test]
    fn test_no_towers_skips_condition() {
        let backbone = backbone_with(small_config().with_tower_hidden_units(vec![]));
        assert!(!backbone.has_towers());
        assert_eq!(backbone.tower_dim(), 8);
        let out = backbone
            .forward_with(&batch(3), |_, _| Err(ModelError::config("not called")))
            .unwrap();
        assert_eq!(out.shape(), &[3, 2]);
        assert!(backbone.tower(0, &Tensor::zeros(&[3, 8])).is_err());
    }

    #[test]
    fn test_regression_task_head() {
        let config = small_config().with_tasks(vec!["ctr", "dwell"], vec!["binary", "regression"]);
        let backbone = backbone(&config);
        assert_eq!(backbone.task_types(), &[TaskType::Binary, TaskType::Regression]);
        let out = backbone.forward_with(&batch(2), |_, t| Ok(t.clone())).unwrap();
        assert_eq!(out.shape(), &[2, 2]);
    }

    #[test]
    fn test_regularization_loss_tracks_l2() {
        let plain = backbone(&small_config().with_l2_reg_embedding(0.0));
        assert_eq!(plain.regularization_loss(), 0.0);

        let reg = backbone(&small_config().with_l2_reg_dnn(1e-3));
        assert!(reg.regularization_loss() > 0.0);
    }

    #[test]
    fn test_training_forward_with_dropout() {
        let mut backbone = backbone_with(small_config().with_dropout(0.5).with_batch_norm(true));
        let out = backbone
            .forward_train_with(&batch(6), |_, t| Ok(t.clone()))
            .unwrap();
        assert_eq!(out.shape(), &[6, 2]);

        backbone.set_training(false);
        let a = backbone.forward_with(&batch(6), |_, t| Ok(t.clone())).unwrap();
        let b = backbone.forward_with(&batch(6), |_, t| Ok(t.clone())).unwrap();
        assert_eq!(a, b);
    }
}
