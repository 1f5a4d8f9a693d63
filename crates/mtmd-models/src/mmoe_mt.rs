//! MMoE with a shared domain LHUC gate.
//!
//! The domain id of every sample is embedded and mapped through one
//! [`DomainLhuc`] block to a `(0, 2)` multiplier, which scales every task's
//! tower output before its logit.

use mtmd_layers::{DomainLhuc, Layer, LhucConfig, TaskType, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::backbone::MmoeBackbone;
use crate::config::MmoeConfig;
use crate::domain::DomainEmbedding;
use crate::error::ModelResult;
use crate::feature::FeatureColumn;
use crate::model::{ModelKind, MultiTaskModel};

/// Multi-task, multi-domain MMoE with a shared LHUC gate.
#[derive(Debug, Clone)]
pub struct MmoeMt {
    backbone: MmoeBackbone,
    domain_embedding: DomainEmbedding,
    lhuc: DomainLhuc,
}

impl MmoeMt {
    /// Builds the model; all weights derive from `config.seed`.
    pub fn new(columns: &[FeatureColumn], config: &MmoeConfig) -> ModelResult<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let backbone = MmoeBackbone::new(columns, config, &mut rng)?;

        let embedding_size = config.embedding_size(columns)?;
        let domain_embedding = DomainEmbedding::new(config.num_domains, embedding_size, &mut rng)?;
        let lhuc = DomainLhuc::new(
            LhucConfig::new(embedding_size, backbone.tower_dim())
                .with_hidden_dim(config.lhuc_hidden_units),
            &mut rng,
        )?;

        info!(
            model = "MMOE_MT",
            num_domains = config.num_domains,
            embedding_size,
            lhuc_hidden = config.lhuc_hidden_units,
            "Built model"
        );
        Ok(Self {
            backbone,
            domain_embedding,
            lhuc,
        })
    }

    pub fn backbone(&self) -> &MmoeBackbone {
        &self.backbone
    }

    pub fn domain_embedding(&self) -> &DomainEmbedding {
        &self.domain_embedding
    }

    /// `[B, tower_dim]` multiplier shared by every task.
    pub fn domain_gate(&self, x: &Tensor) -> ModelResult<Tensor> {
        let ids = self.backbone.domain_ids(x)?;
        let emb = self.domain_embedding.embed(&ids)?;
        Ok(self.lhuc.forward(&emb)?)
    }
}

impl MultiTaskModel for MmoeMt {
    fn forward(&self, x: &Tensor) -> ModelResult<Tensor> {
        if !self.backbone.has_towers() {
            return self.backbone.forward_with(x, |_, t| Ok(t.clone()));
        }
        let gate = self.domain_gate(x)?;
        self.backbone.forward_with(x, |_, t| Ok(t.mul(&gate)))
    }

    fn forward_train(&mut self, x: &Tensor) -> ModelResult<Tensor> {
        if !self.backbone.has_towers() {
            return self.backbone.forward_train_with(x, |_, t| Ok(t.clone()));
        }
        let gate = self.domain_gate(x)?;
        self.backbone.forward_train_with(x, |_, t| Ok(t.mul(&gate)))
    }

    fn set_training(&mut self, training: bool) {
        self.backbone.set_training(training);
    }

    fn task_names(&self) -> &[String] {
        self.backbone.task_names()
    }

    fn task_types(&self) -> &[TaskType] {
        self.backbone.task_types()
    }

    fn regularization_loss(&self) -> f32 {
        self.backbone.regularization_loss()
    }

    fn num_parameters(&self) -> usize {
        self.backbone.num_parameters()
            + self.domain_embedding.num_parameters()
            + self.lhuc.num_parameters()
    }

    fn kind(&self) -> ModelKind {
        ModelKind::MmoeMt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{DenseFeat, SparseFeat};

    fn columns() -> Vec<FeatureColumn> {
        vec![
            SparseFeat::new("user_id", 20, 8).into(),
            SparseFeat::new("domain", 4, 8).into(),
            DenseFeat::new("price", 2).into(),
        ]
    }

    fn config() -> MmoeConfig {
        MmoeConfig::new(3, "domain")
            .with_expert_hidden_units(vec![16, 8])
            .with_gate_hidden_units(vec![])
            .with_tower_hidden_units(vec![6])
            .with_lhuc_hidden_units(16)
            .with_init_std(0.1)
    }

    fn batch() -> Tensor {
        Tensor::from_data(
            &[4, 4],
            vec![
                1.0, 1.0, 0.2, 0.3, //
                2.0, 2.0, 0.2, 0.3, //
                3.0, 3.0, 0.2, 0.3, //
                3.0, 1.0, 0.2, 0.3,
            ],
        )
    }

    #[test]
    fn test_forward_shape_and_range() {
        let model = MmoeMt::new(&columns(), &config()).unwrap();
        let out = model.forward(&batch()).unwrap();
        assert_eq!(out.shape(), &[4, 2]);
        assert!(out.data().iter().all(|&p| p > 0.0 && p < 1.0));
        assert_eq!(model.num_tasks(), 2);
        assert_eq!(model.kind(), ModelKind::MmoeMt);
    }

    #[test]
    fn test_domain_gate_depends_on_domain_only() {
        let model = MmoeMt::new(&columns(), &config()).unwrap();
        let gate = model.domain_gate(&batch()).unwrap();
        assert_eq!(gate.shape(), &[4, 6]);
        assert!(gate.data().iter().all(|&g| g > 0.0 && g < 2.0));
        // rows 0 and 3 share domain 1
        assert_eq!(&gate.data()[0..6], &gate.data()[18..24]);
        assert_ne!(&gate.data()[0..6], &gate.data()[6..12]);
    }

    #[test]
    fn test_forward_matches_step_by_step() {
        let model = MmoeMt::new(&columns(), &config().with_init_std(0.5)).unwrap();
        assert_eq!(model.lhuc.config().scale, 2.0);
        let x = batch();
        let out = model.forward(&x).unwrap();

        let backbone = model.backbone();
        let ids = backbone.domain_ids(&x).unwrap();
        let emb = model.domain_embedding().embed(&ids).unwrap();
        let gate = model.lhuc.forward(&emb).unwrap();
        assert_eq!(gate, model.domain_gate(&x).unwrap());

        let mixtures = backbone.mixtures(&backbone.dnn_input(&x).unwrap()).unwrap();
        for (task, mixture) in mixtures.iter().enumerate() {
            let tower = backbone.tower(task, mixture).unwrap();
            let expected = backbone.logit_and_predict(task, &tower.mul(&gate)).unwrap();
            for (got, want) in out.column(task).data().iter().zip(expected.data()) {
                assert!((got - want).abs() < 1e-6, "task {}: {} vs {}", task, got, want);
            }
        }
    }

    #[test]
    fn test_empty_batch() {
        let model = MmoeMt::new(&columns(), &config()).unwrap();
        let out = model.forward(&Tensor::zeros(&[0, 4])).unwrap();
        assert_eq!(out.shape(), &[0, 2]);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let a = MmoeMt::new(&columns(), &config()).unwrap();
        let b = MmoeMt::new(&columns(), &config()).unwrap();
        assert_eq!(a.forward(&batch()).unwrap(), b.forward(&batch()).unwrap());

        let c = MmoeMt::new(&columns(), &config().with_seed(7)).unwrap();
        assert_ne!(a.forward(&batch()).unwrap(), c.forward(&batch()).unwrap());
    }

    #[test]
    fn test_unknown_domain_rejected() {
        let model = MmoeMt::new(&columns(), &config()).unwrap();
        let mut x = batch();
        x.data_mut()[1] = 4.0; // only ids 0..=3 are embedded
        assert!(model.forward(&x).is_err());
    }

    #[test]
    fn test_without_towers() {
        let model = MmoeMt::new(&columns(), &config().with_tower_hidden_units(vec![])).unwrap();
        assert_eq!(model.forward(&batch()).unwrap().shape(), &[4, 2]);
    }

    #[test]
    fn test_batch_of_one() {
        let model = MmoeMt::new(&columns(), &config()).unwrap();
        let x = Tensor::from_data(&[1, 4], vec![5.0, 2.0, 1.0, -1.0]);
        assert_eq!(model.forward(&x).unwrap().shape(), &[1, 2]);
    }
}
