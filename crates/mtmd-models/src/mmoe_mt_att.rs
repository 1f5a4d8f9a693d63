//! MMoE with per-task target attention over the domain embedding.
//!
//! Each task attends from its tower output to the domain embedding, maps the
//! attended vector through its own [`DomainLhuc`] to a `(0, 1)` multiplier,
//! and scales its tower output with it.

use mtmd_layers::{
    AttentionConfig, DomainLhuc, Layer, LhucConfig, TargetAttention, TaskType, Tensor,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::backbone::MmoeBackbone;
use crate::config::MmoeConfig;
use crate::domain::DomainEmbedding;
use crate::error::{ModelError, ModelResult};
use crate::feature::FeatureColumn;
use crate::model::{ModelKind, MultiTaskModel};

/// Multi-task, multi-domain MMoE with per-task attention LHUC gates.
#[derive(Debug, Clone)]
pub struct MmoeMtAtt {
    backbone: MmoeBackbone,
    domain_embedding: DomainEmbedding,
    attention: Vec<TargetAttention>,
    lhuc: Vec<DomainLhuc>,
}

impl MmoeMtAtt {
    /// Builds the model; all weights derive from `config.seed`.
    ///
    /// # Errors
    ///
    /// Besides config validation, the embedding size must split into
    /// `att_head_num` heads.
    pub fn new(columns: &[FeatureColumn], config: &MmoeConfig) -> ModelResult<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let backbone = MmoeBackbone::new(columns, config, &mut rng)?;

        let embedding_size = config.embedding_size(columns)?;
        let domain_embedding = DomainEmbedding::new(config.num_domains, embedding_size, &mut rng)?;
        let tower_dim = backbone.tower_dim();
        let att_config =
            AttentionConfig::new(config.att_head_num).with_residual(config.att_use_residual);

        let mut attention = Vec::with_capacity(backbone.num_tasks());
        let mut lhuc = Vec::with_capacity(backbone.num_tasks());
        for _ in 0..backbone.num_tasks() {
            attention.push(TargetAttention::new(
                tower_dim,
                embedding_size,
                att_config,
                &mut rng,
            )?);
            lhuc.push(DomainLhuc::new(
                LhucConfig::new(embedding_size, tower_dim)
                    .with_hidden_dim(config.lhuc_hidden_units)
                    .with_scale(1.0),
                &mut rng,
            )?);
        }

        info!(
            model = "MMOE_MT_ATT",
            num_domains = config.num_domains,
            embedding_size,
            head_num = config.att_head_num,
            lhuc_hidden = config.lhuc_hidden_units,
            "Built model"
        );
        Ok(Self {
            backbone,
            domain_embedding,
            attention,
            lhuc,
        })
    }

    pub fn backbone(&self) -> &MmoeBackbone {
        &self.backbone
    }

    pub fn domain_embedding(&self) -> &DomainEmbedding {
        &self.domain_embedding
    }

    fn domain_emb(&self, x: &Tensor) -> ModelResult<Tensor> {
        let ids = self.backbone.domain_ids(x)?;
        self.domain_embedding.embed(&ids)
    }

    /// `[B, tower_dim]` multiplier of task `task` for the given tower output.
    pub fn domain_gate(
        &self,
        task: usize,
        tower_out: &Tensor,
        domain_emb: &Tensor,
    ) -> ModelResult<Tensor> {
        match (self.attention.get(task), self.lhuc.get(task)) {
            (Some(attention), Some(lhuc)) => gate(attention, lhuc, tower_out, domain_emb),
            _ => Err(ModelError::config(format!(
                "task {} out of range for {} tasks",
                task,
                self.attention.len()
            ))),
        }
    }
}

fn gate(
    attention: &TargetAttention,
    lhuc: &DomainLhuc,
    tower_out: &Tensor,
    domain_emb: &Tensor,
) -> ModelResult<Tensor> {
    let attended = attention.attend(tower_out, domain_emb)?;
    debug!(attended = ?attended.shape(), "Domain attention");
    Ok(lhuc.forward(&attended)?)
}

impl MultiTaskModel for MmoeMtAtt {
    fn forward(&self, x: &Tensor) -> ModelResult<Tensor> {
        if !self.backbone.has_towers() {
            return self.backbone.forward_with(x, |_, t| Ok(t.clone()));
        }
        let domain_emb = self.domain_emb(x)?;
        self.backbone.forward_with(x, |task, t| {
            Ok(t.mul(&self.domain_gate(task, t, &domain_emb)?))
        })
    }

    fn forward_train(&mut self, x: &Tensor) -> ModelResult<Tensor> {
        if !self.backbone.has_towers() {
            return self.backbone.forward_train_with(x, |_, t| Ok(t.clone()));
        }
        let domain_emb = self.domain_emb(x)?;
        let attention = &self.attention;
        let lhuc = &self.lhuc;
        self.backbone.forward_train_with(x, |task, t| {
            Ok(t.mul(&gate(&attention[task], &lhuc[task], t, &domain_emb)?))
        })
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
            + self.attention.iter().map(|a| a.num_parameters()).sum::<usize>()
            + self.lhuc.iter().map(|l| l.num_parameters()).sum::<usize>()
    }

    fn kind(&self) -> ModelKind {
        ModelKind::MmoeMtAtt
    }
}
