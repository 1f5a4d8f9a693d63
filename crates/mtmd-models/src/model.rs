//! Common interface of the multi-task models and construction by name.

use std::fmt;
use std::str::FromStr;

use mtmd_layers::{TaskType, Tensor};
use serde::{Deserialize, Serialize};

use crate::config::MmoeConfig;
use crate::error::{ModelError, ModelResult};
use crate::feature::FeatureColumn;
use crate::mmoe_mt::MmoeMt;
use crate::mmoe_mt_att::MmoeMtAtt;

/// A model predicting several tasks for samples drawn from several domains.
///
/// `x` is the flat `[batch, total_columns]` feature matrix laid out by the
/// model's feature columns; outputs are `[batch, num_tasks]` in task order.
pub trait MultiTaskModel: Send + Sync + fmt::Debug {
    /// Inference forward pass.
    fn forward(&self, x: &Tensor) -> ModelResult<Tensor>;

    /// Training-mode forward pass: dropout is active and batch normalization
    /// uses (and records) batch statistics.
    fn forward_train(&mut self, x: &Tensor) -> ModelResult<Tensor>;

    /// Switches dropout and batch normalization between modes.
    fn set_training(&mut self, training: bool);

    fn task_names(&self) -> &[String];

    fn task_types(&self) -> &[TaskType];

    /// L2 penalty of the embedding tables and DNN kernels.
    fn regularization_loss(&self) -> f32;

    fn num_parameters(&self) -> usize;

    fn kind(&self) -> ModelKind;

    fn num_tasks(&self) -> usize {
        self.task_names().len()
    }
}

/// Available architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    /// MMoE with one LHUC gate shared by all tasks
    #[serde(rename = "MMOE_MT")]
    MmoeMt,
    /// MMoE with per-task target attention over the domain, then LHUC
    #[serde(rename = "MMOE_MT_ATT")]
    MmoeMtAtt,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::MmoeMt => "MMOE_MT",
            ModelKind::MmoeMtAtt => "MMOE_MT_ATT",
        }
    }
}

impl FromStr for ModelKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MMOE_MT" => Ok(ModelKind::MmoeMt),
            "MMOE_MT_ATT" => Ok(ModelKind::MmoeMtAtt),
            other => Err(ModelError::UnknownModel {
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a model of the given kind.
///
/// # Examples
///
/// ```
/// use mtmd_models::{
///     build_model, DenseFeat, FeatureColumn, MmoeConfig, ModelKind, MultiTaskModel, SparseFeat,
/// };
/// use mtmd_layers::Tensor;
///
/// let columns: Vec<FeatureColumn> = vec![
///     SparseFeat::new("user_id", 10, 4).into(),
///     SparseFeat::new("domain", 3, 4).into(),
///     DenseFeat::new("price", 1).into(),
/// ];
/// let config = MmoeConfig::new(2, "domain").with_expert_hidden_units(vec![8]);
/// let model = build_model("MMOE_MT".parse().unwrap(), &columns, &config).unwrap();
///
/// let x = Tensor::from_data(&[2, 3], vec![1.0, 1.0, 0.3, 4.0, 2.0, 0.7]);
/// assert_eq!(model.forward(&x).unwrap().shape(), &[2, 2]);
/// assert_eq!(model.kind(), ModelKind::MmoeMt);
/// ```
pub fn build_model(
    kind: ModelKind,
    columns: &[FeatureColumn],
    config: &MmoeConfig,
) -> ModelResult<Box<dyn MultiTaskModel>> {
    Ok(match kind {
        ModelKind::MmoeMt => Box::new(MmoeMt::new(columns, config)?),
        ModelKind::MmoeMtAtt => Box::new(MmoeMtAtt::new(columns, config)?),
    })
}
