//! Hyper-parameters shared by the MMoE model family.
//!
//! Configurations are plain serde structs; every field but `num_domains` and
//! `domain_column` has a default, so a JSON file only needs to name what it
//! changes:
//!
//! ```
//! use mtmd_models::config::MmoeConfig;
//!
//! let config = MmoeConfig::from_json_str(
//!     r#"{"num_domains": 3, "domain_column": "domain", "num_experts": 4}"#,
//! )
//! .unwrap();
//! assert_eq!(config.num_experts, 4);
//! assert_eq!(config.expert_dnn_hidden_units, vec![256, 128]);
//! ```

use std::path::Path;

use mtmd_layers::{ActivationType, TaskType};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::feature::{filter_feature_columns, FeatureColumn};
use crate::input::uniform_embedding_dim;

/// Flag enabling self-attention over the sparse embeddings.
pub const SELF_ATTENTION_FLAG: &str = "usetrans";

/// Configuration of [`MmoeMt`](crate::MmoeMt) and [`MmoeMtAtt`](crate::MmoeMtAtt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmoeConfig {
    /// Number of domains; domain ids range over `0..=num_domains`
    pub num_domains: usize,
    /// Name of the sparse column holding the domain id
    pub domain_column: String,
    #[serde(default = "default_num_experts")]
    pub num_experts: usize,
    #[serde(default = "default_expert_units")]
    pub expert_dnn_hidden_units: Vec<usize>,
    #[serde(default = "default_gate_units")]
    pub gate_dnn_hidden_units: Vec<usize>,
    /// Empty disables the towers and domain conditioning
    #[serde(default = "default_tower_units")]
    pub tower_dnn_hidden_units: Vec<usize>,
    /// Accepted for compatibility; these models have no linear part
    #[serde(default = "default_l2_reg")]
    pub l2_reg_linear: f32,
    #[serde(default = "default_l2_reg")]
    pub l2_reg_embedding: f32,
    #[serde(default)]
    pub l2_reg_dnn: f32,
    #[serde(default = "default_init_std")]
    pub init_std: f32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub dnn_dropout: f32,
    #[serde(default = "default_activation")]
    pub dnn_activation: String,
    #[serde(default)]
    pub dnn_use_bn: bool,
    #[serde(default = "default_task_types")]
    pub task_types: Vec<String>,
    #[serde(default = "default_task_names")]
    pub task_names: Vec<String>,
    /// Free-form switches; see [`SELF_ATTENTION_FLAG`]
    #[serde(default)]
    pub flags: Vec<String>,
    /// Keep the domain column in the DNN input; `false` leaves the domain
    /// to the domain embedding alone
    #[serde(default = "default_true")]
    pub domain_id_as_feature: bool,
    #[serde(default = "default_att_head_num")]
    pub att_head_num: usize,
    #[serde(default = "default_att_layer_num")]
    pub att_layer_num: usize,
    #[serde(default = "default_true")]
    pub att_use_residual: bool,
    #[serde(default = "default_lhuc_hidden_units")]
    pub lhuc_hidden_units: usize,
}

fn default_num_experts() -> usize {
    3
}

fn default_expert_units() -> Vec<usize> {
    vec![256, 128]
}

fn default_gate_units() -> Vec<usize> {
    vec![64]
}

fn default_tower_units() -> Vec<usize> {
    vec![64]
}

fn default_l2_reg() -> f32 {
    1e-5
}

fn default_init_std() -> f32 {
    1e-4
}

fn default_seed() -> u64 {
    1024
}

fn default_activation() -> String {
    "relu".to_string()
}

fn default_task_types() -> Vec<String> {
    vec!["binary".to_string(), "binary".to_string()]
}

fn default_task_names() -> Vec<String> {
    vec!["ctr".to_string(), "ctcvr".to_string()]
}

fn default_att_head_num() -> usize {
    4
}

fn default_att_layer_num() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_lhuc_hidden_units() -> usize {
    128
}

impl MmoeConfig {
    /// Creates a configuration with default hyper-parameters.
    pub fn new(num_domains: usize, domain_column: impl Into<String>) -> Self {
        Self {
            num_domains,
            domain_column: domain_column.into(),
            num_experts: default_num_experts(),
            expert_dnn_hidden_units: default_expert_units(),
            gate_dnn_hidden_units: default_gate_units(),
            tower_dnn_hidden_units: default_tower_units(),
            l2_reg_linear: default_l2_reg(),
            l2_reg_embedding: default_l2_reg(),
            l2_reg_dnn: 0.0,
            init_std: default_init_std(),
            seed: default_seed(),
            dnn_dropout: 0.0,
            dnn_activation: default_activation(),
            dnn_use_bn: false,
            task_types: default_task_types(),
            task_names: default_task_names(),
            flags: Vec::new(),
            domain_id_as_feature: true,
            att_head_num: default_att_head_num(),
            att_layer_num: default_att_layer_num(),
            att_use_residual: true,
            lhuc_hidden_units: default_lhuc_hidden_units(),
        }
    }

    /// Parses a JSON configuration.
    pub fn from_json_str(json: &str) -> ModelResult<Self> {
        serde_json::from_str(json).map_err(ModelError::Parse)
    }

    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> ModelResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ModelError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_json_str(&json)?;
        tracing::info!(path = %path.display(), "Loaded model config");
        Ok(config)
    }

    pub fn with_num_experts(mut self, num_experts: usize) -> Self {
        self.num_experts = num_experts;
        self
    }

    pub fn with_expert_hidden_units(mut self, units: Vec<usize>) -> Self {
        self.expert_dnn_hidden_units = units;
        self
    }

    pub fn with_gate_hidden_units(mut self, units: Vec<usize>) -> Self {
        self.gate_dnn_hidden_units = units;
        self
    }

    pub fn with_tower_hidden_units(mut self, units: Vec<usize>) -> Self {
        self.tower_dnn_hidden_units = units;
        self
    }

    /// Sets task names and types together.
    pub fn with_tasks<S: Into<String>>(mut self, names: Vec<S>, types: Vec<S>) -> Self {
        self.task_names = names.into_iter().map(Into::into).collect();
        self.task_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn with_domain_id_as_feature(mut self, enabled: bool) -> Self {
        self.domain_id_as_feature = enabled;
        self
    }

    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dnn_dropout = rate;
        self
    }

    pub fn with_batch_norm(mut self, use_bn: bool) -> Self {
        self.dnn_use_bn = use_bn;
        self
    }

    pub fn with_l2_reg_dnn(mut self, l2: f32) -> Self {
        self.l2_reg_dnn = l2;
        self
    }

    pub fn with_l2_reg_embedding(mut self, l2: f32) -> Self {
        self.l2_reg_embedding = l2;
        self
    }

    pub fn with_init_std(mut self, init_std: f32) -> Self {
        self.init_std = init_std;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_lhuc_hidden_units(mut self, units: usize) -> Self {
        self.lhuc_hidden_units = units;
        self
    }

    pub fn num_tasks(&self) -> usize {
        self.task_names.len()
    }

    /// Whether a flag asks for self-attention over the sparse embeddings.
    pub fn use_self_attention(&self) -> bool {
        self.flags.iter().any(|f| f.contains(SELF_ATTENTION_FLAG))
    }

    /// Parsed DNN activation.
    pub fn activation(&self) -> ModelResult<ActivationType> {
        Ok(self.dnn_activation.parse()?)
    }

    /// Parsed task types, in task order.
    pub fn parsed_task_types(&self) -> ModelResult<Vec<TaskType>> {
        self.task_types
            .iter()
            .map(|t| t.parse::<TaskType>().map_err(ModelError::from))
            .collect()
    }

    /// Columns feeding the DNN: the whole schema, or the schema minus the
    /// domain column when `domain_id_as_feature` is off.
    pub fn dnn_feature_columns(&self, columns: &[FeatureColumn]) -> Vec<FeatureColumn> {
        if self.domain_id_as_feature {
            columns.to_vec()
        } else {
            filter_feature_columns(columns, &[self.domain_column.as_str()])
        }
    }

    /// Width of the domain embedding: the embedding dim shared by every
    /// sparse column of the schema.
    pub fn embedding_size(&self, columns: &[FeatureColumn]) -> ModelResult<usize> {
        uniform_embedding_dim(columns).ok_or_else(|| {
            ModelError::config("sparse features must share one embedding dim")
        })
    }

    /// Checks the configuration against a feature schema.
    pub fn validate(&self, columns: &[FeatureColumn]) -> ModelResult<()> {
        if self.num_tasks() <= 1 {
            return Err(ModelError::config("num_tasks must be greater than 1"));
        }
        if self.num_experts <= 1 {
            return Err(ModelError::config("num_experts must be greater than 1"));
        }
        if columns.is_empty() {
            return Err(ModelError::config("dnn_feature_columns is null!"));
        }
        if self.task_types.len() != self.num_tasks() {
            return Err(ModelError::config(
                "num_tasks must be equal to the length of task_types",
            ));
        }
        self.parsed_task_types()?;
        self.activation()?;
        if self.expert_dnn_hidden_units.is_empty() {
            return Err(ModelError::config("expert_dnn_hidden_units is empty!!"));
        }
        if !(0.0..1.0).contains(&self.dnn_dropout) {
            return Err(ModelError::config(format!(
                "dnn_dropout must be in [0, 1), got {}",
                self.dnn_dropout
            )));
        }
        if self.num_domains == 0 {
            return Err(ModelError::config("num_domains must be positive"));
        }
        if !columns.iter().any(|c| c.name() == self.domain_column) {
            return Err(ModelError::config(format!(
                "domain column {} is not a feature column",
                self.domain_column
            )));
        }
        if self.lhuc_hidden_units == 0 {
            return Err(ModelError::config("lhuc_hidden_units must be positive"));
        }
        self.embedding_size(columns)?;

        if self.use_self_attention() {
            let dnn_columns = self.dnn_feature_columns(columns);
            let fields = uniform_embedding_dim(&dnn_columns).ok_or_else(|| {
                ModelError::config("self-attention needs sparse features with one embedding dim")
            })?;
            if self.att_layer_num == 0 {
                return Err(ModelError::config("att_layer_num must be positive"));
            }
            if self.att_head_num == 0 || fields % self.att_head_num != 0 {
                return Err(ModelError::config(format!(
                    "embedding size {} is not an integer multiple of head_num {}",
                    fields, self.att_head_num
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{DenseFeat, SparseFeat};

    fn columns() -> Vec<FeatureColumn> {
        vec![
            SparseFeat::new("user_id", 100, 8).into(),
            SparseFeat::new("domain", 4, 8).into(),
            DenseFeat::new("price", 1).into(),
        ]
    }

    #[test]
    fn test_defaults_from_minimal_json() {
        let config =
            MmoeConfig::from_json_str(r#"{"num_domains": 3, "domain_column": "domain"}"#).unwrap();
        assert_eq!(config, MmoeConfig::new(3, "domain"));
        assert_eq!(config.num_experts, 3);
        assert_eq!(config.gate_dnn_hidden_units, vec![64]);
        assert_eq!(config.tower_dnn_hidden_units, vec![64]);
        assert_eq!(config.l2_reg_dnn, 0.0);
        assert_eq!(config.seed, 1024);
        assert_eq!(config.task_names, vec!["ctr", "ctcvr"]);
        assert_eq!(config.att_head_num, 4);
        assert_eq!(config.att_layer_num, 3);
        assert!(config.att_use_residual);
        assert_eq!(config.lhuc_hidden_units, 128);
        assert!(!config.use_self_attention());
    }

    #[test]
    fn test_missing_required_field() {
        let err = MmoeConfig::from_json_str(r#"{"domain_column": "domain"}"#).unwrap_err();
        assert!(matches!(err, ModelError::Parse(_)));
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(MmoeConfig::new(3, "domain").validate(&columns()).is_ok());
    }

    #[test]
    fn test_validate_errors() {
        let base = MmoeConfig::new(3, "domain");
        let cases = vec![
            (
                base.clone().with_tasks(vec!["ctr"], vec!["binary"]),
                "num_tasks must be greater than 1",
            ),
            (base.clone().with_num_experts(1), "num_experts must be greater than 1"),
            (
                base.clone()
                    .with_tasks(vec!["ctr", "ctcvr"], vec!["binary", "binary", "binary"]),
                "num_tasks must be equal to the length of task_types",
            ),
            (
                base.clone().with_tasks(vec!["ctr", "gmv"], vec!["binary", "ranking"]),
                "task must be binary or regression, ranking is illegal",
            ),
            (base.clone().with_expert_hidden_units(vec![]), "expert_dnn_hidden_units is empty!!"),
            (base.clone().with_dropout(1.0), "dnn_dropout must be in [0, 1)"),
            (MmoeConfig::new(0, "domain"), "num_domains must be positive"),
            (MmoeConfig::new(3, "site"), "domain column site is not a feature column"),
        ];
        for (config, expected) in cases {
            let err = config.validate(&columns()).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{} does not mention {}",
                err,
                expected
            );
        }
        assert!(base.validate(&[]).is_err());
    }

    #[test]
    fn test_unknown_activation() {
        let mut config = MmoeConfig::new(3, "domain");
        config.dnn_activation = "swish".to_string();
        assert!(matches!(
            config.validate(&columns()),
            Err(ModelError::Layer(_))
        ));
    }

    #[test]
    fn test_self_attention_flag() {
        let config = MmoeConfig::new(3, "domain").with_flag("sota_usetrans");
        assert!(config.use_self_attention());
        assert!(config.validate(&columns()).is_ok());

        let odd: Vec<FeatureColumn> = vec![
            SparseFeat::new("user_id", 100, 6).into(),
            SparseFeat::new("domain", 4, 6).into(),
        ];
        assert!(config.validate(&odd).is_err());
        assert!(MmoeConfig::new(3, "domain").validate(&odd).is_ok());
    }

    #[test]
    fn test_dnn_feature_columns() {
        let config = MmoeConfig::new(3, "domain");
        assert!(config.domain_id_as_feature);
        assert_eq!(config.dnn_feature_columns(&columns()).len(), 3);

        let config = config.with_domain_id_as_feature(false);
        let dnn = config.dnn_feature_columns(&columns());
        assert_eq!(dnn.len(), 2);
        assert!(dnn.iter().all(|c| c.name() != "domain"));
    }

    #[test]
    fn test_domain_id_as_feature_defaults_on_in_json() {
        let config = MmoeConfig::from_json_str(r#"{"num_domains": 2, "domain_column": "domain"}"#)
            .unwrap();
        assert!(config.domain_id_as_feature);
    }

    #[test]
    fn test_embedding_size() {
        let config = MmoeConfig::new(3, "domain");
        assert_eq!(config.embedding_size(&columns()).unwrap(), 8);
        let mixed: Vec<FeatureColumn> = vec![
            SparseFeat::new("user_id", 100, 8).into(),
            SparseFeat::new("domain", 4, 4).into(),
        ];
        assert!(config.embedding_size(&mixed).is_err());
    }
}
