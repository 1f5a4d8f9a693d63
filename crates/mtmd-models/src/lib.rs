//! Multi-task, multi-domain MMoE recommendation models.
//!
//! Two architectures share one backbone (feature embeddings, optional
//! self-attention over fields, MMoE experts and gates, per-task towers):
//!
//! - [`MmoeMt`]: one domain LHUC gate scales every task's tower output
//! - [`MmoeMtAtt`]: each task attends from its tower output to the domain
//!   embedding and derives its own LHUC gate
//!
//! # Quick Start
//!
//! ```
//! use mtmd_models::prelude::*;
//!
//! let columns: Vec<FeatureColumn> = vec![
//!     SparseFeat::new("user_id", 100, 8).into(),
//!     SparseFeat::new("domain", 4, 8).into(),
//!     DenseFeat::new("price", 1).into(),
//! ];
//! let config = MmoeConfig::new(3, "domain")
//!     .with_expert_hidden_units(vec![32, 16])
//!     .with_tower_hidden_units(vec![8]);
//! let model = MmoeMtAtt::new(&columns, &config).unwrap();
//!
//! // user_id, domain, price
//! let x = Tensor::from_data(&[2, 3], vec![7.0, 1.0, 0.5, 42.0, 3.0, 1.5]);
//! let predictions = model.forward(&x).unwrap();
//! assert_eq!(predictions.shape(), &[2, 2]); // [batch, num_tasks]
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

pub mod backbone;
pub mod config;
pub mod domain;
pub mod error;
pub mod feature;
pub mod input;
pub mod mmoe_mt;
pub mod mmoe_mt_att;
pub mod model;

pub use backbone::MmoeBackbone;
pub use config::{MmoeConfig, SELF_ATTENTION_FLAG};
pub use domain::DomainEmbedding;
pub use error::{ModelError, ModelResult};
pub use feature::{
    build_feature_index, compute_input_dim, filter_feature_columns, DenseFeat, FeatureColumn,
    FeatureIndex, SparseFeat, VarLenSparseFeat,
};
pub use input::{combined_dnn_input, FeatureInput};
pub use mmoe_mt::MmoeMt;
pub use mmoe_mt_att::MmoeMtAtt;
pub use model::{build_model, ModelKind, MultiTaskModel};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::MmoeConfig;
    pub use crate::error::ModelError;
    pub use crate::feature::{DenseFeat, FeatureColumn, SparseFeat, VarLenSparseFeat};
    pub use crate::mmoe_mt::MmoeMt;
    pub use crate::mmoe_mt_att::MmoeMtAtt;
    pub use crate::model::{build_model, ModelKind, MultiTaskModel};
    pub use mtmd_layers::{PoolingMode, TaskType, Tensor};
}
