//! Feature input layer: splits the flat input matrix into per-feature
//! embeddings and dense values.

use std::collections::HashMap;

use mtmd_layers::embedding::ids_from_tensor;
use mtmd_layers::{EmbeddingTable, Initializer, Layer, Regularizer, Tensor};
use rand::Rng;

use crate::error::{ModelError, ModelResult};
use crate::feature::{build_feature_index, FeatureColumn, FeatureIndex};

/// Returns the embedding dim shared by every (var-len) sparse feature.
///
/// `None` if there are no sparse features or their dims differ.
pub fn uniform_embedding_dim(columns: &[FeatureColumn]) -> Option<usize> {
    let mut dims = columns.iter().filter_map(|c| c.sparse().map(|s| s.embedding_dim));
    let first = dims.next()?;
    dims.all(|d| d == first).then_some(first)
}

/// Embedding tables for the DNN feature columns, plus the column layout of `X`.
///
/// `X` is laid out by the full schema, which may hold columns (such as the
/// domain id) that do not feed the DNN.
#[derive(Debug, Clone)]
pub struct FeatureInput {
    columns: Vec<FeatureColumn>,
    index: FeatureIndex,
    tables: HashMap<String, EmbeddingTable>,
    input_dim: usize,
}

impl FeatureInput {
    /// Builds one table per sparse column in `dnn_columns`.
    ///
    /// Tables are drawn from N(0, `init_std`) and carry an L2 penalty of
    /// `l2_reg_embedding` on the full table.
    ///
    /// # Errors
    ///
    /// Fails if the schema is invalid, `dnn_columns` is empty, or a DNN
    /// column is missing from the schema.
    pub fn new<R: Rng + ?Sized>(
        schema: &[FeatureColumn],
        dnn_columns: Vec<FeatureColumn>,
        init_std: f32,
        l2_reg_embedding: f32,
        rng: &mut R,
    ) -> ModelResult<Self> {
        let index = build_feature_index(schema)?;
        if dnn_columns.is_empty() {
            return Err(ModelError::feature("dnn_feature_columns is null!"));
        }

        let mut tables = HashMap::new();
        for column in &dnn_columns {
            if index.range(column.name())?.len() != column.width() {
                return Err(ModelError::feature(format!(
                    "feature {} does not match the schema",
                    column.name()
                )));
            }
            if let Some(sparse) = column.sparse() {
                let table = EmbeddingTable::new(
                    sparse.vocabulary_size,
                    sparse.embedding_dim,
                    Initializer::normal(init_std),
                    rng,
                )
                .with_regularizer(Regularizer::l2(l2_reg_embedding));
                tables.insert(sparse.name.clone(), table);
            }
        }

        let input_dim = crate::feature::compute_input_dim(&dnn_columns);
        Ok(Self {
            columns: dnn_columns,
            index,
            tables,
            input_dim,
        })
    }

    /// Columns feeding the DNN, in order.
    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    /// Column layout of `X`.
    pub fn feature_index(&self) -> &FeatureIndex {
        &self.index
    }

    /// Width of [`combined_dnn_input`].
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Number of sparse fields feeding the DNN.
    pub fn num_fields(&self) -> usize {
        self.columns.iter().filter(|c| c.sparse().is_some()).count()
    }

    /// Common embedding size of the DNN sparse features.
    pub fn embedding_dim(&self) -> ModelResult<usize> {
        uniform_embedding_dim(&self.columns).ok_or_else(|| {
            ModelError::feature("sparse features must share one embedding dim")
        })
    }

    /// Returns the table of sparse feature `name`.
    pub fn table(&self, name: &str) -> Option<&EmbeddingTable> {
        self.tables.get(name)
    }

    fn check_input(&self, x: &Tensor) -> ModelResult<usize> {
        if x.ndim() != 2 || x.shape()[1] != self.index.total_columns() {
            return Err(ModelError::feature(format!(
                "expected input of shape [batch, {}], got {:?}",
                self.index.total_columns(),
                x.shape()
            )));
        }
        Ok(x.shape()[0])
    }

    /// Splits `X` into sparse embeddings (`[B, 1, D]` each) and dense values
    /// (`[B, dimension]` each), both in column order.
    ///
    /// Ids are truncated toward zero; negative or out-of-vocabulary ids are
    /// errors.
    pub fn input_from_feature_columns(
        &self,
        x: &Tensor,
    ) -> ModelResult<(Vec<Tensor>, Vec<Tensor>)> {
        let batch = self.check_input(x)?;
        let mut sparse = Vec::new();
        let mut dense = Vec::new();

        for column in &self.columns {
            let range = self.index.range(column.name())?;
            let slice = x.narrow(1, range.start, range.len());
            match column {
                FeatureColumn::Dense(_) => dense.push(slice),
                FeatureColumn::Sparse(feat) => {
                    let table = self.lookup_table(&feat.name)?;
                    let emb = table.lookup(&ids_from_tensor(&slice)?)?;
                    sparse.push(emb.reshape(&[batch, 1, feat.embedding_dim]));
                }
                FeatureColumn::VarLenSparse(feat) => {
                    let table = self.lookup_table(&feat.sparse.name)?;
                    let ids = ids_from_tensor(&slice)?;
                    let lists: Vec<Vec<usize>> =
                        ids.chunks(feat.maxlen).map(<[usize]>::to_vec).collect();
                    let pooled = table.lookup_pooled(&lists, feat.combiner)?;
                    sparse.push(pooled.reshape(&[batch, 1, feat.sparse.embedding_dim]));
                }
            }
        }
        Ok((sparse, dense))
    }

    fn lookup_table(&self, name: &str) -> ModelResult<&EmbeddingTable> {
        self.tables
            .get(name)
            .ok_or_else(|| ModelError::feature(format!("no embedding table for {}", name)))
    }

    /// Reads the domain id of every sample from `domain_column`.
    pub fn domain_ids(&self, x: &Tensor, domain_column: &str) -> ModelResult<Vec<usize>> {
        self.check_input(x)?;
        let range = self.index.range(domain_column)?;
        Ok(ids_from_tensor(&x.narrow(1, range.start, 1))?)
    }

    /// L2 penalty of every embedding table.
    pub fn regularization_loss(&self) -> f32 {
        self.tables.values().map(|t| t.regularization_loss()).sum()
    }

    /// Number of embedding parameters.
    pub fn num_parameters(&self) -> usize {
        self.tables.values().map(|t| t.num_parameters()).sum()
    }
}

/// Flattens the sparse embeddings and concatenates them with the dense values,
/// giving `[B, input_dim]`.
///
/// # Errors
///
/// Fails when there is nothing to combine.
pub fn combined_dnn_input(sparse: &[Tensor], dense: &[Tensor]) -> ModelResult<Tensor> {
    let flat: Vec<Tensor> = sparse.iter().map(Tensor::flatten_from_1).collect();
    let parts: Vec<&Tensor> = flat.iter().chain(dense.iter()).collect();
    match parts.len() {
        0 => Err(ModelError::feature("dnn_feature_columns is null!")),
        1 => Ok(parts[0].clone()),
        _ => Ok(Tensor::concat(&parts, 1)),
    }
}
