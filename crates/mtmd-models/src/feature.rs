//! Feature column definitions.
//!
//! A model's input is a flat `[batch, total_columns]` matrix `X`. Feature
//! columns describe how that matrix is laid out:
//!
//! - [`SparseFeat`]: one column holding a categorical id (stored as `f32`)
//! - [`DenseFeat`]: `dimension` columns of continuous values
//! - [`VarLenSparseFeat`]: `maxlen` id columns, padded with id 0, pooled with a combiner
//!
//! Columns are laid out in declaration order; [`build_feature_index`]
//! computes the `[start, end)` range of every feature.

use std::collections::HashMap;
use std::ops::Range;

use mtmd_layers::PoolingMode;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// A categorical feature with its own embedding table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseFeat {
    /// Feature name, unique across the schema.
    pub name: String,
    /// Number of distinct ids; valid ids are `0..vocabulary_size`.
    pub vocabulary_size: usize,
    /// Width of the embedding vectors.
    pub embedding_dim: usize,
}

impl SparseFeat {
    /// Creates a sparse feature.
    ///
    /// # Examples
    ///
    /// ```
    /// use mtmd_models::feature::SparseFeat;
    ///
    /// let feat = SparseFeat::new("user_id", 1000, 8);
    /// assert_eq!(feat.embedding_dim, 8);
    /// ```
    pub fn new(name: impl Into<String>, vocabulary_size: usize, embedding_dim: usize) -> Self {
        Self {
            name: name.into(),
            vocabulary_size,
            embedding_dim,
        }
    }
}

/// A continuous feature occupying `dimension` columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseFeat {
    /// Feature name, unique across the schema.
    pub name: String,
    /// Number of columns.
    pub dimension: usize,
}

impl DenseFeat {
    /// Creates a dense feature.
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
        }
    }
}

/// A variable-length list of categorical ids, padded to `maxlen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarLenSparseFeat {
    /// The id vocabulary and embedding.
    pub sparse: SparseFeat,
    /// Number of id columns.
    pub maxlen: usize,
    /// How the non-padding embeddings are reduced.
    #[serde(default)]
    pub combiner: PoolingMode,
}

impl VarLenSparseFeat {
    /// Creates a variable-length sparse feature.
    pub fn new(sparse: SparseFeat, maxlen: usize, combiner: PoolingMode) -> Self {
        Self {
            sparse,
            maxlen,
            combiner,
        }
    }
}

/// Any feature column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureColumn {
    /// Single categorical id.
    Sparse(SparseFeat),
    /// Continuous values.
    Dense(DenseFeat),
    /// Padded list of categorical ids.
    VarLenSparse(VarLenSparseFeat),
}

impl FeatureColumn {
    /// Returns the feature name.
    pub fn name(&self) -> &str {
        match self {
            FeatureColumn::Sparse(f) => &f.name,
            FeatureColumn::Dense(f) => &f.name,
            FeatureColumn::VarLenSparse(f) => &f.sparse.name,
        }
    }

    /// Number of columns the feature occupies in `X`.
    pub fn width(&self) -> usize {
        match self {
            FeatureColumn::Sparse(_) => 1,
            FeatureColumn::Dense(f) => f.dimension,
            FeatureColumn::VarLenSparse(f) => f.maxlen,
        }
    }

    /// Returns the id vocabulary of (var-len) sparse features.
    pub fn sparse(&self) -> Option<&SparseFeat> {
        match self {
            FeatureColumn::Sparse(f) => Some(f),
            FeatureColumn::VarLenSparse(f) => Some(&f.sparse),
            FeatureColumn::Dense(_) => None,
        }
    }

    /// Width this feature contributes to the DNN input.
    pub fn input_dim(&self) -> usize {
        match self {
            FeatureColumn::Dense(f) => f.dimension,
            other => other.sparse().map_or(0, |s| s.embedding_dim),
        }
    }

    fn validate(&self) -> ModelResult<()> {
        if self.name().is_empty() {
            return Err(ModelError::feature("feature name must not be empty"));
        }
        if self.width() == 0 {
            return Err(ModelError::feature(format!(
                "feature {} occupies no columns",
                self.name()
            )));
        }
        if let Some(s) = self.sparse() {
            if s.vocabulary_size == 0 || s.embedding_dim == 0 {
                return Err(ModelError::feature(format!(
                    "sparse feature {} needs a positive vocabulary size and embedding dim",
                    s.name
                )));
            }
        }
        Ok(())
    }
}

impl From<SparseFeat> for FeatureColumn {
    fn from(f: SparseFeat) -> Self {
        FeatureColumn::Sparse(f)
    }
}

impl From<DenseFeat> for FeatureColumn {
    fn from(f: DenseFeat) -> Self {
        FeatureColumn::Dense(f)
    }
}

impl From<VarLenSparseFeat> for FeatureColumn {
    fn from(f: VarLenSparseFeat) -> Self {
        FeatureColumn::VarLenSparse(f)
    }
}

/// Column ranges of every feature in the flat input matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureIndex {
    ranges: HashMap<String, Range<usize>>,
    total_columns: usize,
}

impl FeatureIndex {
    /// Returns the `[start, end)` column range of `name`.
    pub fn get(&self, name: &str) -> Option<Range<usize>> {
        self.ranges.get(name).cloned()
    }

    /// Returns the `[start, end)` column range of `name`, or a feature error.
    pub fn range(&self, name: &str) -> ModelResult<Range<usize>> {
        self.get(name)
            .ok_or_else(|| ModelError::feature(format!("feature {} is not in the schema", name)))
    }

    /// Returns whether `name` is indexed.
    pub fn contains(&self, name: &str) -> bool {
        self.ranges.contains_key(name)
    }

    /// Width of the input matrix.
    pub fn total_columns(&self) -> usize {
        self.total_columns
    }

    /// Number of indexed features.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns whether no feature is indexed.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Lays the columns out in order and records each feature's range.
///
/// # Errors
///
/// Duplicate names and zero-width or zero-vocabulary features are
/// [`ModelError::Feature`] errors.
///
/// # Examples
///
/// ```
/// use mtmd_models::feature::{build_feature_index, DenseFeat, FeatureColumn, SparseFeat};
///
/// let columns: Vec<FeatureColumn> = vec![
///     SparseFeat::new("user_id", 100, 4).into(),
///     DenseFeat::new("price", 2).into(),
/// ];
/// let index = build_feature_index(&columns).unwrap();
/// assert_eq!(index.get("price"), Some(1..3));
/// assert_eq!(index.total_columns(), 3);
/// ```
pub fn build_feature_index(columns: &[FeatureColumn]) -> ModelResult<FeatureIndex> {
    let mut ranges = HashMap::with_capacity(columns.len());
    let mut start = 0;
    for column in columns {
        column.validate()?;
        let end = start + column.width();
        if ranges.insert(column.name().to_string(), start..end).is_some() {
            return Err(ModelError::feature(format!(
                "duplicate feature name {}",
                column.name()
            )));
        }
        start = end;
    }
    Ok(FeatureIndex {
        ranges,
        total_columns: start,
    })
}

/// Width of the combined DNN input: embedding dims of (var-len) sparse
/// features plus dense dimensions.
pub fn compute_input_dim(columns: &[FeatureColumn]) -> usize {
    columns.iter().map(FeatureColumn::input_dim).sum()
}

/// Returns the columns whose names are not in `excluded`.
pub fn filter_feature_columns(columns: &[FeatureColumn], excluded: &[&str]) -> Vec<FeatureColumn> {
    columns
        .iter()
        .filter(|c| !excluded.contains(&c.name()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<FeatureColumn> {
        vec![
            SparseFeat::new("user_id", 100, 4).into(),
            SparseFeat::new("domain", 4, 4).into(),
            VarLenSparseFeat::new(SparseFeat::new("hist", 50, 4), 3, PoolingMode::Mean).into(),
            DenseFeat::new("price", 2).into(),
        ]
    }

    #[test]
    fn test_build_feature_index() {
        let index = build_feature_index(&schema()).unwrap();
        assert_eq!(index.get("user_id"), Some(0..1));
        assert_eq!(index.get("domain"), Some(1..2));
        assert_eq!(index.get("hist"), Some(2..5));
        assert_eq!(index.get("price"), Some(5..7));
        assert_eq!(index.total_columns(), 7);
        assert_eq!(index.len(), 4);
        assert!(index.range("missing").is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut columns = schema();
        columns.push(DenseFeat::new("price", 1).into());
        assert!(matches!(
            build_feature_index(&columns),
            Err(ModelError::Feature { .. })
        ));
    }

    #[test]
    fn test_degenerate_features_rejected() {
        assert!(build_feature_index(&[DenseFeat::new("x", 0).into()]).is_err());
        assert!(build_feature_index(&[SparseFeat::new("x", 0, 4).into()]).is_err());
        assert!(build_feature_index(&[SparseFeat::new("", 3, 4).into()]).is_err());
    }

    #[test]
    fn test_compute_input_dim() {
        assert_eq!(compute_input_dim(&schema()), 4 + 4 + 4 + 2);
    }

    #[test]
    fn test_filter_feature_columns() {
        let filtered = filter_feature_columns(&schema(), &["domain"]);
        assert_eq!(filtered.len(), 3);
        assert!(filtered.iter().all(|c| c.name() != "domain"));
        assert_eq!(compute_input_dim(&filtered), 10);
    }

    #[test]
    fn test_feature_column_serde() {
        let json = r#"[
            {"type": "sparse", "name": "user_id", "vocabulary_size": 10, "embedding_dim": 4},
            {"type": "dense", "name": "price", "dimension": 1},
            {"type": "var_len_sparse", "sparse": {"name": "hist", "vocabulary_size": 5, "embedding_dim": 4}, "maxlen": 2}
        ]"#;
        let columns: Vec<FeatureColumn> = serde_json::from_str(json).unwrap();
        assert_eq!(columns.len(), 3);
        match &columns[2] {
            FeatureColumn::VarLenSparse(f) => assert_eq!(f.combiner, PoolingMode::Mean),
            other => panic!("unexpected column {:?}", other),
        }
    }
}
