//! Example applications for the MMoE model family.
//!
//! - `forward_demo` - builds a model over a synthetic schema and runs one batch
//!
//! # Running Examples
//!
//! ```bash
//! cargo run -p mtmd-examples --bin forward_demo -- --model MMOE_MT_ATT --batch-size 64
//!
//! # with a JSON config and self-attention over the sparse fields
//! cargo run -p mtmd-examples --bin forward_demo -- --config model.json --usetrans
//! ```
//!
//! The helpers below generate schemas and batches for the demos.

use std::collections::BTreeMap;

use mtmd_layers::{ids_from_tensor, PoolingMode, Tensor};
use mtmd_models::{
    build_feature_index, DenseFeat, FeatureColumn, ModelResult, SparseFeat, VarLenSparseFeat,
};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Default name of the domain column.
pub const DOMAIN_COLUMN: &str = "domain";

/// A small e-commerce style schema: user, item, domain, click history and
/// two dense features.
pub fn synthetic_schema(
    domain_column: &str,
    num_domains: usize,
    embedding_dim: usize,
) -> Vec<FeatureColumn> {
    vec![
        SparseFeat::new("user_id", 1000, embedding_dim).into(),
        SparseFeat::new("item_id", 5000, embedding_dim).into(),
        SparseFeat::new(domain_column, num_domains + 1, embedding_dim).into(),
        VarLenSparseFeat::new(
            SparseFeat::new("clicked_items", 5000, embedding_dim),
            5,
            PoolingMode::Mean,
        )
        .into(),
        DenseFeat::new("price", 1).into(),
        DenseFeat::new("context", 2).into(),
    ]
}

/// Random `[batch_size, total_columns]` input for any schema.
///
/// The domain column gets ids in `1..=num_domains`; other sparse columns draw
/// uniformly from their vocabulary; var-len columns get a random number of
/// non-padding ids followed by padding; dense values are standard normal.
pub fn synthetic_batch<R: Rng + ?Sized>(
    columns: &[FeatureColumn],
    domain_column: &str,
    num_domains: usize,
    batch_size: usize,
    rng: &mut R,
) -> Tensor {
    let width: usize = columns.iter().map(FeatureColumn::width).sum();
    let mut data = Vec::with_capacity(batch_size * width);
    for _ in 0..batch_size {
        for column in columns {
            match column {
                FeatureColumn::Sparse(f) if f.name == domain_column => {
                    data.push(rng.gen_range(1..=num_domains) as f32);
                }
                FeatureColumn::Sparse(f) => {
                    data.push(rng.gen_range(0..f.vocabulary_size) as f32);
                }
                FeatureColumn::VarLenSparse(f) => {
                    let len = rng.gen_range(0..=f.maxlen);
                    for i in 0..f.maxlen {
                        let id = if i < len && f.sparse.vocabulary_size > 1 {
                            rng.gen_range(1..f.sparse.vocabulary_size)
                        } else {
                            0
                        };
                        data.push(id as f32);
                    }
                }
                FeatureColumn::Dense(f) => {
                    for _ in 0..f.dimension {
                        data.push(StandardNormal.sample(rng));
                    }
                }
            }
        }
    }
    Tensor::from_data(&[batch_size, width], data)
}

/// Domain id of every row of `x`, validated the way the models read them.
pub fn batch_domain_ids(
    columns: &[FeatureColumn],
    domain_column: &str,
    x: &Tensor,
) -> ModelResult<Vec<usize>> {
    let range = build_feature_index(columns)?.range(domain_column)?;
    Ok(ids_from_tensor(&x.narrow(1, range.start, 1))?)
}

/// Mean prediction of every task, grouped by domain id.
pub fn per_domain_means(predictions: &Tensor, domain_ids: &[usize]) -> BTreeMap<usize, Vec<f32>> {
    let num_tasks = predictions.shape().get(1).copied().unwrap_or(0);
    let mut sums: BTreeMap<usize, (Vec<f32>, usize)> = BTreeMap::new();
    for (row, &domain) in predictions.data().chunks(num_tasks.max(1)).zip(domain_ids) {
        let entry = sums
            .entry(domain)
            .or_insert_with(|| (vec![0.0; num_tasks], 0));
        for (acc, &p) in entry.0.iter_mut().zip(row) {
            *acc += p;
        }
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(domain, (total, count))| {
            (domain, total.into_iter().map(|t| t / count as f32).collect())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_synthetic_batch_layout() {
        let columns = synthetic_schema(DOMAIN_COLUMN, 3, 8);
        let index = build_feature_index(&columns).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let x = synthetic_batch(&columns, DOMAIN_COLUMN, 3, 16, &mut rng);
        assert_eq!(x.shape(), &[16, index.total_columns()]);

        let domain = index.get(DOMAIN_COLUMN).unwrap().start;
        for row in x.data().chunks(index.total_columns()) {
            assert!((1.0..=3.0).contains(&row[domain]));
            let hist = &row[index.get("clicked_items").unwrap()];
            // padding only trails real ids
            let first_pad = hist.iter().position(|&id| id == 0.0).unwrap_or(hist.len());
            assert!(hist[first_pad..].iter().all(|&id| id == 0.0));
        }
    }

    #[test]
    fn test_batch_domain_ids() {
        let columns = synthetic_schema(DOMAIN_COLUMN, 3, 4);
        let mut rng = StdRng::seed_from_u64(3);
        let mut x = synthetic_batch(&columns, DOMAIN_COLUMN, 3, 5, &mut rng);
        let ids = batch_domain_ids(&columns, DOMAIN_COLUMN, &x).unwrap();
        assert_eq!(ids.len(), 5);
        assert!(ids.iter().all(|id| (1..=3).contains(id)));

        let domain = build_feature_index(&columns).unwrap().range(DOMAIN_COLUMN).unwrap().start;
        x.data_mut()[domain] = -2.0;
        assert!(batch_domain_ids(&columns, DOMAIN_COLUMN, &x).is_err());
        assert!(batch_domain_ids(&columns, "site", &x).is_err());
    }

    #[test]
    fn test_per_domain_means() {
        let predictions = Tensor::from_data(&[3, 2], vec![0.2, 0.4, 0.6, 0.8, 1.0, 0.0]);
        let means = per_domain_means(&predictions, &[1, 1, 2]);
        assert_eq!(means.len(), 2);
        assert!((means[&1][0] - 0.4).abs() < 1e-6);
        assert!((means[&1][1] - 0.6).abs() < 1e-6);
        assert_eq!(means[&2], vec![1.0, 0.0]);
    }
}
