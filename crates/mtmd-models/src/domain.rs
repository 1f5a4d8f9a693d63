//! Domain id embedding.

use mtmd_layers::{EmbeddingTable, Initializer, Layer, Tensor};
use rand::Rng;

use crate::error::{ModelError, ModelResult};

/// `num_domains + 1` rows of width `embedding_size`, drawn from N(0, 1).
///
/// Domain ids run from `0` to `num_domains` inclusive. The table is not
/// regularized.
#[derive(Debug, Clone)]
pub struct DomainEmbedding {
    table: EmbeddingTable,
    num_domains: usize,
}

impl DomainEmbedding {
    pub fn new<R: Rng + ?Sized>(
        num_domains: usize,
        embedding_size: usize,
        rng: &mut R,
    ) -> ModelResult<Self> {
        if num_domains == 0 || embedding_size == 0 {
            return Err(ModelError::config(format!(
                "domain embedding needs positive sizes, got {} x {}",
                num_domains, embedding_size
            )));
        }
        let table = EmbeddingTable::new(
            num_domains + 1,
            embedding_size,
            Initializer::Normal {
                mean: 0.0,
                std: 1.0,
            },
            rng,
        );
        Ok(Self { table, num_domains })
    }

    pub fn num_domains(&self) -> usize {
        self.num_domains
    }

    pub fn embedding_size(&self) -> usize {
        self.table.dim()
    }

    pub fn table(&self) -> &EmbeddingTable {
        &self.table
    }

    /// Embeds one domain id per sample, giving `[ids.len(), embedding_size]`.
    pub fn embed(&self, domain_ids: &[usize]) -> ModelResult<Tensor> {
        Ok(self.table.lookup(domain_ids)?)
    }

    pub fn num_parameters(&self) -> usize {
        self.table.num_parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_domain_embedding_lookup() {
        let mut rng = StdRng::seed_from_u64(1024);
        let domains = DomainEmbedding::new(3, 8, &mut rng).unwrap();
        assert_eq!(domains.num_parameters(), 4 * 8);

        let emb = domains.embed(&[0, 3, 3]).unwrap();
        assert_eq!(emb.shape(), &[3, 8]);
        assert_eq!(&emb.data()[8..16], &emb.data()[16..24]);
        assert_eq!(&emb.data()[8..16], domains.table().row(3).unwrap());
    }

    #[test]
    fn test_domain_out_of_range() {
        let mut rng = StdRng::seed_from_u64(1024);
        let domains = DomainEmbedding::new(3, 8, &mut rng).unwrap();
        assert!(matches!(domains.embed(&[4]), Err(ModelError::Layer(_))));
        assert!(DomainEmbedding::new(0, 8, &mut rng).is_err());
    }
}
