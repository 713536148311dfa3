//! HNSW vector index for semantic retrieval.
//!
//! In-memory only. The serving process rebuilds it at startup from the
//! embedding vectors persisted in the decision store, so there is no index
//! file to version or migrate.

use std::sync::RwLock;

use hnsw_rs::prelude::*;
use thiserror::Error;

use crate::decision::DecisionId;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Insert failed: {0}")]
    Insert(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Nearest-neighbour hit.
#[derive(Debug, Clone)]
pub struct VectorSearchResult {
    pub id: DecisionId,
    /// Cosine similarity, 1.0 for identical direction
    pub score: f32,
}

/// Cosine-distance HNSW wrapper over decision embeddings.
pub struct VectorIndex {
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    dimension: usize,
    count: RwLock<u64>,
}

impl VectorIndex {
    /// `max_elements` sizes the internal layers; inserts beyond it degrade
    /// recall rather than fail.
    pub fn new(dimension: usize, max_elements: usize, ef_construction: usize, m: usize) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(m, max_elements, 16, ef_construction, DistCosine);
        Self {
            index: RwLock::new(index),
            dimension,
            count: RwLock::new(0),
        }
    }

    pub fn insert(&self, id: DecisionId, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if id < 0 {
            return Err(VectorIndexError::Insert(format!("negative id {id}")));
        }

        let data = vector.to_vec();
        let index = self.index.write().unwrap();
        index.insert((&data, id as usize));

        let mut count = self.count.write().unwrap();
        *count += 1;
        Ok(())
    }

    pub fn insert_batch(&self, items: &[(DecisionId, Vec<f32>)]) -> Result<(), VectorIndexError> {
        for (id, vector) in items {
            self.insert(*id, vector)?;
        }
        Ok(())
    }

    /// K nearest neighbours by cosine similarity, best first.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<VectorSearchResult>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let index = self.index.read().unwrap();
        let neighbours = index.search(query, k, ef_search);

        Ok(neighbours
            .into_iter()
            .map(|n| VectorSearchResult {
                id: n.d_id as DecisionId,
                score: 1.0 - n.distance,
            })
            .collect())
    }

    pub fn len(&self) -> u64 {
        *self.count.read().unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
