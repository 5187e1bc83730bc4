//! In-memory vector index with cosine-similarity ranking.
//!
//! Holds one embedding per profile and answers top-k queries with a linear
//! scan. Profile counts are small (tens to low thousands), so no ANN index;
//! the interface (vector and k in, ranked ids out) leaves room to swap one in.

use std::collections::HashMap;

use crate::eid::Eid;
use crate::semantic::EMBEDDING_DIM;

/// An entry in the vector index.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// Hash of the search text that was embedded, for staleness checks
    pub text_hash: u64,
    /// The embedding vector, unit-normalized
    pub embedding: Vec<f32>,
}

/// Ranked result from the index.
#[derive(Debug, Clone)]
pub struct Ranked {
    pub id: Eid,
    /// Cosine similarity against the query
    pub score: f32,
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Malformed vector: expected {expected} components, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}

/// Vector index over profile embeddings.
#[derive(Default)]
pub struct VectorIndex {
    entries: HashMap<Eid, VectorEntry>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace a profile's embedding.
    ///
    /// Rejects wrong-width and zero-norm vectors outright; a malformed vector
    /// must never be partially indexed.
    pub fn insert(&mut self, id: Eid, text_hash: u64, embedding: Vec<f32>) -> Result<(), IndexError> {
        if embedding.len() != EMBEDDING_DIM {
            return Err(IndexError::DimensionMismatch {
                expected: EMBEDDING_DIM,
                got: embedding.len(),
            });
        }

        if l2_norm(&embedding) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        self.entries.insert(
            id,
            VectorEntry {
                text_hash,
                embedding,
            },
        );

        Ok(())
    }

    pub fn get(&self, id: &Eid) -> Option<&VectorEntry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Eid, &VectorEntry)> {
        self.entries.iter()
    }

    /// Rank all indexed profiles against a query vector, best first.
    ///
    /// Scores are cosine similarities. Equal scores break toward the newer
    /// profile (ULID ids are time-ordered), keeping repeated identical
    /// queries deterministic. Returns at most `k` results, fewer when fewer
    /// profiles have embeddings.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Ranked>, IndexError> {
        if query.len() != EMBEDDING_DIM {
            return Err(IndexError::DimensionMismatch {
                expected: EMBEDDING_DIM,
                got: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut results: Vec<Ranked> = self
            .entries
            .iter()
            .map(|(id, entry)| Ranked {
                id: id.clone(),
                score: cosine_similarity(query, &entry.embedding, query_norm),
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.id.cmp(&a.id))
        });

        results.truncate(k);

        Ok(results)
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity with a precomputed query norm. Stored vectors are
/// normalized already, but dividing by both norms keeps scores honest if a
/// slightly-off vector ever slips in.
fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot / (query_norm * target_norm)
}
