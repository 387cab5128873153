//! HNSW vector index wrapper
//!
//! Thin layer over `hnsw_rs` with the engine's fixed profile: cosine metric
//! over L2-normalised vectors, parallel insertion, and similarity expressed
//! as `1 - distance`. The graph lives only in memory; it is rebuilt from the
//! persisted vector matrices on load.

use hnsw_rs::hnsw::Hnsw;
use hnsw_rs::prelude::DistCosine;
use serde::{Deserialize, Serialize};

/// Construction and search parameters persisted beside the artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnParams {
    /// Max connections per node
    pub m: usize,
    /// Construction beam width
    pub ef_construction: usize,
    /// Search beam width
    pub ef_search: usize,
    /// Number of vectors at construction time
    pub count: usize,
    pub dimensions: usize,
}

impl AnnParams {
    #[must_use]
    pub const fn for_profile(count: usize, dimensions: usize) -> Self {
        Self {
            m: 32,
            ef_construction: 200,
            ef_search: 64,
            count,
            dimensions,
        }
    }
}

/// In-memory approximate-nearest-neighbour structure for one artifact segment
pub struct VectorIndex {
    hnsw: Hnsw<'static, f32, DistCosine>,
    len: usize,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex").field("len", &self.len).finish()
    }
}

impl VectorIndex {
    /// Build an index over the given vectors with parallel insertion
    #[must_use]
    pub fn build(vectors: &[Vec<f32>], params: &AnnParams) -> Self {
        let max_elements = vectors.len().max(1_000);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nb_layers = 16.min((max_elements as f32).ln() as usize).max(1);

        let hnsw = Hnsw::new(
            params.m,
            max_elements,
            nb_layers,
            params.ef_construction,
            DistCosine,
        );

        if !vectors.is_empty() {
            let refs: Vec<(&Vec<f32>, usize)> = vectors.iter().enumerate().map(|(i, v)| (v, i)).collect();
            hnsw.parallel_insert(&refs);
        }

        Self {
            hnsw,
            len: vectors.len(),
        }
    }

    /// Append vectors whose row ids start at `start`
    ///
    /// `parallel_insert` takes `&self`; the graph grows in place.
    pub fn append(&mut self, vectors: &[Vec<f32>], start: usize) {
        if vectors.is_empty() {
            return;
        }
        let refs: Vec<(&Vec<f32>, usize)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (v, start + i))
            .collect();
        self.hnsw.parallel_insert(&refs);
        self.len += vectors.len();
    }

    /// K nearest rows by cosine similarity, best first
    ///
    /// Returns `(row, similarity)` pairs; similarity is `1 - distance`.
    #[must_use]
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Vec<(usize, f32)> {
        if self.len == 0 {
            return Vec::new();
        }
        let mut hits: Vec<(usize, f32)> = self
            .hnsw
            .search(query, k, ef_search)
            .into_iter()
            .map(|n| (n.d_id, 1.0 - n.distance))
            .collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: Vec<f32>) -> Vec<f32> {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.into_iter().map(|x| x / norm).collect()
    }

    #[test]
    fn test_build_and_search() {
        let vectors = vec![
            unit(vec![1.0, 0.0, 0.0]),
            unit(vec![0.0, 1.0, 0.0]),
            unit(vec![0.0, 0.0, 1.0]),
        ];
        let params = AnnParams::for_profile(vectors.len(), 3);
        let index = VectorIndex::build(&vectors, &params);

        let hits = index.search(&unit(vec![0.9, 0.1, 0.0]), 2, params.ef_search);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1 > 0.9);
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let params = AnnParams::for_profile(0, 3);
        let index = VectorIndex::build(&[], &params);
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0, 0.0], 5, params.ef_search).is_empty());
    }

    #[test]
    fn test_append_extends_row_space() {
        let first = vec![unit(vec![1.0, 0.0, 0.0])];
        let params = AnnParams::for_profile(first.len(), 3);
        let mut index = VectorIndex::build(&first, &params);

        index.append(&[unit(vec![0.0, 1.0, 0.0])], 1);
        assert_eq!(index.len(), 2);

        let hits = index.search(&unit(vec![0.0, 1.0, 0.0]), 2, params.ef_search);
        assert_eq!(hits[0].0, 1);
    }
}
