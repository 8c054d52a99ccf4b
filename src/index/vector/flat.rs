// Flat index: the brute-force exact oracle every approximate index is
// measured against. No training, no graph, no quantization — the whole
// point is that this one is *always* right.

use std::collections::HashMap;

use crate::index::vector::{distance, Metric, VectorFilter};

pub struct FlatIndex {
    dim: usize,
    metric: Metric,
    vectors: HashMap<usize, Vec<f32>>,
}

impl FlatIndex {
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self { dim, metric, vectors: HashMap::new() }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn build(&mut self, vectors: &[(usize, Vec<f32>)]) {
        self.vectors.clear();
        for (id, v) in vectors {
            self.vectors.insert(*id, v.clone());
        }
    }

    pub fn insert(&mut self, id: usize, vector: Vec<f32>) {
        self.vectors.insert(id, vector);
    }

    pub fn delete(&mut self, id: usize) {
        self.vectors.remove(&id);
    }

    pub fn search(&self, query: &[f32], k: usize, filter: Option<&VectorFilter>) -> (Vec<usize>, Vec<f32>) {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .filter(|(id, _)| filter.is_none_or(|f| f.allows(**id)))
            .map(|(id, v)| (*id, distance(self.metric, query, v)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored.into_iter().unzip()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_search_returns_nearest_first() {
        let mut idx = FlatIndex::new(2, Metric::L2);
        idx.build(&[(0, vec![0.0, 0.0]), (1, vec![1.0, 1.0]), (2, vec![10.0, 10.0])]);
        let (ids, _) = idx.search(&[0.1, 0.1], 2, None);
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn filter_restricts_candidates() {
        let mut idx = FlatIndex::new(2, Metric::L2);
        idx.build(&[(0, vec![0.0, 0.0]), (1, vec![1.0, 1.0])]);
        let filter = VectorFilter::from_ids(vec![1]);
        let (ids, _) = idx.search(&[0.0, 0.0], 5, Some(&filter));
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn delete_removes_candidate_from_results() {
        let mut idx = FlatIndex::new(2, Metric::L2);
        idx.build(&[(0, vec![0.0, 0.0]), (1, vec![1.0, 1.0])]);
        idx.delete(0);
        let (ids, _) = idx.search(&[0.0, 0.0], 5, None);
        assert_eq!(ids, vec![1]);
    }
}
