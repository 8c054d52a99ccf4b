// AISAQ: a Vamana proximity graph (DiskANN's single-layer greedy-search
// graph, built by robust pruning) over vectors compressed with a per-
// dimension adaptive int8 scalar quantizer. Raw vectors are never kept —
// every distance, both during construction and search, is computed on
// the decoded quantized approximation, since the appeal of AISAQ is that
// graph + codes fit in far less memory than graph + raw vectors.

use std::collections::{HashMap, HashSet};

use crate::index::vector::quantization::ScalarQuantizer;
use crate::index::vector::{distance, Metric, VectorFilter};

const ALPHA: f32 = 1.2;
const DEFAULT_SEARCH_LIST_SIZE: usize = 64;
const CONSTRUCTION_PASSES: usize = 2;

pub struct AisaqIndex {
    dim: usize,
    metric: Metric,
    max_degree: usize,
    search_list_size: usize,
    quantizer: Option<ScalarQuantizer>,
    codes: HashMap<usize, Vec<i8>>,
    adjacency: HashMap<usize, Vec<usize>>,
    medoid: Option<usize>,
}

impl AisaqIndex {
    pub fn new(dim: usize, metric: Metric, max_degree: usize) -> Self {
        Self {
            dim,
            metric,
            max_degree: max_degree.max(2),
            search_list_size: DEFAULT_SEARCH_LIST_SIZE,
            quantizer: None,
            codes: HashMap::new(),
            adjacency: HashMap::new(),
            medoid: None,
        }
    }

    pub fn with_search_list_size(mut self, search_list_size: usize) -> Self {
        self.search_list_size = search_list_size.max(self.max_degree);
        self
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn approx(&self, id: usize) -> Vec<f32> {
        let codes = &self.codes[&id];
        self.quantizer.as_ref().expect("quantizer trained before use").decode(codes)
    }

    fn dist_between(&self, a: usize, b: usize) -> f32 {
        distance(self.metric, &self.approx(a), &self.approx(b))
    }

    fn dist_to_query(&self, query: &[f32], id: usize) -> f32 {
        distance(self.metric, query, &self.approx(id))
    }

    pub fn build(&mut self, vectors: &[(usize, Vec<f32>)]) {
        self.codes.clear();
        self.adjacency.clear();
        self.medoid = None;
        if vectors.is_empty() {
            self.quantizer = None;
            return;
        }

        let raw: Vec<Vec<f32>> = vectors.iter().map(|(_, v)| v.clone()).collect();
        let quantizer = ScalarQuantizer::train(&raw);
        for (id, v) in vectors {
            self.codes.insert(*id, quantizer.encode(v));
        }
        self.quantizer = Some(quantizer);

        let ids: Vec<usize> = vectors.iter().map(|(id, _)| *id).collect();
        self.medoid = Some(self.compute_medoid(&ids));

        // Seed a random-ish ring graph so every node starts with neighbors
        // before the robust-pruning passes refine them.
        for (i, &id) in ids.iter().enumerate() {
            let mut seed = Vec::new();
            for offset in 1..=self.max_degree.min(ids.len() - 1) {
                seed.push(ids[(i + offset) % ids.len()]);
            }
            self.adjacency.insert(id, seed);
        }

        for _ in 0..CONSTRUCTION_PASSES {
            for &id in &ids {
                let candidates = self.greedy_search_ids(id, self.search_list_size);
                let pruned = self.robust_prune(id, candidates);
                for &nb in &pruned {
                    let back = self.adjacency.entry(nb).or_default();
                    if !back.contains(&id) {
                        back.push(id);
                    }
                }
                self.adjacency.insert(id, pruned);
            }
            for &id in &ids {
                if self.adjacency[&id].len() > self.max_degree {
                    let over = self.adjacency[&id].clone();
                    let pruned = self.robust_prune(id, over);
                    self.adjacency.insert(id, pruned);
                }
            }
        }
    }

    fn compute_medoid(&self, ids: &[usize]) -> usize {
        let dim = self.dim;
        let mut mean = vec![0.0f32; dim];
        for &id in ids {
            let v = self.approx(id);
            for d in 0..dim {
                mean[d] += v[d];
            }
        }
        for m in mean.iter_mut() {
            *m /= ids.len() as f32;
        }
        *ids
            .iter()
            .min_by(|&&a, &&b| {
                distance(self.metric, &mean, &self.approx(a))
                    .partial_cmp(&distance(self.metric, &mean, &self.approx(b)))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap()
    }

    /// Greedy search seeded from an existing node's own vector, used during
    /// construction to find robust-pruning candidates for that node.
    fn greedy_search_ids(&self, start_from: usize, list_size: usize) -> Vec<usize> {
        let Some(medoid) = self.medoid else { return Vec::new() };
        let query = self.approx(start_from);
        self.greedy_search(&query, medoid, list_size, None)
            .into_iter()
            .filter(|&id| id != start_from)
            .collect()
    }

    fn greedy_search(&self, query: &[f32], start: usize, list_size: usize, filter: Option<&VectorFilter>) -> Vec<usize> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut candidates: Vec<(usize, f32)> = vec![(start, self.dist_to_query(query, start))];
        visited.insert(start);

        loop {
            candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            candidates.truncate(list_size);
            let Some(&(next, _)) = candidates.iter().find(|(id, _)| !visited.contains(id) || *id == start) else {
                break;
            };
            let Some(neighbors) = self.adjacency.get(&next) else { break };
            let mut progressed = false;
            for &nb in neighbors {
                if visited.insert(nb) {
                    progressed = true;
                    candidates.push((nb, self.dist_to_query(query, nb)));
                }
            }
            if !progressed {
                break;
            }
        }

        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates
            .into_iter()
            .filter(|(id, _)| filter.is_none_or(|f| f.allows(*id)))
            .map(|(id, _)| id)
            .take(list_size)
            .collect()
    }

    /// Keeps the closest candidate, discards anything an `ALPHA`-scaled
    /// distance from the kept candidate already dominates, repeats until
    /// `max_degree` neighbors are chosen or candidates run out.
    fn robust_prune(&self, node: usize, candidates: Vec<usize>) -> Vec<usize> {
        let mut remaining: Vec<usize> = candidates.into_iter().filter(|&c| c != node).collect();
        remaining.sort_by(|&a, &b| {
            self.dist_between(node, a).partial_cmp(&self.dist_between(node, b)).unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut result = Vec::new();
        while let Some(closest) = remaining.first().copied() {
            result.push(closest);
            if result.len() >= self.max_degree {
                break;
            }
            remaining.retain(|&c| c != closest && ALPHA * self.dist_between(closest, c) > self.dist_between(node, c));
        }
        result
    }

    pub fn insert(&mut self, id: usize, vector: Vec<f32>) {
        if self.quantizer.is_none() {
            self.quantizer = Some(ScalarQuantizer::train(&[vector.clone()]));
        }
        let codes = self.quantizer.as_ref().unwrap().encode(&vector);
        self.codes.insert(id, codes);
        if self.medoid.is_none() {
            self.medoid = Some(id);
        }
        let candidates = self.greedy_search_ids(id, self.search_list_size);
        let pruned = self.robust_prune(id, candidates);
        for &nb in &pruned {
            let back = self.adjacency.entry(nb).or_default();
            if !back.contains(&id) {
                back.push(id);
            }
        }
        self.adjacency.insert(id, pruned);
    }

    pub fn delete(&mut self, id: usize) {
        self.codes.remove(&id);
        self.adjacency.remove(&id);
        for neighbors in self.adjacency.values_mut() {
            neighbors.retain(|&n| n != id);
        }
        if self.medoid == Some(id) {
            self.medoid = self.adjacency.keys().next().copied();
        }
    }

    pub fn search(&self, query: &[f32], k: usize, filter: Option<&VectorFilter>) -> (Vec<usize>, Vec<f32>) {
        let Some(medoid) = self.medoid else {
            return (Vec::new(), Vec::new());
        };
        let ids = self.greedy_search(query, medoid, self.search_list_size.max(k), filter);
        let mut scored: Vec<(usize, f32)> = ids.into_iter().map(|id| (id, self.dist_to_query(query, id))).collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored.into_iter().unzip()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nearest_neighbor_via_graph_search() {
        let mut idx = AisaqIndex::new(2, Metric::L2, 6);
        let points: Vec<(usize, Vec<f32>)> = (0..40).map(|i| (i, vec![i as f32, 0.0])).collect();
        idx.build(&points);
        let (ids, _) = idx.search(&[20.3, 0.0], 3, None);
        assert!(ids.iter().any(|&id| (18..=22).contains(&id)));
    }

    #[test]
    fn delete_removes_node_from_graph() {
        let mut idx = AisaqIndex::new(2, Metric::L2, 6);
        let points: Vec<(usize, Vec<f32>)> = (0..20).map(|i| (i, vec![i as f32, 0.0])).collect();
        idx.build(&points);
        idx.delete(10);
        assert!(!idx.adjacency.contains_key(&10));
        let (ids, _) = idx.search(&[10.0, 0.0], 20, None);
        assert!(!ids.contains(&10));
    }
}
