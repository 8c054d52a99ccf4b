// IVF-RaBitQ: coarse k-means quantizer fans vectors out into `nlist`
// posting lists; within each list, vectors are binary-quantized by sign
// against a random projection (RaBitQ) and ranked by Hamming distance.
// `nprobe` lists are scanned per query.

use crate::index::vector::quantization::{kmeans, random_projection_matrix};
use crate::index::vector::{distance, Metric, VectorFilter};

fn project(matrix: &[Vec<f32>], v: &[f32]) -> Vec<f32> {
    matrix.iter().map(|row| row.iter().zip(v).map(|(a, b)| a * b).sum()).collect()
}

fn binarize(projected: &[f32]) -> Vec<u64> {
    let mut words = vec![0u64; (projected.len() + 63) / 64];
    for (i, &x) in projected.iter().enumerate() {
        if x >= 0.0 {
            words[i / 64] |= 1 << (i % 64);
        }
    }
    words
}

fn hamming(a: &[u64], b: &[u64]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

struct Posting {
    id: usize,
    code: Vec<u64>,
    raw: Vec<f32>,
}

pub struct IvfRabitqIndex {
    dim: usize,
    metric: Metric,
    nlist: usize,
    nprobe: usize,
    centroids: Vec<Vec<f32>>,
    projection: Vec<Vec<f32>>,
    lists: Vec<Vec<Posting>>,
}

impl IvfRabitqIndex {
    pub fn new(dim: usize, metric: Metric, nlist: usize, nprobe: usize) -> Self {
        Self {
            dim,
            metric,
            nlist: nlist.max(1),
            nprobe: nprobe.max(1),
            centroids: Vec::new(),
            projection: random_projection_matrix(dim, 0xC0FFEE),
            lists: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn nearest_list(&self, v: &[f32]) -> usize {
        self.centroids
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                distance(Metric::L2, v, a).partial_cmp(&distance(Metric::L2, v, b)).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    pub fn build(&mut self, vectors: &[(usize, Vec<f32>)]) {
        self.lists.clear();
        if vectors.is_empty() {
            self.centroids.clear();
            return;
        }
        let raw: Vec<Vec<f32>> = vectors.iter().map(|(_, v)| v.clone()).collect();
        self.centroids = kmeans(&raw, self.nlist, 0x5EED);
        self.lists = vec![Vec::new(); self.centroids.len()];
        for (id, v) in vectors {
            self.insert(*id, v.clone());
        }
    }

    pub fn insert(&mut self, id: usize, vector: Vec<f32>) {
        if self.centroids.is_empty() {
            self.centroids = vec![vector.clone()];
            self.lists = vec![Vec::new()];
        }
        let list_idx = self.nearest_list(&vector);
        let code = binarize(&project(&self.projection, &vector));
        self.lists[list_idx].push(Posting { id, code, raw: vector });
    }

    pub fn delete(&mut self, id: usize) {
        for list in self.lists.iter_mut() {
            list.retain(|p| p.id != id);
        }
    }

    pub fn search(&self, query: &[f32], k: usize, filter: Option<&VectorFilter>) -> (Vec<usize>, Vec<f32>) {
        if self.centroids.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let mut list_order: Vec<usize> = (0..self.centroids.len()).collect();
        list_order.sort_by(|&a, &b| {
            distance(Metric::L2, query, &self.centroids[a])
                .partial_cmp(&distance(Metric::L2, query, &self.centroids[b]))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let query_code = binarize(&project(&self.projection, query));

        let mut candidates: Vec<(usize, u32, &[f32])> = Vec::new();
        for &list_idx in list_order.iter().take(self.nprobe) {
            for posting in &self.lists[list_idx] {
                if filter.is_none_or(|f| f.allows(posting.id)) {
                    candidates.push((posting.id, hamming(&query_code, &posting.code), &posting.raw));
                }
            }
        }
        candidates.sort_by_key(|(_, h, _)| *h);
        candidates.truncate(k.max(1) * 4);

        let mut scored: Vec<(usize, f32)> =
            candidates.into_iter().map(|(id, _, raw)| (id, distance(self.metric, query, raw))).collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored.into_iter().unzip()
    }

    pub fn len(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nearby_cluster_members() {
        let mut idx = IvfRabitqIndex::new(3, Metric::L2, 4, 2);
        let mut points = Vec::new();
        for i in 0..20 {
            points.push((i, vec![0.0, 0.0, 0.0]));
        }
        for i in 20..40 {
            points.push((i, vec![50.0, 50.0, 50.0]));
        }
        idx.build(&points);
        let (ids, _) = idx.search(&[0.1, 0.1, 0.1], 5, None);
        assert!(ids.iter().all(|id| *id < 20));
    }

    #[test]
    fn delete_removes_from_postings() {
        let mut idx = IvfRabitqIndex::new(2, Metric::L2, 2, 2);
        idx.build(&[(0, vec![0.0, 0.0]), (1, vec![1.0, 1.0])]);
        idx.delete(0);
        assert_eq!(idx.len(), 1);
    }
}
