// Shared quantization primitives used by more than one vector index: Lloyd's
// k-means for coarse centroids (HNSW-PQ, IVF-RaBitQ, AISAQ's random-order
// insertion doesn't need it, but IVF does), a product quantizer for
// HNSW-PQ/IVF-PQ, and a per-dimension adaptive scalar quantizer for AISAQ.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Lloyd's algorithm, up to 20 iterations or convergence within `tol`
/// (summed centroid movement). Centroids are seeded from distinct random
/// data points so `k <= vectors.len()` is the only precondition.
pub fn kmeans(vectors: &[Vec<f32>], k: usize, seed: u64) -> Vec<Vec<f32>> {
    assert!(!vectors.is_empty() && k > 0);
    let k = k.min(vectors.len());
    let dim = vectors[0].len();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut indices: Vec<usize> = (0..vectors.len()).collect();
    indices.shuffle(&mut rng);
    let mut centroids: Vec<Vec<f32>> = indices[..k].iter().map(|&i| vectors[i].clone()).collect();

    for _ in 0..20 {
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];

        for v in vectors {
            let nearest = centroids
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    squared_l2(v, a).partial_cmp(&squared_l2(v, b)).unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i)
                .unwrap();
            for d in 0..dim {
                sums[nearest][d] += v[d];
            }
            counts[nearest] += 1;
        }

        let mut movement = 0.0f32;
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            let mut new_centroid = vec![0.0f32; dim];
            for d in 0..dim {
                new_centroid[d] = sums[c][d] / counts[c] as f32;
            }
            movement += squared_l2(&centroids[c], &new_centroid).sqrt();
            centroids[c] = new_centroid;
        }
        if movement < 1e-4 {
            break;
        }
    }
    centroids
}

/// Per-dimension adaptive int8 scalar quantizer (AISAQ): encode = clip((x -
/// mean) * 127 / stdev, -128, 127).
#[derive(Debug, Clone)]
pub struct ScalarQuantizer {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl ScalarQuantizer {
    pub fn train(vectors: &[Vec<f32>]) -> Self {
        let dim = vectors[0].len();
        let n = vectors.len() as f32;
        let mut mean = vec![0.0f32; dim];
        for v in vectors {
            for d in 0..dim {
                mean[d] += v[d];
            }
        }
        for m in mean.iter_mut() {
            *m /= n;
        }
        let mut var = vec![0.0f32; dim];
        for v in vectors {
            for d in 0..dim {
                let diff = v[d] - mean[d];
                var[d] += diff * diff;
            }
        }
        let std = var.iter().map(|v| (v / n).sqrt().max(1e-6)).collect();
        Self { mean, std }
    }

    pub fn encode(&self, v: &[f32]) -> Vec<i8> {
        v.iter()
            .enumerate()
            .map(|(d, x)| {
                let scaled = (x - self.mean[d]) * (127.0 / self.std[d]);
                scaled.clamp(-128.0, 127.0).round() as i8
            })
            .collect()
    }

    pub fn decode(&self, codes: &[i8]) -> Vec<f32> {
        codes
            .iter()
            .enumerate()
            .map(|(d, &c)| (c as f32) * self.std[d] / 127.0 + self.mean[d])
            .collect()
    }
}

/// Product quantizer: splits each vector into `m` sub-vectors, trains a
/// `2^nbits`-centroid codebook per sub-vector via k-means.
#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    pub m: usize,
    pub sub_dim: usize,
    pub codebooks: Vec<Vec<Vec<f32>>>, // [sub-quantizer][centroid][sub_dim]
}

impl ProductQuantizer {
    pub fn train(vectors: &[Vec<f32>], m: usize, nbits: usize, seed: u64) -> Self {
        let dim = vectors[0].len();
        let sub_dim = (dim + m - 1) / m;
        let k = 1usize << nbits;
        let mut codebooks = Vec::with_capacity(m);
        for sub in 0..m {
            let start = sub * sub_dim;
            let end = (start + sub_dim).min(dim);
            let sub_vectors: Vec<Vec<f32>> = vectors.iter().map(|v| v[start..end].to_vec()).collect();
            codebooks.push(kmeans(&sub_vectors, k, seed.wrapping_add(sub as u64)));
        }
        Self { m, sub_dim, codebooks }
    }

    pub fn encode(&self, v: &[f32]) -> Vec<u8> {
        (0..self.m)
            .map(|sub| {
                let start = sub * self.sub_dim;
                let end = (start + self.sub_dim).min(v.len());
                let sub_vec = &v[start..end];
                self.codebooks[sub]
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| {
                        squared_l2(sub_vec, a).partial_cmp(&squared_l2(sub_vec, b)).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(i, _)| i as u8)
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Precomputes, for the query, the squared distance from each
    /// sub-vector to every centroid in that sub-quantizer's codebook —
    /// turns per-candidate distance into a handful of table lookups.
    pub fn distance_table(&self, query: &[f32]) -> Vec<Vec<f32>> {
        (0..self.m)
            .map(|sub| {
                let start = sub * self.sub_dim;
                let end = (start + self.sub_dim).min(query.len());
                let sub_vec = &query[start..end];
                self.codebooks[sub].iter().map(|c| squared_l2(sub_vec, c)).collect()
            })
            .collect()
    }

    pub fn asymmetric_distance(&self, table: &[Vec<f32>], codes: &[u8]) -> f32 {
        codes.iter().enumerate().map(|(sub, &c)| table[sub][c as usize]).sum()
    }
}

/// Random projection matrix drawn from N(0, 1/sqrt(D)), used by RaBitQ to
/// turn raw vectors into sign bits before packing.
pub fn random_projection_matrix(dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let scale = 1.0 / (dim as f32).sqrt();
    (0..dim)
        .map(|_| (0..dim).map(|_| sample_standard_normal(&mut rng) * scale).collect())
        .collect()
}

/// Box-Muller transform; `rand_distr` isn't in the dependency set, and one
/// transform is all RaBitQ's projection needs.
fn sample_standard_normal(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen_range(1e-9..1.0);
    let u2: f32 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vecs() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 0.0],
            vec![0.1, 0.1],
            vec![10.0, 10.0],
            vec![10.1, 9.9],
        ]
    }

    #[test]
    fn kmeans_separates_two_clusters() {
        let centroids = kmeans(&vecs(), 2, 42);
        assert_eq!(centroids.len(), 2);
        let dist = squared_l2(&centroids[0], &centroids[1]).sqrt();
        assert!(dist > 5.0, "expected well-separated centroids, got distance {dist}");
    }

    #[test]
    fn scalar_quantizer_round_trip_is_approximate() {
        let sq = ScalarQuantizer::train(&vecs());
        let encoded = sq.encode(&vecs()[2]);
        let decoded = sq.decode(&encoded);
        assert!(squared_l2(&decoded, &vecs()[2]).sqrt() < 1.0);
    }

    #[test]
    fn product_quantizer_encodes_and_scores_consistently() {
        let pq = ProductQuantizer::train(&vecs(), 2, 2, 7);
        let codes = pq.encode(&vecs()[0]);
        let table = pq.distance_table(&vecs()[0]);
        let self_dist = pq.asymmetric_distance(&table, &codes);
        let other_codes = pq.encode(&vecs()[2]);
        let other_dist = pq.asymmetric_distance(&table, &other_codes);
        assert!(self_dist < other_dist);
    }
}
