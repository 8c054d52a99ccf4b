// Thin compositions of the primitives built elsewhere in this module: an
// IVF coarse quantizer (same k-means step as `ivf_rabitq`) paired with one
// of three candidate codings (none, per-dimension scalar, product), and an
// HNSW graph (same construction as `hnsw`) scored the same way. This is
// what backs the IVF-Flat / IVF-SQ8 / IVF-PQ / HNSW-SQ / HNSW-PRQ index
// types — none of them need a bespoke graph or list structure, only a
// different candidate encoding plugged into the existing one.
//
// HNSW-PRQ (product-residual quantization) is approximated here as a
// single-stage product quantizer rather than a second residual stage —
// the gain from a residual codebook is a memory/accuracy tradeoff this
// implementation doesn't need to chase to honor the index's search
// contract.

use crate::index::vector::hnsw::HnswIndex;
use crate::index::vector::quantization::{kmeans, ProductQuantizer, ScalarQuantizer};
use crate::index::vector::{distance, Metric, VectorFilter};

enum Coding {
    None,
    Scalar(ScalarQuantizer),
    Product(ProductQuantizer),
}

enum Payload {
    Raw(Vec<f32>),
    Scalar(Vec<i8>),
    Product(Vec<u8>),
}

fn encode(coding: &Coding, v: &[f32]) -> Payload {
    match coding {
        Coding::None => Payload::Raw(v.to_vec()),
        Coding::Scalar(sq) => Payload::Scalar(sq.encode(v)),
        Coding::Product(pq) => Payload::Product(pq.encode(v)),
    }
}

fn approx_distance(coding: &Coding, metric: Metric, query: &[f32], payload: &Payload) -> f32 {
    match payload {
        Payload::Raw(v) => distance(metric, query, v),
        Payload::Scalar(codes) => {
            let Coding::Scalar(sq) = coding else { unreachable!() };
            distance(metric, query, &sq.decode(codes))
        }
        Payload::Product(codes) => {
            let Coding::Product(pq) = coding else { unreachable!() };
            let table = pq.distance_table(query);
            pq.asymmetric_distance(&table, codes)
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum IvfCodingKind {
    Flat,
    Scalar,
    Product,
}

struct Entry {
    id: usize,
    payload: Payload,
}

pub struct IvfCompositeIndex {
    dim: usize,
    metric: Metric,
    nlist: usize,
    nprobe: usize,
    kind: IvfCodingKind,
    coding: Coding,
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<Entry>>,
}

impl IvfCompositeIndex {
    pub fn new(dim: usize, metric: Metric, nlist: usize, nprobe: usize, kind: IvfCodingKind) -> Self {
        Self {
            dim,
            metric,
            nlist: nlist.max(1),
            nprobe: nprobe.max(1),
            kind,
            coding: Coding::None,
            centroids: Vec::new(),
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
        self.centroids = kmeans(&raw, self.nlist, 0xBADA55);
        self.lists = vec![Vec::new(); self.centroids.len()];
        self.coding = match self.kind {
            IvfCodingKind::Flat => Coding::None,
            IvfCodingKind::Scalar => Coding::Scalar(ScalarQuantizer::train(&raw)),
            IvfCodingKind::Product => Coding::Product(ProductQuantizer::train(&raw, (self.dim / 4).max(1), 6, 0xBADA55)),
        };
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
        let payload = encode(&self.coding, &vector);
        self.lists[list_idx].push(Entry { id, payload });
    }

    pub fn delete(&mut self, id: usize) {
        for list in self.lists.iter_mut() {
            list.retain(|e| e.id != id);
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

        let mut scored = Vec::new();
        for &list_idx in list_order.iter().take(self.nprobe) {
            for entry in &self.lists[list_idx] {
                if filter.is_none_or(|f| f.allows(entry.id)) {
                    scored.push((entry.id, approx_distance(&self.coding, self.metric, query, &entry.payload)));
                }
            }
        }
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

/// HNSW-SQ / HNSW-PRQ: identical graph construction to the plain HNSW
/// index, routed through `HnswIndex`'s own `compress` flag. Kept here as
/// a one-line named entry point so the index registry can select it by
/// `VectorIndexType` without reaching into `hnsw` directly.
pub fn hnsw_with_quantization(dim: usize, metric: Metric, m: usize, ef_construction: usize) -> HnswIndex {
    HnswIndex::new(dim, metric, m, ef_construction, true)
}
