// Vector ANN index family. Every concrete index enforces `dim` up front and
// returns `DimensionMismatch` on any vector of the wrong length; beyond that
// each module documents its own grounding. `VectorIndexHandle` is the
// registry-facing enum the rest of the index layer actually talks to.

pub mod aisaq;
pub mod composite;
pub mod flat;
pub mod hnsw;
pub mod ivf_rabitq;
pub mod quantization;

use std::collections::HashSet;

pub use crate::config::VectorIndexParams;
use crate::error::{EngineError, Result};

use aisaq::AisaqIndex;
use composite::{hnsw_with_quantization, IvfCodingKind, IvfCompositeIndex};
use flat::FlatIndex;
use hnsw::HnswIndex;
use ivf_rabitq::IvfRabitqIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Cosine,
    L2,
    InnerProduct,
}

/// Smaller is always "closer", across every metric: cosine becomes `1 -
/// similarity`, inner product is negated so a bigger dot product still
/// ranks first.
pub fn distance(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt(),
        Metric::InnerProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        Metric::Cosine => {
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                1.0
            } else {
                1.0 - dot / (norm_a * norm_b)
            }
        }
    }
}

/// Restricts a search to a specific candidate set — used when a vector
/// query is combined with a scalar filter on the same table. An empty set
/// means no candidate can ever match, per the source interface's "empty ID
/// list means no matches" rule.
pub struct VectorFilter {
    ids: HashSet<usize>,
}

impl VectorFilter {
    pub fn from_ids(ids: impl IntoIterator<Item = usize>) -> Self {
        Self { ids: ids.into_iter().collect() }
    }

    pub fn allows(&self, id: usize) -> bool {
        self.ids.contains(&id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorIndexType {
    Flat,
    Hnsw,
    HnswPq,
    IvfRabitq,
    Aisaq,
    IvfFlat,
    IvfSq8,
    IvfPq,
    HnswSq,
    HnswPrq,
}

pub enum VectorIndexHandle {
    Flat(FlatIndex),
    Hnsw(HnswIndex),
    IvfRabitq(IvfRabitqIndex),
    Aisaq(AisaqIndex),
    IvfComposite(IvfCompositeIndex),
}

impl VectorIndexHandle {
    pub fn new(index_type: VectorIndexType, dim: usize, metric: Metric, params: VectorIndexParams) -> Self {
        match index_type {
            VectorIndexType::Flat => VectorIndexHandle::Flat(FlatIndex::new(dim, metric)),
            VectorIndexType::Hnsw => VectorIndexHandle::Hnsw(
                HnswIndex::new(dim, metric, params.m, params.ef_construction, false).with_ef_search(params.ef),
            ),
            VectorIndexType::HnswPq => VectorIndexHandle::Hnsw(
                HnswIndex::new(dim, metric, params.m, params.ef_construction, true).with_ef_search(params.ef),
            ),
            VectorIndexType::IvfRabitq => {
                VectorIndexHandle::IvfRabitq(IvfRabitqIndex::new(dim, metric, params.nlist, params.nprobe))
            }
            VectorIndexType::Aisaq => VectorIndexHandle::Aisaq(
                AisaqIndex::new(dim, metric, params.max_degree).with_search_list_size(params.search_list_size),
            ),
            VectorIndexType::IvfFlat => VectorIndexHandle::IvfComposite(IvfCompositeIndex::new(
                dim,
                metric,
                params.nlist,
                params.nprobe,
                IvfCodingKind::Flat,
            )),
            VectorIndexType::IvfSq8 => VectorIndexHandle::IvfComposite(IvfCompositeIndex::new(
                dim,
                metric,
                params.nlist,
                params.nprobe,
                IvfCodingKind::Scalar,
            )),
            VectorIndexType::IvfPq => VectorIndexHandle::IvfComposite(IvfCompositeIndex::new(
                dim,
                metric,
                params.nlist,
                params.nprobe,
                IvfCodingKind::Product,
            )),
            VectorIndexType::HnswSq | VectorIndexType::HnswPrq => VectorIndexHandle::Hnsw(
                hnsw_with_quantization(dim, metric, params.m, params.ef_construction).with_ef_search(params.ef),
            ),
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            VectorIndexHandle::Flat(i) => i.dim(),
            VectorIndexHandle::Hnsw(i) => i.dim(),
            VectorIndexHandle::IvfRabitq(i) => i.dim(),
            VectorIndexHandle::Aisaq(i) => i.dim(),
            VectorIndexHandle::IvfComposite(i) => i.dim(),
        }
    }

    fn check_dim(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.dim() {
            return Err(EngineError::DimensionMismatch { expected: self.dim(), got: v.len() });
        }
        Ok(())
    }

    pub fn build(&mut self, vectors: &[(usize, Vec<f32>)]) -> Result<()> {
        for (_, v) in vectors {
            self.check_dim(v)?;
        }
        match self {
            VectorIndexHandle::Flat(i) => i.build(vectors),
            VectorIndexHandle::Hnsw(i) => i.build(vectors),
            VectorIndexHandle::IvfRabitq(i) => i.build(vectors),
            VectorIndexHandle::Aisaq(i) => i.build(vectors),
            VectorIndexHandle::IvfComposite(i) => i.build(vectors),
        }
        Ok(())
    }

    pub fn insert(&mut self, id: usize, vector: Vec<f32>) -> Result<()> {
        self.check_dim(&vector)?;
        match self {
            VectorIndexHandle::Flat(i) => i.insert(id, vector),
            VectorIndexHandle::Hnsw(i) => i.insert(id, vector),
            VectorIndexHandle::IvfRabitq(i) => i.insert(id, vector),
            VectorIndexHandle::Aisaq(i) => i.insert(id, vector),
            VectorIndexHandle::IvfComposite(i) => i.insert(id, vector),
        }
        Ok(())
    }

    pub fn delete(&mut self, id: usize) {
        match self {
            VectorIndexHandle::Flat(i) => i.delete(id),
            VectorIndexHandle::Hnsw(i) => i.delete(id),
            VectorIndexHandle::IvfRabitq(i) => i.delete(id),
            VectorIndexHandle::Aisaq(i) => i.delete(id),
            VectorIndexHandle::IvfComposite(i) => i.delete(id),
        }
    }

    pub fn search(&self, query: &[f32], k: usize, filter: Option<&VectorFilter>) -> Result<(Vec<usize>, Vec<f32>)> {
        self.check_dim(query)?;
        Ok(match self {
            VectorIndexHandle::Flat(i) => i.search(query, k, filter),
            VectorIndexHandle::Hnsw(i) => i.search(query, k, filter),
            VectorIndexHandle::IvfRabitq(i) => i.search(query, k, filter),
            VectorIndexHandle::Aisaq(i) => i.search(query, k, filter),
            VectorIndexHandle::IvfComposite(i) => i.search(query, k, filter),
        })
    }

    pub fn len(&self) -> usize {
        match self {
            VectorIndexHandle::Flat(i) => i.len(),
            VectorIndexHandle::Hnsw(i) => i.len(),
            VectorIndexHandle::IvfRabitq(i) => i.len(),
            VectorIndexHandle::Aisaq(i) => i.len(),
            VectorIndexHandle::IvfComposite(i) => i.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut idx = VectorIndexHandle::new(VectorIndexType::Flat, 3, Metric::L2, VectorIndexParams::default());
        assert!(matches!(idx.insert(0, vec![1.0, 2.0]), Err(EngineError::DimensionMismatch { .. })));
    }

    #[test]
    fn flat_round_trips_through_handle() {
        let mut idx = VectorIndexHandle::new(VectorIndexType::Flat, 2, Metric::L2, VectorIndexParams::default());
        idx.build(&[(0, vec![0.0, 0.0]), (1, vec![5.0, 5.0])]).unwrap();
        let (ids, _) = idx.search(&[0.1, 0.1], 1, None).unwrap();
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn every_index_type_builds_and_searches() {
        let points: Vec<(usize, Vec<f32>)> = (0..40).map(|i| (i, vec![i as f32, 0.0, 0.0, 0.0])).collect();
        for kind in [
            VectorIndexType::Flat,
            VectorIndexType::Hnsw,
            VectorIndexType::HnswPq,
            VectorIndexType::IvfRabitq,
            VectorIndexType::Aisaq,
            VectorIndexType::IvfFlat,
            VectorIndexType::IvfSq8,
            VectorIndexType::IvfPq,
            VectorIndexType::HnswSq,
            VectorIndexType::HnswPrq,
        ] {
            let mut idx = VectorIndexHandle::new(kind, 4, Metric::L2, VectorIndexParams::default());
            idx.build(&points).unwrap();
            let (ids, _) = idx.search(&[20.0, 0.0, 0.0, 0.0], 5, None).unwrap();
            assert!(!ids.is_empty(), "{kind:?} returned no results");
        }
    }
}
