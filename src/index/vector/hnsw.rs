// HNSW: layered proximity graph, greedy best-first search from the top
// layer down. The `compress` flag switches the HNSW-PQ variant on: once a
// product quantizer is trained (at `build` time, over the whole batch),
// every distance computation — construction and search — goes through PQ
// codes instead of raw vectors, and raw vectors are dropped to save memory.

use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::index::vector::quantization::ProductQuantizer;
use crate::index::vector::{distance, Metric, VectorFilter};

#[derive(Clone, Copy, PartialEq)]
struct Scored {
    id: usize,
    dist: f32,
}
impl Eq for Scored {}
impl Ord for Scored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist.partial_cmp(&other.dist).unwrap_or(std::cmp::Ordering::Equal)
    }
}
impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct HnswIndex {
    dim: usize,
    metric: Metric,
    m: usize,
    ef_construction: usize,
    ef_search: usize,
    ml: f64,
    vectors: HashMap<usize, Vec<f32>>,
    compress: bool,
    pq: Option<ProductQuantizer>,
    codes: HashMap<usize, Vec<u8>>,
    levels: HashMap<usize, usize>,
    neighbors: HashMap<usize, Vec<Vec<usize>>>,
    entry_point: Option<usize>,
    rng_seed: u64,
}

impl HnswIndex {
    pub fn new(dim: usize, metric: Metric, m: usize, ef_construction: usize, compress: bool) -> Self {
        Self {
            dim,
            metric,
            m: m.max(2),
            ef_construction: ef_construction.max(m),
            ef_search: ef_construction.max(m),
            ml: 1.0 / (m.max(2) as f64).ln(),
            vectors: HashMap::new(),
            compress,
            pq: None,
            codes: HashMap::new(),
            levels: HashMap::new(),
            neighbors: HashMap::new(),
            entry_point: None,
            rng_seed: 0xA5A5,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn with_ef_search(mut self, ef_search: usize) -> Self {
        self.ef_search = ef_search.max(self.m);
        self
    }

    fn is_compressed(&self) -> bool {
        self.compress
    }

    fn dist_to_id(&self, query: &[f32], query_codes: Option<&[u8]>, query_table: Option<&[Vec<f32>]>, id: usize) -> f32 {
        if let (Some(pq), Some(table)) = (&self.pq, query_table) {
            let codes = self.codes.get(&id).expect("compressed node missing codes");
            return pq.asymmetric_distance(table, codes);
        }
        let _ = query_codes;
        distance(self.metric, query, self.vectors.get(&id).expect("node missing raw vector"))
    }

    pub fn build(&mut self, vectors: &[(usize, Vec<f32>)]) {
        self.vectors.clear();
        self.codes.clear();
        self.levels.clear();
        self.neighbors.clear();
        self.entry_point = None;

        if vectors.is_empty() {
            return;
        }
        if self.is_compressed() {
            let raw: Vec<Vec<f32>> = vectors.iter().map(|(_, v)| v.clone()).collect();
            let m = (self.dim / 4).max(1);
            self.pq = Some(ProductQuantizer::train(&raw, m, 6, self.rng_seed));
        }
        for (id, v) in vectors {
            self.insert(*id, v.clone());
        }
    }

    pub fn insert(&mut self, id: usize, vector: Vec<f32>) {
        if let Some(pq) = &self.pq {
            self.codes.insert(id, pq.encode(&vector));
        } else {
            self.vectors.insert(id, vector.clone());
        }

        let level = self.random_level();
        self.levels.insert(id, level);
        self.neighbors.insert(id, vec![Vec::new(); level + 1]);

        let table = self.pq.as_ref().map(|pq| pq.distance_table(&vector));
        let dist_fn = |this: &Self, other: usize| this.dist_to_id(&vector, None, table.as_deref(), other);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(id);
            return;
        };
        let entry_level = self.levels[&entry];
        let mut current = entry;

        for lc in (level + 1..=entry_level).rev() {
            current = self.greedy_descend(current, &vector, table.as_deref(), lc);
        }

        for lc in (0..=level.min(entry_level)).rev() {
            let candidates = self.layer_search(current, &vector, table.as_deref(), self.ef_construction, lc, None);
            let max_conn = if lc == 0 { self.m * 2 } else { self.m };
            let selected: Vec<usize> = candidates.iter().take(max_conn).map(|s| s.id).collect();
            for &nb in &selected {
                self.connect(id, nb, lc, max_conn, &dist_fn);
            }
            self.neighbors.get_mut(&id).unwrap()[lc] = selected.clone();
            if let Some(&best) = selected.first() {
                current = best;
            }
        }

        if level > entry_level {
            self.entry_point = Some(id);
        }
    }

    fn connect(&mut self, a: usize, b: usize, level: usize, max_conn: usize, dist_fn: &impl Fn(&Self, usize) -> f32) {
        let entry = self.neighbors.entry(b).or_insert_with(|| vec![Vec::new(); level + 1]);
        if entry.len() <= level {
            entry.resize(level + 1, Vec::new());
        }
        entry[level].push(a);
        if entry[level].len() > max_conn {
            let mut scored: Vec<Scored> = entry[level]
                .iter()
                .map(|&n| Scored { id: n, dist: dist_fn(self, n) })
                .collect();
            scored.sort();
            scored.truncate(max_conn);
            entry[level] = scored.into_iter().map(|s| s.id).collect();
        }
    }

    fn greedy_descend(&self, start: usize, query: &[f32], table: Option<&[Vec<f32>]>, level: usize) -> usize {
        let mut current = start;
        let mut current_dist = self.dist_to_id(query, None, table, current);
        loop {
            let mut improved = false;
            if let Some(neighbors_at_level) = self.neighbors.get(&current).and_then(|ls| ls.get(level)) {
                for &cand in neighbors_at_level {
                    let d = self.dist_to_id(query, None, table, cand);
                    if d < current_dist {
                        current = cand;
                        current_dist = d;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    fn layer_search(
        &self,
        entry: usize,
        query: &[f32],
        table: Option<&[Vec<f32>]>,
        ef: usize,
        level: usize,
        filter: Option<&VectorFilter>,
    ) -> Vec<Scored> {
        let mut visited = HashSet::new();
        visited.insert(entry);
        let entry_dist = self.dist_to_id(query, None, table, entry);
        let mut candidates = BinaryHeap::new();
        candidates.push(std::cmp::Reverse(Scored { id: entry, dist: entry_dist }));
        let mut found = vec![Scored { id: entry, dist: entry_dist }];

        while let Some(std::cmp::Reverse(current)) = candidates.pop() {
            let worst_found = found.iter().map(|s| s.dist).fold(f32::MIN, f32::max);
            if current.dist > worst_found && found.len() >= ef {
                break;
            }
            if let Some(neighbors_at_level) = self.neighbors.get(&current.id).and_then(|ls| ls.get(level)) {
                for &cand in neighbors_at_level {
                    if !visited.insert(cand) {
                        continue;
                    }
                    let d = self.dist_to_id(query, None, table, cand);
                    candidates.push(std::cmp::Reverse(Scored { id: cand, dist: d }));
                    found.push(Scored { id: cand, dist: d });
                }
            }
        }

        found.retain(|s| filter.is_none_or(|f| f.allows(s.id)));
        found.sort();
        found.truncate(ef.max(1));
        found
    }

    pub fn delete(&mut self, id: usize) {
        self.vectors.remove(&id);
        self.codes.remove(&id);
        self.levels.remove(&id);
        self.neighbors.remove(&id);
        for adjacency in self.neighbors.values_mut() {
            for level in adjacency.iter_mut() {
                level.retain(|&n| n != id);
            }
        }
        if self.entry_point == Some(id) {
            self.entry_point = self.neighbors.keys().next().copied();
        }
    }

    pub fn search(&self, query: &[f32], k: usize, filter: Option<&VectorFilter>) -> (Vec<usize>, Vec<f32>) {
        let Some(entry) = self.entry_point else {
            return (Vec::new(), Vec::new());
        };
        let table = self.pq.as_ref().map(|pq| pq.distance_table(query));
        let entry_level = self.levels[&entry];
        let mut current = entry;
        for lc in (1..=entry_level).rev() {
            current = self.greedy_descend(current, query, table.as_deref(), lc);
        }
        let ef = self.ef_search.max(k);
        let mut found = self.layer_search(current, query, table.as_deref(), ef, 0, filter);
        found.truncate(k);
        found.into_iter().map(|s| (s.id, s.dist)).unzip()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    fn random_level(&mut self) -> usize {
        let mut rng = StdRng::seed_from_u64(self.rng_seed);
        self.rng_seed = self.rng_seed.wrapping_add(1).wrapping_mul(6364136223846793005).wrapping_add(1);
        let u: f64 = rng.gen_range(1e-9..1.0);
        (-u.ln() * self.ml).floor() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nearest_neighbor_in_small_graph() {
        let mut idx = HnswIndex::new(2, Metric::L2, 8, 32, false);
        let points: Vec<(usize, Vec<f32>)> = (0..50).map(|i| (i, vec![i as f32, i as f32])).collect();
        idx.build(&points);
        let (ids, _) = idx.search(&[25.2, 25.2], 3, None);
        assert!(ids.contains(&25) || ids.contains(&24) || ids.contains(&26));
    }

    #[test]
    fn delete_removes_node_from_future_results() {
        let mut idx = HnswIndex::new(2, Metric::L2, 8, 32, false);
        let points: Vec<(usize, Vec<f32>)> = (0..20).map(|i| (i, vec![i as f32, 0.0])).collect();
        idx.build(&points);
        idx.delete(5);
        let (ids, _) = idx.search(&[5.0, 0.0], 20, None);
        assert!(!ids.contains(&5));
    }

    #[test]
    fn compressed_variant_still_returns_k_results() {
        let mut idx = HnswIndex::new(4, Metric::L2, 8, 32, true);
        let points: Vec<(usize, Vec<f32>)> = (0..30).map(|i| (i, vec![i as f32, 0.0, 0.0, 0.0])).collect();
        idx.build(&points);
        let (ids, _) = idx.search(&[10.0, 0.0, 0.0, 0.0], 5, None);
        assert_eq!(ids.len(), 5);
    }
}
