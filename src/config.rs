// Engine-wide configuration: paging/buffer-pool knobs and per-index-type
// defaults. Grouped the way the teacher groups its `BufferPoolConfig` and
// `DatabaseConfig`: one struct per concern, `Default` impls matching the
// documented defaults, nothing environment-derived at construction time.

use std::time::Duration;

/// 64MB floor used when OS memory auto-detection fails or reports too little.
pub const MIN_MAX_MEMORY_BYTES: u64 = 64 * 1024 * 1024;

/// Fraction of total system memory the buffer pool auto-sizes itself to.
pub const AUTO_MEMORY_FRACTION: f64 = 0.70;

pub const DEFAULT_PAGE_SIZE: usize = 4096;

pub const DEFAULT_EVICT_INTERVAL: Duration = Duration::from_secs(5);

/// Synchronous evictions `Register` performs inline before handing the rest
/// off to the background evictor.
pub const MAX_SYNC_EVICTIONS: usize = 4;

#[derive(Debug, Clone)]
pub struct PagingConfig {
    pub enabled: bool,
    /// `None` means auto-detect: 70% of system memory, floored at 64MB.
    pub max_memory_bytes: Option<u64>,
    pub page_size: usize,
    pub spill_dir: std::path::PathBuf,
    pub evict_interval: Duration,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_memory_bytes: None,
            page_size: DEFAULT_PAGE_SIZE,
            spill_dir: std::env::temp_dir().join("tabula-engine-spill"),
            evict_interval: DEFAULT_EVICT_INTERVAL,
        }
    }
}

impl PagingConfig {
    /// Buffer pool memory ceiling resolved from config, auto-detecting from
    /// OS-reported available memory when unset. This supersedes the teacher's
    /// allocator-statistics approach (`memory::allocator`'s `RSS`-based
    /// counters), which reports allocator, not system, memory.
    pub fn resolved_max_memory_bytes(&self) -> u64 {
        match self.max_memory_bytes {
            Some(explicit) => explicit,
            None => auto_detect_max_memory_bytes(),
        }
    }
}

fn auto_detect_max_memory_bytes() -> u64 {
    match sys_info::mem_info() {
        Ok(mem) => {
            let total_bytes = mem.total.saturating_mul(1024);
            let budget = (total_bytes as f64 * AUTO_MEMORY_FRACTION) as u64;
            budget.max(MIN_MAX_MEMORY_BYTES)
        }
        Err(_) => MIN_MAX_MEMORY_BYTES,
    }
}

/// Parameters accepted by the vector index family; unused fields for a given
/// `VectorIndexType` are ignored rather than rejected, matching the "Index
/// manager accepts a params bag" shape in the source interface.
#[derive(Debug, Clone, Copy)]
pub struct VectorIndexParams {
    /// HNSW: max neighbors per node at levels above 0.
    pub m: usize,
    /// HNSW: hard cap on the number of levels.
    pub max_level: usize,
    /// HNSW: level-assignment parameter; defaults to 1/ln(m).
    pub ml: f64,
    /// HNSW: candidate list size used while inserting.
    pub ef_construction: usize,
    /// HNSW: candidate list size used while searching.
    pub ef: usize,
    /// PQ/scalar quantization: bits per sub-quantizer code.
    pub nbits: usize,
    /// IVF: number of coarse centroids.
    pub nlist: usize,
    /// IVF: number of centroids probed per search.
    pub nprobe: usize,
    /// Vamana/AISAQ: max out-degree per node.
    pub max_degree: usize,
    /// Vamana/AISAQ: beam width used during construction and search.
    pub search_list_size: usize,
    /// Number of PQ sub-quantizers (HNSW-PQ / IVF-PQ).
    pub m_pq: usize,
}

impl Default for VectorIndexParams {
    fn default() -> Self {
        let m = 16;
        Self {
            m,
            max_level: 16,
            ml: 1.0 / (m as f64).ln(),
            ef_construction: 200,
            ef: 64,
            nbits: 8,
            nlist: 100,
            nprobe: 8,
            max_degree: 32,
            search_list_size: 100,
            m_pq: 8,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub paging: PagingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_max_memory_is_honored() {
        let mut cfg = PagingConfig::default();
        cfg.max_memory_bytes = Some(123);
        assert_eq!(cfg.resolved_max_memory_bytes(), 123);
    }

    #[test]
    fn auto_detect_never_goes_below_floor() {
        assert!(auto_detect_max_memory_bytes() >= MIN_MAX_MEMORY_BYTES);
    }
}
