// The buffer pool manager: register/pin/unpin/evict over `RowPage`s, with
// disk spill for pages evicted under memory pressure. When paging is
// disabled in config, this degrades to a passthrough cache that never
// evicts — every registered page simply stays resident.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::PagingConfig;
use crate::error::{EngineError, Result};
use crate::row::Row;
use crate::storage::buffer_pool::lru::EvictionTracker;
use crate::storage::page::{PageId, RowPage};
use crate::storage::spill;

pub struct BufferPoolManager {
    config: PagingConfig,
    pages: DashMap<PageId, Arc<RowPage>>,
    tracker: EvictionTracker,
    current_versions: DashMap<String, u64>,
    memory_used: AtomicUsize,
}

impl BufferPoolManager {
    pub fn new(config: PagingConfig) -> Self {
        Self {
            config,
            pages: DashMap::new(),
            tracker: EvictionTracker::new(),
            current_versions: DashMap::new(),
            memory_used: AtomicUsize::new(0),
        }
    }

    pub fn update_latest_version(&self, table: &str, version: u64) {
        self.current_versions.insert(table.to_string(), version);
    }

    /// Registers a freshly built page, touching it as most-recently-used.
    /// If paging is enabled and the pool is now over budget, evicts
    /// synchronously up to `MAX_SYNC_EVICTIONS` pages before returning.
    pub fn register(&self, id: PageId, rows: Vec<Row>) -> Arc<RowPage> {
        let page = Arc::new(RowPage::new(id.clone(), rows, spill::spill_path(&self.config.spill_dir, &id)));
        self.memory_used.fetch_add(page.estimated_bytes(), Ordering::Relaxed);
        self.pages.insert(id.clone(), page.clone());
        self.tracker.touch(&id);

        if self.config.enabled {
            let budget = self.config.resolved_max_memory_bytes();
            let mut evictions = 0;
            while self.memory_used.load(Ordering::Relaxed) as u64 > budget
                && evictions < crate::config::MAX_SYNC_EVICTIONS
            {
                if !self.try_evict_one() {
                    break;
                }
                evictions += 1;
            }
        }
        page
    }

    /// Pins the page, loading it back from disk first if it was spilled.
    pub fn pin(&self, id: &PageId) -> Result<Arc<RowPage>> {
        let page = self
            .pages
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| EngineError::Internal {
                reason: format!("page {id:?} not registered"),
            })?;

        if page.is_on_disk() {
            debug!(table = %id.table, version = id.version, index = id.index, "loading spilled page");
            let rows = spill::read_rows(&page.spill_path)?;
            self.memory_used.fetch_sub(0, Ordering::Relaxed); // disk-resident pages were not counted
            self.memory_used.fetch_add(page_rows_bytes(&rows), Ordering::Relaxed);
            page.load_from_disk(rows);
        }

        page.pin();
        self.tracker.touch(id);
        Ok(page)
    }

    pub fn unpin(&self, id: &PageId) {
        if let Some(page) = self.pages.get(id) {
            page.unpin();
        }
    }

    /// Drops every page belonging to `table`/`version` from the pool,
    /// removing any spill file on disk. Used by TruncateTable/DropTable and
    /// by old-version garbage collection.
    pub fn unregister_table_version(&self, table: &str, version: u64) -> Result<()> {
        let ids: Vec<PageId> = self
            .pages
            .iter()
            .filter(|e| e.key().table == table && e.key().version == version)
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            if let Some((_, page)) = self.pages.remove(&id) {
                self.memory_used.fetch_sub(page.estimated_bytes().min(self.memory_used.load(Ordering::Relaxed)), Ordering::Relaxed);
                spill::remove(&page.spill_path)?;
            }
            self.tracker.remove(&id);
        }
        Ok(())
    }

    pub fn unregister_table(&self, table: &str) -> Result<()> {
        let versions: Vec<u64> = self
            .pages
            .iter()
            .filter(|e| e.key().table == table)
            .map(|e| e.key().version)
            .collect();
        for version in versions {
            self.unregister_table_version(table, version)?;
        }
        self.current_versions.remove(table);
        Ok(())
    }

    /// Evicts one unpinned page (preferring stale-version pages), spilling
    /// its rows to disk. Returns `false` if nothing could be evicted.
    pub fn try_evict(&self) -> bool {
        self.try_evict_one()
    }

    fn try_evict_one(&self) -> bool {
        let Some(victim) = self.tracker.pick_victim(&self.pages, &self.current_versions) else {
            return false;
        };
        let Some(page) = self.pages.get(&victim).map(|e| e.clone()) else {
            return false;
        };
        if page.is_on_disk() {
            return false;
        }
        let Some(rows) = page.clone_rows() else {
            return false;
        };
        match spill::write_rows(&self.config.spill_dir, &victim, &rows) {
            Ok(_) => {
                let freed = page.estimated_bytes();
                page.evict_to_disk();
                self.memory_used.fetch_sub(freed.min(self.memory_used.load(Ordering::Relaxed)), Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!(error = %e, page = ?victim, "failed to spill page, leaving resident");
                false
            }
        }
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used.load(Ordering::Relaxed)
    }

    pub fn resident_page_count(&self) -> usize {
        self.pages.iter().filter(|e| !e.value().is_on_disk()).count()
    }
}

fn page_rows_bytes(rows: &[Row]) -> usize {
    // Mirrors RowPage's own estimate so reload accounting stays consistent.
    let page = RowPage::new(
        PageId::new("__estimate__", 0, 0),
        rows.to_vec(),
        std::path::PathBuf::new(),
    );
    page.estimated_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn cfg(dir: &std::path::Path) -> PagingConfig {
        PagingConfig {
            enabled: true,
            max_memory_bytes: Some(1),
            page_size: 4096,
            spill_dir: dir.to_path_buf(),
            evict_interval: std::time::Duration::from_secs(5),
        }
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let mut r = Row::new();
                r.insert("id", Value::Int64(i as i64));
                r.insert("payload", Value::String("x".repeat(64)));
                r
            })
            .collect()
    }

    #[test]
    fn register_over_budget_spills_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BufferPoolManager::new(cfg(dir.path()));
        pool.update_latest_version("t", 1);
        let id = PageId::new("t", 1, 0);
        let page = pool.register(id.clone(), rows(10));
        assert!(page.is_on_disk());
    }

    #[test]
    fn pin_reloads_spilled_page() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BufferPoolManager::new(cfg(dir.path()));
        pool.update_latest_version("t", 1);
        let id = PageId::new("t", 1, 0);
        pool.register(id.clone(), rows(10));
        let page = pool.pin(&id).unwrap();
        assert!(!page.is_on_disk());
        assert_eq!(page.row_count(), 10);
        pool.unpin(&id);
    }

    #[test]
    fn pinned_pages_survive_eviction_pressure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = cfg(dir.path());
        config.max_memory_bytes = Some(u64::MAX); // no eviction on register
        let pool = BufferPoolManager::new(config);
        pool.update_latest_version("t", 1);
        let id = PageId::new("t", 1, 0);
        let page = pool.register(id.clone(), rows(5));
        page.pin();
        assert!(!pool.try_evict());
        assert!(!page.is_on_disk());
        page.unpin();
    }

    #[test]
    fn unregister_table_version_removes_spill_file() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BufferPoolManager::new(cfg(dir.path()));
        pool.update_latest_version("t", 1);
        let id = PageId::new("t", 1, 0);
        let page = pool.register(id.clone(), rows(10));
        assert!(page.is_on_disk());
        pool.unregister_table_version("t", 1).unwrap();
        assert!(!page.spill_path.exists());
    }
}
