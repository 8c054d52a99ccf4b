// Version-aware eviction ordering. Plain LRU would happily keep a page from
// a superseded table version resident while evicting a page the current
// version still needs; this tracker biases eviction toward stale-version
// pages first, current-version pages only once those run out.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::storage::page::{PageId, RowPage};

#[derive(Default)]
pub struct EvictionTracker {
    /// Front = most recently touched.
    order: Mutex<VecDeque<PageId>>,
}

impl EvictionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self, id: &PageId) {
        let mut order = self.order.lock();
        order.retain(|existing| existing != id);
        order.push_front(id.clone());
    }

    pub fn remove(&self, id: &PageId) {
        self.order.lock().retain(|existing| existing != id);
    }

    /// Scans from least- to most-recently used, first for an unpinned page
    /// whose version is behind the table's current version, then for any
    /// unpinned page at all. Returns `None` if every resident page is
    /// pinned.
    pub fn pick_victim(
        &self,
        pages: &DashMap<PageId, Arc<RowPage>>,
        current_versions: &DashMap<String, u64>,
    ) -> Option<PageId> {
        let order = self.order.lock();

        let is_stale = |id: &PageId| -> bool {
            current_versions
                .get(&id.table)
                .map(|current| id.version < *current)
                .unwrap_or(false)
        };

        let mut fallback = None;
        for id in order.iter().rev() {
            let Some(page) = pages.get(id) else { continue };
            if page.is_pinned() {
                continue;
            }
            if is_stale(id) {
                return Some(id.clone());
            }
            if fallback.is_none() {
                fallback = Some(id.clone());
            }
        }
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn page(table: &str, version: u64, index: usize) -> Arc<RowPage> {
        Arc::new(RowPage::new(PageId::new(table, version, index), Vec::new(), PathBuf::from("/tmp")))
    }

    #[test]
    fn prefers_stale_version_over_current() {
        let pages: DashMap<PageId, Arc<RowPage>> = DashMap::new();
        let current_versions: DashMap<String, u64> = DashMap::new();
        current_versions.insert("t".to_string(), 2);

        let stale_id = PageId::new("t", 1, 0);
        let current_id = PageId::new("t", 2, 0);
        pages.insert(stale_id.clone(), page("t", 1, 0));
        pages.insert(current_id.clone(), page("t", 2, 0));

        let tracker = EvictionTracker::new();
        tracker.touch(&current_id);
        tracker.touch(&stale_id);

        assert_eq!(tracker.pick_victim(&pages, &current_versions), Some(stale_id));
    }

    #[test]
    fn skips_pinned_pages() {
        let pages: DashMap<PageId, Arc<RowPage>> = DashMap::new();
        let current_versions: DashMap<String, u64> = DashMap::new();
        let id = PageId::new("t", 1, 0);
        let p = page("t", 1, 0);
        p.pin();
        pages.insert(id.clone(), p);

        let tracker = EvictionTracker::new();
        tracker.touch(&id);
        assert_eq!(tracker.pick_victim(&pages, &current_versions), None);
    }
}
