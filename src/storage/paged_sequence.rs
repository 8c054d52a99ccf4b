// A table version's row data, split across fixed-size `RowPage`s managed by
// the buffer pool. Pages within one version are append-only and immutable
// once appended, which is what lets `get`/`range` pin a page, read, and
// unpin without ever racing a writer.

use std::sync::Arc;

use crate::error::Result;
use crate::row::Row;
use crate::storage::buffer_pool::BufferPoolManager;
use crate::storage::page::PageId;

pub struct PagedRowSequence {
    pool: Arc<BufferPoolManager>,
    table: String,
    version: u64,
    /// Row index each page starts at; `page_starts[i]` through
    /// `page_starts[i] + page_lens[i]` is page `i`'s row range.
    page_starts: Vec<usize>,
    page_lens: Vec<usize>,
    total_rows: usize,
}

impl PagedRowSequence {
    pub fn new(pool: Arc<BufferPoolManager>, table: impl Into<String>, version: u64) -> Self {
        Self {
            pool,
            table: table.into(),
            version,
            page_starts: Vec::new(),
            page_lens: Vec::new(),
            total_rows: 0,
        }
    }

    /// Builder-mode append: registers `rows` as the next page in this
    /// sequence. Not safe to call once the sequence has been published for
    /// concurrent reads.
    pub fn append_page(&mut self, rows: Vec<Row>) {
        let index = self.page_starts.len();
        let len = rows.len();
        let id = PageId::new(self.table.clone(), self.version, index);
        self.pool.register(id, rows);
        self.page_starts.push(self.total_rows);
        self.page_lens.push(len);
        self.total_rows += len;
    }

    pub fn len(&self) -> usize {
        self.total_rows
    }

    pub fn is_empty(&self) -> bool {
        self.total_rows == 0
    }

    fn page_for_row(&self, row_index: usize) -> Option<usize> {
        if row_index >= self.total_rows {
            return None;
        }
        // page_starts is sorted ascending; find the last page whose start is <= row_index.
        match self.page_starts.binary_search(&row_index) {
            Ok(i) => Some(i),
            Err(0) => None,
            Err(i) => Some(i - 1),
        }
    }

    pub fn get(&self, row_index: usize) -> Result<Option<Row>> {
        let Some(page_idx) = self.page_for_row(row_index) else {
            return Ok(None);
        };
        let id = PageId::new(self.table.clone(), self.version, page_idx);
        let page = self.pool.pin(&id)?;
        let offset = row_index - self.page_starts[page_idx];
        let row = page.with_rows(|rows| rows.get(offset).cloned()).flatten();
        self.pool.unpin(&id);
        Ok(row)
    }

    pub fn range(&self, start: usize, end: usize) -> Result<Vec<Row>> {
        let end = end.min(self.total_rows);
        if start >= end {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(end - start);
        let mut row_index = start;
        while row_index < end {
            let page_idx = self
                .page_for_row(row_index)
                .expect("row_index within [start, total_rows) always maps to a page");
            let id = PageId::new(self.table.clone(), self.version, page_idx);
            let page = self.pool.pin(&id)?;
            let page_start = self.page_starts[page_idx];
            let page_len = self.page_lens[page_idx];
            let page_end = (page_start + page_len).min(end);
            page.with_rows(|rows| {
                let lo = row_index - page_start;
                let hi = page_end - page_start;
                out.extend_from_slice(&rows[lo..hi]);
            });
            self.pool.unpin(&id);
            row_index = page_end;
        }
        Ok(out)
    }

    pub fn materialize(&self) -> Result<Vec<Row>> {
        self.range(0, self.total_rows)
    }

    pub fn page_count(&self) -> usize {
        self.page_starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PagingConfig;
    use crate::value::Value;

    fn pool() -> Arc<BufferPoolManager> {
        Arc::new(BufferPoolManager::new(PagingConfig {
            enabled: true,
            max_memory_bytes: Some(u64::MAX),
            ..PagingConfig::default()
        }))
    }

    fn rows(start: i64, n: i64) -> Vec<Row> {
        (start..start + n)
            .map(|i| {
                let mut r = Row::new();
                r.insert("id", Value::Int64(i));
                r
            })
            .collect()
    }

    #[test]
    fn get_and_range_across_page_boundaries() {
        let pool = pool();
        pool.update_latest_version("t", 1);
        let mut seq = PagedRowSequence::new(pool, "t", 1);
        seq.append_page(rows(0, 3));
        seq.append_page(rows(3, 3));
        seq.append_page(rows(6, 1));

        assert_eq!(seq.len(), 7);
        assert_eq!(seq.get(4).unwrap().unwrap().get("id"), Some(&Value::Int64(4)));
        assert_eq!(seq.get(100).unwrap(), None);

        let ranged = seq.range(2, 6).unwrap();
        let ids: Vec<i64> = ranged
            .iter()
            .map(|r| match r.get("id") {
                Some(Value::Int64(v)) => *v,
                _ => panic!("expected id"),
            })
            .collect();
        assert_eq!(ids, vec![2, 3, 4, 5]);
    }

    #[test]
    fn materialize_returns_every_row_in_order() {
        let pool = pool();
        pool.update_latest_version("t", 1);
        let mut seq = PagedRowSequence::new(pool, "t", 1);
        seq.append_page(rows(0, 2));
        seq.append_page(rows(2, 2));
        let all = seq.materialize().unwrap();
        assert_eq!(all.len(), 4);
    }
}
