// Public entry point tying the MVCC table manager, index manager, and
// buffer pool together into the single object a host actually talks to.
// Every operation checks `connected` first, matching the lifecycle the
// source interface describes: `Connect` opens for mutation, `Close` tears
// down background work and spill state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::config::{EngineConfig, VectorIndexParams};
use crate::error::{EngineError, Result};
use crate::index::btree::RowId;
use crate::index::vector::{Metric, VectorFilter, VectorIndexType};
use crate::index::{IndexManager, ScalarIndexKind};
use crate::mvcc::TableManager;
use crate::predicate::{DefaultPredicateEvaluator, Filter, PredicateEvaluator};
use crate::query::{QueryEngine, QueryOptions, QueryResult};
use crate::row::Row;
use crate::schema::TableSchema;
use crate::storage::BufferPoolManager;

/// Per-call knobs shared by `Insert`/`Update`/`Delete`/`BulkLoad`; `cancel`
/// defaults to a fresh, never-cancelled token when the caller doesn't need
/// one.
#[derive(Clone, Default)]
pub struct MutationOptions {
    pub cancel: CancellationToken,
}

pub struct MutationResult {
    pub affected: usize,
    pub version: u64,
}

/// Builder-mode producer for `BulkLoad`: each `add_page` call is registered
/// with the pool immediately, so peak memory is bounded by one page's worth
/// of rows regardless of how many pages the caller feeds in.
pub struct PageBuilder {
    table: String,
    sequence: crate::storage::PagedRowSequence,
    total_rows: usize,
}

impl PageBuilder {
    pub fn add_page(&mut self, rows: Vec<Row>) {
        self.total_rows += rows.len();
        self.sequence.append_page(rows);
    }
}

struct Background {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// The database engine. Holds no lock of its own beyond `connected` and the
/// background-evictor handle — every real concurrency decision is made by
/// `TableManager`, `IndexManager`, and `BufferPoolManager` individually.
pub struct Engine {
    config: EngineConfig,
    pool: Arc<BufferPoolManager>,
    tables: TableManager,
    indexes: IndexManager,
    evaluator: Box<dyn PredicateEvaluator>,
    connected: AtomicBool,
    background: Mutex<Option<Background>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let pool = Arc::new(BufferPoolManager::new(config.paging.clone()));
        let tables = TableManager::new(pool.clone(), &config.paging);
        Self {
            config,
            pool,
            tables,
            indexes: IndexManager::new(),
            evaluator: Box::new(DefaultPredicateEvaluator),
            connected: AtomicBool::new(false),
            background: Mutex::new(None),
        }
    }

    /// Swaps in a caller-supplied predicate evaluator (e.g. one that
    /// understands additional operators); must be called before `connect`.
    pub fn with_evaluator(mut self, evaluator: Box<dyn PredicateEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    fn require_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::NotConnected)
        }
    }

    // ---- lifecycle ----------------------------------------------------

    pub fn connect(&self) -> Result<()> {
        if self.connected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        std::fs::create_dir_all(&self.config.paging.spill_dir)?;

        let stop = Arc::new(AtomicBool::new(false));
        let pool = self.pool.clone();
        let interval = self.config.paging.evict_interval;
        let stop_clone = stop.clone();
        let handle = std::thread::spawn(move || {
            while !stop_clone.load(Ordering::Acquire) {
                std::thread::sleep(interval);
                if stop_clone.load(Ordering::Acquire) {
                    break;
                }
                while pool.try_evict() {}
            }
        });
        *self.background.lock() = Some(Background { stop, handle });
        info!("engine connected");
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(bg) = self.background.lock().take() {
            bg.stop.store(true, Ordering::Release);
            let _ = bg.handle.join();
        }
        if self.config.paging.spill_dir.exists() {
            std::fs::remove_dir_all(&self.config.paging.spill_dir)?;
        }
        debug!("engine closed");
        Ok(())
    }

    // ---- table lifecycle ------------------------------------------------

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        self.require_connected()?;
        self.tables.create_table(schema)
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.require_connected()?;
        self.tables.drop_table(name)?;
        self.indexes.drop_table_indexes(name);
        Ok(())
    }

    pub fn truncate_table(&self, name: &str) -> Result<()> {
        self.require_connected()?;
        let staged = self.indexes.stage_table_indexes(name, &[])?;
        self.tables.truncate_table(name)?;
        self.indexes.commit_staged(staged);
        Ok(())
    }

    pub fn get_table_info(&self, name: &str) -> Result<TableSchema> {
        self.require_connected()?;
        self.tables.get_table_info(name)
    }

    pub fn get_tables(&self) -> Result<Vec<String>> {
        self.require_connected()?;
        Ok(self.tables.non_temporary_table_names())
    }

    pub fn get_all_tables(&self) -> Result<Vec<String>> {
        self.require_connected()?;
        Ok(self.tables.table_names())
    }

    pub fn get_temporary_tables(&self) -> Result<Vec<String>> {
        self.require_connected()?;
        Ok(self.tables.temporary_table_names())
    }

    // ---- MVCC adapter (external data-source seam) ------------------------

    pub fn load_table(&self, name: &str, schema: TableSchema, rows: Vec<Row>) -> Result<u64> {
        self.require_connected()?;
        let staged = self.indexes.stage_table_indexes(name, &rows)?;
        let version = self.tables.publish_new_version(name, schema, rows)?.version;
        self.indexes.commit_staged(staged);
        Ok(version)
    }

    pub fn get_latest_table_data(&self, name: &str) -> Result<(TableSchema, Vec<Row>)> {
        self.require_connected()?;
        self.tables.get_latest_table_data(name)
    }

    pub fn get_current_version(&self, name: &str) -> Result<u64> {
        self.require_connected()?;
        self.tables.current_version(name)
    }

    // ---- mutations --------------------------------------------------------

    pub fn insert(&self, table: &str, rows: &[Row], opts: &MutationOptions) -> Result<MutationResult> {
        self.require_connected()?;
        opts.cancel.check()?;
        let (schema, existing) = self.tables.get_latest_table_data(table)?;
        let new_rows = crate::mvcc::mutation::apply_insert(existing, rows);
        let affected = rows.len();
        let staged = self.indexes.stage_table_indexes(table, &new_rows)?;
        let tv = self.tables.publish_new_version(table, schema, new_rows)?;
        self.indexes.commit_staged(staged);
        Ok(MutationResult { affected, version: tv.version })
    }

    pub fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: &Row,
        opts: &MutationOptions,
    ) -> Result<MutationResult> {
        self.require_connected()?;
        opts.cancel.check()?;
        let (schema, existing) = self.tables.get_latest_table_data(table)?;
        let (new_rows, affected) = crate::mvcc::mutation::apply_update(existing, filters, patch, self.evaluator.as_ref());
        let staged = self.indexes.stage_table_indexes(table, &new_rows)?;
        let tv = self.tables.publish_new_version(table, schema, new_rows)?;
        self.indexes.commit_staged(staged);
        Ok(MutationResult { affected, version: tv.version })
    }

    pub fn delete(&self, table: &str, filters: &[Filter], opts: &MutationOptions) -> Result<MutationResult> {
        self.require_connected()?;
        opts.cancel.check()?;
        let (schema, existing) = self.tables.get_latest_table_data(table)?;
        let (new_rows, affected) = crate::mvcc::mutation::apply_delete(existing, filters, self.evaluator.as_ref());
        let staged = self.indexes.stage_table_indexes(table, &new_rows)?;
        let tv = self.tables.publish_new_version(table, schema, new_rows)?;
        self.indexes.commit_staged(staged);
        Ok(MutationResult { affected, version: tv.version })
    }

    /// Starts a builder-mode bulk load: the caller feeds pages through
    /// `PageBuilder::add_page`, each one registered with the pool as soon
    /// as it arrives, then calls `finish_bulk_load` to publish the result.
    pub fn begin_bulk_load(&self, table: &str) -> Result<PageBuilder> {
        self.require_connected()?;
        let current = self.tables.current_version(table)?;
        let sequence = crate::storage::PagedRowSequence::new(self.pool.clone(), table, current + 1);
        Ok(PageBuilder { table: table.to_string(), sequence, total_rows: 0 })
    }

    pub fn finish_bulk_load(&self, builder: PageBuilder) -> Result<MutationResult> {
        self.require_connected()?;
        let (schema, _) = self.tables.get_latest_table_data(&builder.table)?;
        let materialized = builder.sequence.materialize()?;
        let staged = self.indexes.stage_table_indexes(&builder.table, &materialized)?;
        let tv = self.tables.publish_sequence(&builder.table, schema, builder.sequence)?;
        self.indexes.commit_staged(staged);
        Ok(MutationResult { affected: builder.total_rows, version: tv.version })
    }

    // ---- reads --------------------------------------------------------------

    fn query_engine(&self) -> QueryEngine<'_> {
        QueryEngine::new(&self.tables, &self.indexes, self.evaluator.as_ref())
    }

    pub fn query(&self, table: &str, opts: &QueryOptions, cancel: &CancellationToken) -> Result<QueryResult> {
        self.require_connected()?;
        self.query_engine().query(table, opts, cancel)
    }

    pub fn filter(
        &self,
        table: &str,
        filter: &Filter,
        offset: usize,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Row>, usize)> {
        self.require_connected()?;
        self.query_engine().filter(table, filter, offset, limit, cancel)
    }

    pub fn vector_search(
        &self,
        table: &str,
        column: &str,
        query: &[f32],
        k: usize,
        filter: Option<&VectorFilter>,
    ) -> Result<(Vec<RowId>, Vec<f32>)> {
        self.require_connected()?;
        let name = self
            .indexes
            .find_vector_index(table, column)
            .ok_or_else(|| EngineError::IndexNotFound { index: format!("idx_vec_{table}_{column}") })?;
        self.indexes.vector_search(&name, query, k, filter)
    }

    pub fn spatial_search_intersects(
        &self,
        table: &str,
        column: &str,
        query: &crate::index::spatial::BoundingBox,
    ) -> Result<Vec<RowId>> {
        self.require_connected()?;
        let name = self
            .indexes
            .find_spatial_index(table, column)
            .ok_or_else(|| EngineError::IndexNotFound { index: format!("idx_sp_{table}_{column}") })?;
        self.indexes.spatial_search_intersects(&name, query)
    }

    pub fn fulltext_search(&self, table: &str, column: &str, query: &str) -> Result<Vec<RowId>> {
        self.require_connected()?;
        let name = self
            .indexes
            .find_fulltext_index(table, column)
            .ok_or_else(|| EngineError::IndexNotFound { index: format!("idx_ft_{table}_{column}") })?;
        self.indexes.fulltext_search(&name, query)
    }

    // ---- index management -------------------------------------------------

    /// Registers the index and populates it from the table's current rows.
    /// Registration itself can't fail partway (the index starts empty), but
    /// population can (duplicate key under `unique`, mismatched key types) —
    /// if it does, the just-registered, still-empty index is torn back out
    /// so a failed `create_index` leaves the index set exactly as it found
    /// it, matching every other index-touching mutation in this file.
    pub fn create_index(&self, table: &str, column: &str, kind: ScalarIndexKind, unique: bool) -> Result<String> {
        self.require_connected()?;
        let name = self.indexes.create_index(table, vec![column.to_string()], kind, unique)?;
        let (_, rows) = self.tables.get_latest_table_data(table)?;
        if let Err(e) = self.indexes.rebuild_table_indexes(table, &rows) {
            let _ = self.indexes.drop_index(&name);
            return Err(e);
        }
        Ok(name)
    }

    pub fn create_index_with_columns(
        &self,
        table: &str,
        columns: Vec<String>,
        kind: ScalarIndexKind,
        unique: bool,
    ) -> Result<String> {
        self.require_connected()?;
        let name = self.indexes.create_index(table, columns, kind, unique)?;
        let (_, rows) = self.tables.get_latest_table_data(table)?;
        if let Err(e) = self.indexes.rebuild_table_indexes(table, &rows) {
            let _ = self.indexes.drop_index(&name);
            return Err(e);
        }
        Ok(name)
    }

    pub fn create_fulltext_index(&self, table: &str, column: &str) -> Result<String> {
        self.require_connected()?;
        let name = self.indexes.create_fulltext_index(table, column)?;
        let (_, rows) = self.tables.get_latest_table_data(table)?;
        if let Err(e) = self.indexes.rebuild_table_indexes(table, &rows) {
            let _ = self.indexes.drop_index(&name);
            return Err(e);
        }
        Ok(name)
    }

    pub fn create_spatial_index(&self, table: &str, column: &str) -> Result<String> {
        self.require_connected()?;
        let name = self.indexes.create_spatial_index(table, column)?;
        let (_, rows) = self.tables.get_latest_table_data(table)?;
        if let Err(e) = self.indexes.rebuild_table_indexes(table, &rows) {
            let _ = self.indexes.drop_index(&name);
            return Err(e);
        }
        Ok(name)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_vector_index(
        &self,
        table: &str,
        column: &str,
        metric: Metric,
        index_type: VectorIndexType,
        dim: usize,
        params: VectorIndexParams,
    ) -> Result<String> {
        self.require_connected()?;
        let name = self.indexes.create_vector_index(table, column, metric, index_type, dim, params)?;
        let (_, rows) = self.tables.get_latest_table_data(table)?;
        if let Err(e) = self.indexes.rebuild_table_indexes(table, &rows) {
            let _ = self.indexes.drop_index(&name);
            return Err(e);
        }
        Ok(name)
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.require_connected()?;
        self.indexes.drop_index(name)
    }

    pub fn drop_vector_index(&self, name: &str) -> Result<()> {
        self.require_connected()?;
        self.indexes.drop_vector_index(name)
    }

    pub fn list_indexes(&self, table: &str) -> Result<Vec<String>> {
        self.require_connected()?;
        Ok(self.indexes.list_indexes(table))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.connected.load(Ordering::Acquire) {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PagingConfig;
    use crate::schema::ColumnInfo;
    use crate::value::{Value, ValueType};

    fn engine() -> Engine {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            paging: PagingConfig {
                enabled: true,
                max_memory_bytes: Some(u64::MAX),
                spill_dir: dir.path().to_path_buf(),
                ..PagingConfig::default()
            },
        };
        std::mem::forget(dir);
        Engine::new(config)
    }

    fn schema(name: &str) -> TableSchema {
        TableSchema::new(name, vec![ColumnInfo::new("id", ValueType::Int64), ColumnInfo::new("age", ValueType::Int64)])
    }

    fn row(id: i64, age: i64) -> Row {
        let mut r = Row::new();
        r.insert("id", Value::Int64(id));
        r.insert("age", Value::Int64(age));
        r
    }

    #[test]
    fn operations_fail_before_connect() {
        let engine = engine();
        assert!(matches!(engine.create_table(schema("t")), Err(EngineError::NotConnected)));
    }

    #[test]
    fn empty_table_query_returns_no_rows() {
        let engine = engine();
        engine.connect().unwrap();
        engine.create_table(schema("t")).unwrap();
        let result = engine.query("t", &QueryOptions::default(), &CancellationToken::new()).unwrap();
        assert_eq!(result.total, 0);
        engine.close().unwrap();
    }

    #[test]
    fn insert_then_query_sees_new_rows_and_is_isolated() {
        let engine = engine();
        engine.connect().unwrap();
        engine.create_table(schema("t")).unwrap();
        engine.insert("t", &[row(1, 30), row(2, 40)], &MutationOptions::default()).unwrap();

        let mut result = engine.query("t", &QueryOptions::default(), &CancellationToken::new()).unwrap();
        assert_eq!(result.total, 2);
        result.rows[0].insert("age", Value::Int64(-1));

        let result2 = engine.query("t", &QueryOptions::default(), &CancellationToken::new()).unwrap();
        assert_ne!(result2.rows[0].get("age"), Some(&Value::Int64(-1)));
        engine.close().unwrap();
    }

    #[test]
    fn update_and_delete_bump_version_and_mutate_rows() {
        let engine = engine();
        engine.connect().unwrap();
        engine.create_table(schema("t")).unwrap();
        engine.insert("t", &[row(1, 30), row(2, 40)], &MutationOptions::default()).unwrap();
        let v1 = engine.get_current_version("t").unwrap();

        let mut patch = Row::new();
        patch.insert("age", Value::Int64(99));
        let filters = vec![Filter::eq("id", Value::Int64(1))];
        let update_result = engine.update("t", &filters, &patch, &MutationOptions::default()).unwrap();
        assert_eq!(update_result.affected, 1);
        assert!(engine.get_current_version("t").unwrap() > v1);

        let delete_result = engine.delete("t", &filters, &MutationOptions::default()).unwrap();
        assert_eq!(delete_result.affected, 1);
        let result = engine.query("t", &QueryOptions::default(), &CancellationToken::new()).unwrap();
        assert_eq!(result.total, 1);
        engine.close().unwrap();
    }

    #[test]
    fn scalar_index_delete_and_update_stay_consistent() {
        let engine = engine();
        engine.connect().unwrap();
        engine.create_table(schema("t")).unwrap();
        engine.insert("t", &[row(1, 30), row(2, 40), row(3, 50)], &MutationOptions::default()).unwrap();
        engine.create_index("t", "age", ScalarIndexKind::BTree, false).unwrap();

        let filters = vec![Filter::eq("id", Value::Int64(2))];
        engine.delete("t", &filters, &MutationOptions::default()).unwrap();

        let opts = QueryOptions { filters: vec![Filter::eq("age", Value::Int64(40))], ..Default::default() };
        let result = engine.query("t", &opts, &CancellationToken::new()).unwrap();
        assert_eq!(result.total, 0);

        let mut patch = Row::new();
        patch.insert("age", Value::Int64(99));
        engine.update("t", &[Filter::eq("id", Value::Int64(1))], &patch, &MutationOptions::default()).unwrap();
        let opts = QueryOptions { filters: vec![Filter::eq("age", Value::Int64(99))], ..Default::default() };
        let result = engine.query("t", &opts, &CancellationToken::new()).unwrap();
        assert_eq!(result.total, 1);
        engine.close().unwrap();
    }

    #[test]
    fn bulk_load_publishes_rows_via_pages() {
        let engine = engine();
        engine.connect().unwrap();
        engine.create_table(schema("t")).unwrap();
        let mut builder = engine.begin_bulk_load("t").unwrap();
        builder.add_page(vec![row(1, 10), row(2, 20)]);
        builder.add_page(vec![row(3, 30)]);
        let result = engine.finish_bulk_load(builder).unwrap();
        assert_eq!(result.affected, 3);
        let (_, rows) = engine.get_latest_table_data("t").unwrap();
        assert_eq!(rows.len(), 3);
        engine.close().unwrap();
    }

    #[test]
    fn vector_index_search_round_trips_through_engine() {
        let engine = engine();
        engine.connect().unwrap();
        let mut schema = TableSchema::new("docs", vec![ColumnInfo::new("embedding", ValueType::Vector)]);
        schema.columns[0].nullable = true;
        engine.create_table(schema).unwrap();

        let mut r1 = Row::new();
        r1.insert("embedding", Value::Vector(vec![0.0, 0.0]));
        let mut r2 = Row::new();
        r2.insert("embedding", Value::Vector(vec![9.0, 9.0]));
        engine.insert("docs", &[r1, r2], &MutationOptions::default()).unwrap();

        engine
            .create_vector_index("docs", "embedding", Metric::L2, VectorIndexType::Flat, 2, VectorIndexParams::default())
            .unwrap();
        let (ids, _) = engine.vector_search("docs", "embedding", &[0.1, 0.1], 1, None).unwrap();
        assert_eq!(ids, vec![0]);
        engine.close().unwrap();
    }

    #[test]
    fn drop_table_cascades_indexes() {
        let engine = engine();
        engine.connect().unwrap();
        engine.create_table(schema("t")).unwrap();
        let name = engine.create_index("t", "age", ScalarIndexKind::BTree, false).unwrap();
        engine.drop_table("t").unwrap();
        assert!(engine.list_indexes("t").unwrap().is_empty());
        assert!(engine.drop_index(&name).is_err());
    }

    #[test]
    fn close_removes_spill_directory() {
        let engine = engine();
        engine.connect().unwrap();
        let spill_dir = engine.config.paging.spill_dir.clone();
        assert!(spill_dir.exists());
        engine.close().unwrap();
        assert!(!spill_dir.exists());
    }
}
