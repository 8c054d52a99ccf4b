// Per-table version chain. Every mutation materializes the current version's
// rows, applies the change to a copy, and stores the result as a brand new
// version — there is no in-place patching of a published version, which is
// what lets a reader's snapshot stay consistent without any reader-side
// locking beyond the moment it grabs the `Arc<TableVersion>`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::config::PagingConfig;
use crate::error::{EngineError, Result};
use crate::row::Row;
use crate::schema::{validate_generated_columns, TableSchema};
use crate::storage::{BufferPoolManager, PagedRowSequence};

pub struct TableVersion {
    pub version: u64,
    pub created_at_ms: i64,
    pub schema: TableSchema,
    pub sequence: PagedRowSequence,
}

struct TableVersions {
    versions: RwLock<BTreeMap<u64, Arc<TableVersion>>>,
    latest: AtomicU64,
}

impl TableVersions {
    fn new(first: Arc<TableVersion>) -> Self {
        let version = first.version;
        let mut map = BTreeMap::new();
        map.insert(version, first);
        Self {
            versions: RwLock::new(map),
            latest: AtomicU64::new(version),
        }
    }

    fn latest(&self) -> Arc<TableVersion> {
        let latest = self.latest.load(Ordering::Acquire);
        self.versions
            .read()
            .get(&latest)
            .cloned()
            .expect("latest version always present in the version map")
    }

    fn publish(&self, version: Arc<TableVersion>) {
        let v = version.version;
        self.versions.write().insert(v, version);
        self.latest.store(v, Ordering::Release);
    }

    fn all_versions(&self) -> Vec<u64> {
        self.versions.read().keys().copied().collect()
    }
}

pub struct TableManager {
    pool: Arc<BufferPoolManager>,
    tables: DashMap<String, TableVersions>,
    temp_tables: DashMap<String, ()>,
    current_ver: AtomicU64,
    page_rows: usize,
}

impl TableManager {
    pub fn new(pool: Arc<BufferPoolManager>, paging: &PagingConfig) -> Self {
        Self {
            pool,
            tables: DashMap::new(),
            temp_tables: DashMap::new(),
            current_ver: AtomicU64::new(0),
            page_rows: paging.page_size.max(1),
        }
    }

    fn next_version(&self) -> u64 {
        self.current_ver.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn build_sequence(&self, table: &str, version: u64, rows: Vec<Row>) -> PagedRowSequence {
        let mut sequence = PagedRowSequence::new(self.pool.clone(), table, version);
        if rows.is_empty() {
            return sequence;
        }
        for chunk in rows.chunks(self.page_rows) {
            sequence.append_page(chunk.to_vec());
        }
        sequence
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        if self.tables.contains_key(&schema.name) {
            return Err(EngineError::TableAlreadyExists { table: schema.name });
        }
        validate_generated_columns(&schema)?;

        let name = schema.name.clone();
        let temporary = schema.temporary;
        let version = self.next_version();
        let sequence = self.build_sequence(&name, version, Vec::new());
        let tv = Arc::new(TableVersion {
            version,
            created_at_ms: now_ms(),
            schema,
            sequence,
        });

        self.pool.update_latest_version(&name, version);
        self.tables.insert(name.clone(), TableVersions::new(tv));
        if temporary {
            self.temp_tables.insert(name, ());
        }
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        let (_, versions) = self
            .tables
            .remove(name)
            .ok_or_else(|| EngineError::TableNotFound { table: name.to_string() })?;
        for version in versions.all_versions() {
            self.pool.unregister_table_version(name, version)?;
        }
        self.temp_tables.remove(name);
        Ok(())
    }

    pub fn truncate_table(&self, name: &str) -> Result<()> {
        let entry = self
            .tables
            .get(name)
            .ok_or_else(|| EngineError::TableNotFound { table: name.to_string() })?;
        let current = entry.latest();
        drop(entry);

        let version = self.next_version();
        let sequence = self.build_sequence(name, version, Vec::new());
        let tv = Arc::new(TableVersion {
            version,
            created_at_ms: now_ms(),
            schema: current.schema.clone(),
            sequence,
        });
        self.pool.update_latest_version(name, version);
        self.tables
            .get(name)
            .ok_or_else(|| EngineError::TableNotFound { table: name.to_string() })?
            .publish(tv);
        Ok(())
    }

    pub fn get_table_info(&self, name: &str) -> Result<TableSchema> {
        Ok(self.get_latest(name)?.schema.clone())
    }

    pub fn get_latest(&self, name: &str) -> Result<Arc<TableVersion>> {
        self.tables
            .get(name)
            .map(|e| e.latest())
            .ok_or_else(|| EngineError::TableNotFound { table: name.to_string() })
    }

    pub fn current_version(&self, name: &str) -> Result<u64> {
        Ok(self.get_latest(name)?.version)
    }

    /// Installs a brand new version for `table` built from `rows`, deep
    /// copying both schema and rows. Used by `LoadTable` (schema optionally
    /// replaced) and by the mutation engine (schema carried over unchanged).
    pub fn publish_new_version(&self, name: &str, schema: TableSchema, rows: Vec<Row>) -> Result<Arc<TableVersion>> {
        if !self.tables.contains_key(name) {
            return Err(EngineError::TableNotFound { table: name.to_string() });
        }
        let version = self.next_version();
        let sequence = self.build_sequence(name, version, rows);
        let tv = Arc::new(TableVersion {
            version,
            created_at_ms: now_ms(),
            schema,
            sequence,
        });
        self.pool.update_latest_version(name, version);
        self.tables.get(name).unwrap().publish(tv.clone());
        Ok(tv)
    }

    /// Like `publish_new_version`, but wraps an already-built `PagedRowSequence`
    /// directly instead of re-chunking a materialized `Vec<Row>`. This is what
    /// lets builder-mode bulk loads keep peak memory at one page's worth of
    /// rows: the sequence's pages were registered with the pool as they were
    /// produced, and this call never holds the full row set in memory at once.
    pub fn publish_sequence(&self, name: &str, schema: TableSchema, sequence: PagedRowSequence) -> Result<Arc<TableVersion>> {
        if !self.tables.contains_key(name) {
            return Err(EngineError::TableNotFound { table: name.to_string() });
        }
        let version = self.next_version();
        let tv = Arc::new(TableVersion {
            version,
            created_at_ms: now_ms(),
            schema,
            sequence,
        });
        self.pool.update_latest_version(name, version);
        self.tables.get(name).unwrap().publish(tv.clone());
        Ok(tv)
    }

    pub fn get_latest_table_data(&self, name: &str) -> Result<(TableSchema, Vec<Row>)> {
        let tv = self.get_latest(name)?;
        let rows = tv.sequence.materialize()?;
        Ok((tv.schema.clone(), rows))
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|e| e.key().clone()).collect()
    }

    pub fn non_temporary_table_names(&self) -> Vec<String> {
        self.tables
            .iter()
            .map(|e| e.key().clone())
            .filter(|name| !self.temp_tables.contains_key(name))
            .collect()
    }

    pub fn temporary_table_names(&self) -> Vec<String> {
        self.temp_tables.iter().map(|e| e.key().clone()).collect()
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnInfo;
    use crate::value::{Value, ValueType};

    fn manager() -> TableManager {
        let pool = Arc::new(BufferPoolManager::new(PagingConfig {
            enabled: true,
            max_memory_bytes: Some(u64::MAX),
            ..PagingConfig::default()
        }));
        TableManager::new(pool, &PagingConfig::default())
    }

    fn schema(name: &str) -> TableSchema {
        TableSchema::new(name, vec![ColumnInfo::new("id", ValueType::Int64)])
    }

    #[test]
    fn create_then_get_table_info_round_trips_schema() {
        let mgr = manager();
        mgr.create_table(schema("users")).unwrap();
        let info = mgr.get_table_info("users").unwrap();
        assert_eq!(info.name, "users");
    }

    #[test]
    fn create_table_twice_fails() {
        let mgr = manager();
        mgr.create_table(schema("users")).unwrap();
        assert!(matches!(
            mgr.create_table(schema("users")),
            Err(EngineError::TableAlreadyExists { .. })
        ));
    }

    #[test]
    fn publish_new_version_bumps_current_version_monotonically() {
        let mgr = manager();
        mgr.create_table(schema("users")).unwrap();
        let v1 = mgr.current_version("users").unwrap();

        let mut row = Row::new();
        row.insert("id", Value::Int64(1));
        mgr.publish_new_version("users", schema("users"), vec![row]).unwrap();
        let v2 = mgr.current_version("users").unwrap();
        assert!(v2 > v1);
    }

    #[test]
    fn truncate_clears_rows_but_keeps_schema() {
        let mgr = manager();
        mgr.create_table(schema("users")).unwrap();
        let mut row = Row::new();
        row.insert("id", Value::Int64(1));
        mgr.publish_new_version("users", schema("users"), vec![row]).unwrap();

        mgr.truncate_table("users").unwrap();
        let (s, rows) = mgr.get_latest_table_data("users").unwrap();
        assert_eq!(s.name, "users");
        assert!(rows.is_empty());
    }

    #[test]
    fn drop_table_then_get_info_fails_not_found() {
        let mgr = manager();
        mgr.create_table(schema("users")).unwrap();
        mgr.drop_table("users").unwrap();
        assert!(matches!(
            mgr.get_table_info("users"),
            Err(EngineError::TableNotFound { .. })
        ));
    }
}
