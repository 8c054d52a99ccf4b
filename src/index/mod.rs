// Secondary-index registry (§4.9). Every index lives under one of four
// families — ordered/hash scalar, full-text, spatial, vector — and is
// looked up by name. Names follow a fixed convention: `idx_<table>_<cols>`
// for scalar indexes, `idx_ft_<table>_<col>` for full-text, `idx_sp_<table>_
// <col>` for spatial, `idx_vec_<table>_<col>` for vector. `IndexManager`
// replaces the source interface's advisor/statistics/iterator machinery —
// none of that survives here, since nothing in this crate plans query
// execution off index usage history.

pub mod btree;
pub mod fulltext;
pub mod hash;
pub mod spatial;
pub mod vector;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::row::Row;
use crate::value::Value;

use btree::{BTreeIndex, IndexKey, RowId};
use fulltext::FullTextIndex;
use hash::HashIndex;
use spatial::{Geometry, Point, RTree};
use vector::{Metric, VectorFilter, VectorIndexHandle, VectorIndexParams, VectorIndexType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarIndexKind {
    BTree,
    Hash,
}

enum ScalarBacking {
    BTree(BTreeIndex),
    Hash(HashIndex),
}

impl ScalarBacking {
    fn insert(&self, key: IndexKey, row_id: RowId) -> Result<()> {
        match self {
            ScalarBacking::BTree(b) => b.insert(key, row_id),
            ScalarBacking::Hash(h) => h.insert(key, row_id),
        }
    }

    fn lookup_eq(&self, key: &IndexKey) -> Vec<RowId> {
        match self {
            ScalarBacking::BTree(b) => b.lookup_eq(key),
            ScalarBacking::Hash(h) => h.lookup_eq(key),
        }
    }

    fn lookup_range(&self, min: &IndexKey, max: &IndexKey) -> Result<Vec<RowId>> {
        match self {
            ScalarBacking::BTree(b) => b.lookup_range(min, max),
            ScalarBacking::Hash(_) => Err(EngineError::TypeMismatch {
                context: "hash index does not support range lookups".to_string(),
            }),
        }
    }

    fn clear(&self) {
        match self {
            ScalarBacking::BTree(b) => b.clear(),
            ScalarBacking::Hash(h) => h.clear(),
        }
    }
}

struct ScalarEntry {
    table: String,
    columns: Vec<String>,
    unique: bool,
    kind: ScalarIndexKind,
    backing: ScalarBacking,
}

struct FullTextEntry {
    table: String,
    column: String,
    index: FullTextIndex,
}

struct SpatialEntry {
    table: String,
    column: String,
    index: RTree,
}

struct VectorEntry {
    table: String,
    column: String,
    index_type: VectorIndexType,
    metric: Metric,
    dim: usize,
    params: VectorIndexParams,
    handle: RwLock<VectorIndexHandle>,
}

/// A replacement index built off to the side by `IndexManager::stage_table_indexes`,
/// not yet visible to any lookup. Kept as an untyped bundle so staging can
/// build every kind of index through the same loop.
enum BuiltIndex {
    Scalar(ScalarBacking),
    FullText(FullTextIndex),
    Spatial(RTree),
    Vector(VectorIndexHandle),
}

/// Every index built for one table by a `stage_table_indexes` call. Installing
/// it is infallible — all the fallible work already happened while staging —
/// so a caller can publish a new table version between staging and
/// `commit_staged` and know the install step itself can't fail.
pub struct StagedIndexes(Vec<(String, BuiltIndex)>);

fn scalar_index_name(table: &str, columns: &[String]) -> String {
    format!("idx_{table}_{}", columns.join("_"))
}

fn fulltext_index_name(table: &str, column: &str) -> String {
    format!("idx_ft_{table}_{column}")
}

fn spatial_index_name(table: &str, column: &str) -> String {
    format!("idx_sp_{table}_{column}")
}

fn vector_index_name(table: &str, column: &str) -> String {
    format!("idx_vec_{table}_{column}")
}

/// Builds one `IndexKey` per row for a (possibly composite) column list.
/// Single-column indexes key directly off that column's value. Composite
/// indexes concatenate each column's canonical text form behind a
/// separator byte that cannot appear in ordinary input — this orders
/// composite keys lexicographically by column rather than by a true
/// tuple comparison, a deliberate simplification over teaching
/// `IndexKey` to be an arbitrary-arity tuple.
fn composite_key(row: &Row, columns: &[String]) -> Result<IndexKey> {
    if columns.len() == 1 {
        let value = row.get(&columns[0]).unwrap_or(&Value::Null);
        return IndexKey::from_value(value);
    }
    const SEP: char = '\u{1}';
    let mut parts = Vec::with_capacity(columns.len());
    for col in columns {
        let value = row.get(col).unwrap_or(&Value::Null);
        let key = IndexKey::from_value(value)?;
        parts.push(match key {
            IndexKey::Number(n) => format!("{:?}", n),
            IndexKey::Text(s) => s,
        });
    }
    Ok(IndexKey::Text(parts.join(&SEP.to_string())))
}

#[derive(Default)]
pub struct IndexManager {
    scalar: DashMap<String, ScalarEntry>,
    fulltext: DashMap<String, FullTextEntry>,
    spatial: DashMap<String, SpatialEntry>,
    vector: DashMap<String, VectorEntry>,
    by_table: DashMap<String, Vec<String>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn register_name(&self, table: &str, name: &str) {
        self.by_table.entry(table.to_string()).or_default().push(name.to_string());
    }

    fn unregister_name(&self, table: &str, name: &str) {
        if let Some(mut names) = self.by_table.get_mut(table) {
            names.retain(|n| n != name);
        }
    }

    pub fn index_exists(&self, name: &str) -> bool {
        self.scalar.contains_key(name)
            || self.fulltext.contains_key(name)
            || self.spatial.contains_key(name)
            || self.vector.contains_key(name)
    }

    pub fn list_indexes(&self, table: &str) -> Vec<String> {
        self.by_table.get(table).map(|v| v.clone()).unwrap_or_default()
    }

    // ---- creation -------------------------------------------------------

    pub fn create_index(&self, table: &str, columns: Vec<String>, kind: ScalarIndexKind, unique: bool) -> Result<String> {
        let name = scalar_index_name(table, &columns);
        if self.index_exists(&name) {
            return Err(EngineError::IndexCreationFailed {
                index: name,
                reason: "index already exists".to_string(),
            });
        }
        let backing = match kind {
            ScalarIndexKind::BTree => ScalarBacking::BTree(BTreeIndex::new(unique)),
            ScalarIndexKind::Hash => ScalarBacking::Hash(HashIndex::new(unique)),
        };
        self.scalar.insert(
            name.clone(),
            ScalarEntry { table: table.to_string(), columns, unique, kind, backing },
        );
        self.register_name(table, &name);
        Ok(name)
    }

    pub fn create_fulltext_index(&self, table: &str, column: &str) -> Result<String> {
        let name = fulltext_index_name(table, column);
        if self.index_exists(&name) {
            return Err(EngineError::IndexCreationFailed {
                index: name,
                reason: "index already exists".to_string(),
            });
        }
        self.fulltext.insert(
            name.clone(),
            FullTextEntry { table: table.to_string(), column: column.to_string(), index: FullTextIndex::new() },
        );
        self.register_name(table, &name);
        Ok(name)
    }

    pub fn create_spatial_index(&self, table: &str, column: &str) -> Result<String> {
        let name = spatial_index_name(table, column);
        if self.index_exists(&name) {
            return Err(EngineError::IndexCreationFailed {
                index: name,
                reason: "index already exists".to_string(),
            });
        }
        self.spatial.insert(
            name.clone(),
            SpatialEntry { table: table.to_string(), column: column.to_string(), index: RTree::new() },
        );
        self.register_name(table, &name);
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
        let name = vector_index_name(table, column);
        if self.index_exists(&name) {
            return Err(EngineError::IndexCreationFailed {
                index: name,
                reason: "index already exists".to_string(),
            });
        }
        let handle = VectorIndexHandle::new(index_type, dim, metric, params);
        self.vector.insert(
            name.clone(),
            VectorEntry {
                table: table.to_string(),
                column: column.to_string(),
                index_type,
                metric,
                dim,
                params,
                handle: RwLock::new(handle),
            },
        );
        self.register_name(table, &name);
        Ok(name)
    }

    // ---- drop -------------------------------------------------------------

    pub fn drop_index(&self, name: &str) -> Result<()> {
        if let Some((_, entry)) = self.scalar.remove(name) {
            self.unregister_name(&entry.table, name);
            return Ok(());
        }
        if let Some((_, entry)) = self.fulltext.remove(name) {
            self.unregister_name(&entry.table, name);
            return Ok(());
        }
        if let Some((_, entry)) = self.spatial.remove(name) {
            self.unregister_name(&entry.table, name);
            return Ok(());
        }
        if let Some((_, entry)) = self.vector.remove(name) {
            self.unregister_name(&entry.table, name);
            return Ok(());
        }
        Err(EngineError::IndexNotFound { index: name.to_string() })
    }

    pub fn drop_vector_index(&self, name: &str) -> Result<()> {
        match self.vector.remove(name) {
            Some((_, entry)) => {
                self.unregister_name(&entry.table, name);
                Ok(())
            }
            None => Err(EngineError::IndexNotFound { index: name.to_string() }),
        }
    }

    pub fn drop_table_indexes(&self, table: &str) {
        let names = self.by_table.remove(table).map(|(_, v)| v).unwrap_or_default();
        for name in names {
            self.scalar.remove(&name);
            self.fulltext.remove(&name);
            self.spatial.remove(&name);
            self.vector.remove(&name);
        }
    }

    // ---- rebuild ------------------------------------------------------------

    /// Builds a fresh, fully populated replacement for one index without
    /// touching the live one. Every constraint an index enforces (unique
    /// key, key type, vector dimension) surfaces here as a typed `Err` — the
    /// live index, and everything a reader can see through it, is untouched
    /// either way.
    fn build_replacement(&self, name: &str, rows: &[Row]) -> Result<BuiltIndex> {
        if let Some(entry) = self.scalar.get(name) {
            let backing = match entry.kind {
                ScalarIndexKind::BTree => ScalarBacking::BTree(BTreeIndex::new(entry.unique)),
                ScalarIndexKind::Hash => ScalarBacking::Hash(HashIndex::new(entry.unique)),
            };
            let columns = entry.columns.clone();
            drop(entry);
            for (row_id, row) in rows.iter().enumerate() {
                let key = composite_key(row, &columns)?;
                backing.insert(key, row_id)?;
            }
            return Ok(BuiltIndex::Scalar(backing));
        }
        if let Some(entry) = self.fulltext.get(name) {
            let column = entry.column.clone();
            drop(entry);
            let index = FullTextIndex::new();
            for (row_id, row) in rows.iter().enumerate() {
                if let Some(Value::String(text)) = row.get(&column) {
                    index.index_document(row_id, text);
                }
            }
            return Ok(BuiltIndex::FullText(index));
        }
        if let Some(entry) = self.spatial.get(name) {
            let column = entry.column.clone();
            drop(entry);
            let index = RTree::new();
            for (row_id, row) in rows.iter().enumerate() {
                if let Some(point) = row_point(row, &column) {
                    index.insert(&Geometry::Point(point), row_id);
                }
            }
            return Ok(BuiltIndex::Spatial(index));
        }
        if let Some(entry) = self.vector.get(name) {
            let index_type = entry.index_type;
            let metric = entry.metric;
            let dim = entry.dim;
            let params = entry.params;
            let column = entry.column.clone();
            drop(entry);
            let mut handle = VectorIndexHandle::new(index_type, dim, metric, params);
            let pairs: Vec<(usize, Vec<f32>)> = rows
                .iter()
                .enumerate()
                .filter_map(|(row_id, row)| match row.get(&column) {
                    Some(Value::Vector(v)) => Some((row_id, v.clone())),
                    _ => None,
                })
                .collect();
            handle.build(&pairs)?;
            return Ok(BuiltIndex::Vector(handle));
        }
        Err(EngineError::IndexNotFound { index: name.to_string() })
    }

    fn install_replacement(&self, name: &str, built: BuiltIndex) {
        match built {
            BuiltIndex::Scalar(backing) => {
                if let Some(mut entry) = self.scalar.get_mut(name) {
                    entry.backing = backing;
                }
            }
            BuiltIndex::FullText(index) => {
                if let Some(mut entry) = self.fulltext.get_mut(name) {
                    entry.index = index;
                }
            }
            BuiltIndex::Spatial(index) => {
                if let Some(mut entry) = self.spatial.get_mut(name) {
                    entry.index = index;
                }
            }
            BuiltIndex::Vector(handle) => {
                if let Some(entry) = self.vector.get(name) {
                    *entry.handle.write() = handle;
                }
            }
        }
    }

    /// Builds a replacement for every index registered on `table` off to the
    /// side and returns them unstaged. Fails fast on the first constraint
    /// violation without installing anything — a caller publishes the new
    /// table version only once this succeeds, then calls `commit_staged`,
    /// so a rejected row set never leaves a half-rebuilt index or an
    /// orphaned new version behind (§7, §8 index/table consistency).
    pub fn stage_table_indexes(&self, table: &str, rows: &[Row]) -> Result<StagedIndexes> {
        let mut built = Vec::new();
        for name in self.list_indexes(table) {
            let replacement = self.build_replacement(&name, rows)?;
            built.push((name, replacement));
        }
        Ok(StagedIndexes(built))
    }

    /// Installs every index built by a prior `stage_table_indexes` call.
    /// Infallible: all the fallible work already happened during staging.
    pub fn commit_staged(&self, staged: StagedIndexes) {
        for (name, replacement) in staged.0 {
            self.install_replacement(&name, replacement);
        }
    }

    /// Stage-then-commit in one call, for sites with no version to publish
    /// in between (index creation, truncate).
    pub fn rebuild_table_indexes(&self, table: &str, rows: &[Row]) -> Result<()> {
        let staged = self.stage_table_indexes(table, rows)?;
        self.commit_staged(staged);
        Ok(())
    }

    // ---- lookups used by the query engine ----------------------------------

    /// Finds a scalar index over exactly this single column, preferring a
    /// B-tree (it supports both equality and range) over a hash index.
    pub fn find_scalar_index(&self, table: &str, column: &str) -> Option<String> {
        let mut hash_fallback = None;
        for name in self.list_indexes(table) {
            if let Some(entry) = self.scalar.get(&name) {
                if entry.columns == [column.to_string()] {
                    match entry.kind {
                        ScalarIndexKind::BTree => return Some(name),
                        ScalarIndexKind::Hash => hash_fallback = Some(name),
                    }
                }
            }
        }
        hash_fallback
    }

    pub fn scalar_kind(&self, name: &str) -> Option<ScalarIndexKind> {
        self.scalar.get(name).map(|e| e.kind)
    }

    pub fn scalar_is_unique(&self, name: &str) -> Option<bool> {
        self.scalar.get(name).map(|e| e.unique)
    }

    pub fn lookup_eq(&self, name: &str, key: &IndexKey) -> Result<Vec<RowId>> {
        let entry = self.scalar.get(name).ok_or_else(|| EngineError::IndexNotFound { index: name.to_string() })?;
        Ok(entry.backing.lookup_eq(key))
    }

    pub fn lookup_range(&self, name: &str, min: &IndexKey, max: &IndexKey) -> Result<Vec<RowId>> {
        let entry = self.scalar.get(name).ok_or_else(|| EngineError::IndexNotFound { index: name.to_string() })?;
        entry.backing.lookup_range(min, max)
    }

    pub fn find_fulltext_index(&self, table: &str, column: &str) -> Option<String> {
        let name = fulltext_index_name(table, column);
        self.fulltext.contains_key(&name).then_some(name)
    }

    pub fn fulltext_search(&self, name: &str, query: &str) -> Result<Vec<RowId>> {
        let entry = self.fulltext.get(name).ok_or_else(|| EngineError::IndexNotFound { index: name.to_string() })?;
        Ok(entry.index.search(query))
    }

    pub fn find_spatial_index(&self, table: &str, column: &str) -> Option<String> {
        let name = spatial_index_name(table, column);
        self.spatial.contains_key(&name).then_some(name)
    }

    pub fn spatial_search_intersects(&self, name: &str, query: &spatial::BoundingBox) -> Result<Vec<RowId>> {
        let entry = self.spatial.get(name).ok_or_else(|| EngineError::IndexNotFound { index: name.to_string() })?;
        Ok(entry.index.search_intersects(query))
    }

    pub fn find_vector_index(&self, table: &str, column: &str) -> Option<String> {
        let name = vector_index_name(table, column);
        self.vector.contains_key(&name).then_some(name)
    }

    pub fn vector_index_type(&self, name: &str) -> Option<VectorIndexType> {
        self.vector.get(name).map(|e| e.index_type)
    }

    pub fn vector_metric(&self, name: &str) -> Option<Metric> {
        self.vector.get(name).map(|e| e.metric)
    }

    pub fn vector_search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        filter: Option<&VectorFilter>,
    ) -> Result<(Vec<usize>, Vec<f32>)> {
        let entry = self.vector.get(name).ok_or_else(|| EngineError::IndexNotFound { index: name.to_string() })?;
        entry.handle.read().search(query, k, filter)
    }
}

fn row_point(row: &Row, column: &str) -> Option<Point> {
    match row.get(column) {
        Some(Value::Vector(v)) if v.len() >= 2 => Some(Point { x: v[0] as f64, y: v[1] as f64 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn scalar_index_naming_and_rebuild() {
        let mgr = IndexManager::new();
        let name = mgr.create_index("users", vec!["age".to_string()], ScalarIndexKind::BTree, false).unwrap();
        assert_eq!(name, "idx_users_age");

        let rows = vec![row(&[("age", Value::Int64(30))]), row(&[("age", Value::Int64(40))])];
        mgr.rebuild_table_indexes("users", &rows).unwrap();

        let hits = mgr.lookup_eq(&name, &IndexKey::from_value(&Value::Int64(30)).unwrap()).unwrap();
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn creating_duplicate_index_fails() {
        let mgr = IndexManager::new();
        mgr.create_index("t", vec!["a".to_string()], ScalarIndexKind::Hash, false).unwrap();
        assert!(matches!(
            mgr.create_index("t", vec!["a".to_string()], ScalarIndexKind::Hash, false),
            Err(EngineError::IndexCreationFailed { .. })
        ));
    }

    #[test]
    fn drop_table_indexes_cascades_every_kind() {
        let mgr = IndexManager::new();
        let scalar = mgr.create_index("t", vec!["a".to_string()], ScalarIndexKind::BTree, false).unwrap();
        let ft = mgr.create_fulltext_index("t", "body").unwrap();
        let sp = mgr.create_spatial_index("t", "geo").unwrap();
        let vec_idx = mgr
            .create_vector_index("t", "emb", Metric::L2, VectorIndexType::Flat, 3, VectorIndexParams::default())
            .unwrap();

        mgr.drop_table_indexes("t");
        assert!(!mgr.index_exists(&scalar));
        assert!(!mgr.index_exists(&ft));
        assert!(!mgr.index_exists(&sp));
        assert!(!mgr.index_exists(&vec_idx));
        assert!(mgr.list_indexes("t").is_empty());
    }

    #[test]
    fn vector_index_rebuild_and_search() {
        let mgr = IndexManager::new();
        let name = mgr
            .create_vector_index("docs", "embedding", Metric::L2, VectorIndexType::Flat, 2, VectorIndexParams::default())
            .unwrap();
        let rows = vec![
            row(&[("embedding", Value::Vector(vec![0.0, 0.0]))]),
            row(&[("embedding", Value::Vector(vec![9.0, 9.0]))]),
        ];
        mgr.rebuild_table_indexes("docs", &rows).unwrap();
        let (ids, _) = mgr.vector_search(&name, &[0.1, 0.1], 1, None).unwrap();
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn fulltext_index_rebuild_and_search() {
        let mgr = IndexManager::new();
        let name = mgr.create_fulltext_index("docs", "body").unwrap();
        let rows = vec![row(&[("body", Value::String("the quick fox".into()))]), row(&[("body", Value::String("lazy dog".into()))])];
        mgr.rebuild_table_indexes("docs", &rows).unwrap();
        assert_eq!(mgr.fulltext_search(&name, "quick").unwrap(), vec![0]);
    }
}
