// Ordered scalar index. `std::collections::BTreeMap` already implements a
// B-tree; reaching for a hand-rolled `BPlusTree<K, V>` here (the way the
// source interface's stub did) would just reimplement what the standard
// library gives us for free, so the tree structure comes from `BTreeMap` and
// this module's job is the row-ID posting lists and the numeric/string key
// typing rules on top of it.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::value::Value;

pub type RowId = usize;

/// An ordered, totally-comparable index key. Numeric variants compare by
/// value (so `Int32(2)` and `Float64(2.0)` collide on purpose); `String`
/// compares lexicographically. Mixing numeric and string keys in the same
/// index is rejected with `TypeMismatch`.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    Number(NotNan),
    Text(String),
}

/// Minimal non-NaN f64 wrapper giving `IndexKey` a total order without
/// pulling in the `ordered-float` crate for one invariant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotNan(f64);

impl NotNan {
    pub fn new(v: f64) -> Option<Self> {
        if v.is_nan() {
            None
        } else {
            Some(Self(v))
        }
    }

    fn bits(&self) -> u64 {
        // Normalize -0.0 to 0.0 so both hash and compare identically.
        (if self.0 == 0.0 { 0.0 } else { self.0 }).to_bits()
    }
}

impl std::hash::Hash for NotNan {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

impl std::hash::Hash for IndexKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            IndexKey::Number(n) => {
                0u8.hash(state);
                n.hash(state);
            }
            IndexKey::Text(s) => {
                1u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl Eq for NotNan {}
impl PartialOrd for NotNan {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for NotNan {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

impl Eq for IndexKey {}
impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (IndexKey::Number(a), IndexKey::Number(b)) => a.cmp(b),
            (IndexKey::Text(a), IndexKey::Text(b)) => a.cmp(b),
            // Unreachable in practice: `insert` rejects mixed types before
            // they ever land in the same tree.
            (IndexKey::Number(_), IndexKey::Text(_)) => std::cmp::Ordering::Less,
            (IndexKey::Text(_), IndexKey::Number(_)) => std::cmp::Ordering::Greater,
        }
    }
}

impl IndexKey {
    pub fn from_value(value: &Value) -> Result<Self> {
        if let Some(n) = value.as_f64() {
            return Ok(IndexKey::Number(NotNan::new(n).ok_or_else(|| EngineError::TypeMismatch {
                context: "NaN cannot be used as an index key".to_string(),
            })?));
        }
        if let Some(s) = value.as_str() {
            return Ok(IndexKey::Text(s.to_string()));
        }
        Err(EngineError::TypeMismatch {
            context: format!("value of type {:?} is not an orderable index key", value.value_type()),
        })
    }

    fn check_same_kind(&self, other: &IndexKey) -> Result<()> {
        match (self, other) {
            (IndexKey::Number(_), IndexKey::Number(_)) | (IndexKey::Text(_), IndexKey::Text(_)) => Ok(()),
            _ => Err(EngineError::TypeMismatch {
                context: "b-tree index key type mismatch between numeric and string keys".to_string(),
            }),
        }
    }
}

pub struct BTreeIndex {
    unique: bool,
    tree: RwLock<BTreeMap<IndexKey, Vec<RowId>>>,
}

impl BTreeIndex {
    pub fn new(unique: bool) -> Self {
        Self {
            unique,
            tree: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, key: IndexKey, row_id: RowId) -> Result<()> {
        let mut tree = self.tree.write();
        if let Some((existing_key, _)) = tree.iter().next() {
            key.check_same_kind(existing_key)?;
        }
        if self.unique && tree.get(&key).is_some_and(|p| !p.is_empty()) {
            return Err(EngineError::UniqueViolation {
                index: "btree".to_string(),
                key: format!("{key:?}"),
            });
        }
        tree.entry(key).or_default().push(row_id);
        Ok(())
    }

    pub fn remove(&self, key: &IndexKey, row_id: RowId) {
        let mut tree = self.tree.write();
        if let Some(postings) = tree.get_mut(key) {
            postings.retain(|id| *id != row_id);
            if postings.is_empty() {
                tree.remove(key);
            }
        }
    }

    pub fn lookup_eq(&self, key: &IndexKey) -> Vec<RowId> {
        self.tree.read().get(key).cloned().unwrap_or_default()
    }

    pub fn lookup_range(&self, min: &IndexKey, max: &IndexKey) -> Result<Vec<RowId>> {
        min.check_same_kind(max)?;
        let tree = self.tree.read();
        let mut out = Vec::new();
        for (_, postings) in tree.range(min.clone()..=max.clone()) {
            out.extend(postings.iter().copied());
        }
        Ok(out)
    }

    pub fn clear(&self) {
        self.tree.write().clear();
    }

    pub fn len(&self) -> usize {
        self.tree.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_and_range_lookup() {
        let idx = BTreeIndex::new(false);
        for i in 0..5 {
            idx.insert(IndexKey::from_value(&Value::Int64(i)).unwrap(), i as usize).unwrap();
        }
        let eq = idx.lookup_eq(&IndexKey::from_value(&Value::Int64(2)).unwrap());
        assert_eq!(eq, vec![2]);

        let range = idx
            .lookup_range(
                &IndexKey::from_value(&Value::Int64(1)).unwrap(),
                &IndexKey::from_value(&Value::Int64(3)).unwrap(),
            )
            .unwrap();
        assert_eq!(range, vec![1, 2, 3]);
    }

    #[test]
    fn unique_rejects_duplicate_key() {
        let idx = BTreeIndex::new(true);
        idx.insert(IndexKey::from_value(&Value::Int64(1)).unwrap(), 0).unwrap();
        assert!(matches!(
            idx.insert(IndexKey::from_value(&Value::Int64(1)).unwrap(), 1),
            Err(EngineError::UniqueViolation { .. })
        ));
    }

    #[test]
    fn mixed_numeric_and_string_keys_fail_type_mismatch() {
        let idx = BTreeIndex::new(false);
        idx.insert(IndexKey::from_value(&Value::Int64(1)).unwrap(), 0).unwrap();
        assert!(matches!(
            idx.insert(IndexKey::from_value(&Value::String("x".into())).unwrap(), 1),
            Err(EngineError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn remove_drops_row_id_and_empties_key() {
        let idx = BTreeIndex::new(false);
        let key = IndexKey::from_value(&Value::Int64(1)).unwrap();
        idx.insert(key.clone(), 0).unwrap();
        idx.remove(&key, 0);
        assert!(idx.lookup_eq(&key).is_empty());
        assert!(idx.is_empty());
    }
}
