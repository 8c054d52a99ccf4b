// Hash index: equality-only lookup, no range support. Grounded in the
// teacher's locking idiom (`RwLock`-guarded map) rather than its extendible
// hashing implementation, which solves a directory-growth problem this
// crate's in-memory `HashMap` doesn't have.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::index::btree::{IndexKey, RowId};

pub struct HashIndex {
    unique: bool,
    map: RwLock<HashMap<IndexKey, Vec<RowId>>>,
}

impl HashIndex {
    pub fn new(unique: bool) -> Self {
        Self {
            unique,
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, key: IndexKey, row_id: RowId) -> Result<()> {
        let mut map = self.map.write();
        let postings = map.entry(key.clone()).or_default();
        if self.unique && !postings.is_empty() {
            return Err(EngineError::UniqueViolation {
                index: "hash".to_string(),
                key: format!("{key:?}"),
            });
        }
        postings.push(row_id);
        Ok(())
    }

    pub fn remove(&self, key: &IndexKey, row_id: RowId) {
        let mut map = self.map.write();
        if let Some(postings) = map.get_mut(key) {
            postings.retain(|id| *id != row_id);
            if postings.is_empty() {
                map.remove(key);
            }
        }
    }

    pub fn lookup_eq(&self, key: &IndexKey) -> Vec<RowId> {
        self.map.read().get(key).cloned().unwrap_or_default()
    }

    pub fn clear(&self) {
        self.map.write().clear();
    }

    pub fn len(&self) -> usize {
        self.map.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn equality_lookup() {
        let idx = HashIndex::new(false);
        idx.insert(IndexKey::from_value(&Value::Int64(7)).unwrap(), 0).unwrap();
        idx.insert(IndexKey::from_value(&Value::Int64(7)).unwrap(), 1).unwrap();
        assert_eq!(idx.lookup_eq(&IndexKey::from_value(&Value::Int64(7)).unwrap()), vec![0, 1]);
    }

    #[test]
    fn unique_rejects_duplicate() {
        let idx = HashIndex::new(true);
        idx.insert(IndexKey::from_value(&Value::String("a".into())).unwrap(), 0).unwrap();
        assert!(matches!(
            idx.insert(IndexKey::from_value(&Value::String("a".into())).unwrap(), 1),
            Err(EngineError::UniqueViolation { .. })
        ));
    }

    #[test]
    fn remove_empties_bucket() {
        let idx = HashIndex::new(false);
        let key = IndexKey::from_value(&Value::Int64(1)).unwrap();
        idx.insert(key.clone(), 0).unwrap();
        idx.remove(&key, 0);
        assert!(idx.is_empty());
    }
}
