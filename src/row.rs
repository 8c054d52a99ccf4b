use std::collections::BTreeMap;

use crate::value::Value;

/// A row is a mapping from column name to value. `Row::clone()` is a deep
/// copy (see `value.rs`), which is what `Insert`/`Query`/`Filter` rely on to
/// satisfy the deep-copy isolation invariant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(pub BTreeMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.0.insert(column.into(), value);
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    /// Keep only the named columns, in projection order, dropping the rest.
    pub fn project(&self, columns: &[String]) -> Row {
        let mut out = BTreeMap::new();
        for col in columns {
            if let Some(v) = self.0.get(col) {
                out.insert(col.clone(), v.clone());
            }
        }
        Row(out)
    }
}

impl From<BTreeMap<String, Value>> for Row {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Row(map)
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Row(iter.into_iter().collect())
    }
}
