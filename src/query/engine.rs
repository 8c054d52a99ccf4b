// Query/filter engine (§4.5). Index selection only ever needs to produce a
// *superset* of the matching row IDs: every candidate, indexed or not,
// still goes through the full filter tree via `PredicateEvaluator` before
// it counts as a match. That's what lets inclusive bounds stand in for
// strict `<`/`>` during index selection — the residual check throws out
// anything the bound let through that shouldn't have matched.

use std::collections::HashSet;

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::index::btree::{IndexKey, RowId};
use crate::index::{IndexManager, ScalarIndexKind};
use crate::mvcc::TableManager;
use crate::predicate::{Filter, Operator, PredicateEvaluator};
use crate::row::Row;

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filters: Vec<Filter>,
    pub projection: Option<Vec<String>>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub total: usize,
}

pub struct QueryEngine<'a> {
    pub tables: &'a TableManager,
    pub indexes: &'a IndexManager,
    pub evaluator: &'a dyn PredicateEvaluator,
}

impl<'a> QueryEngine<'a> {
    pub fn new(tables: &'a TableManager, indexes: &'a IndexManager, evaluator: &'a dyn PredicateEvaluator) -> Self {
        Self { tables, indexes, evaluator }
    }

    pub fn query(&self, table: &str, opts: &QueryOptions, cancel: &CancellationToken) -> Result<QueryResult> {
        let (_, rows) = self.tables.get_latest_table_data(table)?;
        let candidates = self.select_candidates(table, &opts.filters)?;

        let mut matched: Vec<Row> = Vec::new();
        for id in candidates.iter(rows.len()) {
            cancel.check()?;
            let row = &rows[id];
            if opts.filters.iter().all(|f| self.evaluator.matches(row, f)) {
                matched.push(row.clone());
            }
        }

        for ord in opts.order_by.iter().rev() {
            matched.sort_by(|a, b| {
                let ordering = compare_values(a.get(&ord.column), b.get(&ord.column));
                if ord.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let total = matched.len();
        let sliced: Vec<Row> = matched.into_iter().skip(opts.offset).take(opts.limit.unwrap_or(usize::MAX)).collect();

        let projected = match &opts.projection {
            Some(cols) => sliced.iter().map(|r| r.project(cols)).collect(),
            None => sliced,
        };

        Ok(QueryResult { rows: projected, total })
    }

    /// `Filter` is `Query` without projection/order-by, over a single
    /// filter tree instead of a conjunctive list — the candidate set logic
    /// is identical.
    pub fn filter(
        &self,
        table: &str,
        filter: &Filter,
        offset: usize,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Row>, usize)> {
        let opts = QueryOptions { filters: vec![filter.clone()], projection: None, order_by: Vec::new(), limit, offset };
        let result = self.query(table, &opts, cancel)?;
        Ok((result.rows, result.total))
    }

    fn select_candidates(&self, table: &str, filters: &[Filter]) -> Result<Candidates> {
        let mut per_field: std::collections::HashMap<String, HashSet<RowId>> = std::collections::HashMap::new();

        let mut by_field: std::collections::HashMap<String, Vec<(Operator, crate::value::Value)>> =
            std::collections::HashMap::new();
        for f in filters {
            for (field, op, value) in f.top_level_leaves() {
                by_field.entry(field.to_string()).or_default().push((op, value.clone()));
            }
        }

        for (field, leaves) in &by_field {
            let Some(index_name) = self.indexes.find_scalar_index(table, field) else {
                continue;
            };
            let ids = if let Some((_, eq_value)) = leaves.iter().find(|(op, _)| *op == Operator::Eq) {
                let key = IndexKey::from_value(eq_value)?;
                self.indexes.lookup_eq(&index_name, &key)?
            } else if self.indexes.scalar_kind(&index_name) == Some(ScalarIndexKind::BTree) {
                let lower = leaves.iter().find(|(op, _)| matches!(op, Operator::Gt | Operator::Ge)).map(|(_, v)| v);
                let upper = leaves.iter().find(|(op, _)| matches!(op, Operator::Lt | Operator::Le)).map(|(_, v)| v);
                match (lower, upper) {
                    (Some(lo), Some(hi)) => {
                        self.indexes.lookup_range(&index_name, &IndexKey::from_value(lo)?, &IndexKey::from_value(hi)?)?
                    }
                    _ => continue,
                }
            } else {
                continue;
            };
            per_field.insert(field.clone(), ids.into_iter().collect());
        }

        if per_field.is_empty() {
            return Ok(Candidates::FullScan);
        }

        let mut sets = per_field.into_values();
        let mut intersection = sets.next().unwrap_or_default();
        for s in sets {
            intersection = intersection.intersection(&s).copied().collect();
        }
        Ok(Candidates::Ids(intersection))
    }
}

enum Candidates {
    FullScan,
    Ids(HashSet<RowId>),
}

impl Candidates {
    fn iter(&self, total_rows: usize) -> Box<dyn Iterator<Item = RowId> + '_> {
        match self {
            Candidates::FullScan => Box::new(0..total_rows),
            Candidates::Ids(ids) => {
                let mut sorted: Vec<RowId> = ids.iter().copied().collect();
                sorted.sort_unstable();
                Box::new(sorted.into_iter())
            }
        }
    }
}

fn compare_values(a: Option<&crate::value::Value>, b: Option<&crate::value::Value>) -> std::cmp::Ordering {
    use crate::value::Value;
    match (a, b) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => {
            if let (Some(fx), Some(fy)) = (x.as_f64(), y.as_f64()) {
                return fx.partial_cmp(&fy).unwrap_or(std::cmp::Ordering::Equal);
            }
            if let (Value::String(sx), Value::String(sy)) = (x, y) {
                return sx.cmp(sy);
            }
            std::cmp::Ordering::Equal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PagingConfig;
    use crate::predicate::DefaultPredicateEvaluator;
    use crate::schema::{ColumnInfo, TableSchema};
    use crate::storage::BufferPoolManager;
    use crate::value::{Value, ValueType};
    use std::sync::Arc;

    fn setup() -> (TableManager, IndexManager) {
        let pool = Arc::new(BufferPoolManager::new(PagingConfig { enabled: true, max_memory_bytes: Some(u64::MAX), ..PagingConfig::default() }));
        let tables = TableManager::new(pool, &PagingConfig::default());
        let schema = TableSchema::new(
            "people",
            vec![ColumnInfo::new("id", ValueType::Int64), ColumnInfo::new("age", ValueType::Int64)],
        );
        tables.create_table(schema.clone()).unwrap();
        let rows: Vec<Row> = (0..10)
            .map(|i| {
                let mut r = Row::new();
                r.insert("id", Value::Int64(i));
                r.insert("age", Value::Int64(20 + i));
                r
            })
            .collect();
        tables.publish_new_version("people", schema, rows.clone()).unwrap();

        let indexes = IndexManager::new();
        indexes.create_index("people", vec!["age".to_string()], ScalarIndexKind::BTree, false).unwrap();
        indexes.rebuild_table_indexes("people", &rows).unwrap();
        (tables, indexes)
    }

    #[test]
    fn equality_uses_index_and_returns_total() {
        let (tables, indexes) = setup();
        let evaluator = DefaultPredicateEvaluator;
        let engine = QueryEngine::new(&tables, &indexes, &evaluator);
        let opts = QueryOptions {
            filters: vec![Filter::eq("age", Value::Int64(25))],
            ..Default::default()
        };
        let result = engine.query("people", &opts, &CancellationToken::new()).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.rows[0].get("id"), Some(&Value::Int64(5)));
    }

    #[test]
    fn range_filter_combines_two_leaves() {
        let (tables, indexes) = setup();
        let evaluator = DefaultPredicateEvaluator;
        let engine = QueryEngine::new(&tables, &indexes, &evaluator);
        let opts = QueryOptions {
            filters: vec![Filter::and(vec![
                Filter::Leaf { field: "age".into(), op: Operator::Ge, value: Value::Int64(22) },
                Filter::Leaf { field: "age".into(), op: Operator::Le, value: Value::Int64(24) },
            ])],
            ..Default::default()
        };
        let result = engine.query("people", &opts, &CancellationToken::new()).unwrap();
        assert_eq!(result.total, 3);
    }

    #[test]
    fn order_by_and_limit_offset_apply_after_filtering() {
        let (tables, indexes) = setup();
        let evaluator = DefaultPredicateEvaluator;
        let engine = QueryEngine::new(&tables, &indexes, &evaluator);
        let opts = QueryOptions {
            order_by: vec![OrderBy { column: "age".to_string(), descending: true }],
            limit: Some(2),
            offset: 1,
            ..Default::default()
        };
        let result = engine.query("people", &opts, &CancellationToken::new()).unwrap();
        assert_eq!(result.total, 10);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].get("age"), Some(&Value::Int64(28)));
    }

    #[test]
    fn projection_drops_unselected_columns() {
        let (tables, indexes) = setup();
        let evaluator = DefaultPredicateEvaluator;
        let engine = QueryEngine::new(&tables, &indexes, &evaluator);
        let opts = QueryOptions {
            filters: vec![Filter::eq("age", Value::Int64(20))],
            projection: Some(vec!["age".to_string()]),
            ..Default::default()
        };
        let result = engine.query("people", &opts, &CancellationToken::new()).unwrap();
        assert_eq!(result.rows[0].get("id"), None);
        assert_eq!(result.rows[0].get("age"), Some(&Value::Int64(20)));
    }

    #[test]
    fn returned_rows_are_deep_copies() {
        let (tables, indexes) = setup();
        let evaluator = DefaultPredicateEvaluator;
        let engine = QueryEngine::new(&tables, &indexes, &evaluator);
        let mut result =
            engine.query("people", &QueryOptions::default(), &CancellationToken::new()).unwrap();
        result.rows[0].insert("age", Value::Int64(-1));
        let result2 = engine.query("people", &QueryOptions::default(), &CancellationToken::new()).unwrap();
        assert_ne!(result2.rows[0].get("age"), Some(&Value::Int64(-1)));
    }
}
