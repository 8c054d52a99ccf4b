// Row-level transforms shared by every mutation. None of this touches the
// version chain directly — `engine.rs` materializes the current version,
// calls one of these, and publishes the result as a new version. Row IDs are
// never stored explicitly: a row's ID is its 0-based position in the
// returned `Vec<Row>`, matching the paged sequence's own addressing.

use crate::predicate::{Filter, PredicateEvaluator};
use crate::row::Row;

/// Appends deep copies of `new_rows` after `existing`. Row IDs for the
/// existing rows are preserved (same positions); new rows get the next
/// dense IDs.
pub fn apply_insert(mut existing: Vec<Row>, new_rows: &[Row]) -> Vec<Row> {
    existing.extend(new_rows.iter().cloned());
    existing
}

/// Applies `patch`'s fields onto every row matching every filter
/// (conjunctive AND across the filter list, same as `apply_filters`).
pub fn apply_update(
    existing: Vec<Row>,
    filters: &[Filter],
    patch: &Row,
    evaluator: &dyn PredicateEvaluator,
) -> (Vec<Row>, usize) {
    let mut updated_count = 0;
    let rows = existing
        .into_iter()
        .map(|mut row| {
            if evaluator.apply_filters(&row, filters) {
                updated_count += 1;
                for (col, value) in patch.0.iter() {
                    row.insert(col.clone(), value.clone());
                }
            }
            row
        })
        .collect();
    (rows, updated_count)
}

/// Drops every row matching every filter. Surviving rows are dense-reindexed
/// automatically: they're just whatever's left in the returned `Vec`, in
/// order.
pub fn apply_delete(existing: Vec<Row>, filters: &[Filter], evaluator: &dyn PredicateEvaluator) -> (Vec<Row>, usize) {
    let before = existing.len();
    let rows: Vec<Row> = existing
        .into_iter()
        .filter(|row| !evaluator.apply_filters(row, filters))
        .collect();
    let deleted = before - rows.len();
    (rows, deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{DefaultPredicateEvaluator, Operator};
    use crate::value::Value;

    fn row(id: i64, name: &str) -> Row {
        let mut r = Row::new();
        r.insert("id", Value::Int64(id));
        r.insert("name", Value::String(name.to_string()));
        r
    }

    #[test]
    fn insert_appends_without_mutating_existing() {
        let existing = vec![row(1, "a")];
        let result = apply_insert(existing.clone(), &[row(2, "b")]);
        assert_eq!(result.len(), 2);
        assert_eq!(existing.len(), 1);
    }

    #[test]
    fn update_patches_only_matching_rows() {
        let rows = vec![row(1, "a"), row(2, "b")];
        let filters = vec![Filter::Leaf {
            field: "id".into(),
            op: Operator::Eq,
            value: Value::Int64(2),
        }];
        let mut patch = Row::new();
        patch.insert("name", Value::String("patched".into()));

        let (result, count) = apply_update(rows, &filters, &patch, &DefaultPredicateEvaluator);
        assert_eq!(count, 1);
        assert_eq!(result[0].get("name"), Some(&Value::String("a".into())));
        assert_eq!(result[1].get("name"), Some(&Value::String("patched".into())));
    }

    #[test]
    fn delete_removes_matching_rows_and_reindexes_densely() {
        let rows = vec![row(1, "a"), row(2, "b"), row(3, "c")];
        let filters = vec![Filter::Leaf {
            field: "id".into(),
            op: Operator::Eq,
            value: Value::Int64(2),
        }];
        let (result, count) = apply_delete(rows, &filters, &DefaultPredicateEvaluator);
        assert_eq!(count, 1);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].get("id"), Some(&Value::Int64(1)));
        assert_eq!(result[1].get("id"), Some(&Value::Int64(3)));
    }
}
