// Tabula - in-process, in-memory MVCC tabular data engine with a paged
// buffer pool and a pluggable secondary-index layer (scalar, full-text,
// spatial, vector ANN).

pub mod cancel;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod mvcc;
pub mod predicate;
pub mod query;
pub mod row;
pub mod schema;
pub mod storage;
pub mod value;

pub use cancel::CancellationToken;
pub use config::{EngineConfig, PagingConfig, VectorIndexParams};
pub use engine::{Engine, MutationOptions, MutationResult, PageBuilder};
pub use error::{EngineError, Result};
pub use index::btree::RowId;
pub use index::vector::{Metric, VectorFilter, VectorIndexType};
pub use index::ScalarIndexKind;
pub use predicate::{DefaultPredicateEvaluator, Filter, Logic, Operator, PredicateEvaluator};
pub use query::{OrderBy, QueryEngine, QueryOptions, QueryResult};
pub use row::Row;
pub use schema::{ColumnInfo, ForeignKeyRef, TableSchema};
pub use value::{Value, ValueType};
