pub mod engine;

pub use engine::{OrderBy, QueryEngine, QueryOptions, QueryResult};
