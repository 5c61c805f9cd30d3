//! Physical operator contract for the execution core.

use std::collections::HashMap;
use std::sync::Arc;

use quiver_common::{EngineConfig, Result, ResultType};

use crate::index::Index;
use crate::result::QueryResult;

/// Definedness guarantee for a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Definedness {
    /// The column never holds the undefined marker.
    AlwaysDefined,
    /// The column may hold the undefined marker.
    PossiblyUndefined,
}

/// Column binding of one query variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnIndexAndTypeInfo {
    /// Column index inside the result.
    pub column: usize,
    /// Definedness guarantee of that column.
    pub definedness: Definedness,
}

/// Mapping from variable names to their column bindings.
pub type VariableToColumnMap = HashMap<String, ColumnIndexAndTypeInfo>;

/// Per-query execution context passed down the operator tree.
#[derive(Clone)]
pub struct TaskContext {
    /// Stable id of the running query, used as a metrics label.
    pub query_id: String,
    /// Target rows per chunk for operators that emit lazy results.
    pub chunk_size_rows: usize,
    /// Capacity hint for per-run DISTINCT scratch sets.
    pub distinct_scratch_capacity: usize,
    /// Read-only handle onto the index.
    pub index: Arc<dyn Index>,
}

impl TaskContext {
    /// Builds a context for one query from the engine configuration.
    pub fn new(query_id: impl Into<String>, config: &EngineConfig, index: Arc<dyn Index>) -> Self {
        Self {
            query_id: query_id.into(),
            chunk_size_rows: config.chunk_size_rows,
            distinct_scratch_capacity: config.distinct_scratch_capacity,
            index,
        }
    }
}

/// Shared per-query context handle.
pub type SharedTaskContext = Arc<TaskContext>;

/// A physical operator instance that can produce a result.
///
/// Operators are pull-based (the consumer drives the returned result), but
/// can use bounded channels internally for push-based parts.
pub trait Operator: Send + Sync {
    /// Stable operator name for explain/logging.
    fn name(&self) -> &'static str;

    /// Column count of the produced result.
    fn result_width(&self) -> usize;

    /// Mapping from bound variables to result columns.
    fn variable_columns(&self) -> VariableToColumnMap;

    /// Declared decoding discipline per result column.
    fn column_types(&self) -> Vec<ResultType>;

    /// Columns the produced result is sorted by.
    fn sorted_by(&self) -> Vec<usize>;

    /// Start execution and return the result container.
    ///
    /// Implementations surface deterministic operator failures via the
    /// appropriate [`quiver_common::QuiverError`] variants.
    fn execute(&self, ctx: SharedTaskContext) -> Result<QueryResult>;
}
