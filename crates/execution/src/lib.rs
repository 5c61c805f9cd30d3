//! Execution-time core of the quiver engine.
//!
//! Carries an operator's output in a dual materialized/lazy [`QueryResult`]
//! container with sort-order, definedness, and limit guards, and implements
//! grouped aggregation over sorted id-tuple streams on top of it.

pub mod aggregate;
pub mod group_by;
pub mod id_table;
pub mod index;
pub mod local_vocab;
pub mod operator;
pub mod result;
pub mod runs;
pub mod stream;

// Re-export only what you want at the crate root (no globs).
pub use aggregate::{AggregateDescriptor, AggregateInput, AggregateKind};
pub use group_by::{AliasDescriptor, GroupBy};
pub use id_table::IdTable;
pub use index::Index;
pub use local_vocab::LocalVocab;
pub use operator::{
    ColumnIndexAndTypeInfo, Definedness, Operator, SharedTaskContext, TaskContext,
    VariableToColumnMap,
};
pub use result::{LimitOffsetClause, QueryResult};
pub use runs::GroupRunSplitter;
pub use stream::{
    bounded_table_channel, empty_stream, table_stream, ChunkSender, IdTableStream,
    SendableIdTableStream, StreamAdapter,
};
