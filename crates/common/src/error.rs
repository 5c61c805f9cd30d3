use thiserror::Error;

/// Canonical quiver error taxonomy used across crates.
///
/// Classification guidance:
/// - [`QuiverError::InvalidSortSpec`] / [`QuiverError::NotSorted`]: a result's
///   declared metadata does not match the rows it actually carries
/// - [`QuiverError::ModeMismatch`] / [`QuiverError::AlreadyConsumed`]:
///   materialized/lazy access-discipline violations by the consumer
/// - [`QuiverError::MissingColumn`] / [`QuiverError::UnsortedInput`]: an
///   operator was handed a sub-result that cannot satisfy its contract
/// - [`QuiverError::ProducerFailed`]: the upstream chunk producer raised and
///   the failure surfaces at the next pull
#[derive(Debug, Error)]
pub enum QuiverError {
    /// A `sortedBy` column index is out of range for the table it describes.
    ///
    /// Examples:
    /// - result declared sorted on column 3 but only has 3 columns
    /// - a lazy chunk narrower than the declared sort spec
    #[error("sort column {column} is out of range for a table with {width} columns")]
    InvalidSortSpec {
        /// The offending column index.
        column: usize,
        /// The column count of the table being described.
        width: usize,
    },

    /// An emitted chunk or materialized table violates the declared sort
    /// order. Only raised when expensive checks are enabled.
    #[error("rows violate the declared sort order on columns {sorted_by:?}")]
    NotSorted {
        /// The sort columns the result claimed to be ordered by.
        sorted_by: Vec<usize>,
    },

    /// A column declared always defined contains the undefined marker.
    #[error("column {column} is declared always defined but holds an undefined value")]
    DefinednessViolated {
        /// The offending column index.
        column: usize,
    },

    /// The produced row count exceeds the declared limit.
    #[error("result produced more than the declared limit of {limit} rows")]
    LimitViolated {
        /// The limit that was declared.
        limit: u64,
    },

    /// A materialized accessor was called on a lazy result or vice versa.
    #[error("{0} is not available in this result mode")]
    ModeMismatch(&'static str),

    /// A lazy result stream was iterated a second time.
    #[error("result stream was already consumed")]
    AlreadyConsumed,

    /// An aggregate or group-by references a variable the sub-result does
    /// not bind. The surrounding operation degrades to an empty result.
    #[error("variable {0:?} is not part of the sub-result")]
    MissingColumn(String),

    /// The GROUP BY input is not sorted on the group-by columns.
    #[error("group by input is not sorted on the group-by columns")]
    UnsortedInput,

    /// The upstream chunk producer failed.
    #[error("chunk producer failed: {0}")]
    ProducerFailed(String),
}

/// Standard quiver result alias.
pub type Result<T> = std::result::Result<T, QuiverError>;
