//! Dual-mode result container with sort, definedness, and limit guards.
//!
//! A [`QueryResult`] carries an operator's output either fully materialized
//! or as a lazy chunk stream. Invariants that cannot be checked at
//! construction time (sort order of streamed chunks, definedness, limit
//! compliance) are checked at the exact boundary at which rows become
//! observable, by wrapping the stored stream. The lazy stream may be
//! iterated exactly once.

use std::cmp::Ordering;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::Stream;
use quiver_common::{expensive_checks_enabled, Id, QuiverError, Result};
use serde::{Deserialize, Serialize};

use crate::id_table::{compare_rows_by_sort_columns, IdTable};
use crate::local_vocab::LocalVocab;
use crate::operator::{Definedness, VariableToColumnMap};
use crate::stream::{IdTableStream, SendableIdTableStream};

/// LIMIT/OFFSET window of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOffsetClause {
    /// Maximum number of rows to emit; `None` means unlimited.
    pub limit: Option<u64>,
    /// Number of leading rows to drop.
    pub offset: u64,
}

/// The output of one query operator.
pub struct QueryResult {
    data: ResultData,
    sorted_by: Vec<usize>,
    local_vocab: Arc<LocalVocab>,
}

enum ResultData {
    Materialized(IdTable),
    Lazy {
        /// `None` once the stream has been handed out.
        stream: Option<SendableIdTableStream>,
        width: usize,
    },
}

impl QueryResult {
    /// Creates a fully materialized result.
    ///
    /// Fails with [`QuiverError::InvalidSortSpec`] when a `sorted_by` index
    /// is out of range and, when expensive checks are enabled, with
    /// [`QuiverError::NotSorted`] when the rows violate the declared order.
    pub fn materialized(
        id_table: IdTable,
        sorted_by: Vec<usize>,
        local_vocab: Arc<LocalVocab>,
    ) -> Result<Self> {
        validate_sort_spec(&sorted_by, id_table.num_columns())?;
        if expensive_checks_enabled() {
            validate_chunk_order(&id_table, &sorted_by, None)?;
        }
        Ok(Self {
            data: ResultData::Materialized(id_table),
            sorted_by,
            local_vocab,
        })
    }

    /// Creates a lazy result over a chunk stream.
    ///
    /// The producer is stored but not pulled; sort-spec and sort-order
    /// checks run per chunk once the stream is consumed.
    pub fn lazy(
        stream: SendableIdTableStream,
        sorted_by: Vec<usize>,
        local_vocab: Arc<LocalVocab>,
    ) -> Self {
        let width = stream.width();
        let guarded: SendableIdTableStream = Box::pin(SortGuard {
            width,
            inner: stream,
            sorted_by: sorted_by.clone(),
            boundary: None,
            done: false,
        });
        Self {
            data: ResultData::Lazy {
                stream: Some(guarded),
                width,
            },
            sorted_by,
            local_vocab,
        }
    }

    /// Internal constructor for tables whose rows already passed the
    /// per-chunk guards (consumption-time caching).
    fn materialized_unchecked(
        id_table: IdTable,
        sorted_by: Vec<usize>,
        local_vocab: Arc<LocalVocab>,
    ) -> Self {
        Self {
            data: ResultData::Materialized(id_table),
            sorted_by,
            local_vocab,
        }
    }

    /// Whether this result holds a materialized table.
    pub fn is_fully_materialized(&self) -> bool {
        matches!(self.data, ResultData::Materialized(_))
    }

    /// The materialized table. Fails with [`QuiverError::ModeMismatch`] on a
    /// lazy result.
    pub fn id_table(&self) -> Result<&IdTable> {
        match &self.data {
            ResultData::Materialized(table) => Ok(table),
            ResultData::Lazy { .. } => Err(QuiverError::ModeMismatch("id_table")),
        }
    }

    /// The single-use chunk stream. Fails with
    /// [`QuiverError::ModeMismatch`] on a materialized result and with
    /// [`QuiverError::AlreadyConsumed`] on any second call.
    pub fn id_tables(&mut self) -> Result<SendableIdTableStream> {
        self.take_stream("id_tables")
    }

    /// The columns this result is sorted by.
    pub fn sorted_by(&self) -> &[usize] {
        &self.sorted_by
    }

    /// Shared handle to the local vocabulary, enabling zero-copy reuse by
    /// successor results.
    pub fn shared_local_vocab(&self) -> Arc<LocalVocab> {
        Arc::clone(&self.local_vocab)
    }

    /// Attaches an observer to a lazy result.
    ///
    /// `on_chunk` fires as each chunk is produced, with the wall-clock
    /// duration since the prior yield (or since iteration start for the
    /// first). `on_finish` fires exactly once: with `false` when the stream
    /// ends normally or consumption is abandoned mid-stream, with `true`
    /// when the producer raises.
    pub fn run_on_new_chunk_computed(
        &mut self,
        on_chunk: impl FnMut(&IdTable, Duration) + Send + 'static,
        on_finish: impl FnOnce(bool) + Send + 'static,
    ) -> Result<()> {
        let inner = self.take_stream("run_on_new_chunk_computed")?;
        let width = inner.width();
        self.put_stream(Box::pin(ObservedStream {
            width,
            inner,
            on_chunk: Box::new(on_chunk),
            on_finish: Some(Box::new(on_finish)),
            last_yield: None,
        }));
        Ok(())
    }

    /// Wraps a lazy result so that chunks are additionally appended into an
    /// aggregator table while the downstream consumer iterates.
    ///
    /// `predicate` decides per chunk (given the current aggregator, `None`
    /// before the first chunk) whether to keep aggregating; the first
    /// `false` drops the aggregator for good. When the stream ends normally
    /// with the aggregator still alive, `sink` receives the materialized
    /// result.
    pub fn cache_during_consumption(
        &mut self,
        predicate: impl FnMut(Option<&IdTable>, &IdTable) -> bool + Send + 'static,
        sink: impl FnOnce(QueryResult) + Send + 'static,
    ) -> Result<()> {
        let inner = self.take_stream("cache_during_consumption")?;
        let width = inner.width();
        self.put_stream(Box::pin(CachingStream {
            width,
            inner,
            aggregator: None,
            predicate: Box::new(predicate),
            sink: Some(Box::new(sink)),
            sorted_by: self.sorted_by.clone(),
            local_vocab: Arc::clone(&self.local_vocab),
        }));
        Ok(())
    }

    /// Rewrites the result to emit only rows `[offset, offset + limit)`.
    ///
    /// A limit of 0 produces no rows; an offset beyond the end produces no
    /// rows without error. `on_chunk_emitted` fires per output chunk with
    /// the time spent producing it (exactly once for a materialized
    /// result).
    pub fn apply_limit_offset(
        &mut self,
        clause: LimitOffsetClause,
        mut on_chunk_emitted: impl FnMut(Duration, &IdTable) + Send + 'static,
    ) -> Result<()> {
        match &mut self.data {
            ResultData::Materialized(table) => {
                let started = Instant::now();
                let offset = (clause.offset as usize).min(table.num_rows());
                let available = table.num_rows() - offset;
                let len = match clause.limit {
                    Some(limit) => available.min(limit as usize),
                    None => available,
                };
                *table = table.slice(offset, len);
                on_chunk_emitted(started.elapsed(), table);
                Ok(())
            }
            ResultData::Lazy { stream, width } => {
                let inner = stream.take().ok_or(QuiverError::AlreadyConsumed)?;
                *stream = Some(Box::pin(LimitOffsetStream {
                    width: *width,
                    inner: Some(inner),
                    remaining_offset: clause.offset,
                    remaining_limit: clause.limit,
                    on_emit: Box::new(on_chunk_emitted),
                    last_yield: None,
                }));
                Ok(())
            }
        }
    }

    /// Guards that the produced row count does not exceed `clause.limit`.
    ///
    /// Checks immediately for a materialized result; for a lazy result the
    /// rows are counted during consumption and the stream fails with
    /// [`QuiverError::LimitViolated`] once exceeded.
    pub fn assert_limit_was_respected(&mut self, clause: LimitOffsetClause) -> Result<()> {
        let Some(limit) = clause.limit else {
            return Ok(());
        };
        match &mut self.data {
            ResultData::Materialized(table) => {
                if table.num_rows() as u64 > limit {
                    Err(QuiverError::LimitViolated { limit })
                } else {
                    Ok(())
                }
            }
            ResultData::Lazy { stream, width } => {
                let inner = stream.take().ok_or(QuiverError::AlreadyConsumed)?;
                *stream = Some(Box::pin(LimitGuard {
                    width: *width,
                    inner,
                    limit,
                    seen: 0,
                    done: false,
                }));
                Ok(())
            }
        }
    }

    /// Asserts that no column declared always defined contains the
    /// undefined marker. Runs per chunk for a lazy result.
    pub fn check_definedness(&mut self, variable_columns: &VariableToColumnMap) -> Result<()> {
        let mut columns: Vec<usize> = variable_columns
            .values()
            .filter(|info| info.definedness == Definedness::AlwaysDefined)
            .map(|info| info.column)
            .collect();
        columns.sort_unstable();
        match &mut self.data {
            ResultData::Materialized(table) => check_chunk_definedness(table, &columns),
            ResultData::Lazy { stream, width } => {
                let inner = stream.take().ok_or(QuiverError::AlreadyConsumed)?;
                *stream = Some(Box::pin(DefinednessGuard {
                    width: *width,
                    inner,
                    columns,
                    done: false,
                }));
                Ok(())
            }
        }
    }

    fn take_stream(&mut self, operation: &'static str) -> Result<SendableIdTableStream> {
        match &mut self.data {
            ResultData::Materialized(_) => Err(QuiverError::ModeMismatch(operation)),
            ResultData::Lazy { stream, .. } => {
                stream.take().ok_or(QuiverError::AlreadyConsumed)
            }
        }
    }

    fn put_stream(&mut self, stream: SendableIdTableStream) {
        if let ResultData::Lazy { stream: slot, .. } = &mut self.data {
            *slot = Some(stream);
        }
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match &self.data {
            ResultData::Materialized(table) => format!("materialized({} rows)", table.num_rows()),
            ResultData::Lazy { stream, width } => format!(
                "lazy(width {width}, {})",
                if stream.is_some() { "pending" } else { "consumed" }
            ),
        };
        f.debug_struct("QueryResult")
            .field("mode", &mode)
            .field("sorted_by", &self.sorted_by)
            .field("local_vocab_size", &self.local_vocab.len())
            .finish()
    }
}

fn validate_sort_spec(sorted_by: &[usize], width: usize) -> Result<()> {
    for &column in sorted_by {
        if column >= width {
            return Err(QuiverError::InvalidSortSpec { column, width });
        }
    }
    Ok(())
}

/// Checks that `table` is sorted on `sorted_by`, including the boundary to
/// the last row of the previous chunk when given.
fn validate_chunk_order(
    table: &IdTable,
    sorted_by: &[usize],
    boundary: Option<&[Id]>,
) -> Result<()> {
    if sorted_by.is_empty() || table.is_empty() {
        return Ok(());
    }
    if let Some(previous) = boundary {
        if compare_rows_by_sort_columns(previous, table.row(0), sorted_by) == Ordering::Greater {
            return Err(QuiverError::NotSorted {
                sorted_by: sorted_by.to_vec(),
            });
        }
    }
    for i in 1..table.num_rows() {
        if compare_rows_by_sort_columns(table.row(i - 1), table.row(i), sorted_by)
            == Ordering::Greater
        {
            return Err(QuiverError::NotSorted {
                sorted_by: sorted_by.to_vec(),
            });
        }
    }
    Ok(())
}

fn check_chunk_definedness(table: &IdTable, columns: &[usize]) -> Result<()> {
    for row in table.iter_rows() {
        for &column in columns {
            if column < row.len() && row[column].is_undefined() {
                return Err(QuiverError::DefinednessViolated { column });
            }
        }
    }
    Ok(())
}

/// Validates the sort spec and (under expensive checks) the sort order of
/// every chunk at the moment it becomes observable.
struct SortGuard {
    width: usize,
    inner: SendableIdTableStream,
    sorted_by: Vec<usize>,
    boundary: Option<Vec<Id>>,
    done: bool,
}

impl Stream for SortGuard {
    type Item = Result<IdTable>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(Ok(table))) => {
                if let Err(err) = validate_sort_spec(&this.sorted_by, table.num_columns()) {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                if expensive_checks_enabled() {
                    if let Err(err) =
                        validate_chunk_order(&table, &this.sorted_by, this.boundary.as_deref())
                    {
                        this.done = true;
                        return Poll::Ready(Some(Err(err)));
                    }
                }
                if !table.is_empty() {
                    this.boundary = Some(table.row(table.num_rows() - 1).to_vec());
                }
                Poll::Ready(Some(Ok(table)))
            }
        }
    }
}

impl IdTableStream for SortGuard {
    fn width(&self) -> usize {
        self.width
    }
}

/// Invokes per-chunk and exactly-once-finish observers around an inner
/// stream.
struct ObservedStream {
    width: usize,
    inner: SendableIdTableStream,
    on_chunk: Box<dyn FnMut(&IdTable, Duration) + Send>,
    on_finish: Option<Box<dyn FnOnce(bool) + Send>>,
    last_yield: Option<Instant>,
}

impl Stream for ObservedStream {
    type Item = Result<IdTable>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.last_yield.is_none() {
            this.last_yield = Some(Instant::now());
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(table))) => {
                let elapsed = this.last_yield.map(|t| t.elapsed()).unwrap_or_default();
                (this.on_chunk)(&table, elapsed);
                this.last_yield = Some(Instant::now());
                Poll::Ready(Some(Ok(table)))
            }
            Poll::Ready(Some(Err(err))) => {
                if let Some(finish) = this.on_finish.take() {
                    finish(true);
                }
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                if let Some(finish) = this.on_finish.take() {
                    finish(false);
                }
                Poll::Ready(None)
            }
        }
    }
}

impl IdTableStream for ObservedStream {
    fn width(&self) -> usize {
        self.width
    }
}

impl Drop for ObservedStream {
    fn drop(&mut self) {
        // Abandonment mid-stream still finishes the observer, without error.
        if let Some(finish) = self.on_finish.take() {
            finish(false);
        }
    }
}

/// Appends observed chunks into an aggregator table and hands the
/// materialized whole to a sink on normal completion.
struct CachingStream {
    width: usize,
    inner: SendableIdTableStream,
    aggregator: Option<IdTable>,
    predicate: Box<dyn FnMut(Option<&IdTable>, &IdTable) -> bool + Send>,
    sink: Option<Box<dyn FnOnce(QueryResult) + Send>>,
    sorted_by: Vec<usize>,
    local_vocab: Arc<LocalVocab>,
}

impl Stream for CachingStream {
    type Item = Result<IdTable>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(table))) => {
                if this.sink.is_some() {
                    if (this.predicate)(this.aggregator.as_ref(), &table) {
                        this.aggregator
                            .get_or_insert_with(|| IdTable::new(table.num_columns()))
                            .append(&table);
                    } else {
                        this.sink = None;
                        this.aggregator = None;
                    }
                }
                Poll::Ready(Some(Ok(table)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.sink = None;
                this.aggregator = None;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                if let (Some(sink), Some(aggregator)) = (this.sink.take(), this.aggregator.take())
                {
                    sink(QueryResult::materialized_unchecked(
                        aggregator,
                        this.sorted_by.clone(),
                        Arc::clone(&this.local_vocab),
                    ));
                }
                Poll::Ready(None)
            }
        }
    }
}

impl IdTableStream for CachingStream {
    fn width(&self) -> usize {
        self.width
    }
}

/// Applies a LIMIT/OFFSET window to a chunk stream; chunks that end up empty
/// are dropped rather than emitted.
struct LimitOffsetStream {
    width: usize,
    inner: Option<SendableIdTableStream>,
    remaining_offset: u64,
    remaining_limit: Option<u64>,
    on_emit: Box<dyn FnMut(Duration, &IdTable) + Send>,
    last_yield: Option<Instant>,
}

impl Stream for LimitOffsetStream {
    type Item = Result<IdTable>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.last_yield.is_none() {
            this.last_yield = Some(Instant::now());
        }
        loop {
            if this.remaining_limit == Some(0) {
                this.inner = None;
            }
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };
            match inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.inner = None;
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(Some(Ok(table))) => {
                    let rows = table.num_rows() as u64;
                    let skip = this.remaining_offset.min(rows);
                    this.remaining_offset -= skip;
                    let mut take = rows - skip;
                    if let Some(limit) = this.remaining_limit {
                        take = take.min(limit);
                    }
                    if take == 0 {
                        continue;
                    }
                    let out = if skip == 0 && take == rows {
                        table
                    } else {
                        table.slice(skip as usize, take as usize)
                    };
                    if let Some(limit) = &mut this.remaining_limit {
                        *limit -= take;
                    }
                    let elapsed = this.last_yield.map(|t| t.elapsed()).unwrap_or_default();
                    (this.on_emit)(elapsed, &out);
                    this.last_yield = Some(Instant::now());
                    return Poll::Ready(Some(Ok(out)));
                }
            }
        }
    }
}

impl IdTableStream for LimitOffsetStream {
    fn width(&self) -> usize {
        self.width
    }
}

/// Counts produced rows and fails the stream once the declared limit is
/// exceeded.
struct LimitGuard {
    width: usize,
    inner: SendableIdTableStream,
    limit: u64,
    seen: u64,
    done: bool,
}

impl Stream for LimitGuard {
    type Item = Result<IdTable>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(Ok(table))) => {
                this.seen += table.num_rows() as u64;
                if this.seen > this.limit {
                    this.done = true;
                    return Poll::Ready(Some(Err(QuiverError::LimitViolated {
                        limit: this.limit,
                    })));
                }
                Poll::Ready(Some(Ok(table)))
            }
        }
    }
}

impl IdTableStream for LimitGuard {
    fn width(&self) -> usize {
        self.width
    }
}

/// Scans declared always-defined columns for the undefined marker, chunk by
/// chunk.
struct DefinednessGuard {
    width: usize,
    inner: SendableIdTableStream,
    columns: Vec<usize>,
    done: bool,
}

impl Stream for DefinednessGuard {
    type Item = Result<IdTable>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(Ok(table))) => {
                if let Err(err) = check_chunk_definedness(&table, &this.columns) {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(Some(Ok(table)))
            }
        }
    }
}

impl IdTableStream for DefinednessGuard {
    fn width(&self) -> usize {
        self.width
    }
}
