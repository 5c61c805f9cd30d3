//! Per-run aggregate reduction kernels.
//!
//! Each kernel reduces one maximal equal-key run into one output cell.
//! DISTINCT uses bit-level id identity: two encodings that decode to the
//! same float count as two values, consistent with tuple identity in the
//! index.

use std::collections::HashSet;
use std::ops::Range;

use quiver_common::{Id, ResultType};

use crate::id_table::IdTable;
use crate::index::{decode_to_text, kb_float_value, Index};
use crate::local_vocab::LocalVocab;

/// Aggregate function kinds the engine reduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    /// Arithmetic mean over the run.
    Avg,
    /// Row count, or distinct-id count.
    Count,
    /// Values joined into one string with a separator.
    GroupConcat,
    /// Largest value.
    Max,
    /// Smallest value.
    Min,
    /// An arbitrary value of the run (the last one).
    Sample,
    /// Numeric sum over the run.
    Sum,
    /// Value at the first row of the run.
    First,
    /// Value at the last row of the run.
    Last,
}

/// One resolved aggregate: which input column it reads, which output cell it
/// writes, and how.
#[derive(Debug, Clone)]
pub struct AggregateDescriptor {
    /// Reduction to apply.
    pub kind: AggregateKind,
    /// Input column inside the sub-result.
    pub in_col: usize,
    /// Output column inside the produced result.
    pub out_col: usize,
    /// Whether duplicate ids contribute once.
    pub distinct: bool,
    /// GROUP_CONCAT separator; `None` for every other kind.
    pub separator: Option<String>,
}

/// Borrowed view of everything a kernel needs to read a run.
pub struct AggregateInput<'a> {
    /// The fully materialized sub-result rows.
    pub table: &'a IdTable,
    /// Declared type per sub-result column.
    pub types: &'a [ResultType],
    /// Read-only index capability.
    pub index: &'a dyn Index,
    /// Local vocabulary of the sub-result, for `String` columns.
    pub sub_vocab: &'a LocalVocab,
}

/// Reduces `run` under `descriptor` and writes the one output cell.
///
/// `scratch` is the per-invocation DISTINCT set; it is cleared before the
/// function returns. GROUP_CONCAT output strings land in `out_vocab` and
/// the cell holds the resulting index.
pub fn apply_aggregate(
    descriptor: &AggregateDescriptor,
    run: Range<usize>,
    input: &AggregateInput<'_>,
    out_vocab: &mut LocalVocab,
    scratch: &mut HashSet<Id>,
    out_row: &mut [Id],
) {
    let cell = match descriptor.kind {
        AggregateKind::Count => count(descriptor, run, input, scratch),
        AggregateKind::Sum => Id::from_float(numeric_sum(descriptor, run, input, scratch)),
        AggregateKind::Avg => {
            // The divisor is the run length even under DISTINCT.
            let len = run.len() as f32;
            Id::from_float(numeric_sum(descriptor, run, input, scratch) / len)
        }
        AggregateKind::Min => min_max(descriptor, run, input, false),
        AggregateKind::Max => min_max(descriptor, run, input, true),
        AggregateKind::Sample | AggregateKind::Last => {
            input.table.row(run.end - 1)[descriptor.in_col]
        }
        AggregateKind::First => input.table.row(run.start)[descriptor.in_col],
        AggregateKind::GroupConcat => group_concat(descriptor, run, input, out_vocab, scratch),
    };
    out_row[descriptor.out_col] = cell;
    scratch.clear();
}

fn count(
    descriptor: &AggregateDescriptor,
    run: Range<usize>,
    input: &AggregateInput<'_>,
    scratch: &mut HashSet<Id>,
) -> Id {
    if !descriptor.distinct {
        return Id(run.len() as u64);
    }
    let mut unique = 0u64;
    for i in run {
        if scratch.insert(input.table.row(i)[descriptor.in_col]) {
            unique += 1;
        }
    }
    Id(unique)
}

/// Shared accumulation for SUM and AVG. Text-like columns yield NaN;
/// vocabulary columns stop accumulating at the first non-float word.
fn numeric_sum(
    descriptor: &AggregateDescriptor,
    run: Range<usize>,
    input: &AggregateInput<'_>,
    scratch: &mut HashSet<Id>,
) -> f32 {
    let in_col = descriptor.in_col;
    let mut sum = 0.0_f32;
    match input.types[in_col] {
        ResultType::Verbatim => {
            for i in run {
                let id = input.table.row(i)[in_col];
                if descriptor.distinct && !scratch.insert(id) {
                    continue;
                }
                sum += id.0 as f32;
            }
        }
        ResultType::Float => {
            for i in run {
                let id = input.table.row(i)[in_col];
                if descriptor.distinct && !scratch.insert(id) {
                    continue;
                }
                sum += id.to_float();
            }
        }
        ResultType::String | ResultType::Text | ResultType::Undef => {
            sum = f32::NAN;
        }
        ResultType::Kb => {
            for i in run {
                let id = input.table.row(i)[in_col];
                if descriptor.distinct && !scratch.insert(id) {
                    continue;
                }
                let word = input.index.id_to_string(id);
                match kb_float_value(&word) {
                    Some(value) => sum += value,
                    None => {
                        sum = f32::NAN;
                        break;
                    }
                }
            }
        }
    }
    sum
}

fn min_max(
    descriptor: &AggregateDescriptor,
    run: Range<usize>,
    input: &AggregateInput<'_>,
    take_max: bool,
) -> Id {
    let in_col = descriptor.in_col;
    match input.types[in_col] {
        ResultType::Float => {
            let mut best = if take_max { f32::MIN } else { f32::MAX };
            for i in run {
                let value = input.table.row(i)[in_col].to_float();
                best = if take_max {
                    best.max(value)
                } else {
                    best.min(value)
                };
            }
            Id::from_float(best)
        }
        // Minima and maxima over string-valued columns are not computed.
        ResultType::String | ResultType::Text => Id::NO_VALUE,
        _ => {
            let mut best = if take_max { Id(u64::MIN) } else { Id(u64::MAX) };
            for i in run {
                let id = input.table.row(i)[in_col];
                best = if take_max { best.max(id) } else { best.min(id) };
            }
            best
        }
    }
}

fn group_concat(
    descriptor: &AggregateDescriptor,
    run: Range<usize>,
    input: &AggregateInput<'_>,
    out_vocab: &mut LocalVocab,
    scratch: &mut HashSet<Id>,
) -> Id {
    let column_type = input.types[descriptor.in_col];
    let separator = descriptor.separator.as_deref().unwrap_or(" ");
    let mut parts: Vec<String> = Vec::new();
    for i in run {
        let id = input.table.row(i)[descriptor.in_col];
        if descriptor.distinct && !scratch.insert(id) {
            continue;
        }
        parts.push(decode_to_text(id, column_type, input.index, input.sub_vocab));
    }
    Id(out_vocab.add(parts.join(separator)) as u64)
}
