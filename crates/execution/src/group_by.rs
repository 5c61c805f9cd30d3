//! Grouped aggregation over a sorted sub-operator result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::TryStreamExt;
use quiver_common::metrics::global_metrics;
use quiver_common::{Id, QuiverError, Result, ResultType};
use tracing::{debug, warn};

use crate::aggregate::{apply_aggregate, AggregateDescriptor, AggregateInput, AggregateKind};
use crate::id_table::IdTable;
use crate::local_vocab::LocalVocab;
use crate::operator::{
    ColumnIndexAndTypeInfo, Definedness, Operator, SharedTaskContext, VariableToColumnMap,
};
use crate::result::QueryResult;
use crate::runs::GroupRunSplitter;
use crate::stream::IdTableStream;

/// Pre-classified SELECT alias as delivered by the parser.
#[derive(Debug, Clone)]
pub struct AliasDescriptor {
    /// Output variable the alias binds.
    pub out_var_name: String,
    /// Original text of the function call, e.g. `COUNT(DISTINCT ?y)`.
    pub function: String,
    /// Whether the alias is an aggregate call.
    pub is_aggregate: bool,
}

/// GROUP BY with aggregate aliases over a sub-operator whose result is
/// sorted on the group-by columns.
///
/// The output columns are the group-by variables (sorted lexicographically)
/// followed by the aggregate aliases (sorted by output variable name). This
/// canonical order makes the result shape independent of the order the user
/// wrote the query in.
pub struct GroupBy {
    subtree: Arc<dyn Operator>,
    group_by_variables: Vec<String>,
    aliases: Vec<AliasDescriptor>,
}

impl GroupBy {
    /// Creates the operator, discarding non-aggregate aliases.
    pub fn new(
        subtree: Arc<dyn Operator>,
        mut group_by_variables: Vec<String>,
        aliases: Vec<AliasDescriptor>,
    ) -> Self {
        let mut aliases: Vec<AliasDescriptor> =
            aliases.into_iter().filter(|a| a.is_aggregate).collect();
        aliases.sort_by(|a, b| a.out_var_name.cmp(&b.out_var_name));
        group_by_variables.sort();
        Self {
            subtree,
            group_by_variables,
            aliases,
        }
    }

    /// Columns of `subtree`'s result a planner must sort by before feeding
    /// it into this operator: the group-by variables in canonical order.
    /// Empty when there are none, because the entire input then forms a
    /// single group.
    pub fn sort_columns(
        subtree: &dyn Operator,
        group_by_variables: &[String],
    ) -> Vec<(usize, bool)> {
        if group_by_variables.is_empty() {
            return Vec::new();
        }
        let mut sorted_vars: Vec<&String> = group_by_variables.iter().collect();
        sorted_vars.sort();
        let sub_vars = subtree.variable_columns();
        sorted_vars
            .iter()
            .filter_map(|var| sub_vars.get(var.as_str()))
            .map(|info| (info.column, false))
            .collect()
    }

    /// One-line rendering for explain output and logs.
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self.group_by_variables.clone();
        parts.extend(self.aliases.iter().map(|a| a.function.clone()));
        format!("GROUP_BY {}", parts.join(", "))
    }

    /// Aliases whose function head names a known aggregate. Unknown heads
    /// get no output column.
    fn known_aliases(&self) -> impl Iterator<Item = &AliasDescriptor> {
        self.aliases
            .iter()
            .filter(|a| parse_head(&a.function).is_some())
    }

    /// Resolves group-by variables and aliases into aggregate descriptors
    /// in output-column order. Group-by variables become identity
    /// aggregates copying the key column into the output.
    fn build_descriptors(&self, sub_vars: &VariableToColumnMap) -> Result<Vec<AggregateDescriptor>> {
        let mut descriptors =
            Vec::with_capacity(self.group_by_variables.len() + self.aliases.len());
        let mut out_col = 0;
        for var in &self.group_by_variables {
            let info = sub_vars
                .get(var)
                .ok_or_else(|| QuiverError::MissingColumn(var.clone()))?;
            descriptors.push(AggregateDescriptor {
                kind: AggregateKind::Sample,
                in_col: info.column,
                out_col,
                distinct: false,
                separator: None,
            });
            out_col += 1;
        }
        for alias in self.known_aliases() {
            if let Some(mut descriptor) = parse_aggregate_alias(alias, sub_vars)? {
                descriptor.out_col = out_col;
                out_col += 1;
                descriptors.push(descriptor);
            }
        }
        Ok(descriptors)
    }
}

impl Operator for GroupBy {
    fn name(&self) -> &'static str {
        "GroupBy"
    }

    fn result_width(&self) -> usize {
        self.group_by_variables.len() + self.known_aliases().count()
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        let sub_vars = self.subtree.variable_columns();
        let mut map = VariableToColumnMap::new();
        let mut column = 0;
        for var in &self.group_by_variables {
            let definedness = sub_vars
                .get(var)
                .map(|info| info.definedness)
                .unwrap_or(Definedness::AlwaysDefined);
            map.insert(var.clone(), ColumnIndexAndTypeInfo { column, definedness });
            column += 1;
        }
        for alias in self.known_aliases() {
            map.insert(
                alias.out_var_name.clone(),
                ColumnIndexAndTypeInfo {
                    column,
                    definedness: Definedness::AlwaysDefined,
                },
            );
            column += 1;
        }
        map
    }

    fn column_types(&self) -> Vec<ResultType> {
        let sub_vars = self.subtree.variable_columns();
        let sub_types = self.subtree.column_types();
        match self.build_descriptors(&sub_vars) {
            Ok(descriptors) => derive_output_types(&descriptors, &sub_types),
            Err(_) => vec![ResultType::Kb; self.result_width()],
        }
    }

    fn sorted_by(&self) -> Vec<usize> {
        // The aggregation output is not claimed sorted.
        Vec::new()
    }

    fn execute(&self, ctx: SharedTaskContext) -> Result<QueryResult> {
        let started = Instant::now();
        let width = self.result_width();

        for alias in &self.aliases {
            if parse_head(&alias.function).is_none() {
                warn!(alias = %alias.function, "unknown aggregate function, skipping alias");
            }
        }

        let sub_vars = self.subtree.variable_columns();
        let sub_types = self.subtree.column_types();
        let descriptors = match self.build_descriptors(&sub_vars) {
            Ok(descriptors) => descriptors,
            Err(QuiverError::MissingColumn(var)) => {
                warn!(
                    variable = %var,
                    operator = %self.describe(),
                    "variable is not part of the sub-result, producing an empty result"
                );
                return QueryResult::materialized(
                    IdTable::new(width),
                    Vec::new(),
                    Arc::new(LocalVocab::new()),
                );
            }
            Err(err) => return Err(err),
        };

        let mut sub_result = self.subtree.execute(Arc::clone(&ctx))?;
        let sub_vocab = sub_result.shared_local_vocab();

        let mut chunks_in = 1u64;
        let drained;
        let input_table: &IdTable = if sub_result.is_fully_materialized() {
            sub_result.id_table()?
        } else {
            drained = drain_lazy(&mut sub_result, &mut chunks_in)?;
            &drained
        };

        let group_columns: Vec<usize> = self
            .group_by_variables
            .iter()
            .filter_map(|var| sub_vars.get(var))
            .map(|info| info.column)
            .collect();

        let mut out_table = IdTable::new(width);
        let mut out_vocab = LocalVocab::new();
        let mut scratch: HashSet<Id> = HashSet::with_capacity(ctx.distinct_scratch_capacity);
        let kernel_input = AggregateInput {
            table: input_table,
            types: &sub_types,
            index: ctx.index.as_ref(),
            sub_vocab: sub_vocab.as_ref(),
        };
        let mut runs = 0u64;
        let mut row = vec![Id(0); width];
        for run in GroupRunSplitter::new(input_table, &group_columns) {
            let run = run?;
            for descriptor in &descriptors {
                apply_aggregate(
                    descriptor,
                    run.clone(),
                    &kernel_input,
                    &mut out_vocab,
                    &mut scratch,
                    &mut row,
                );
            }
            out_table.push_row(&row);
            runs += 1;
        }

        debug!(
            operator = %self.describe(),
            rows_in = input_table.num_rows(),
            rows_out = out_table.num_rows(),
            runs,
            "group by computed"
        );
        global_metrics().record_operator(
            &ctx.query_id,
            self.name(),
            input_table.num_rows() as u64,
            out_table.num_rows() as u64,
            chunks_in,
            1,
            started.elapsed().as_secs_f64(),
        );
        global_metrics().record_aggregation_runs(&ctx.query_id, runs);

        QueryResult::materialized(out_table, Vec::new(), Arc::new(out_vocab))
    }
}

fn drain_lazy(result: &mut QueryResult, chunks: &mut u64) -> Result<IdTable> {
    let mut stream = result.id_tables()?;
    let mut table = IdTable::new(stream.width());
    *chunks = 0;
    futures::executor::block_on(async {
        while let Some(chunk) = stream.try_next().await? {
            table.append(&chunk);
            *chunks += 1;
        }
        Ok::<(), QuiverError>(())
    })?;
    Ok(table)
}

/// Output type per descriptor, in output-column order.
fn derive_output_types(
    descriptors: &[AggregateDescriptor],
    sub_types: &[ResultType],
) -> Vec<ResultType> {
    descriptors
        .iter()
        .map(|d| match d.kind {
            AggregateKind::Avg | AggregateKind::Sum => ResultType::Float,
            AggregateKind::Count => ResultType::Verbatim,
            AggregateKind::GroupConcat => ResultType::String,
            AggregateKind::Min
            | AggregateKind::Max
            | AggregateKind::Sample
            | AggregateKind::First
            | AggregateKind::Last => sub_types[d.in_col],
        })
        .collect()
}

/// Aggregate kind named by the head token of the function text, up to the
/// opening parenthesis.
fn parse_head(function: &str) -> Option<AggregateKind> {
    let trimmed = function.trim_start();
    let head = match trimmed.find('(') {
        Some(position) => &trimmed[..position],
        None => trimmed,
    };
    match head.trim().to_ascii_uppercase().as_str() {
        "AVG" => Some(AggregateKind::Avg),
        "COUNT" => Some(AggregateKind::Count),
        "GROUP_CONCAT" => Some(AggregateKind::GroupConcat),
        "MAX" => Some(AggregateKind::Max),
        "MIN" => Some(AggregateKind::Min),
        "SAMPLE" => Some(AggregateKind::Sample),
        "SUM" => Some(AggregateKind::Sum),
        _ => None,
    }
}

/// Parses one aggregate alias into a descriptor (with `out_col` left for
/// the caller to assign).
///
/// The argument sits between the outer parentheses. A case-insensitive
/// leading `DISTINCT` is stripped. For GROUP_CONCAT a `;` separates the
/// variable from the separator assignment, whose value is the content
/// between the first and last `"`; the default separator is a single space.
fn parse_aggregate_alias(
    alias: &AliasDescriptor,
    sub_vars: &VariableToColumnMap,
) -> Result<Option<AggregateDescriptor>> {
    let Some(kind) = parse_head(&alias.function) else {
        return Ok(None);
    };
    let function = alias.function.as_str();
    let open = function.find('(');
    let close = function.rfind(')');
    let (argument, separator): (&str, Option<String>) = match (open, close) {
        (Some(open), Some(close)) if close > open => {
            let inner = &function[open + 1..close];
            if kind == AggregateKind::GroupConcat {
                match inner.find(';') {
                    Some(semi) => {
                        let separator_text = inner[semi + 1..].trim();
                        let separator = match (separator_text.find('"'), separator_text.rfind('"'))
                        {
                            (Some(first), Some(last)) if last > first => {
                                separator_text[first + 1..last].to_string()
                            }
                            _ => {
                                warn!(
                                    alias = %alias.function,
                                    "unable to parse the GROUP_CONCAT separator, using a single space"
                                );
                                " ".to_string()
                            }
                        };
                        (&inner[..semi], Some(separator))
                    }
                    None => (inner, Some(" ".to_string())),
                }
            } else {
                (inner, None)
            }
        }
        _ => ("", None),
    };
    let mut argument = argument.trim();
    let mut distinct = false;
    if argument
        .get(..8)
        .map_or(false, |head| head.eq_ignore_ascii_case("distinct"))
    {
        distinct = true;
        argument = argument[8..].trim_start();
    }
    let variable = argument.trim();
    let info = sub_vars
        .get(variable)
        .ok_or_else(|| QuiverError::MissingColumn(variable.to_string()))?;
    Ok(Some(AggregateDescriptor {
        kind,
        in_col: info.column,
        out_col: 0,
        distinct,
        separator,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub_vars() -> VariableToColumnMap {
        let mut map = VariableToColumnMap::new();
        map.insert(
            "?x".to_string(),
            ColumnIndexAndTypeInfo {
                column: 0,
                definedness: Definedness::AlwaysDefined,
            },
        );
        map.insert(
            "?y".to_string(),
            ColumnIndexAndTypeInfo {
                column: 1,
                definedness: Definedness::AlwaysDefined,
            },
        );
        map
    }

    fn alias(out: &str, function: &str) -> AliasDescriptor {
        AliasDescriptor {
            out_var_name: out.to_string(),
            function: function.to_string(),
            is_aggregate: true,
        }
    }

    #[test]
    fn head_token_selects_the_kind_case_insensitively() {
        assert_eq!(parse_head("COUNT(?y)"), Some(AggregateKind::Count));
        assert_eq!(parse_head("group_concat(?y)"), Some(AggregateKind::GroupConcat));
        assert_eq!(parse_head("  Sum (?y)"), Some(AggregateKind::Sum));
        assert_eq!(parse_head("MEDIAN(?y)"), None);
    }

    #[test]
    fn distinct_keyword_is_detected_and_stripped() {
        let descriptor = parse_aggregate_alias(&alias("?n", "COUNT(DISTINCT ?y)"), &sub_vars())
            .expect("resolvable")
            .expect("known kind");
        assert_eq!(descriptor.kind, AggregateKind::Count);
        assert!(descriptor.distinct);
        assert_eq!(descriptor.in_col, 1);

        let descriptor = parse_aggregate_alias(&alias("?n", "COUNT(distinct ?y)"), &sub_vars())
            .expect("resolvable")
            .expect("known kind");
        assert!(descriptor.distinct);
    }

    #[test]
    fn group_concat_separator_is_the_quoted_assignment() {
        let descriptor = parse_aggregate_alias(
            &alias("?c", "GROUP_CONCAT(?y ; SEPARATOR=\",\")"),
            &sub_vars(),
        )
        .expect("resolvable")
        .expect("known kind");
        assert_eq!(descriptor.separator.as_deref(), Some(","));
        assert!(!descriptor.distinct);

        let descriptor = parse_aggregate_alias(
            &alias("?c", "GROUP_CONCAT(DISTINCT ?y ; SEPARATOR=\"; \")"),
            &sub_vars(),
        )
        .expect("resolvable")
        .expect("known kind");
        assert_eq!(descriptor.separator.as_deref(), Some("; "));
        assert!(descriptor.distinct);
    }

    #[test]
    fn group_concat_defaults_to_a_single_space() {
        let descriptor = parse_aggregate_alias(&alias("?c", "GROUP_CONCAT(?y)"), &sub_vars())
            .expect("resolvable")
            .expect("known kind");
        assert_eq!(descriptor.separator.as_deref(), Some(" "));
    }

    #[test]
    fn unresolved_variable_is_a_missing_column() {
        let result = parse_aggregate_alias(&alias("?n", "COUNT(?z)"), &sub_vars());
        assert!(matches!(
            result,
            Err(QuiverError::MissingColumn(var)) if var == "?z"
        ));
    }

    #[test]
    fn output_types_follow_the_kind() {
        let sub_types = [ResultType::Kb, ResultType::Float];
        let descriptors = vec![
            AggregateDescriptor {
                kind: AggregateKind::Sample,
                in_col: 0,
                out_col: 0,
                distinct: false,
                separator: None,
            },
            AggregateDescriptor {
                kind: AggregateKind::Sum,
                in_col: 1,
                out_col: 1,
                distinct: false,
                separator: None,
            },
            AggregateDescriptor {
                kind: AggregateKind::Count,
                in_col: 1,
                out_col: 2,
                distinct: false,
                separator: None,
            },
            AggregateDescriptor {
                kind: AggregateKind::GroupConcat,
                in_col: 0,
                out_col: 3,
                distinct: false,
                separator: Some(" ".to_string()),
            },
            AggregateDescriptor {
                kind: AggregateKind::Min,
                in_col: 1,
                out_col: 4,
                distinct: false,
                separator: None,
            },
        ];
        assert_eq!(
            derive_output_types(&descriptors, &sub_types),
            vec![
                ResultType::Kb,
                ResultType::Float,
                ResultType::Verbatim,
                ResultType::String,
                ResultType::Float,
            ]
        );
    }
}
