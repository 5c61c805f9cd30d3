#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use quiver_common::{EngineConfig, Id, Result, ResultType};
use quiver_execution::{
    table_stream, ColumnIndexAndTypeInfo, Definedness, IdTable, Index, LocalVocab, Operator,
    QueryResult, SendableIdTableStream, SharedTaskContext, TaskContext, VariableToColumnMap,
};

/// Builds a table of the given width from raw id values.
pub fn table(width: usize, rows: &[&[u64]]) -> IdTable {
    let mut t = IdTable::new(width);
    for row in rows {
        let ids: Vec<Id> = row.iter().map(|&v| Id(v)).collect();
        t.push_row(&ids);
    }
    t
}

/// Raw value of the undefined marker, for use with [`table`].
pub fn undef() -> u64 {
    Id::UNDEFINED.0
}

/// All ways to split `table` into consecutive non-empty chunks, to
/// exhaustively exercise stream variants.
pub fn all_chunk_splits(table: &IdTable) -> Vec<Vec<IdTable>> {
    let rows = table.num_rows();
    if rows == 0 {
        return vec![Vec::new()];
    }
    let mut splits = Vec::new();
    for mask in 0..(1_u32 << (rows - 1)) {
        let mut chunks = Vec::new();
        let mut start = 0;
        for i in 0..rows {
            if i + 1 == rows || mask & (1 << i) != 0 {
                chunks.push(table.slice(start, i + 1 - start));
                start = i + 1;
            }
        }
        splits.push(chunks);
    }
    splits
}

/// A lazy result over precomputed chunks.
pub fn lazy_result(width: usize, chunks: Vec<IdTable>, sorted_by: Vec<usize>) -> QueryResult {
    QueryResult::lazy(
        table_stream(width, chunks),
        sorted_by,
        Arc::new(LocalVocab::new()),
    )
}

/// A materialized result without vocabulary.
pub fn materialized_result(table: IdTable, sorted_by: Vec<usize>) -> Result<QueryResult> {
    QueryResult::materialized(table, sorted_by, Arc::new(LocalVocab::new()))
}

/// Drains a chunk stream to completion.
pub fn consume(stream: &mut SendableIdTableStream) -> Result<Vec<IdTable>> {
    use futures::TryStreamExt;
    futures::executor::block_on(async {
        let mut out = Vec::new();
        while let Some(chunk) = stream.try_next().await? {
            out.push(chunk);
        }
        Ok(out)
    })
}

/// Concatenates chunks into one table.
pub fn concat(width: usize, chunks: &[IdTable]) -> IdTable {
    let mut out = IdTable::new(width);
    for chunk in chunks {
        out.append(chunk);
    }
    out
}

/// In-memory index fake mapping raw id values to words and excerpts.
#[derive(Default)]
pub struct MemoryIndex {
    words: HashMap<u64, String>,
    excerpts: HashMap<u64, String>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_word(mut self, id: u64, word: impl Into<String>) -> Self {
        self.words.insert(id, word.into());
        self
    }

    pub fn with_excerpt(mut self, id: u64, excerpt: impl Into<String>) -> Self {
        self.excerpts.insert(id, excerpt.into());
        self
    }
}

impl Index for MemoryIndex {
    fn id_to_string(&self, id: Id) -> String {
        self.words.get(&id.0).cloned().unwrap_or_default()
    }

    fn text_excerpt(&self, id: Id) -> String {
        self.excerpts.get(&id.0).cloned().unwrap_or_default()
    }
}

/// Task context with default configuration for tests.
pub fn test_ctx(index: Arc<dyn Index>) -> SharedTaskContext {
    Arc::new(TaskContext::new("test-query", &EngineConfig::default(), index))
}

/// Operator stub producing an already-computed result, either materialized
/// or as a lazy chunk stream.
pub struct Precomputed {
    pub table: IdTable,
    pub variables: VariableToColumnMap,
    pub types: Vec<ResultType>,
    pub sorted: Vec<usize>,
    pub vocab: Arc<LocalVocab>,
    pub lazy_chunks: Option<Vec<IdTable>>,
}

impl Precomputed {
    pub fn new(table: IdTable, variables: &[(&str, usize)], types: Vec<ResultType>) -> Self {
        let mut map = VariableToColumnMap::new();
        for (name, column) in variables {
            map.insert(
                (*name).to_string(),
                ColumnIndexAndTypeInfo {
                    column: *column,
                    definedness: Definedness::AlwaysDefined,
                },
            );
        }
        Self {
            table,
            variables: map,
            types,
            sorted: Vec::new(),
            vocab: Arc::new(LocalVocab::new()),
            lazy_chunks: None,
        }
    }

    pub fn with_vocab(mut self, vocab: LocalVocab) -> Self {
        self.vocab = Arc::new(vocab);
        self
    }

    pub fn lazy(mut self, chunks: Vec<IdTable>) -> Self {
        self.lazy_chunks = Some(chunks);
        self
    }
}

impl Operator for Precomputed {
    fn name(&self) -> &'static str {
        "Precomputed"
    }

    fn result_width(&self) -> usize {
        self.table.num_columns()
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        self.variables.clone()
    }

    fn column_types(&self) -> Vec<ResultType> {
        self.types.clone()
    }

    fn sorted_by(&self) -> Vec<usize> {
        self.sorted.clone()
    }

    fn execute(&self, _ctx: SharedTaskContext) -> Result<QueryResult> {
        match &self.lazy_chunks {
            Some(chunks) => Ok(QueryResult::lazy(
                table_stream(self.table.num_columns(), chunks.clone()),
                self.sorted.clone(),
                Arc::clone(&self.vocab),
            )),
            None => QueryResult::materialized(
                self.table.clone(),
                self.sorted.clone(),
                Arc::clone(&self.vocab),
            ),
        }
    }
}
