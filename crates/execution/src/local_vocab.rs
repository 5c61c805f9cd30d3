//! Per-result string store for aggregate-produced literals.

/// An ordered, append-only sequence of strings produced during one result's
/// computation.
///
/// A [`ResultType::String`](quiver_common::ResultType::String) id is the
/// index of an entry in the vocabulary of the result that produced the row.
/// Results share vocabularies by `Arc` handle; an operator that needs to add
/// entries of its own builds a new vocabulary (or clones the upstream one)
/// instead of mutating the shared handle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LocalVocab {
    words: Vec<String>,
}

impl LocalVocab {
    /// Creates an empty vocabulary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `word` and returns its index.
    pub fn add(&mut self, word: String) -> usize {
        self.words.push(word);
        self.words.len() - 1
    }

    /// The word at `index`, if present.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.words.get(index).map(String::as_str)
    }

    /// Number of stored words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the vocabulary is empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::LocalVocab;

    #[test]
    fn indices_are_append_order() {
        let mut vocab = LocalVocab::new();
        assert_eq!(vocab.add("a,b".to_string()), 0);
        assert_eq!(vocab.add("c".to_string()), 1);
        assert_eq!(vocab.get(0), Some("a,b"));
        assert_eq!(vocab.get(1), Some("c"));
        assert_eq!(vocab.get(2), None);
        assert_eq!(vocab.len(), 2);
    }
}
