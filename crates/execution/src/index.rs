//! Read-only index capability and typed-literal decoding.
//!
//! Typed literals live inside the index vocabulary as encoded words so that
//! their lexicographic order matches value order. The helpers here reverse
//! that encoding for the aggregate kernels.

use quiver_common::{Id, ResultType};

use crate::local_vocab::LocalVocab;

/// Prefix marking any typed literal inside the vocabulary.
pub const VALUE_PREFIX: &str = ":v:";
/// Prefix marking a float-typed literal inside the vocabulary.
pub const VALUE_FLOAT_PREFIX: &str = ":v:flt:";
/// Character closing every encoded value word.
pub const VALUE_WORD_TERMINATOR: char = ':';

/// Read-only capability onto the persistent index.
///
/// Kernels invoke it concurrently without synchronization.
pub trait Index: Send + Sync {
    /// Resolves a vocabulary id to its word.
    fn id_to_string(&self, id: Id) -> String;

    /// Resolves a text-record id to its excerpt.
    fn text_excerpt(&self, id: Id) -> String;
}

/// Encodes a float as an index word whose lexicographic order matches
/// numeric order.
pub fn convert_float_to_index_word(value: f32) -> String {
    let bits = value.to_bits();
    // Flip negative values entirely and set the sign bit on positive ones,
    // so the resulting u32 orders the same way the floats do.
    let ordered = if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    };
    format!("{VALUE_FLOAT_PREFIX}{ordered:08x}{VALUE_WORD_TERMINATOR}")
}

/// Decodes a word produced by [`convert_float_to_index_word`], with the
/// terminal character already trimmed off.
pub fn convert_index_word_to_float(word: &str) -> f32 {
    let hex = word.strip_prefix(VALUE_FLOAT_PREFIX).unwrap_or(word);
    let ordered = u32::from_str_radix(hex, 16).unwrap_or(0);
    let bits = if ordered & 0x8000_0000 != 0 {
        ordered ^ 0x8000_0000
    } else {
        !ordered
    };
    f32::from_bits(bits)
}

/// Renders an encoded value word as the literal a user would see.
pub fn convert_index_word_to_value_literal(word: &str) -> String {
    let trimmed = word.strip_suffix(VALUE_WORD_TERMINATOR).unwrap_or(word);
    if trimmed.starts_with(VALUE_FLOAT_PREFIX) {
        let value = convert_index_word_to_float(trimmed);
        format!("\"{value}\"")
    } else if let Some(rest) = trimmed.strip_prefix(VALUE_PREFIX) {
        format!("\"{rest}\"")
    } else {
        trimmed.to_string()
    }
}

/// Numeric value of a vocabulary word, when it encodes a float literal.
/// `None` for every other word.
pub fn kb_float_value(word: &str) -> Option<f32> {
    if !word.starts_with(VALUE_FLOAT_PREFIX) {
        return None;
    }
    Some(convert_index_word_to_float(&word[..word.len() - 1]))
}

/// Decodes one id into the string form GROUP_CONCAT joins, according to the
/// column's declared type.
pub fn decode_to_text(
    id: Id,
    result_type: ResultType,
    index: &dyn Index,
    sub_vocab: &LocalVocab,
) -> String {
    match result_type {
        ResultType::Verbatim => id.0.to_string(),
        ResultType::Float => id.to_float().to_string(),
        ResultType::Text => index.text_excerpt(id),
        ResultType::String => sub_vocab
            .get(id.0 as usize)
            .unwrap_or_default()
            .to_string(),
        ResultType::Kb => {
            let word = index.id_to_string(id);
            if word.starts_with(VALUE_PREFIX) {
                convert_index_word_to_value_literal(&word)
            } else {
                word
            }
        }
        ResultType::Undef => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_words_round_trip() {
        for v in [0.0_f32, 1.5, -2.25, 1000.0, -0.0, f32::MAX] {
            let word = convert_float_to_index_word(v);
            assert!(word.starts_with(VALUE_FLOAT_PREFIX));
            assert!(word.ends_with(VALUE_WORD_TERMINATOR));
            let decoded = convert_index_word_to_float(&word[..word.len() - 1]);
            assert_eq!(decoded, v);
        }
    }

    #[test]
    fn float_words_order_like_their_values() {
        let values = [-1000.0_f32, -1.5, -0.5, 0.0, 0.25, 3.0, 42.0];
        let words: Vec<String> = values
            .iter()
            .map(|&v| convert_float_to_index_word(v))
            .collect();
        let mut sorted = words.clone();
        sorted.sort();
        assert_eq!(sorted, words);
    }

    #[test]
    fn kb_float_value_rejects_plain_words() {
        assert_eq!(kb_float_value("<http://example.org/a>"), None);
        assert_eq!(kb_float_value(":v:date:2020"), None);
        let word = convert_float_to_index_word(2.5);
        assert_eq!(kb_float_value(&word), Some(2.5));
    }

    #[test]
    fn value_literal_rendering() {
        let word = convert_float_to_index_word(3.5);
        assert_eq!(convert_index_word_to_value_literal(&word), "\"3.5\"");
        assert_eq!(
            convert_index_word_to_value_literal(":v:date:2020"),
            "\"date:2020\""
        );
        assert_eq!(
            convert_index_word_to_value_literal("<http://example.org/a>"),
            "<http://example.org/a>"
        );
    }
}
