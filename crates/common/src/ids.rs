//! Value encoding shared across execution components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque 64-bit encoded value.
///
/// An `Id` identifies a vocabulary entry, a verbatim integer, a bit-packed
/// float, a text record, the undefined marker, or the `NO_VALUE` sentinel.
/// Which of these it is in a given column is fixed by that column's
/// [`ResultType`]; the id itself carries no tag bits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Id(
    /// Raw encoded value.
    pub u64,
);

impl Id {
    /// Sentinel meaning "no value could be produced" (e.g. MIN over a text
    /// column).
    pub const NO_VALUE: Id = Id(u64::MAX);

    /// Marker for an unbound variable in a row.
    pub const UNDEFINED: Id = Id(u64::MAX - 1);

    /// Bit-copies a 32-bit float into the low four bytes, the layout
    /// float-carrying columns use. The column's [`ResultType`] must say
    /// [`ResultType::Float`] for the value to be read back correctly.
    pub fn from_float(value: f32) -> Id {
        Id(value.to_bits() as u64)
    }

    /// Reinterprets the low four bytes as a 32-bit float.
    pub fn to_float(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }

    /// Whether this id is the undefined marker.
    pub fn is_undefined(self) -> bool {
        self == Id::UNDEFINED
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared decoding discipline for a result column.
///
/// Governs how [`Id`]s in that column are interpreted by the aggregate
/// kernels and the index adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    /// The id is the integer value itself.
    Verbatim,
    /// The low four bytes of the id are an `f32` bit pattern.
    Float,
    /// The id indexes the producing result's local vocabulary.
    String,
    /// The id references a text record resolvable via the index.
    Text,
    /// The id references the knowledge-base vocabulary.
    Kb,
    /// The column only ever holds the undefined marker.
    Undef,
}

#[cfg(test)]
mod tests {
    use super::Id;

    #[test]
    fn float_round_trips_through_low_bytes() {
        for v in [0.0_f32, -1.5, 3.25, f32::MAX, f32::MIN_POSITIVE] {
            let id = Id::from_float(v);
            assert_eq!(id.0 >> 32, 0);
            assert_eq!(id.to_float(), v);
        }
    }

    #[test]
    fn sentinels_are_distinct() {
        assert_ne!(Id::NO_VALUE, Id::UNDEFINED);
        assert!(Id::UNDEFINED.is_undefined());
        assert!(!Id::NO_VALUE.is_undefined());
    }
}
