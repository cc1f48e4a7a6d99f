//! Chunk kinds.

/// The two kinds of chunk the store keeps apart.
///
/// The discriminant is the on-disk type byte of a header slot.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::FromRepr,
)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum ChunkKind {
    /// Raw data; the content hash is recomputable from the bytes.
    Data = 0,
    /// Structured meta-data; validated structurally rather than by hash.
    #[strum(to_string = "metadata", serialize = "meta")]
    MetaData = 1,
}

impl ChunkKind {
    /// The type byte written into a header slot.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a header slot type byte.
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_type_byte_roundtrip() {
        for kind in ChunkKind::iter() {
            assert_eq!(ChunkKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(ChunkKind::from_u8(7), None);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(ChunkKind::from_str("data").unwrap(), ChunkKind::Data);
        assert_eq!(ChunkKind::from_str("meta").unwrap(), ChunkKind::MetaData);
        assert_eq!(ChunkKind::MetaData.to_string(), "metadata");
    }
}
