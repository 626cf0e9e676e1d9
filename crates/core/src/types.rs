//! Identifier newtypes and persisted tag bytes.

use crate::error::{Error, Result};
use std::fmt;

/// Identifier of a virtual stream inside one store file.
///
/// Assigned monotonically from 0. The first two IDs are reserved for the
/// session metadata streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Class/instruction catalogue stream.
    pub const CATALOGUE: StreamId = StreamId(0);
    /// Per-thread trace directory stream.
    pub const DIRECTORY: StreamId = StreamId(1);

    /// Raw numeric value.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Whether this is one of the two reserved metadata streams.
    #[inline]
    pub fn is_reserved(self) -> bool {
        self.0 <= StreamId::DIRECTORY.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Identifier of a traced program element (a variable slot, an instruction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u32);

impl ElementId {
    /// Raw numeric value.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Index into dense per-element tables.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

/// Codec format tag written at the head of every thread directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FormatTag {
    /// Values were discarded (debugging / untraced threads)
    Debug = 0,
    /// Per-sequence gzip streams
    Gzip = 1,
    /// Shared online grammar
    Sequitur = 2,
    /// Fixed-width raw streams
    Uncompressed = 3,
}

impl FormatTag {
    /// Persisted byte.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a persisted byte. Unknown bytes are a hard decode failure.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(FormatTag::Debug),
            1 => Ok(FormatTag::Gzip),
            2 => Ok(FormatTag::Sequitur),
            3 => Ok(FormatTag::Uncompressed),
            other => Err(Error::corrupt(format!(
                "unknown trace sequence format tag {}",
                other
            ))),
        }
    }

    /// Lowercase name, as used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            FormatTag::Debug => "debug",
            FormatTag::Gzip => "gzip",
            FormatTag::Sequitur => "sequitur",
            FormatTag::Uncompressed => "uncompressed",
        }
    }

    /// Parse a configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "debug" => Some(FormatTag::Debug),
            "gzip" => Some(FormatTag::Gzip),
            "sequitur" | "grammar" => Some(FormatTag::Sequitur),
            "uncompressed" => Some(FormatTag::Uncompressed),
            _ => None,
        }
    }
}

/// Value type of a trace sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SequenceKind {
    /// 32-bit signed values
    Integer = 1,
    /// 64-bit signed values
    Long = 2,
    /// 64-bit object identities
    Object = 3,
}

impl SequenceKind {
    /// Persisted byte.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a persisted byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(SequenceKind::Integer),
            2 => Ok(SequenceKind::Long),
            3 => Ok(SequenceKind::Object),
            other => Err(Error::corrupt(format!("unknown trace sequence kind {}", other))),
        }
    }

    /// Width in bytes of one value in the fixed-width encodings.
    #[inline]
    pub fn value_width(self) -> usize {
        match self {
            SequenceKind::Integer => 4,
            SequenceKind::Long | SequenceKind::Object => 8,
        }
    }

    /// Human readable name.
    pub fn name(self) -> &'static str {
        match self {
            SequenceKind::Integer => "integer",
            SequenceKind::Long => "long",
            SequenceKind::Object => "object",
        }
    }

    /// Check that `value` is representable in this kind.
    pub fn check(self, value: i64) -> Result<()> {
        match self {
            SequenceKind::Integer if i32::try_from(value).is_err() => {
                Err(Error::ValueOutOfRange {
                    value,
                    kind: self.name(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_stream_ids() {
        assert_eq!(StreamId::CATALOGUE.as_u32(), 0);
        assert_eq!(StreamId::DIRECTORY.as_u32(), 1);
        assert!(StreamId(0).is_reserved());
        assert!(StreamId(1).is_reserved());
        assert!(!StreamId(2).is_reserved());
    }

    #[test]
    fn test_format_tag_bytes() {
        for tag in [
            FormatTag::Debug,
            FormatTag::Gzip,
            FormatTag::Sequitur,
            FormatTag::Uncompressed,
        ] {
            assert_eq!(FormatTag::from_byte(tag.as_byte()).unwrap(), tag);
            assert_eq!(FormatTag::from_name(tag.name()), Some(tag));
        }
        assert_eq!(FormatTag::Debug.as_byte(), 0);
    }

    #[test]
    fn test_unknown_format_tag_is_corrupt() {
        let err = FormatTag::from_byte(42).unwrap_err();
        assert!(matches!(err, Error::CorruptFormat(_)));
    }

    #[test]
    fn test_format_name_alias() {
        assert_eq!(FormatTag::from_name("grammar"), Some(FormatTag::Sequitur));
        assert_eq!(FormatTag::from_name("zstd"), None);
    }

    #[test]
    fn test_sequence_kind_check() {
        assert!(SequenceKind::Integer.check(i32::MAX as i64).is_ok());
        assert!(SequenceKind::Integer.check(i32::MIN as i64).is_ok());
        assert!(SequenceKind::Integer.check(i32::MAX as i64 + 1).is_err());
        assert!(SequenceKind::Long.check(i64::MIN).is_ok());
        assert!(SequenceKind::Object.check(i64::MAX).is_ok());
    }

    #[test]
    fn test_sequence_kind_widths() {
        assert_eq!(SequenceKind::Integer.value_width(), 4);
        assert_eq!(SequenceKind::Long.value_width(), 8);
        assert_eq!(SequenceKind::Object.value_width(), 8);
    }

    #[test]
    fn test_unknown_kind_is_corrupt() {
        assert!(matches!(
            SequenceKind::from_byte(0),
            Err(Error::CorruptFormat(_))
        ));
    }
}
