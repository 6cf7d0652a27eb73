//! Byte order markers shared by formats, readers and writers.

use std::fmt;

/// Byte order (and alignment) used for every multi-byte value of a record.
///
/// The marker characters match the usual struct-format prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    /// `@`: native endianness, values aligned to their own size.
    NativeAligned,
    /// `=`: native endianness, standard sizes, no alignment.
    Native,
    /// `<`
    #[default]
    LittleEndian,
    /// `>`
    BigEndian,
    /// `!`: alias of big endian.
    Network,
}

impl ByteOrder {
    pub fn marker(self) -> char {
        match self {
            ByteOrder::NativeAligned => '@',
            ByteOrder::Native => '=',
            ByteOrder::LittleEndian => '<',
            ByteOrder::BigEndian => '>',
            ByteOrder::Network => '!',
        }
    }

    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            '@' => Some(ByteOrder::NativeAligned),
            '=' => Some(ByteOrder::Native),
            '<' => Some(ByteOrder::LittleEndian),
            '>' => Some(ByteOrder::BigEndian),
            '!' => Some(ByteOrder::Network),
            _ => None,
        }
    }

    /// Shortcut for formats that store a single big-endian flag.
    pub fn big_endian_bool(is_big_endian: bool) -> Self {
        if is_big_endian {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        }
    }

    /// Resolves native orders against the target platform.
    pub fn is_big_endian(self) -> bool {
        match self {
            ByteOrder::BigEndian | ByteOrder::Network => true,
            ByteOrder::LittleEndian => false,
            ByteOrder::NativeAligned | ByteOrder::Native => cfg!(target_endian = "big"),
        }
    }

    /// Only [ByteOrder::NativeAligned] inserts alignment padding.
    pub fn is_aligned(self) -> bool {
        self == ByteOrder::NativeAligned
    }

    /// UTF-16 text follows the record's byte order; native orders count as little endian.
    pub fn utf16_is_big_endian(self) -> bool {
        matches!(self, ByteOrder::BigEndian | ByteOrder::Network)
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.marker())
    }
}
