//! Text encodings for fixed-length and null-terminated string fields.

use std::str::FromStr;

use crate::{byte_order::ByteOrder, errors::ValueError};

/// Character encoding for decoding byte strings to text.
///
/// UTF-16 has no fixed byte order here: it follows the record's [ByteOrder].
/// Legacy code pages such as Shift-JIS or windows-1252 go through
/// [Encoding::Other]; parsing a label picks the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Any valid UTF-8 byte sequence is accepted.
    Utf8,
    /// Every byte must be in 0..=0x7F.
    Ascii,
    Utf16,
    /// An ASCII-compatible encoding whose null is one byte. Text that cannot
    /// be mapped either way is an error, never replaced.
    Other(&'static encoding_rs::Encoding),
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Ascii => "ascii",
            Encoding::Utf16 => "utf-16",
            Encoding::Other(encoding) => encoding.name(),
        }
    }

    /// Width of one code unit, which is also the width of the null terminator.
    pub fn char_width(self) -> usize {
        match self {
            Encoding::Utf16 => 2,
            Encoding::Utf8 | Encoding::Ascii | Encoding::Other(_) => 1,
        }
    }

    pub fn encode(self, text: &str, order: ByteOrder) -> Result<Vec<u8>, ValueError> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Ascii => {
                if !text.is_ascii() {
                    return Err(ValueError::Encode {
                        encoding: self.name(),
                        reason: format!("{text:?} contains non-ASCII characters"),
                    });
                }
                Ok(text.as_bytes().to_vec())
            }
            Encoding::Utf16 => {
                let big = order.utf16_is_big_endian();
                Ok(text
                    .encode_utf16()
                    .flat_map(|unit| {
                        if big {
                            unit.to_be_bytes()
                        } else {
                            unit.to_le_bytes()
                        }
                    })
                    .collect())
            }
            Encoding::Other(encoding) => {
                let (bytes, _, unmappable) = encoding.encode(text);
                if unmappable {
                    return Err(ValueError::Encode {
                        encoding: self.name(),
                        reason: format!("{text:?} has characters outside the encoding"),
                    });
                }
                Ok(bytes.into_owned())
            }
        }
    }

    pub fn decode(self, bytes: &[u8], order: ByteOrder) -> Result<String, ValueError> {
        let decode_error = |reason: String| ValueError::Decode {
            encoding: self.name(),
            reason,
        };

        match self {
            Encoding::Utf8 => {
                String::from_utf8(bytes.to_vec()).map_err(|e| decode_error(e.to_string()))
            }
            Encoding::Ascii => {
                if !bytes.is_ascii() {
                    return Err(decode_error("byte outside 0..=0x7F".to_string()));
                }
                String::from_utf8(bytes.to_vec()).map_err(|e| decode_error(e.to_string()))
            }
            Encoding::Utf16 => {
                if bytes.len() % 2 != 0 {
                    return Err(decode_error(format!("odd byte length {}", bytes.len())));
                }
                let big = order.utf16_is_big_endian();
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| {
                        let pair = [pair[0], pair[1]];
                        if big {
                            u16::from_be_bytes(pair)
                        } else {
                            u16::from_le_bytes(pair)
                        }
                    })
                    .collect();
                String::from_utf16(&units).map_err(|e| decode_error(e.to_string()))
            }
            Encoding::Other(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| text.into_owned())
                .ok_or_else(|| decode_error("malformed byte sequence".to_string())),
        }
    }
}

impl From<&'static encoding_rs::Encoding> for Encoding {
    fn from(encoding: &'static encoding_rs::Encoding) -> Self {
        if encoding == encoding_rs::UTF_8 {
            Encoding::Utf8
        } else if encoding == encoding_rs::UTF_16LE || encoding == encoding_rs::UTF_16BE {
            Encoding::Utf16
        } else {
            Encoding::Other(encoding)
        }
    }
}

impl FromStr for Encoding {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "utf8" => Ok(Encoding::Utf8),
            "ascii" => Ok(Encoding::Ascii),
            "utf16" => Ok(Encoding::Utf16),
            _ => encoding_rs::Encoding::for_label(s.trim().as_bytes())
                .map(Encoding::from)
                .ok_or_else(|| ValueError::custom(format!("unsupported encoding `{s}`"))),
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Encoding {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Encoding {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

/// Strips trailing nulls from raw bytes.
pub fn strip_nulls(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Encodes `text` followed by a null terminator as wide as one code unit.
pub fn encode_z_string(
    text: &str,
    encoding: Encoding,
    order: ByteOrder,
) -> Result<Vec<u8>, ValueError> {
    let mut bytes = encoding.encode(text, order)?;
    bytes.extend(std::iter::repeat_n(0, encoding.char_width()));
    Ok(bytes)
}

/// Finds the null terminator in `data`, stepping one code unit at a time.
/// Returns the byte length of the text before it.
pub fn find_terminator(data: &[u8], char_width: usize) -> Option<usize> {
    data.chunks_exact(char_width)
        .position(|unit| unit.iter().all(|b| *b == 0))
        .map(|i| i * char_width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_follows_byte_order() {
        let le = Encoding::Utf16.encode("A", ByteOrder::LittleEndian).unwrap();
        assert_eq!(le, [0x41, 0x00]);
        let be = Encoding::Utf16.encode("A", ByteOrder::BigEndian).unwrap();
        assert_eq!(be, [0x00, 0x41]);

        assert_eq!(Encoding::Utf16.decode(&be, ByteOrder::Network).unwrap(), "A");
    }

    #[test]
    fn test_ascii_rejects_non_ascii() {
        assert!(Encoding::Ascii.encode("é", ByteOrder::LittleEndian).is_err());
        assert!(Encoding::Ascii.decode(&[0xC3, 0xA9], ByteOrder::LittleEndian).is_err());
    }

    #[test]
    fn test_parse_encoding_names() {
        assert_eq!("UTF-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("utf_16".parse::<Encoding>().unwrap(), Encoding::Utf16);
        assert_eq!(
            "shift_jis".parse::<Encoding>().unwrap(),
            Encoding::Other(encoding_rs::SHIFT_JIS)
        );
        assert_eq!("cp1252".parse::<Encoding>().unwrap().name(), "windows-1252");
        assert_eq!("UTF-16LE".parse::<Encoding>().unwrap(), Encoding::Utf16);
        assert!("klingon".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_shift_jis_round_trip() {
        let sjis = Encoding::Other(encoding_rs::SHIFT_JIS);
        let bytes = sjis.encode("テスト", ByteOrder::BigEndian).unwrap();
        assert_eq!(bytes, [0x83, 0x65, 0x83, 0x58, 0x83, 0x67]);
        assert_eq!(sjis.decode(&bytes, ByteOrder::LittleEndian).unwrap(), "テスト");

        assert!(matches!(
            sjis.decode(&[0x83], ByteOrder::LittleEndian),
            Err(ValueError::Decode { encoding: "Shift_JIS", .. })
        ));
        assert!(matches!(
            Encoding::Other(encoding_rs::WINDOWS_1252).encode("テ", ByteOrder::LittleEndian),
            Err(ValueError::Encode { .. })
        ));
    }

    #[test]
    fn test_strip_nulls() {
        assert_eq!(strip_nulls(b"ab\0\0"), b"ab");
        assert_eq!(strip_nulls(b"\0\0"), b"");
    }

    #[test]
    fn test_z_string_terminator_width() {
        let bytes = encode_z_string("hi", Encoding::Utf16, ByteOrder::LittleEndian).unwrap();
        assert_eq!(bytes, [b'h', 0, b'i', 0, 0, 0]);
        assert_eq!(find_terminator(&bytes, 2), Some(4));

        let bytes = encode_z_string("hi", Encoding::Utf8, ByteOrder::LittleEndian).unwrap();
        assert_eq!(find_terminator(&bytes, 1), Some(2));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_encoding_serializes_as_label() {
        let sjis = Encoding::Other(encoding_rs::SHIFT_JIS);
        assert_eq!(serde_json::to_string(&sjis).unwrap(), "\"Shift_JIS\"");
        assert_eq!(serde_json::from_str::<Encoding>("\"utf-16\"").unwrap(), Encoding::Utf16);
        assert!(serde_json::from_str::<Encoding>("\"klingon\"").is_err());
    }
}
