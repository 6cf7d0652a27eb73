//! Codec settings shared by the readers and writers of one file format.

use crate::{
    byte_order::ByteOrder,
    stream::{Reader, Writer},
};

/// Default byte order and varint width for streams.
///
/// `long_varints` stays unset for formats without variable-width integers;
/// using a `v`/`V` field without it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    pub byte_order: ByteOrder,
    pub long_varints: Option<bool>,
}

impl Config {
    pub fn new(byte_order: ByteOrder, long_varints: Option<bool>) -> Self {
        Config {
            byte_order,
            long_varints,
        }
    }

    pub fn writer(&self) -> Writer {
        Writer::new(self.byte_order, self.long_varints)
    }

    pub fn reader<'a>(&self, data: &'a [u8]) -> Reader<'a> {
        let mut reader = Reader::new(data).with_byte_order(self.byte_order);
        reader.set_long_varints(self.long_varints);
        reader
    }
}
