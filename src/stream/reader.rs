use crate::{
    byte_order::ByteOrder,
    codec,
    errors::{Result, StreamError, ValueError},
    format::Format,
    text::{self, Encoding},
    value::Value,
};

/// Cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    position: usize,
    byte_order: ByteOrder,
    long_varints: Option<bool>,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader {
            data,
            position: 0,
            byte_order: ByteOrder::default(),
            long_varints: None,
        }
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_long_varints(mut self, long_varints: bool) -> Self {
        self.long_varints = Some(long_varints);
        self
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn set_byte_order(&mut self, byte_order: ByteOrder) {
        self.byte_order = byte_order;
    }

    pub fn long_varints(&self) -> Option<bool> {
        self.long_varints
    }

    pub fn set_long_varints(&mut self, long_varints: Option<bool>) {
        self.long_varints = long_varints;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Unpacks `format` text (optionally prefixed by a byte order marker) at the
    /// current position and advances past it.
    pub fn unpack(&mut self, format: &str) -> Result<Vec<Value>> {
        let (order, format) = super::parse_format(format, self.byte_order)?;
        self.unpack_format(&format, order, self.long_varints)
    }

    /// Unpacks exactly one value.
    pub fn unpack_value(&mut self, format: &str) -> Result<Value> {
        let values = self.unpack(format)?;
        single(format, values)
    }

    pub fn unpack_format(
        &mut self,
        format: &Format,
        order: ByteOrder,
        long_varints: Option<bool>,
    ) -> Result<Vec<Value>> {
        let values = codec::unpack_from(&self.data[self.position..], format, order, long_varints)?;
        self.position += format.size(order, long_varints)?;
        Ok(values)
    }

    /// Unpacks `format` `ahead` bytes past the current position without moving.
    pub fn peek(&mut self, format: &str, ahead: usize) -> Result<Vec<Value>> {
        let offset = self.ahead(ahead)?;
        self.at(offset, |reader| reader.unpack(format))
    }

    pub fn peek_value(&mut self, format: &str, ahead: usize) -> Result<Value> {
        let values = self.peek(format, ahead)?;
        single(format, values)
    }

    /// Raw bytes `ahead` bytes past the current position, without moving.
    pub fn peek_bytes(&self, size: usize, ahead: usize) -> Result<&'a [u8]> {
        self.slice(self.ahead(ahead)?, size)
    }

    pub fn read(&mut self, size: usize) -> Result<&'a [u8]> {
        let bytes = self.slice(self.position, size)?;
        self.position += size;
        Ok(bytes)
    }

    /// Moves to an absolute offset. Returns the new position.
    pub fn seek(&mut self, offset: usize) -> Result<usize> {
        if offset > self.data.len() {
            return Err(StreamError::SeekOutOfRange {
                offset,
                len: self.data.len(),
            }
            .into());
        }
        self.position = offset;
        Ok(offset)
    }

    pub fn skip(&mut self, size: usize) -> Result<()> {
        self.seek(self.ahead(size)?).map(|_| ())
    }

    /// Advances to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        if alignment == 0 {
            return Ok(());
        }
        let rem = self.position % alignment;
        if rem == 0 {
            return Ok(());
        }
        self.skip(alignment - rem)
    }

    /// Reads `size` bytes and checks that each equals `byte`.
    pub fn assert_pad(&mut self, size: usize, byte: u8) -> Result<()> {
        let found = self.read(size)?;
        if found.iter().any(|b| *b != byte) {
            return Err(StreamError::BadPadding {
                size,
                byte,
                found: found.to_vec(),
            }
            .into());
        }
        Ok(())
    }

    /// Reads a fixed-length byte string, optionally dropping trailing nulls.
    pub fn unpack_bytes(&mut self, length: usize, strip: bool) -> Result<&'a [u8]> {
        let bytes = self.read(length)?;
        Ok(if strip { text::strip_nulls(bytes) } else { bytes })
    }

    /// Reads and decodes a fixed-length string.
    pub fn unpack_string(
        &mut self,
        length: usize,
        encoding: Encoding,
        strip: bool,
    ) -> Result<String> {
        let bytes = self.read(length)?;
        let decoded = encoding.decode(bytes, self.byte_order)?;
        Ok(if strip {
            decoded.trim_end_matches('\0').to_string()
        } else {
            decoded
        })
    }

    /// Reads a null-terminated string and moves past its terminator.
    pub fn unpack_z_string(&mut self, encoding: Encoding) -> Result<String> {
        let width = encoding.char_width();
        let rest = &self.data[self.position..];
        let len = text::find_terminator(rest, width).ok_or(StreamError::MissingTerminator)?;
        let decoded = encoding.decode(&rest[..len], self.byte_order)?;
        self.position += len + width;
        Ok(decoded)
    }

    /// Peeks `size` bytes and matches them against the big and little endian
    /// signatures of a file marker.
    pub fn byte_order_from_peek(
        &self,
        size: usize,
        ahead: usize,
        big_endian: &[u8],
        little_endian: &[u8],
    ) -> Result<ByteOrder> {
        let found = self.peek_bytes(size, ahead)?;
        if found == big_endian {
            Ok(ByteOrder::BigEndian)
        } else if found == little_endian {
            Ok(ByteOrder::LittleEndian)
        } else {
            Err(StreamError::UnrecognisedMarker {
                what: "byte order",
                found: found.to_vec(),
            }
            .into())
        }
    }

    /// Peeks `size` bytes and matches them against the markers of long and
    /// short varint layouts.
    pub fn long_varints_from_peek(
        &self,
        size: usize,
        ahead: usize,
        long: &[u8],
        short: &[u8],
    ) -> Result<bool> {
        let found = self.peek_bytes(size, ahead)?;
        if found == long {
            Ok(true)
        } else if found == short {
            Ok(false)
        } else {
            Err(StreamError::UnrecognisedMarker {
                what: "varint width",
                found: found.to_vec(),
            }
            .into())
        }
    }

    /// Runs `f` at `offset`, then restores the current position even if `f` fails.
    pub fn at<T, F>(&mut self, offset: usize, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved = self.position;
        self.seek(offset)?;
        let result = f(self);
        self.position = saved;
        result
    }

    /// Absolute offset `ahead` bytes past the current position.
    fn ahead(&self, ahead: usize) -> Result<usize> {
        self.position.checked_add(ahead).ok_or_else(|| {
            StreamError::SeekOutOfRange {
                offset: usize::MAX,
                len: self.data.len(),
            }
            .into()
        })
    }

    fn slice(&self, offset: usize, size: usize) -> Result<&'a [u8]> {
        let data: &'a [u8] = self.data;
        offset
            .checked_add(size)
            .and_then(|end| data.get(offset..end))
            .ok_or_else(|| {
                StreamError::UnexpectedEof {
                    requested: size,
                    available: data.len().saturating_sub(offset),
                    format: format!("{size}s"),
                }
                .into()
            })
    }
}

fn single(format: &str, values: Vec<Value>) -> Result<Value> {
    let found = values.len();
    let mut values = values.into_iter();
    match (values.next(), values.next()) {
        (Some(value), None) => Ok(value),
        _ => Err(ValueError::Count {
            field: format.to_string(),
            expected: 1,
            found,
        }
        .into()),
    }
}
