use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::{
    byte_order::ByteOrder,
    codec,
    errors::{ReservationError, Result, StreamError},
    format::Format,
    ledger::{Ledger, Owner, Reservation, ReservationKey},
    text::{self, Encoding},
    value::Value,
};

/// Growable output buffer with a reservation ledger.
///
/// [Writer::finish] only hands out the bytes once every reservation is filled.
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
    byte_order: ByteOrder,
    long_varints: Option<bool>,
    ledger: Ledger,
    next_owner: u64,
}

impl Writer {
    pub fn new(byte_order: ByteOrder, long_varints: Option<bool>) -> Self {
        Writer {
            byte_order,
            long_varints,
            ..Default::default()
        }
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

    /// Number of bytes written so far.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Current contents, reserved spans still zeroed.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Packs `values` with `format` text, optionally prefixed by a byte order marker.
    pub fn pack(&mut self, format: &str, values: &[Value]) -> Result<()> {
        let (order, format) = super::parse_format(format, self.byte_order)?;
        self.pack_format(&format, order, self.long_varints, values)
    }

    pub fn pack_format(
        &mut self,
        format: &Format,
        order: ByteOrder,
        long_varints: Option<bool>,
        values: &[Value],
    ) -> Result<()> {
        let mut packed = Vec::with_capacity(format.size(order, long_varints)?);
        codec::pack_into(&mut packed, format, order, long_varints, values)?;
        self.buf.put_slice(&packed);
        Ok(())
    }

    /// Overwrites already written bytes at `offset`.
    pub fn pack_at(&mut self, offset: usize, format: &str, values: &[Value]) -> Result<()> {
        let (order, format) = super::parse_format(format, self.byte_order)?;
        let mut packed = Vec::new();
        codec::pack_into(&mut packed, &format, order, self.long_varints, values)?;
        self.overwrite(offset, &packed)
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn pad(&mut self, size: usize) {
        self.pad_with(size, 0);
    }

    pub fn pad_with(&mut self, size: usize, byte: u8) {
        self.buf.put_bytes(byte, size);
    }

    pub fn pad_to_offset(&mut self, offset: usize) -> Result<()> {
        let position = self.position();
        if position > offset {
            return Err(StreamError::PastOffset { offset, position }.into());
        }
        self.pad(offset - position);
        Ok(())
    }

    /// Pads with nulls up to the next multiple of `alignment`.
    pub fn pad_align(&mut self, alignment: usize) {
        if alignment == 0 {
            return;
        }
        let rem = self.position() % alignment;
        if rem != 0 {
            self.pad(alignment - rem);
        }
    }

    /// Writes `text` and a null terminator as wide as one code unit.
    pub fn pack_z_string(&mut self, text: &str, encoding: Encoding) -> Result<()> {
        let bytes = text::encode_z_string(text, encoding, self.byte_order)?;
        self.buf.put_slice(&bytes);
        Ok(())
    }

    /// Appends null bytes for `format` and reserves them under `name`.
    pub fn reserve(&mut self, name: &str, format: &str) -> Result<ReservationKey> {
        let (order, format) = super::parse_format(format, self.byte_order)?;
        let format = format.resolve(self.long_varints)?;
        let size = format.size(order, None)?;

        let key = ReservationKey::named(name);
        self.mark_reserved(
            key.clone(),
            Reservation {
                offset: self.position(),
                byte_order: order,
                format,
                align_base: 0,
            },
        )?;
        self.pad(size);
        Ok(key)
    }

    /// Records a reservation over bytes that are, or will be, written by the caller.
    pub fn mark_reserved(
        &mut self,
        key: ReservationKey,
        reservation: Reservation,
    ) -> Result<(), ReservationError> {
        debug!(key = %key, offset = reservation.offset, format = %reservation.format, "reserved");
        self.ledger.insert(key, reservation)
    }

    /// Encodes `values` with the reserved format and patches them in place.
    /// The reservation is consumed only when the patch succeeds.
    pub fn fill(&mut self, key: &ReservationKey, values: &[Value]) -> Result<()> {
        if values.is_empty() {
            return Err(ReservationError::NoValues(key.to_string()).into());
        }

        let reservation = self.ledger.get(key)?;
        let offset = reservation.offset;
        let mut packed = Vec::new();
        codec::pack_into_at(
            &mut packed,
            &reservation.format,
            reservation.byte_order,
            None,
            values,
            reservation.align_base,
        )?;

        self.overwrite(offset, &packed)?;
        self.ledger.remove(key);
        debug!(key = %key, offset, "filled");
        Ok(())
    }

    /// Fills `key` with the current position and returns it.
    pub fn fill_with_position(&mut self, key: &ReservationKey) -> Result<usize> {
        let position = self.position();
        self.fill(key, &[Value::U64(position as u64)])?;
        Ok(position)
    }

    /// Copies `size` bytes from `source` to `dest` within the buffer.
    pub fn block_copy(&mut self, source: usize, dest: usize, size: usize) -> Result<()> {
        let len = self.buf.len();
        for start in [source, dest] {
            if start.checked_add(size).is_none_or(|end| end > len) {
                return Err(StreamError::SeekOutOfRange {
                    offset: start.saturating_add(size),
                    len,
                }
                .into());
            }
        }
        self.buf.copy_within(source..source + size, dest);
        Ok(())
    }

    pub fn has_reservations(&self) -> bool {
        !self.ledger.is_empty()
    }

    pub fn reservations(&self) -> impl Iterator<Item = &ReservationKey> {
        self.ledger.keys()
    }

    /// Issues the identity under which one packed record reserves its fields.
    pub fn next_owner(&mut self, label: &str) -> Owner {
        let owner = Owner {
            id: self.next_owner,
            label: label.to_string(),
        };
        self.next_owner += 1;
        owner
    }

    /// Freezes the buffer. Fails, naming every key, while reservations remain.
    pub fn finish(self) -> Result<Bytes> {
        self.ledger.ensure_empty()?;
        Ok(self.buf.freeze())
    }

    fn overwrite(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let len = self.buf.len();
        let end = match offset.checked_add(bytes.len()) {
            Some(end) if end <= len => end,
            end => {
                return Err(StreamError::SeekOutOfRange {
                    offset: end.unwrap_or(usize::MAX),
                    len,
                }
                .into());
            }
        };
        self.buf[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::Error;

    use super::*;

    #[test]
    fn test_reserve_and_fill() {
        let mut writer = Writer::new(ByteOrder::LittleEndian, None);
        let key = writer.reserve("count", "H").unwrap();
        writer.pack("B", &[Value::U64(7)]).unwrap();
        assert_eq!(writer.as_bytes(), [0, 0, 7]);

        writer.fill(&key, &[Value::U64(0x0102)]).unwrap();
        assert_eq!(&writer.finish().unwrap()[..], [0x02, 0x01, 7]);
    }

    #[test]
    fn test_reserved_order_is_fixed() {
        let mut writer = Writer::new(ByteOrder::LittleEndian, None);
        let key = writer.reserve("be", ">H").unwrap();
        writer.set_byte_order(ByteOrder::LittleEndian);
        writer.fill(&key, &[Value::U64(1)]).unwrap();
        assert_eq!(writer.as_bytes(), [0, 1]);
    }

    #[test]
    fn test_finish_with_outstanding() {
        let mut writer = Writer::new(ByteOrder::LittleEndian, None);
        writer.reserve("a", "I").unwrap();
        writer.reserve("b", "I").unwrap();
        assert_eq!(
            writer.finish().unwrap_err(),
            Error::Reservation(ReservationError::Outstanding(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn test_fill_twice_fails() {
        let mut writer = Writer::new(ByteOrder::LittleEndian, None);
        let key = writer.reserve("a", "B").unwrap();
        writer.fill(&key, &[Value::U64(1)]).unwrap();
        assert_eq!(
            writer.fill(&key, &[Value::U64(1)]).unwrap_err(),
            Error::Reservation(ReservationError::Unknown("a".into()))
        );
    }

    #[test]
    fn test_failed_fill_keeps_reservation() {
        let mut writer = Writer::new(ByteOrder::LittleEndian, None);
        let key = writer.reserve("a", "B").unwrap();
        assert!(writer.fill(&key, &[Value::U64(300)]).is_err());
        assert!(writer.has_reservations());
        assert!(matches!(
            writer.fill(&key, &[]),
            Err(Error::Reservation(ReservationError::NoValues(_)))
        ));
    }

    #[test]
    fn test_duplicate_reserve() {
        let mut writer = Writer::new(ByteOrder::LittleEndian, None);
        writer.reserve("a", "B").unwrap();
        assert!(matches!(
            writer.reserve("a", "B"),
            Err(Error::Reservation(ReservationError::Duplicate(_)))
        ));
    }

    #[test]
    fn test_reserve_resolves_varints() {
        let mut writer = Writer::new(ByteOrder::LittleEndian, Some(false));
        let key = writer.reserve("n", "v").unwrap();
        assert_eq!(writer.position(), 4);
        writer.set_long_varints(Some(true));
        writer.fill(&key, &[Value::I64(-1)]).unwrap();
        assert_eq!(writer.as_bytes(), [0xFF; 4]);
    }

    #[test]
    fn test_fill_with_position() {
        let mut writer = Writer::new(ByteOrder::LittleEndian, None);
        let key = writer.reserve("end", "I").unwrap();
        writer.append(b"data");
        assert_eq!(writer.fill_with_position(&key).unwrap(), 8);
        assert_eq!(&writer.as_bytes()[..4], [8, 0, 0, 0]);
    }

    #[test]
    fn test_padding_helpers() {
        let mut writer = Writer::new(ByteOrder::LittleEndian, None);
        writer.append(b"a");
        writer.pad_align(4);
        assert_eq!(writer.position(), 4);
        writer.pad_to_offset(6).unwrap();
        assert_eq!(writer.position(), 6);
        assert!(matches!(
            writer.pad_to_offset(2),
            Err(Error::Stream(StreamError::PastOffset { offset: 2, position: 6 }))
        ));
    }

    #[test]
    fn test_block_copy() {
        let mut writer = Writer::new(ByteOrder::LittleEndian, None);
        writer.append(b"ab\0\0");
        writer.block_copy(0, 2, 2).unwrap();
        assert_eq!(writer.as_bytes(), b"abab");
        assert!(writer.block_copy(0, 3, 2).is_err());
    }

    #[test]
    fn test_pack_at() {
        let mut writer = Writer::new(ByteOrder::BigEndian, None);
        writer.pad(4);
        writer.pack_at(1, "H", &[Value::U64(0x0A0B)]).unwrap();
        assert_eq!(writer.as_bytes(), [0, 0x0A, 0x0B, 0]);

        assert_eq!(
            writer.pack_at(usize::MAX, "B", &[Value::U64(1)]).unwrap_err(),
            Error::Stream(StreamError::SeekOutOfRange {
                offset: usize::MAX,
                len: 4
            })
        );
        assert!(writer.pack_at(3, "H", &[Value::U64(1)]).is_err());
        assert_eq!(writer.as_bytes(), [0, 0x0A, 0x0B, 0]);
    }

    #[test]
    fn test_owners_are_unique() {
        let mut writer = Writer::default();
        let a = writer.next_owner("Header");
        let b = writer.next_owner("Header");
        assert_ne!(a, b);
    }
}
