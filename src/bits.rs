//! Bit-field coalescing: adjacent sub-byte fields share one storage unit.
//!
//! Bits fill a unit least-significant first, so the first field of a unit sits in
//! its lowest bits. For a `B` unit holding fields of widths 3, 3 and 2 with values
//! `a`, `b`, `c`, the stored byte is `a | b << 3 | c << 6`.
//!
//! A field never straddles two units. If it does not fit in the bits left, or if
//! the unit code changes, the current unit is zero-padded and closed first.

use crate::{
    errors::{BitFieldOverflow, Result, ValueError},
    format::{Code, Format, Token},
    value::Value,
};

/// Number of bits in a storage unit.
pub fn unit_capacity(unit: Code) -> u32 {
    unit.fixed_size().map_or(0, |size| size as u32 * 8)
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Accumulates bit-field values and emits completed units as raw values.
#[derive(Debug, Default)]
pub struct BitFieldWriter {
    acc: u64,
    used: u32,
    unit: Option<Code>,
}

impl BitFieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Pushes the low `bits` of `value` into the current `unit`. Completed units
    /// are appended to `format` and `raw`.
    pub fn write(
        &mut self,
        value: u64,
        bits: u32,
        unit: Code,
        format: &mut Format,
        raw: &mut Vec<Value>,
    ) -> Result<(), BitFieldOverflow> {
        if value > mask(bits) {
            return Err(BitFieldOverflow::Write { value, bits });
        }
        self.push(value, bits, unit, format, raw);
        Ok(())
    }

    /// Takes up `bits` zero bits of `unit`, laying out units without values.
    pub fn claim(&mut self, bits: u32, unit: Code, format: &mut Format, raw: &mut Vec<Value>) {
        self.push(0, bits, unit, format, raw);
    }

    fn push(
        &mut self,
        value: u64,
        bits: u32,
        unit: Code,
        format: &mut Format,
        raw: &mut Vec<Value>,
    ) {
        let capacity = unit_capacity(unit);
        if self.unit != Some(unit) || self.used + bits > capacity {
            self.finish(format, raw);
        }

        self.acc |= value << self.used;
        self.used += bits;
        self.unit = Some(unit);

        if self.used == capacity {
            self.finish(format, raw);
        }
    }

    /// Zero-pads and emits the partial unit, if any.
    pub fn finish(&mut self, format: &mut Format, raw: &mut Vec<Value>) {
        if let Some(unit) = self.unit.take() {
            if self.used > 0 {
                format.push(Token::one(unit));
                raw.push(Value::U64(self.acc));
            }
        }
        self.acc = 0;
        self.used = 0;
    }
}

/// Hands out bit-field values from units pulled on demand.
#[derive(Debug, Default)]
pub struct BitFieldReader {
    acc: u64,
    used: u32,
    unit: Option<Code>,
}

impl BitFieldReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.unit.is_none()
    }

    /// Drops any unread bits of the current unit.
    pub fn clear(&mut self) {
        self.acc = 0;
        self.used = 0;
        self.unit = None;
    }

    /// Reads `bits` from the current unit, pulling a fresh unit through
    /// `next_unit` when none is active, the code differs, or too few bits remain.
    pub fn read<F>(&mut self, bits: u32, unit: Code, next_unit: F) -> Result<u64>
    where
        F: FnOnce() -> Result<Value>,
    {
        let capacity = unit_capacity(unit);

        if self.unit != Some(unit) || self.used + bits > capacity {
            let stored = match next_unit()? {
                Value::U64(v) => v,
                other => {
                    return Err(ValueError::WrongKind {
                        format: unit.as_char(),
                        expected: "integer",
                        found: other.kind(),
                    }
                    .into());
                }
            };
            if stored > mask(capacity) {
                return Err(BitFieldOverflow::Read {
                    value: stored,
                    format: unit.as_char(),
                }
                .into());
            }

            self.acc = stored;
            self.used = 0;
            self.unit = Some(unit);
        }

        let value = (self.acc >> self.used) & mask(bits);
        self.used += bits;

        if self.used == capacity {
            self.clear();
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::Error;

    use super::*;

    fn write_all(fields: &[(u64, u32, Code)]) -> (Format, Vec<Value>) {
        let mut writer = BitFieldWriter::new();
        let mut format = Format::new();
        let mut raw = Vec::new();
        for &(value, bits, unit) in fields {
            writer.write(value, bits, unit, &mut format, &mut raw).unwrap();
        }
        writer.finish(&mut format, &mut raw);
        (format, raw)
    }

    #[test]
    fn test_three_fields_fill_one_byte() {
        let (format, raw) = write_all(&[
            (5, 3, Code::U8),
            (3, 3, Code::U8),
            (1, 2, Code::U8),
            (6, 3, Code::U8),
        ]);

        // 0b01_011_101 then a fresh unit holding 0b110.
        assert_eq!(format.to_string(), "BB");
        assert_eq!(raw, vec![Value::U64(0x5D), Value::U64(0x06)]);
    }

    #[test]
    fn test_field_does_not_straddle_units() {
        let (format, raw) = write_all(&[(0b11111, 5, Code::U8), (0b1111, 4, Code::U8)]);
        assert_eq!(format.to_string(), "BB");
        assert_eq!(raw, vec![Value::U64(0b11111), Value::U64(0b1111)]);
    }

    #[test]
    fn test_unit_change_flushes_partial() {
        let (format, raw) = write_all(&[(1, 1, Code::U8), (1, 1, Code::U16)]);
        assert_eq!(format.to_string(), "BH");
        assert_eq!(raw, vec![Value::U64(1), Value::U64(1)]);
    }

    #[test]
    fn test_write_overflow() {
        let mut writer = BitFieldWriter::new();
        let err = writer
            .write(8, 3, Code::U8, &mut Format::new(), &mut Vec::new())
            .unwrap_err();
        assert_eq!(err, BitFieldOverflow::Write { value: 8, bits: 3 });
    }

    #[test]
    fn test_claim_lays_out_units() {
        let mut writer = BitFieldWriter::new();
        let mut format = Format::new();
        let mut raw = Vec::new();
        writer.claim(6, Code::U8, &mut format, &mut raw);
        writer.claim(3, Code::U8, &mut format, &mut raw);
        writer.finish(&mut format, &mut raw);
        assert_eq!(format.to_string(), "BB");
        assert_eq!(raw, vec![Value::U64(0), Value::U64(0)]);
    }

    #[test]
    fn test_full_width_unit() {
        let (_, raw) = write_all(&[(u64::MAX, 64, Code::U64)]);
        assert_eq!(raw, vec![Value::U64(u64::MAX)]);
    }

    #[test]
    fn test_read_mirrors_write() {
        let mut units = vec![Value::U64(0x5D), Value::U64(0x06)].into_iter();
        let mut reader = BitFieldReader::new();
        let mut next = || units.next().ok_or(Error::UnresolvedVarintWidth);

        let mut out = Vec::new();
        for bits in [3, 3, 2, 3] {
            out.push(reader.read(bits, Code::U8, &mut next).unwrap());
        }
        assert_eq!(out, vec![5, 3, 1, 6]);
        assert!(!reader.is_empty());
    }

    #[test]
    fn test_read_discards_on_unit_change() {
        let mut units = vec![Value::U64(0xFF), Value::U64(0x0002)].into_iter();
        let mut reader = BitFieldReader::new();
        let mut next = || units.next().ok_or(Error::UnresolvedVarintWidth);

        assert_eq!(reader.read(1, Code::U8, &mut next).unwrap(), 1);
        assert_eq!(reader.read(2, Code::U16, &mut next).unwrap(), 2);
    }

    #[test]
    fn test_read_overflow() {
        let mut reader = BitFieldReader::new();
        let err = reader
            .read(1, Code::U8, || Ok(Value::U64(0x100)))
            .unwrap_err();
        assert_eq!(
            err,
            Error::BitField(BitFieldOverflow::Read {
                value: 0x100,
                format: 'B'
            })
        );
    }
}
