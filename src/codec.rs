//! Bulk conversion between raw [Value]s and bytes for a whole [Format].
//!
//! This is the one low-level call a record makes per pack or unpack. Raw values
//! are primitive: booleans, integers, floats and byte strings. Integers are
//! range-checked against their code; byte strings are zero-padded to their slot.

use bytes::{Buf, BufMut};

use crate::{
    byte_order::ByteOrder,
    errors::{Result, StreamError, ValueError},
    format::{Code, Format, align_up},
    value::Value,
};

/// One value position in a format, with varints already resolved.
#[derive(Debug, Clone, Copy)]
struct Slot {
    code: Code,
    len: usize,
}

fn slots(format: &Format, long_varints: Option<bool>) -> Result<Vec<Slot>> {
    let mut slots = Vec::with_capacity(format.value_count());

    for token in format.tokens() {
        let code = token.code.resolve(long_varints)?;
        match code.fixed_size() {
            Some(len) => slots.extend((0..token.count).map(|_| Slot { code, len })),
            None => slots.push(Slot {
                code,
                len: token.count,
            }),
        }
    }

    Ok(slots)
}

fn padding(order: ByteOrder, slot: Slot, offset: usize) -> usize {
    if order.is_aligned() && slot.code != Code::Bytes && slot.len > 0 {
        align_up(offset, slot.len) - offset
    } else {
        0
    }
}

/// Packs `values` (one per format value) into `out`.
pub fn pack_into<B: BufMut>(
    out: &mut B,
    format: &Format,
    order: ByteOrder,
    long_varints: Option<bool>,
    values: &[Value],
) -> Result<()> {
    pack_into_at(out, format, order, long_varints, values, 0)
}

/// Like [pack_into] for bytes that start `base` bytes into an aligned layout,
/// so native alignment padding matches a pack of the whole layout.
pub fn pack_into_at<B: BufMut>(
    out: &mut B,
    format: &Format,
    order: ByteOrder,
    long_varints: Option<bool>,
    values: &[Value],
    base: usize,
) -> Result<()> {
    format.size(order, long_varints)?;
    let expected = format.value_count();
    if expected != values.len() {
        return Err(ValueError::Count {
            field: format.to_string(),
            expected,
            found: values.len(),
        }
        .into());
    }

    let slots = slots(format, long_varints)?;
    let big = order.is_big_endian();
    let mut offset = base;

    for (slot, value) in slots.into_iter().zip(values) {
        let pad = padding(order, slot, offset);
        out.put_bytes(0, pad);
        write_value(out, slot, value, big)?;
        offset += pad + slot.len;
    }

    Ok(())
}

/// Unpacks one value per format value from the start of `data`.
pub fn unpack_from(
    mut data: &[u8],
    format: &Format,
    order: ByteOrder,
    long_varints: Option<bool>,
) -> Result<Vec<Value>> {
    let size = format.size(order, long_varints)?;
    if data.len() < size {
        return Err(StreamError::UnexpectedEof {
            requested: size,
            available: data.len(),
            format: format!("{order}{format}"),
        }
        .into());
    }

    let slots = slots(format, long_varints)?;
    let big = order.is_big_endian();
    let mut offset = 0;
    let mut values = Vec::with_capacity(slots.len());

    for slot in slots {
        let pad = padding(order, slot, offset);
        data.advance(pad);
        values.push(read_value(&mut data, slot, big));
        offset += pad + slot.len;
    }

    Ok(values)
}

fn write_value<B: BufMut>(
    out: &mut B,
    slot: Slot,
    value: &Value,
    big: bool,
) -> Result<(), ValueError> {
    let code = slot.code;

    match code {
        Code::Bool => {
            let flag = match value {
                Value::Bool(b) => *b,
                Value::I64(v) => *v != 0,
                Value::U64(v) => *v != 0,
                other => return Err(wrong_kind(code, "bool", other)),
            };
            out.put_u8(u8::from(flag));
        }
        Code::F32 => {
            let v = float(code, value)?;
            if v.is_finite() && v.abs() > f64::from(f32::MAX) {
                return Err(out_of_range(code, value));
            }
            if big {
                out.put_f32(v as f32);
            } else {
                out.put_f32_le(v as f32);
            }
        }
        Code::F64 => {
            let v = float(code, value)?;
            if big {
                out.put_f64(v);
            } else {
                out.put_f64_le(v);
            }
        }
        Code::Bytes => {
            let bytes = match value {
                Value::Bytes(b) => b,
                other => return Err(wrong_kind(code, "bytes", other)),
            };
            if bytes.len() > slot.len {
                return Err(ValueError::TooLong {
                    len: bytes.len(),
                    size: slot.len,
                });
            }
            out.put_slice(bytes);
            out.put_bytes(0, slot.len - bytes.len());
        }
        _ if code.is_signed_int() => {
            let v = signed(slot, value)?;
            if big {
                out.put_int(v, slot.len);
            } else {
                out.put_int_le(v, slot.len);
            }
        }
        _ => {
            let v = unsigned(slot, value)?;
            if big {
                out.put_uint(v, slot.len);
            } else {
                out.put_uint_le(v, slot.len);
            }
        }
    }

    Ok(())
}

fn read_value(data: &mut &[u8], slot: Slot, big: bool) -> Value {
    match slot.code {
        Code::Bool => Value::Bool(data.get_u8() != 0),
        Code::F32 => Value::F32(if big { data.get_f32() } else { data.get_f32_le() }),
        Code::F64 => Value::F64(if big { data.get_f64() } else { data.get_f64_le() }),
        Code::Bytes => {
            let bytes = data[..slot.len].to_vec();
            data.advance(slot.len);
            Value::Bytes(bytes)
        }
        code if code.is_signed_int() => Value::I64(if big {
            data.get_int(slot.len)
        } else {
            data.get_int_le(slot.len)
        }),
        _ => Value::U64(if big {
            data.get_uint(slot.len)
        } else {
            data.get_uint_le(slot.len)
        }),
    }
}

fn wrong_kind(code: Code, expected: &'static str, found: &Value) -> ValueError {
    ValueError::WrongKind {
        format: code.as_char(),
        expected,
        found: found.kind(),
    }
}

fn out_of_range(code: Code, value: &Value) -> ValueError {
    ValueError::OutOfRange {
        value: value.to_string(),
        format: code.as_char(),
    }
}

fn unsigned(slot: Slot, value: &Value) -> Result<u64, ValueError> {
    let v = match value {
        Value::U64(v) => *v,
        Value::Bool(b) => u64::from(*b),
        Value::I64(v) => u64::try_from(*v).map_err(|_| out_of_range(slot.code, value))?,
        other => return Err(wrong_kind(slot.code, "integer", other)),
    };

    let bits = slot.len * 8;
    if bits < 64 && v >> bits != 0 {
        return Err(out_of_range(slot.code, value));
    }

    Ok(v)
}

fn signed(slot: Slot, value: &Value) -> Result<i64, ValueError> {
    let v = match value {
        Value::I64(v) => *v,
        Value::Bool(b) => i64::from(*b),
        Value::U64(v) => i64::try_from(*v).map_err(|_| out_of_range(slot.code, value))?,
        other => return Err(wrong_kind(slot.code, "integer", other)),
    };

    let bits = slot.len * 8;
    if bits < 64 {
        let max = (1i64 << (bits - 1)) - 1;
        let min = -(1i64 << (bits - 1));
        if v < min || v > max {
            return Err(out_of_range(slot.code, value));
        }
    }

    Ok(v)
}

fn float(code: Code, value: &Value) -> Result<f64, ValueError> {
    match value {
        Value::Bool(_) => Err(wrong_kind(code, "float", value)),
        other => other
            .as_f64()
            .ok_or_else(|| wrong_kind(code, "float", other)),
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::Error;

    use super::*;

    fn fmt(s: &str) -> Format {
        s.parse().unwrap()
    }

    fn pack_le(out: &mut Vec<u8>, format: &str, values: &[Value]) -> Result<()> {
        pack_into(out, &fmt(format), ByteOrder::LittleEndian, None, values)
    }

    #[test]
    fn test_pack_little_and_big_endian() {
        let mut le = Vec::new();
        pack_le(&mut le, "H", &[Value::U64(0x0102)]).unwrap();
        assert_eq!(le, [0x02, 0x01]);

        let mut be = Vec::new();
        pack_into(&mut be, &fmt("H"), ByteOrder::Network, None, &[Value::U64(0x0102)]).unwrap();
        assert_eq!(be, [0x01, 0x02]);
    }

    #[test]
    fn test_pack_negative_signed() {
        let mut out = Vec::new();
        pack_le(&mut out, "h", &[Value::I64(-2)]).unwrap();
        assert_eq!(out, [0xFE, 0xFF]);

        let values = unpack_from(&out, &fmt("h"), ByteOrder::LittleEndian, None).unwrap();
        assert_eq!(values, vec![Value::I64(-2)]);
    }

    #[test]
    fn test_pack_out_of_range() {
        let mut out = Vec::new();
        let err = pack_le(&mut out, "B", &[Value::U64(256)]).unwrap_err();
        assert_eq!(
            err,
            Error::Value(ValueError::OutOfRange {
                value: "256".into(),
                format: 'B'
            })
        );

        let err = pack_le(&mut out, "b", &[Value::I64(-129)]).unwrap_err();
        assert!(matches!(err, Error::Value(ValueError::OutOfRange { .. })));
    }

    #[test]
    fn test_pack_wrong_kind() {
        let mut out = Vec::new();
        let err = pack_le(&mut out, "I", &[Value::from("x")]).unwrap_err();
        assert!(matches!(err, Error::Value(ValueError::WrongKind { format: 'I', .. })));
    }

    #[test]
    fn test_bytes_are_zero_padded() {
        let mut out = Vec::new();
        pack_le(&mut out, "4s", &[Value::Bytes(b"ab".to_vec())]).unwrap();
        assert_eq!(out, b"ab\0\0");

        let err = pack_le(&mut out, "1s", &[Value::Bytes(b"ab".to_vec())]).unwrap_err();
        assert_eq!(err, Error::Value(ValueError::TooLong { len: 2, size: 1 }));
    }

    #[test]
    fn test_native_aligned_padding() {
        let mut out = Vec::new();
        pack_into(
            &mut out,
            &fmt("BI"),
            ByteOrder::NativeAligned,
            None,
            &[Value::U64(1), Value::U64(2)],
        )
        .unwrap();
        assert_eq!(out.len(), 8);
        assert_eq!(out[1..4], [0, 0, 0]);

        let values = unpack_from(&out, &fmt("BI"), ByteOrder::NativeAligned, None).unwrap();
        assert_eq!(values, vec![Value::U64(1), Value::U64(2)]);
    }

    #[test]
    fn test_varints_follow_flag() {
        let mut short = Vec::new();
        let order = ByteOrder::LittleEndian;
        pack_into(&mut short, &fmt("v"), order, Some(false), &[Value::I64(-1)]).unwrap();
        assert_eq!(short, [0xFF; 4]);

        let mut long = Vec::new();
        pack_into(&mut long, &fmt("V"), order, Some(true), &[Value::U64(1)]).unwrap();
        assert_eq!(long, [1, 0, 0, 0, 0, 0, 0, 0]);

        let err = pack_le(&mut long, "V", &[Value::U64(1)]).unwrap_err();
        assert_eq!(err, Error::UnresolvedVarintWidth);
    }

    #[test]
    fn test_unpack_floats_and_bool() {
        let mut out = Vec::new();
        pack_into(
            &mut out,
            &fmt("?fd"),
            ByteOrder::BigEndian,
            None,
            &[Value::Bool(true), Value::F32(1.5), Value::F64(-0.25)],
        )
        .unwrap();

        let values = unpack_from(&out, &fmt("?fd"), ByteOrder::BigEndian, None).unwrap();
        assert_eq!(
            values,
            vec![Value::Bool(true), Value::F32(1.5), Value::F64(-0.25)]
        );
    }

    #[test]
    fn test_f32_overflow_is_rejected() {
        let mut out = Vec::new();
        let err = pack_le(&mut out, "f", &[Value::F64(1e300)]).unwrap_err();
        assert!(matches!(err, Error::Value(ValueError::OutOfRange { format: 'f', .. })));
        assert!(out.is_empty());

        pack_le(&mut out, "f", &[Value::F64(f64::INFINITY)]).unwrap();
        assert_eq!(out, f32::INFINITY.to_le_bytes());
    }

    #[test]
    fn test_unpack_too_short() {
        let err = unpack_from(&[1, 2], &fmt("I"), ByteOrder::LittleEndian, None).unwrap_err();
        assert_eq!(
            err,
            Error::Stream(StreamError::UnexpectedEof {
                requested: 4,
                available: 2,
                format: "<I".into(),
            })
        );
    }

    #[test]
    fn test_value_count_mismatch() {
        let mut out = Vec::new();
        let err = pack_le(&mut out, "2H", &[Value::U64(1)]).unwrap_err();
        assert!(matches!(err, Error::Value(ValueError::Count { expected: 2, found: 1, .. })));
    }
}
