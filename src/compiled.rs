//! Field-schema compiler: turns a declared [Field] into a [FieldSchema] with a
//! concrete wire format and its pack/unpack codecs.
//!
//! The wire format is derived from the first source that applies:
//!
//! 1. the field's own [FieldMeta];
//! 2. a metadata factory registered for the field's type name;
//! 3. a nested record type, laid out as a byte span of the record's size;
//! 4. a primitive type.
//!
//! Codecs check assertions against the domain value. Unpacking decodes, runs the
//! unpack hook and then asserts; packing asserts, runs the pack hook and then
//! encodes.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    byte_order::ByteOrder,
    errors::{Result, SchemaError, ValueAssertionError, ValueError},
    field::{Field, FieldMeta, FieldType, Hook, Layout, SkipPredicate},
    format::{Code, Format, Token},
    record::FieldValues,
    registry::MetaFactory,
    schema::RecordSchema,
    text::{self, Encoding},
    value::Value,
};

/// How a field's raw wire values become its value.
#[derive(Clone)]
pub enum Shape {
    /// One raw value, or an array when the format holds several.
    Scalar,
    Text {
        encoding: Option<Encoding>,
        rstrip_null: bool,
    },
    Array {
        length: usize,
    },
    /// Sub-byte field stored in a shared unit.
    Bits {
        count: u32,
        unit: Code,
        as_bool: bool,
    },
    /// Nested record stored as a fixed-size byte span.
    Record(Arc<RecordSchema>),
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar => write!(f, "Scalar"),
            Shape::Text {
                encoding,
                rstrip_null,
            } => f
                .debug_struct("Text")
                .field("encoding", encoding)
                .field("rstrip_null", rstrip_null)
                .finish(),
            Shape::Array { length } => f.debug_struct("Array").field("length", length).finish(),
            Shape::Bits {
                count,
                unit,
                as_bool,
            } => f
                .debug_struct("Bits")
                .field("count", count)
                .field("unit", unit)
                .field("as_bool", as_bool)
                .finish(),
            Shape::Record(schema) => write!(f, "Record({})", schema.name()),
        }
    }
}

/// Everything the compiler needs besides the field itself.
pub struct CompileContext<'a> {
    pub record: &'a str,
    pub factories: &'a BTreeMap<String, MetaFactory>,
    pub records: &'a dyn Fn(&str) -> Option<Arc<RecordSchema>>,
}

/// One field's compiled contract.
#[derive(Clone)]
pub struct FieldSchema {
    pub name: String,
    record: String,
    /// Concrete wire format. For bit fields this is the storage unit.
    pub format: Format,
    pub asserted: Vec<Value>,
    pub single_asserted: Option<Value>,
    pub skip: Option<SkipPredicate>,
    unpack_hook: Option<Hook>,
    pack_hook: Option<Hook>,
    pub shape: Shape,
}

impl fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSchema")
            .field("name", &self.name)
            .field("format", &self.format.to_string())
            .field("asserted", &self.asserted)
            .field("shape", &self.shape)
            .field("skip", &self.skip.is_some())
            .finish()
    }
}

impl FieldSchema {
    pub fn compile(field: &Field, ctx: &CompileContext<'_>) -> Result<Self, SchemaError> {
        if let FieldType::Tuple(_) = field.ty {
            return Err(SchemaError::TupleField {
                record: ctx.record.to_string(),
                field: field.name.clone(),
            });
        }

        let type_name = field.ty.type_name();
        let meta = field
            .meta
            .clone()
            .or_else(|| ctx.factories.get(&type_name).map(|factory| factory()));

        let compiler = Compiler { field, ctx };
        let (format, shape, meta) = match meta {
            Some(meta) => {
                let (format, shape) = compiler.from_meta(&meta)?;
                (format, shape, meta)
            }
            None => {
                let (format, shape) = compiler.from_type()?;
                (format, shape, FieldMeta::default())
            }
        };

        let (format, shape) = match meta.bit_count {
            Some(count) => compiler.bits(format, count)?,
            None => (format, shape),
        };
        // Widest layout: aligned, with long varints.
        if format.size(ByteOrder::NativeAligned, Some(true)).is_err() {
            return Err(SchemaError::InvalidFormat {
                record: ctx.record.to_string(),
                field: field.name.clone(),
                format: format.to_string(),
            });
        }

        let mut asserted = meta.asserted;
        if let Shape::Text {
            rstrip_null: true, ..
        } = shape
        {
            for value in &mut asserted {
                strip_value_nulls(value);
            }
        }
        let single_asserted = match asserted.as_slice() {
            [value] => Some(value.clone()),
            _ => None,
        };

        Ok(FieldSchema {
            name: field.name.clone(),
            record: ctx.record.to_string(),
            format,
            asserted,
            single_asserted,
            skip: meta.skip,
            unpack_hook: meta.unpack,
            pack_hook: meta.pack,
            shape,
        })
    }

    /// Bit count and storage unit of a bit field.
    pub fn bit_unit(&self) -> Option<(u32, Code)> {
        match self.shape {
            Shape::Bits { count, unit, .. } => Some((count, unit)),
            _ => None,
        }
    }

    pub fn should_skip(&self, long_varints: Option<bool>, values: &FieldValues<'_>) -> bool {
        self.skip
            .as_ref()
            .is_some_and(|skip| skip(long_varints, values))
    }

    pub fn check(&self, value: &Value) -> Result<(), ValueAssertionError> {
        if self.asserted.is_empty() || self.asserted.contains(value) {
            return Ok(());
        }

        Err(ValueAssertionError {
            record: self.record.clone(),
            field: self.name.clone(),
            value: value.to_string(),
            asserted: Value::Array(self.asserted.clone()).to_string(),
        })
    }

    /// Builds the field value from its raw wire values.
    pub fn unpack(
        &self,
        raw: Vec<Value>,
        order: ByteOrder,
        long_varints: Option<bool>,
    ) -> Result<Value> {
        let value = match &self.shape {
            Shape::Scalar | Shape::Bits { .. } => {
                let mut raw = raw;
                if raw.len() == 1 {
                    raw.remove(0)
                } else {
                    Value::Array(raw)
                }
            }
            Shape::Array { .. } => Value::Array(raw),
            Shape::Text {
                encoding,
                rstrip_null,
            } => {
                let bytes = self.single_bytes(raw)?;
                match encoding {
                    Some(encoding) => {
                        let text = encoding.decode(&bytes, order)?;
                        if *rstrip_null {
                            Value::String(text.trim_end_matches('\0').to_string())
                        } else {
                            Value::String(text)
                        }
                    }
                    None if *rstrip_null => Value::Bytes(text::strip_nulls(&bytes).to_vec()),
                    None => Value::Bytes(bytes),
                }
            }
            Shape::Record(schema) => {
                let bytes = self.single_bytes(raw)?;
                Value::from(schema.parse_nested(&bytes, order, long_varints)?)
            }
        };

        let value = match &self.unpack_hook {
            Some(hook) => hook(value)?,
            None => value,
        };
        self.check(&value)?;

        Ok(value)
    }

    /// Decodes a bit field from the bits extracted out of its storage unit.
    pub fn unpack_bits(&self, stored: u64) -> Result<Value> {
        let value = match self.shape {
            Shape::Bits { as_bool: true, .. } => Value::Bool(stored != 0),
            _ => Value::U64(stored),
        };

        let value = match &self.unpack_hook {
            Some(hook) => hook(value)?,
            None => value,
        };
        self.check(&value)?;

        Ok(value)
    }

    /// Appends the raw wire values of `value` to `raw`.
    pub fn pack(
        &self,
        value: Value,
        order: ByteOrder,
        long_varints: Option<bool>,
        raw: &mut Vec<Value>,
    ) -> Result<()> {
        if let Shape::Text {
            encoding,
            rstrip_null,
        } = &self.shape
        {
            let mut value = value;
            if *rstrip_null {
                strip_value_nulls(&mut value);
            }
            self.check(&value)?;
            let value = self.apply_pack_hook(value)?;

            let bytes = match (encoding, value) {
                (Some(encoding), Value::String(text)) => encoding.encode(&text, order)?,
                (None, Value::Bytes(bytes)) => bytes,
                (_, other) => return Err(self.wrong_kind(expected_text(*encoding), &other).into()),
            };
            raw.push(Value::Bytes(bytes));
            return Ok(());
        }

        self.check(&value)?;
        let value = self.apply_pack_hook(value)?;
        let expected = self.format.value_count();

        match &self.shape {
            Shape::Scalar | Shape::Bits { .. } if expected == 1 => raw.push(value),
            Shape::Record(_) => match value {
                Value::Record(record) => {
                    raw.push(Value::Bytes(record.encode_nested(order, long_varints)?));
                }
                other => return Err(self.wrong_kind("record", &other).into()),
            },
            _ => match value {
                Value::Array(values) if values.len() == expected => raw.extend(values),
                Value::Array(values) => {
                    return Err(ValueError::Count {
                        field: self.name.clone(),
                        expected,
                        found: values.len(),
                    }
                    .into());
                }
                other => return Err(self.wrong_kind("array", &other).into()),
            },
        }

        Ok(())
    }

    /// Encodes a bit field value into the bits stored in its unit.
    pub fn pack_bits(&self, value: Value) -> Result<u64> {
        self.check(&value)?;
        let value = self.apply_pack_hook(value)?;

        match value {
            Value::Bool(b) => Ok(u64::from(b)),
            Value::U64(v) => Ok(v),
            Value::I64(v) => u64::try_from(v).map_err(|_| {
                ValueError::OutOfRange {
                    value: v.to_string(),
                    format: self.unit_char(),
                }
                .into()
            }),
            other => Err(self.wrong_kind("integer", &other).into()),
        }
    }

    fn apply_pack_hook(&self, value: Value) -> Result<Value, ValueError> {
        match &self.pack_hook {
            Some(hook) => hook(value),
            None => Ok(value),
        }
    }

    fn single_bytes(&self, raw: Vec<Value>) -> Result<Vec<u8>, ValueError> {
        let found = raw.len();
        let mut raw = raw.into_iter();
        match (raw.next(), raw.next()) {
            (Some(Value::Bytes(bytes)), None) => Ok(bytes),
            (Some(other), None) => Err(self.wrong_kind("bytes", &other)),
            _ => Err(ValueError::Count {
                field: self.name.clone(),
                expected: 1,
                found,
            }),
        }
    }

    fn unit_char(&self) -> char {
        self.format
            .tokens()
            .first()
            .map_or('s', |token| token.code.as_char())
    }

    fn wrong_kind(&self, expected: &'static str, found: &Value) -> ValueError {
        ValueError::WrongKind {
            format: self.unit_char(),
            expected,
            found: found.kind(),
        }
    }
}

fn expected_text(encoding: Option<Encoding>) -> &'static str {
    match encoding {
        Some(_) => "string",
        None => "bytes",
    }
}

fn strip_value_nulls(value: &mut Value) {
    match value {
        Value::Bytes(bytes) => {
            let len = text::strip_nulls(bytes).len();
            bytes.truncate(len);
        }
        Value::String(text) => {
            let len = text.trim_end_matches('\0').len();
            text.truncate(len);
        }
        _ => {}
    }
}

struct Compiler<'a> {
    field: &'a Field,
    ctx: &'a CompileContext<'a>,
}

impl Compiler<'_> {
    fn record(&self) -> String {
        self.ctx.record.to_string()
    }

    fn name(&self) -> String {
        self.field.name.clone()
    }

    fn parse(&self, text: &str) -> Result<Format, SchemaError> {
        let format: Format = text.parse().map_err(|_| SchemaError::InvalidFormat {
            record: self.record(),
            field: self.name(),
            format: text.to_string(),
        })?;
        if format.is_empty() {
            return Err(SchemaError::InvalidFormat {
                record: self.record(),
                field: self.name(),
                format: text.to_string(),
            });
        }
        Ok(format)
    }

    fn invalid_array(&self, reason: impl Into<String>) -> SchemaError {
        SchemaError::InvalidArray {
            record: self.record(),
            field: self.name(),
            reason: reason.into(),
        }
    }

    fn missing_format(&self) -> SchemaError {
        SchemaError::MissingFormat {
            record: self.record(),
            field: self.name(),
            type_name: self.field.ty.type_name(),
        }
    }

    fn from_type(&self) -> Result<(Format, Shape), SchemaError> {
        match &self.field.ty {
            FieldType::Primitive(p) => Ok((Token::one(p.code()).into(), Shape::Scalar)),
            FieldType::Record(name) => self.nested(name),
            FieldType::Array(_) => {
                Err(self.invalid_array("array fields need array metadata with a length"))
            }
            _ => Err(self.missing_format()),
        }
    }

    fn from_meta(&self, meta: &FieldMeta) -> Result<(Format, Shape), SchemaError> {
        match &meta.layout {
            Layout::Scalar => match &meta.format {
                Some(text) => Ok((self.parse(text)?, Shape::Scalar)),
                None => self.from_type(),
            },
            Layout::Text {
                encoding,
                rstrip_null,
            } => {
                let text = meta.format.as_deref().ok_or_else(|| self.missing_format())?;
                let format = self.parse(text)?;
                if !matches!(format.tokens(), [Token { code: Code::Bytes, .. }]) {
                    return Err(SchemaError::InvalidFormat {
                        record: self.record(),
                        field: self.name(),
                        format: text.to_string(),
                    });
                }
                Ok((
                    format,
                    Shape::Text {
                        encoding: *encoding,
                        rstrip_null: *rstrip_null,
                    },
                ))
            }
            Layout::Array { length } => {
                let length = *length;
                if length == 0 {
                    return Err(self.invalid_array("array length must be positive"));
                }

                let format = match (&meta.format, &meta.element) {
                    (Some(text), _) => self.parse(text)?,
                    (None, Some(element)) => self.parse(element)?.repeat(length),
                    (None, None) => self.element_format()?.repeat(length),
                };
                if format.value_count() != length {
                    return Err(self.invalid_array(format!(
                        "format `{format}` holds {} values, expected {length}",
                        format.value_count()
                    )));
                }
                Ok((format, Shape::Array { length }))
            }
        }
    }

    fn element_format(&self) -> Result<Format, SchemaError> {
        match &self.field.ty {
            FieldType::Array(element) => match element.as_ref() {
                FieldType::Primitive(p) => Ok(Token::one(p.code()).into()),
                other => Err(self.invalid_array(format!(
                    "element type `{}` is not primitive; give an element format",
                    other.type_name()
                ))),
            },
            other => Err(self.invalid_array(format!(
                "array metadata on non-array type `{}`",
                other.type_name()
            ))),
        }
    }

    /// A nested record is laid out as a byte span sized by its unaligned
    /// layout. Under `@` a nested record whose fields need alignment padding
    /// encodes to more bytes than the span holds, and packing it fails with
    /// [ValueError::TooLong].
    fn nested(&self, name: &str) -> Result<(Format, Shape), SchemaError> {
        let schema = (self.ctx.records)(name).ok_or_else(|| SchemaError::UnknownRecord {
            record: self.record(),
            field: self.name(),
            nested: name.to_string(),
        })?;

        let nested_varint = || SchemaError::NestedVarint {
            record: self.record(),
            field: self.name(),
            nested: name.to_string(),
        };
        if schema.has_varints() {
            return Err(nested_varint());
        }
        let size = schema
            .size(ByteOrder::LittleEndian, None)
            .map_err(|_| nested_varint())?;

        Ok((Token::bytes(size).into(), Shape::Record(schema)))
    }

    fn bits(&self, format: Format, count: u32) -> Result<(Format, Shape), SchemaError> {
        let invalid = |reason: String| SchemaError::InvalidBitField {
            record: self.record(),
            field: self.name(),
            reason,
        };

        let declared = match format.tokens() {
            [Token { code, count: 1 }] => *code,
            _ => {
                return Err(invalid(format!(
                    "bit fields need a single storage unit, got `{format}`"
                )));
            }
        };
        let unit = match declared {
            Code::Bool => Code::U8,
            code if code.is_unsigned_int() && !code.is_varint() => code,
            code => {
                return Err(invalid(format!(
                    "storage unit `{}` is not an unsigned integer",
                    code.as_char()
                )));
            }
        };

        let capacity = crate::bits::unit_capacity(unit);
        if count == 0 || count > capacity {
            return Err(invalid(format!(
                "bit count {count} does not fit storage unit `{}` of {capacity} bits",
                unit.as_char()
            )));
        }

        let as_bool = declared == Code::Bool
            || self.field.ty == FieldType::Primitive(crate::field::Primitive::Bool);

        Ok((
            Token::one(unit).into(),
            Shape::Bits {
                count,
                unit,
                as_bool,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::{errors::Error, field::Primitive};

    use super::*;

    fn compile_with(
        field: Field,
        factories: &BTreeMap<String, MetaFactory>,
    ) -> Result<FieldSchema, SchemaError> {
        let no_records = |_: &str| -> Option<Arc<RecordSchema>> { None };
        let ctx = CompileContext {
            record: "Test",
            factories,
            records: &no_records,
        };
        FieldSchema::compile(&field, &ctx)
    }

    fn compile(field: Field) -> Result<FieldSchema, SchemaError> {
        compile_with(field, &BTreeMap::new())
    }

    #[test]
    fn test_primitive_format() {
        let schema = compile(Field::new("a", Primitive::U16)).unwrap();
        assert_eq!(schema.format.to_string(), "H");
        assert!(schema.single_asserted.is_none());
    }

    #[test]
    fn test_explicit_format_wins() {
        let field =
            Field::new("a", Primitive::U16).meta(FieldMeta::binary().primitive(Primitive::U8));
        assert_eq!(compile(field).unwrap().format.to_string(), "B");
    }

    #[test]
    fn test_factory_used_for_custom_type() {
        let mut factories: BTreeMap<String, MetaFactory> = BTreeMap::new();
        factories.insert(
            "Vector3".to_string(),
            Arc::new(|| FieldMeta::array(3).element(Primitive::F32)),
        );
        let field = Field::new("pos", FieldType::custom("Vector3"));
        let schema = compile_with(field, &factories).unwrap();
        assert_eq!(schema.format.to_string(), "3f");
    }

    #[test]
    fn test_custom_type_without_factory_fails() {
        let err = compile(Field::new("pos", FieldType::custom("Vector3"))).unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingFormat {
                record: "Test".into(),
                field: "pos".into(),
                type_name: "Vector3".into(),
            }
        );
    }

    #[test]
    fn test_tuple_rejected() {
        let field = Field::new("t", FieldType::Tuple(vec![Primitive::U8.into()]))
            .meta(FieldMeta::binary().format("2B"));
        assert!(matches!(compile(field), Err(SchemaError::TupleField { .. })));
    }

    #[test]
    fn test_array_element_replicated() {
        let field = Field::new("xs", FieldType::array(Primitive::I16)).meta(FieldMeta::array(4));
        let schema = compile(field).unwrap();
        assert_eq!(schema.format.to_string(), "4h");
    }

    #[test]
    fn test_oversized_array_rejected() {
        let field = Field::new("xs", FieldType::array(Primitive::I32))
            .meta(FieldMeta::array(usize::MAX / 2));
        assert!(matches!(compile(field), Err(SchemaError::InvalidFormat { .. })));
    }

    #[test]
    fn test_array_of_records_needs_element_format() {
        let field = Field::new("xs", FieldType::array(FieldType::record("Inner")))
            .meta(FieldMeta::array(2));
        assert!(matches!(compile(field), Err(SchemaError::InvalidArray { .. })));
    }

    #[test]
    fn test_bit_count_larger_than_unit() {
        let field = Field::new("flag", Primitive::U8).meta(FieldMeta::binary().bits(9));
        assert!(matches!(compile(field), Err(SchemaError::InvalidBitField { .. })));
    }

    #[test]
    fn test_bool_bit_unit_stored_as_byte() {
        let field = Field::new("flag", Primitive::Bool).meta(FieldMeta::binary().bits(1));
        let schema = compile(field).unwrap();
        assert_eq!(schema.format.to_string(), "B");
        assert_eq!(schema.bit_unit(), Some((1, Code::U8)));
        assert_eq!(schema.unpack_bits(1).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_signed_bit_unit_rejected() {
        let field = Field::new("n", Primitive::I8).meta(FieldMeta::binary().bits(3));
        assert!(matches!(compile(field), Err(SchemaError::InvalidBitField { .. })));
    }

    #[test]
    fn test_unpack_hook_runs_before_assertion() {
        let field = Field::new("n", Primitive::U8).meta(
            FieldMeta::binary()
                .unpack_with(|v| Ok(Value::U64(v.as_u64().unwrap_or(0) * 2)))
                .assert_eq(10u8),
        );
        let schema = compile(field).unwrap();
        let value = schema
            .unpack(vec![Value::U64(5)], ByteOrder::LittleEndian, None)
            .unwrap();
        assert_eq!(value, Value::U64(10));
    }

    #[test]
    fn test_pack_assertion_runs_before_hook() {
        let field = Field::new("n", Primitive::U8).meta(
            FieldMeta::binary()
                .pack_with(|v| Ok(Value::U64(v.as_u64().unwrap_or(0) / 2)))
                .assert_eq(10u8),
        );
        let schema = compile(field).unwrap();
        let mut raw = Vec::new();
        schema
            .pack(Value::U64(10), ByteOrder::LittleEndian, None, &mut raw)
            .unwrap();
        assert_eq!(raw, vec![Value::U64(5)]);

        let err = schema
            .pack(Value::U64(5), ByteOrder::LittleEndian, None, &mut raw)
            .unwrap_err();
        assert!(matches!(err, Error::Assertion(_)));
    }

    #[test]
    fn test_text_round_trip_strips_nulls() {
        let field = Field::new("name", FieldType::String)
            .meta(FieldMeta::string(8).encoding(Encoding::Ascii));
        let schema = compile(field).unwrap();

        let mut raw = Vec::new();
        schema
            .pack(Value::from("abc"), ByteOrder::LittleEndian, None, &mut raw)
            .unwrap();
        assert_eq!(raw, vec![Value::Bytes(b"abc".to_vec())]);

        let value = schema
            .unpack(vec![Value::Bytes(b"abc\0\0\0\0\0".to_vec())], ByteOrder::LittleEndian, None)
            .unwrap();
        assert_eq!(value, Value::from("abc"));
    }

    #[test]
    fn test_text_asserted_values_stripped() {
        let field = Field::new("magic", FieldType::Bytes)
            .meta(FieldMeta::string(4).assert_eq(b"AB\0\0".as_slice()));
        let schema = compile(field).unwrap();
        assert_eq!(schema.single_asserted, Some(Value::Bytes(b"AB".to_vec())));
    }

    #[test]
    fn test_pad_keeps_nulls() {
        let schema = compile(Field::pad("_pad", 3)).unwrap();
        assert_eq!(schema.single_asserted, Some(Value::Bytes(vec![0; 3])));
        let value = schema
            .unpack(vec![Value::Bytes(vec![0; 3])], ByteOrder::LittleEndian, None)
            .unwrap();
        assert_eq!(value, Value::Bytes(vec![0; 3]));
    }

    #[test]
    fn test_array_value_count_checked() {
        let field = Field::new("xs", FieldType::array(Primitive::U8)).meta(FieldMeta::array(2));
        let schema = compile(field).unwrap();
        let err = schema
            .pack(
                Value::Array(vec![Value::U64(1)]),
                ByteOrder::LittleEndian,
                None,
                &mut Vec::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Value(ValueError::Count { expected: 2, found: 1, .. })));
    }
}
