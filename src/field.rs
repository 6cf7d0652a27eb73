//! Definition of logical fields used to declare a [crate::registry::RecordDef].
//!
//! A field has a name, a declared [FieldType] and optional [FieldMeta]. When the
//! metadata is absent (or gives no format) the wire format is derived from the
//! type; see [crate::compiled].

use std::{fmt, sync::Arc};

use crate::{
    errors::ValueError, format::Code, record::FieldValues, text::Encoding, value::Value,
};

/// Conversion applied between the raw wire value and the field's domain value.
pub type Hook = Arc<dyn Fn(Value) -> Result<Value, ValueError> + Send + Sync>;

/// Decides, from the varint width flag and the other field values, whether a
/// field is absent from the byte stream.
pub type SkipPredicate = Arc<dyn Fn(Option<bool>, &FieldValues<'_>) -> bool + Send + Sync>;

/// Built-in primitive types with a single wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    /// `i32` or `i64` depending on the record's `long_varints` flag.
    VarInt,
    /// `u32` or `u64` depending on the record's `long_varints` flag.
    VarUInt,
}

impl Primitive {
    pub fn code(self) -> Code {
        match self {
            Primitive::Bool => Code::Bool,
            Primitive::U8 => Code::U8,
            Primitive::I8 => Code::I8,
            Primitive::U16 => Code::U16,
            Primitive::I16 => Code::I16,
            Primitive::U32 => Code::U32,
            Primitive::I32 => Code::I32,
            Primitive::U64 => Code::U64,
            Primitive::I64 => Code::I64,
            Primitive::F32 => Code::F32,
            Primitive::F64 => Code::F64,
            Primitive::VarInt => Code::VarInt,
            Primitive::VarUInt => Code::VarUInt,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::U8 => "u8",
            Primitive::I8 => "i8",
            Primitive::U16 => "u16",
            Primitive::I16 => "i16",
            Primitive::U32 => "u32",
            Primitive::I32 => "i32",
            Primitive::U64 => "u64",
            Primitive::I64 => "i64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
            Primitive::VarInt => "varint",
            Primitive::VarUInt => "varuint",
        }
    }
}

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Primitive(Primitive),
    /// Raw byte string; needs string metadata for its size.
    Bytes,
    /// Decoded text; needs string metadata for its size and encoding.
    String,
    /// Fixed-length list; needs array metadata for its length.
    Array(Box<FieldType>),
    /// Never valid. Kept so declarations can be rejected with a clear error.
    Tuple(Vec<FieldType>),
    /// Another registered record, embedded as a fixed-size byte span.
    Record(String),
    /// Convenience type resolved through a record's metadata factories.
    Custom(String),
}

impl FieldType {
    pub fn array(element: impl Into<FieldType>) -> Self {
        FieldType::Array(Box::new(element.into()))
    }

    pub fn record(name: impl Into<String>) -> Self {
        FieldType::Record(name.into())
    }

    pub fn custom(name: impl Into<String>) -> Self {
        FieldType::Custom(name.into())
    }

    /// Name used to look up metadata factories.
    pub fn type_name(&self) -> String {
        match self {
            FieldType::Primitive(p) => p.name().to_string(),
            FieldType::Bytes => "bytes".to_string(),
            FieldType::String => "str".to_string(),
            FieldType::Array(_) => "list".to_string(),
            FieldType::Tuple(_) => "tuple".to_string(),
            FieldType::Record(name) | FieldType::Custom(name) => name.clone(),
        }
    }
}

impl From<Primitive> for FieldType {
    fn from(p: Primitive) -> Self {
        FieldType::Primitive(p)
    }
}

/// How raw wire values map onto the field's value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Layout {
    /// One raw value (or an array if the format holds several).
    #[default]
    Scalar,
    /// One byte string, optionally decoded to text.
    Text {
        encoding: Option<Encoding>,
        rstrip_null: bool,
    },
    /// `length` elements collected into [Value::Array].
    Array { length: usize },
}

/// Optional per-field metadata supplied by the schema author.
#[derive(Clone, Default)]
pub struct FieldMeta {
    /// Explicit format text (`"3f"`, `"12s"`). Derived from the type when absent.
    pub format: Option<String>,
    /// Element format text for arrays.
    pub element: Option<String>,
    /// Values the field may hold. Exactly one makes the field single-asserted.
    pub asserted: Vec<Value>,
    pub unpack: Option<Hook>,
    pub pack: Option<Hook>,
    /// Width in bits when the field is packed into a shared storage unit.
    pub bit_count: Option<u32>,
    pub skip: Option<SkipPredicate>,
    pub layout: Layout,
}

impl FieldMeta {
    pub fn binary() -> Self {
        Self::default()
    }

    /// Fixed-length byte string of `size` bytes. Trailing nulls are stripped.
    pub fn string(size: usize) -> Self {
        FieldMeta {
            format: Some(format!("{size}s")),
            layout: Layout::Text {
                encoding: None,
                rstrip_null: true,
            },
            ..Default::default()
        }
    }

    pub fn array(length: usize) -> Self {
        FieldMeta {
            layout: Layout::Array { length },
            ..Default::default()
        }
    }

    /// `length` null bytes, always asserted.
    pub fn pad(length: usize) -> Self {
        Self::pad_with(length, 0)
    }

    pub fn pad_with(length: usize, byte: u8) -> Self {
        FieldMeta {
            format: Some(format!("{length}s")),
            asserted: vec![Value::Bytes(vec![byte; length])],
            layout: Layout::Text {
                encoding: None,
                rstrip_null: false,
            },
            ..Default::default()
        }
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn primitive(self, primitive: Primitive) -> Self {
        self.format(primitive.code().as_char().to_string())
    }

    /// Element format of an array field.
    pub fn element(mut self, primitive: Primitive) -> Self {
        self.element = Some(primitive.code().as_char().to_string());
        self
    }

    pub fn element_format(mut self, format: impl Into<String>) -> Self {
        self.element = Some(format.into());
        self
    }

    pub fn asserted<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.asserted = values.into_iter().map(Into::into).collect();
        self
    }

    /// Single asserted value: the field is always written and read as `value`.
    pub fn assert_eq(self, value: impl Into<Value>) -> Self {
        self.asserted([value.into()])
    }

    pub fn unpack_with<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value) -> Result<Value, ValueError> + Send + Sync + 'static,
    {
        self.unpack = Some(Arc::new(hook));
        self
    }

    pub fn pack_with<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value) -> Result<Value, ValueError> + Send + Sync + 'static,
    {
        self.pack = Some(Arc::new(hook));
        self
    }

    pub fn bits(mut self, bit_count: u32) -> Self {
        self.bit_count = Some(bit_count);
        self
    }

    pub fn skip_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(Option<bool>, &FieldValues<'_>) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(predicate));
        self
    }

    /// Decode string fields as text. Has no effect on other layouts.
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        if let Layout::Text {
            encoding: current, ..
        } = &mut self.layout
        {
            *current = Some(encoding);
        }
        self
    }

    /// Keep trailing nulls of string fields.
    pub fn keep_nulls(mut self) -> Self {
        if let Layout::Text { rstrip_null, .. } = &mut self.layout {
            *rstrip_null = false;
        }
        self
    }

    pub fn single_asserted(&self) -> Option<&Value> {
        match self.asserted.as_slice() {
            [value] => Some(value),
            _ => None,
        }
    }
}

impl fmt::Debug for FieldMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldMeta")
            .field("format", &self.format)
            .field("element", &self.element)
            .field("asserted", &self.asserted)
            .field("bit_count", &self.bit_count)
            .field("layout", &self.layout)
            .field("unpack", &self.unpack.is_some())
            .field("pack", &self.pack.is_some())
            .field("skip", &self.skip.is_some())
            .finish()
    }
}

/// A single named field of a record declaration.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub meta: Option<FieldMeta>,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: impl Into<FieldType>) -> Self {
        Field {
            name: name.into(),
            ty: ty.into(),
            meta: None,
        }
    }

    pub fn meta(mut self, meta: FieldMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Padding field of `length` null bytes.
    pub fn pad(name: impl Into<String>, length: usize) -> Self {
        Field::new(name, FieldType::Bytes).meta(FieldMeta::pad(length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_asserted() {
        assert!(FieldMeta::binary().single_asserted().is_none());
        assert_eq!(
            FieldMeta::binary().assert_eq(5u8).single_asserted(),
            Some(&Value::U64(5))
        );
        assert!(FieldMeta::binary().asserted([1u8, 2]).single_asserted().is_none());
    }

    #[test]
    fn test_pad_is_single_asserted() {
        let meta = FieldMeta::pad_with(3, 0xFF);
        assert_eq!(meta.single_asserted(), Some(&Value::Bytes(vec![0xFF; 3])));
        assert_eq!(meta.format.as_deref(), Some("3s"));
        assert_eq!(
            meta.layout,
            Layout::Text {
                encoding: None,
                rstrip_null: false
            }
        );
    }

    #[test]
    fn test_encoding_only_applies_to_text() {
        let meta = FieldMeta::string(8).encoding(Encoding::Utf16);
        assert_eq!(
            meta.layout,
            Layout::Text {
                encoding: Some(Encoding::Utf16),
                rstrip_null: true
            }
        );
        assert_eq!(
            FieldMeta::array(2).encoding(Encoding::Utf8).layout,
            Layout::Array { length: 2 }
        );
    }

    #[test]
    fn test_type_names() {
        assert_eq!(FieldType::from(Primitive::U16).type_name(), "u16");
        assert_eq!(FieldType::custom("Vector3").type_name(), "Vector3");
        assert_eq!(FieldType::array(Primitive::F32).type_name(), "list");
    }
}
