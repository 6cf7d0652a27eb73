//! Error types for schema compilation, value checking, reservations and streams.

use thiserror::Error;

use crate::format::ParseFormatError;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Any failure raised while compiling, packing or unpacking records.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Assertion(#[from] ValueAssertionError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error(transparent)]
    Reservation(#[from] ReservationError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    BitField(#[from] BitFieldOverflow),
    #[error(transparent)]
    Format(#[from] ParseFormatError),
    /// A `v`/`V` token was sized, packed or unpacked without a width flag.
    #[error("variable-width integer used without a resolved `long_varints` flag")]
    UnresolvedVarintWidth,
}

/// Errors produced when compiling a [crate::field::Field] into a [crate::compiled::FieldSchema].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The field type is neither primitive, a registered record, nor covered by a factory.
    #[error(
        "field `{record}.{field}`: type `{type_name}` has no wire format; give it explicit metadata"
    )]
    MissingFormat {
        record: String,
        field: String,
        type_name: String,
    },
    /// `tuple` types are never valid; fixed-length arrays must be used instead.
    #[error("field `{record}.{field}`: tuple types are not allowed, use a fixed-length array")]
    TupleField { record: String, field: String },
    /// Array metadata on a non-array type, or an array whose element has no format.
    #[error("field `{record}.{field}`: {reason}")]
    InvalidArray {
        record: String,
        field: String,
        reason: String,
    },
    /// Format text could not be parsed.
    #[error("field `{record}.{field}`: invalid format `{format}`")]
    InvalidFormat {
        record: String,
        field: String,
        format: String,
    },
    /// Bit count is zero, larger than its storage unit, or the unit is not an unsigned integer.
    #[error("field `{record}.{field}`: {reason}")]
    InvalidBitField {
        record: String,
        field: String,
        reason: String,
    },
    /// A nested record cannot be laid out as a fixed-size byte span.
    #[error("field `{record}.{field}`: nested record `{nested}` contains variable-width integers")]
    NestedVarint {
        record: String,
        field: String,
        nested: String,
    },
    #[error("field `{record}.{field}`: nested record `{nested}` is not registered")]
    UnknownRecord {
        record: String,
        field: String,
        nested: String,
    },
    #[error("record `{record}` declares field `{field}` more than once")]
    DuplicateField { record: String, field: String },
    #[error("record `{0}` is already registered")]
    DuplicateRecord(String),
    #[error("record `{0}` has no fields")]
    EmptyRecord(String),
}

/// A decoded or supplied value is not one of its field's asserted values.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("field `{record}.{field}` value {value} is not an asserted value: {asserted}")]
pub struct ValueAssertionError {
    pub record: String,
    pub field: String,
    pub value: String,
    pub asserted: String,
}

/// A value cannot be converted to or from its wire representation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("expected {expected} value for format `{format}`, got {found}")]
    WrongKind {
        format: char,
        expected: &'static str,
        found: &'static str,
    },
    #[error("value {value} does not fit format `{format}`")]
    OutOfRange { value: String, format: char },
    #[error("{len} bytes do not fit in a {size}-byte slot")]
    TooLong { len: usize, size: usize },
    #[error("field `{field}` expects {expected} values, got {found}")]
    Count {
        field: String,
        expected: usize,
        found: usize,
    },
    #[error("field `{record}.{field}` has no value")]
    Missing { record: String, field: String },
    #[error("record `{record}` has no field `{field}`")]
    UnknownField { record: String, field: String },
    #[error("field `{record}.{field}` has a single asserted value and cannot be supplied")]
    NotSettable { record: String, field: String },
    #[error("cannot encode text as {encoding}: {reason}")]
    Encode {
        encoding: &'static str,
        reason: String,
    },
    #[error("cannot decode bytes as {encoding}: {reason}")]
    Decode {
        encoding: &'static str,
        reason: String,
    },
    /// Returned by user conversion hooks.
    #[error("{0}")]
    Custom(String),
}

impl ValueError {
    pub fn custom(message: impl Into<String>) -> Self {
        ValueError::Custom(message.into())
    }
}

/// Misuse of the deferred-offset ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    #[error("`{0}` is already reserved")]
    Duplicate(String),
    #[error("`{0}` is not reserved")]
    Unknown(String),
    #[error("no values given to fill `{0}`")]
    NoValues(String),
    #[error("reserved offsets not filled: {}", .0.join(", "))]
    Outstanding(Vec<String>),
}

/// Failures of the byte source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("could not read {requested} bytes for format `{format}`, only {available} available")]
    UnexpectedEof {
        requested: usize,
        available: usize,
        format: String,
    },
    #[error("record `{record}` consumed {consumed} of {len} bytes")]
    LengthMismatch {
        record: String,
        consumed: usize,
        len: usize,
    },
    #[error("offset {offset} is beyond the end of {len} bytes")]
    SeekOutOfRange { offset: usize, len: usize },
    #[error("cannot pad to offset {offset}, already at {position}")]
    PastOffset { offset: usize, position: usize },
    #[error("ran out of bytes before a null terminator was found")]
    MissingTerminator,
    #[error("could not determine {what} from bytes {found:?}")]
    UnrecognisedMarker { what: &'static str, found: Vec<u8> },
    #[error("expected {size} pad bytes of {byte:#04x}, found {found:?}")]
    BadPadding { size: usize, byte: u8, found: Vec<u8> },
}

/// A bit-field value does not fit its declared width or storage unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitFieldOverflow {
    #[error("value {value} is too large for a {bits}-bit field")]
    Write { value: u64, bits: u32 },
    #[error("stored bit unit {value} is too large for format `{format}`")]
    Read { value: u64, format: char },
}
