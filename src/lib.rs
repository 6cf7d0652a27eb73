//! # recordcraft
//!
//! A declarative binary record codec.
//!
//! Declare a record as an ordered list of typed fields, register it once, then
//! pack records into a [Writer] and parse them back from a [Reader]. Fields can
//! be fixed-width scalars, fixed-length strings and arrays, nested records,
//! padding, or sub-byte bit fields that share a storage unit. Fields left
//! absent when packing are reserved and patched later, once their values (often
//! offsets of data written afterwards) are known.
//!
//! ## Example
//!
//! ```
//! use recordcraft::{
//!     ByteOrder, Field, FieldMeta, Primitive, Record, RecordDef, Registry, Value, Writer,
//! };
//!
//! let mut registry = Registry::new();
//! let header = registry
//!     .register(
//!         RecordDef::new("Header")
//!             .field(
//!                 Field::new("magic", Primitive::U16)
//!                     .meta(FieldMeta::binary().assert_eq(0xCAFEu16)),
//!             )
//!             .field(Field::new("data_offset", Primitive::U32)),
//!     )
//!     .unwrap();
//!
//! let mut writer = Writer::new(ByteOrder::LittleEndian, None);
//! let packed = Record::new(&header).pack(&mut writer).unwrap();
//! writer.append(b"payload");
//! packed.fill_value(&mut writer, "data_offset", 6u32).unwrap();
//! let bytes = writer.finish().unwrap();
//!
//! let parsed = header.from_bytes(&bytes[..6], None, None).unwrap();
//! assert_eq!(parsed.get("data_offset"), Some(&Value::U64(6)));
//! ```

pub mod bits;
pub mod byte_order;
pub mod codec;
pub mod compiled;
pub mod config;
pub mod errors;
pub mod field;
pub mod format;
pub mod ledger;
pub mod record;
pub mod registry;
pub mod schema;
pub mod stream;
pub mod text;
pub mod value;

pub use byte_order::ByteOrder;
pub use config::Config;
pub use errors::{Error, Result};
pub use field::{Field, FieldMeta, FieldType, Primitive};
pub use record::{FieldValues, Packed, Record};
pub use registry::{RecordDef, Registry};
pub use schema::RecordSchema;
pub use stream::{Reader, Writer};
pub use text::Encoding;
pub use value::Value;
