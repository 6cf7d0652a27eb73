//! Record instances: field values of one compiled [RecordSchema], plus the byte
//! order and varint width they were read with or should be written with.

use std::{collections::BTreeMap, fmt, sync::Arc};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::{
    byte_order::ByteOrder,
    errors::{Result, ValueAssertionError, ValueError},
    ledger::{Owner, ReservationKey},
    schema::RecordSchema,
    stream::Writer,
    value::Value,
};

/// Field values of one record. Absent fields are reserved when packing, unless
/// they have a single asserted value.
#[derive(Clone)]
pub struct Record {
    schema: Arc<RecordSchema>,
    values: Vec<Option<Value>>,
    byte_order: Option<ByteOrder>,
    long_varints: Option<bool>,
}

impl Record {
    /// Empty record with single-asserted fields set to their values.
    pub fn new(schema: &Arc<RecordSchema>) -> Self {
        let values = schema
            .fields()
            .iter()
            .map(|field| field.single_asserted.clone())
            .collect();

        Record {
            schema: Arc::clone(schema),
            values,
            byte_order: None,
            long_varints: None,
        }
    }

    /// Builds a record from named values. Fields left out stay absent and are
    /// reserved when packed. Single-asserted fields cannot be supplied.
    pub fn from_values<I, K, V>(schema: &Arc<RecordSchema>, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut record = Record::new(schema);
        for (name, value) in values {
            let index = record.index(name.as_ref())?;
            if schema.fields()[index].single_asserted.is_some() {
                return Err(ValueError::NotSettable {
                    record: schema.name().to_string(),
                    field: name.as_ref().to_string(),
                }
                .into());
            }
            record.values[index] = Some(value.into());
        }
        Ok(record)
    }

    pub(crate) fn from_parts(
        schema: Arc<RecordSchema>,
        values: Vec<Option<Value>>,
        byte_order: Option<ByteOrder>,
        long_varints: Option<bool>,
    ) -> Self {
        Record {
            schema,
            values,
            byte_order,
            long_varints,
        }
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn byte_order(&self) -> Option<ByteOrder> {
        self.byte_order
    }

    pub fn set_byte_order(&mut self, byte_order: Option<ByteOrder>) {
        self.byte_order = byte_order;
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = Some(byte_order);
        self
    }

    pub fn long_varints(&self) -> Option<bool> {
        self.long_varints
    }

    pub fn set_long_varints(&mut self, long_varints: Option<bool>) {
        self.long_varints = long_varints;
    }

    pub fn with_long_varints(mut self, long_varints: bool) -> Self {
        self.long_varints = Some(long_varints);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let index = self.schema.index_of(name)?;
        self.values[index].as_ref()
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.index(name)?;
        self.values[index] = Some(value.into());
        Ok(())
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Removes and returns a present value, leaving the field to be reserved.
    pub fn take(&mut self, name: &str) -> Result<Value> {
        let index = self.index(name)?;
        self.values[index].take().ok_or_else(|| {
            ValueError::Missing {
                record: self.name().to_string(),
                field: name.to_string(),
            }
            .into()
        })
    }

    pub fn clear(&mut self, name: &str) -> Result<()> {
        let index = self.index(name)?;
        self.values[index] = None;
        Ok(())
    }

    /// Fields in schema order with their values, if present.
    pub fn values(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.schema
            .fields()
            .iter()
            .zip(&self.values)
            .map(|(field, value)| (field.name.as_str(), value.as_ref()))
    }

    /// Checks that each named field currently holds the given value. An absent
    /// field never matches.
    pub fn assert_values<I, K, V>(&self, expected: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in expected {
            let name = name.as_ref();
            let index = self.index(name)?;
            let value = value.into();
            let current = self.values[index].as_ref();
            if current != Some(&value) {
                return Err(ValueAssertionError {
                    record: self.name().to_string(),
                    field: name.to_string(),
                    value: current.map_or_else(|| "absent".to_string(), Value::to_string),
                    asserted: value.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Present values of fields without a single asserted value. Names starting
    /// with `_` are left out when `skip_underscore` is set.
    pub fn to_map(&self, skip_underscore: bool) -> BTreeMap<String, Value> {
        self.schema
            .fields()
            .iter()
            .zip(&self.values)
            .filter(|(field, _)| field.single_asserted.is_none())
            .filter(|(field, _)| !skip_underscore || !field.name.starts_with('_'))
            .filter_map(|(field, value)| Some((field.name.clone(), value.clone()?)))
            .collect()
    }

    /// Packs into `writer`. Absent fields are reserved; use the returned receipt
    /// to fill them.
    ///
    /// The record's own byte order wins over the writer's. The varint width
    /// falls back to the writer's flag.
    pub fn pack(&self, writer: &mut Writer) -> Result<Packed> {
        let order = match self.byte_order {
            Some(order) => {
                if order != writer.byte_order() {
                    warn!(
                        record = self.name(),
                        writer = %writer.byte_order(),
                        record_order = %order,
                        "record byte order overrides writer default"
                    );
                }
                order
            }
            None => writer.byte_order(),
        };
        let long_varints = self.long_varints.or(writer.long_varints());

        let owner = writer.next_owner(self.name());
        let reserved = self
            .schema
            .pack_values(&self.values, order, long_varints, writer, &owner)?;

        Ok(Packed { owner, reserved })
    }

    /// Packs into a fresh buffer. Fails while any field would be reserved.
    pub fn to_bytes(&self) -> Result<Bytes> {
        self.to_bytes_with(None, None)
    }

    /// Concatenates the [Record::to_bytes] output of every record.
    pub fn join_bytes<'a>(records: impl IntoIterator<Item = &'a Record>) -> Result<Bytes> {
        let mut out = BytesMut::new();
        for record in records {
            out.put(record.to_bytes()?);
        }
        Ok(out.freeze())
    }

    /// Like [Record::to_bytes], with byte order or varint width overridden.
    pub fn to_bytes_with(
        &self,
        byte_order: Option<ByteOrder>,
        long_varints: Option<bool>,
    ) -> Result<Bytes> {
        let order = match byte_order
            .or(self.byte_order)
            .or(self.schema.default_byte_order())
        {
            Some(order) => order,
            None => {
                warn!(record = self.name(), "byte order defaulting to little endian");
                ByteOrder::LittleEndian
            }
        };

        let mut writer = Writer::new(order, long_varints.or(self.long_varints));
        let owner = writer.next_owner(self.name());
        self.schema.pack_values(
            &self.values,
            order,
            writer.long_varints(),
            &mut writer,
            &owner,
        )?;
        writer.finish()
    }

    /// Bytes of a record embedded in a parent. The parent's order and width
    /// apply unless this record has its own.
    pub(crate) fn encode_nested(
        &self,
        order: ByteOrder,
        long_varints: Option<bool>,
    ) -> Result<Vec<u8>> {
        let order = self.byte_order.unwrap_or(order);
        let bytes = self.to_bytes_with(Some(order), self.long_varints.or(long_varints))?;
        Ok(bytes.to_vec())
    }

    fn index(&self, name: &str) -> Result<usize, ValueError> {
        self.schema
            .index_of(name)
            .ok_or_else(|| ValueError::UnknownField {
                record: self.name().to_string(),
                field: name.to_string(),
            })
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name() && self.values == other.values
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.name());
        for (name, value) in self.values() {
            s.field(name, &value);
        }
        s.finish()
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let present: Vec<_> = self
            .values()
            .filter_map(|(name, value)| Some((name, value?)))
            .collect();
        let mut map = serializer.serialize_map(Some(present.len()))?;
        for (name, value) in present {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Read-only view of a record's field values handed to skip predicates. When
/// unpacking, fields not yet decoded are absent.
#[derive(Clone, Copy)]
pub struct FieldValues<'a> {
    schema: &'a RecordSchema,
    values: &'a [Option<Value>],
}

impl<'a> FieldValues<'a> {
    pub(crate) fn new(schema: &'a RecordSchema, values: &'a [Option<Value>]) -> Self {
        FieldValues { schema, values }
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        let index = self.schema.index_of(name)?;
        self.values.get(index)?.as_ref()
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Receipt of [Record::pack]: the reservations made for absent fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packed {
    owner: Owner,
    reserved: Vec<ReservationKey>,
}

impl Packed {
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn reserved(&self) -> &[ReservationKey] {
        &self.reserved
    }

    /// Key of the reservation made for `field`, if it was reserved.
    pub fn key(&self, field: &str) -> Option<&ReservationKey> {
        self.reserved.iter().find(|key| key.name == field)
    }

    pub fn fill(&self, writer: &mut Writer, field: &str, values: &[Value]) -> Result<()> {
        writer.fill(&ReservationKey::field(self.owner.clone(), field), values)
    }

    pub fn fill_value(
        &self,
        writer: &mut Writer,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.fill(writer, field, &[value.into()])
    }

    /// Fills several single-value reservations, stopping at the first failure.
    pub fn fill_many(&self, writer: &mut Writer, fields: &[(&str, Value)]) -> Result<()> {
        for (field, value) in fields {
            self.fill(writer, field, std::slice::from_ref(value))?;
        }
        Ok(())
    }

    /// Fills `field` with the writer's current position and returns it.
    pub fn fill_with_position(&self, writer: &mut Writer, field: &str) -> Result<usize> {
        writer.fill_with_position(&ReservationKey::field(self.owner.clone(), field))
    }
}
