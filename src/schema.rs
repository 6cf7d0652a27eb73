//! Record schema: compiled fields of one record type and the engine that packs
//! and unpacks whole records.

use std::{collections::HashMap, sync::Arc};

use tracing::error;

use crate::{
    bits::{BitFieldReader, BitFieldWriter},
    byte_order::ByteOrder,
    compiled::FieldSchema,
    errors::{Result, SchemaError, StreamError, ValueError},
    format::{Format, Token},
    ledger::{Owner, Reservation, ReservationKey},
    record::{FieldValues, Record},
    stream::{Reader, Writer},
    value::Value,
};

/// A compiled record type. Built once by [crate::registry::Registry::register]
/// and shared read-only afterwards.
#[derive(Debug)]
pub struct RecordSchema {
    name: String,
    fields: Vec<FieldSchema>,
    index: HashMap<String, usize>,
    sequential: bool,
    byte_order: Option<ByteOrder>,
}

impl RecordSchema {
    pub fn new(
        name: impl Into<String>,
        fields: Vec<FieldSchema>,
        byte_order: Option<ByteOrder>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        if fields.is_empty() {
            return Err(SchemaError::EmptyRecord(name));
        }

        let mut index = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if index.insert(field.name.clone(), i).is_some() {
                return Err(SchemaError::DuplicateField {
                    record: name,
                    field: field.name.clone(),
                });
            }
        }
        let sequential = fields.iter().any(|field| field.skip.is_some());

        Ok(RecordSchema {
            name,
            fields,
            index,
            sequential,
            byte_order,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Byte order used by [Record::to_bytes] when the record has none.
    pub fn default_byte_order(&self) -> Option<ByteOrder> {
        self.byte_order
    }

    /// Whether fields are decoded one at a time because skip predicates need
    /// the values decoded before them.
    pub fn uses_sequential_decode(&self) -> bool {
        self.sequential
    }

    pub fn has_varints(&self) -> bool {
        self.fields.iter().any(|field| field.format.has_varints())
    }

    /// Concatenated format of every field, with bit fields coalesced into their
    /// storage units.
    pub fn full_format(&self) -> Format {
        self.layout(None)
    }

    /// Like [RecordSchema::full_format], leaving out fields whose skip
    /// predicate holds for `values`.
    pub fn full_format_for(&self, long_varints: Option<bool>, values: &FieldValues<'_>) -> Format {
        self.layout(Some((long_varints, values)))
    }

    fn layout(&self, skips: Option<(Option<bool>, &FieldValues<'_>)>) -> Format {
        let mut format = Format::new();
        let mut bits = BitFieldWriter::new();
        let mut scratch = Vec::new();

        for field in &self.fields {
            if let Some((long_varints, values)) = skips
                && field.should_skip(long_varints, values)
            {
                continue;
            }
            match field.bit_unit() {
                Some((count, unit)) => bits.claim(count, unit, &mut format, &mut scratch),
                None => {
                    bits.finish(&mut format, &mut scratch);
                    format.extend(&field.format);
                }
            }
        }
        bits.finish(&mut format, &mut scratch);

        format
    }

    /// Packed size under `order`. Fails for varint fields without a width flag.
    pub fn size(&self, order: ByteOrder, long_varints: Option<bool>) -> Result<usize> {
        self.full_format().size(order, long_varints)
    }

    /// Unpacks one record at the reader's position. `order` and `long_varints`
    /// default to the reader's settings.
    pub fn parse(
        self: &Arc<Self>,
        reader: &mut Reader<'_>,
        order: Option<ByteOrder>,
        long_varints: Option<bool>,
    ) -> Result<Record> {
        let order = order.unwrap_or(reader.byte_order());
        let long_varints = long_varints.or(reader.long_varints());

        let values = if self.sequential {
            self.unpack_sequential(reader, order, long_varints)?
        } else {
            self.unpack_bulk(reader, order, long_varints)?
        };

        Ok(Record::from_parts(
            Arc::clone(self),
            values,
            Some(order),
            long_varints,
        ))
    }

    /// Unpacks a record that must span all of `data`.
    pub fn from_bytes(
        self: &Arc<Self>,
        data: &[u8],
        order: Option<ByteOrder>,
        long_varints: Option<bool>,
    ) -> Result<Record> {
        let mut reader = Reader::new(data);
        let record = self.parse(
            &mut reader,
            Some(order.unwrap_or(ByteOrder::LittleEndian)),
            long_varints,
        )?;

        if reader.remaining() != 0 {
            return Err(StreamError::LengthMismatch {
                record: self.name.clone(),
                consumed: reader.position(),
                len: data.len(),
            }
            .into());
        }

        Ok(record)
    }

    /// Unpacks a nested record from its byte span in a parent.
    pub(crate) fn parse_nested(
        self: &Arc<Self>,
        data: &[u8],
        order: ByteOrder,
        long_varints: Option<bool>,
    ) -> Result<Record> {
        self.parse(&mut Reader::new(data), Some(order), long_varints)
    }

    fn unpack_bulk(
        &self,
        reader: &mut Reader<'_>,
        order: ByteOrder,
        long_varints: Option<bool>,
    ) -> Result<Vec<Option<Value>>> {
        let format = self.full_format();
        let raw = reader
            .unpack_format(&format, order, long_varints)
            .inspect_err(|e| {
                error!(
                    record = %self.name,
                    format = %format,
                    error = %e,
                    "could not unpack record"
                );
            })?;

        let mut raw = raw.into_iter();
        let mut bits = BitFieldReader::new();
        let mut values = Vec::with_capacity(self.fields.len());

        for field in &self.fields {
            let value = match field.bit_unit() {
                Some((count, unit)) => bits
                    .read(count, unit, || next_raw(&mut raw, field))
                    .and_then(|stored| field.unpack_bits(stored)),
                None => {
                    bits.clear();
                    let chunk: Vec<Value> = raw.by_ref().take(field.format.value_count()).collect();
                    field.unpack(chunk, order, long_varints)
                }
            }
            .inspect_err(|e| self.log_field_error(field, "unpack", e))?;

            values.push(Some(value));
        }

        Ok(values)
    }

    fn unpack_sequential(
        &self,
        reader: &mut Reader<'_>,
        order: ByteOrder,
        long_varints: Option<bool>,
    ) -> Result<Vec<Option<Value>>> {
        let mut bits = BitFieldReader::new();
        let mut values: Vec<Option<Value>> = vec![None; self.fields.len()];

        for (i, field) in self.fields.iter().enumerate() {
            if field.should_skip(long_varints, &FieldValues::new(self, &values)) {
                continue;
            }

            let value = match field.bit_unit() {
                Some((count, unit)) => bits
                    .read(count, unit, || {
                        let unit_format = Format::from(Token::one(unit));
                        let mut raw = reader
                            .unpack_format(&unit_format, order, long_varints)?
                            .into_iter();
                        next_raw(&mut raw, field)
                    })
                    .and_then(|stored| field.unpack_bits(stored)),
                None => {
                    bits.clear();
                    reader
                        .unpack_format(&field.format, order, long_varints)
                        .and_then(|raw| field.unpack(raw, order, long_varints))
                }
            }
            .inspect_err(|e| self.log_field_error(field, "unpack", e))?;

            values[i] = Some(value);
        }

        Ok(values)
    }

    /// Packs `values` into `writer`, reserving absent fields under `owner`.
    pub(crate) fn pack_values(
        &self,
        values: &[Option<Value>],
        order: ByteOrder,
        long_varints: Option<bool>,
        writer: &mut Writer,
        owner: &Owner,
    ) -> Result<Vec<ReservationKey>> {
        let view = FieldValues::new(self, values);
        let start = writer.position();

        let mut format = Format::new();
        let mut raw = Vec::new();
        let mut bits = BitFieldWriter::new();
        let mut reserved = Vec::new();

        for (field, value) in self.fields.iter().zip(values) {
            if field.should_skip(long_varints, &view) {
                continue;
            }

            let value = value.as_ref().or(field.single_asserted.as_ref());

            if let Some((count, unit)) = field.bit_unit() {
                let value = value.cloned().ok_or_else(|| ValueError::Missing {
                    record: self.name.clone(),
                    field: field.name.clone(),
                })?;
                let stored = field
                    .pack_bits(value)
                    .inspect_err(|e| self.log_field_error(field, "pack", e))?;
                bits.write(stored, count, unit, &mut format, &mut raw)?;
                continue;
            }
            bits.finish(&mut format, &mut raw);

            match value {
                Some(value) => {
                    field
                        .pack(value.clone(), order, long_varints, &mut raw)
                        .inspect_err(|e| self.log_field_error(field, "pack", e))?;
                    format.extend(&field.format);
                }
                None => {
                    let key = ReservationKey::field(owner.clone(), field.name.clone());
                    let (offset, span) = self.placeholder(&format, field, order, long_varints)?;
                    writer.mark_reserved(
                        key.clone(),
                        Reservation {
                            offset: start + offset,
                            byte_order: order,
                            format: field.format.resolve(long_varints)?,
                            align_base: offset,
                        },
                    )?;
                    format.push(Token::bytes(span));
                    raw.push(Value::Bytes(vec![0; span]));
                    reserved.push(key);
                }
            }
        }
        bits.finish(&mut format, &mut raw);

        writer
            .pack_format(&format, order, long_varints, &raw)
            .inspect_err(|e| {
                error!(record = %self.name, format = %format, error = %e, "could not pack record");
            })?;

        Ok(reserved)
    }

    /// Offset where `field` starts after `prefix`, and the null span standing in
    /// for it. The span includes alignment padding before and inside the field,
    /// which a fill from that offset reproduces.
    fn placeholder(
        &self,
        prefix: &Format,
        field: &FieldSchema,
        order: ByteOrder,
        long_varints: Option<bool>,
    ) -> Result<(usize, usize)> {
        let before = prefix.size(order, long_varints)?;
        let mut with_field = prefix.clone();
        with_field.extend(&field.format);
        let after = with_field.size(order, long_varints)?;

        Ok((before, after - before))
    }

    fn log_field_error(&self, field: &FieldSchema, action: &str, e: &crate::errors::Error) {
        error!(
            record = %self.name,
            field = %field.name,
            format = %field.format,
            error = %e,
            "could not {action} field"
        );
    }
}

fn next_raw(raw: &mut impl Iterator<Item = Value>, field: &FieldSchema) -> Result<Value> {
    raw.next().ok_or_else(|| {
        ValueError::Count {
            field: field.name.clone(),
            expected: 1,
            found: 0,
        }
        .into()
    })
}
