//! Record declarations and the registry that compiles them once.
//!
//! Nested record types must be registered before the records that embed them,
//! since a parent's layout needs the nested record's size.

use std::{collections::BTreeMap, collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    byte_order::ByteOrder,
    compiled::{CompileContext, FieldSchema},
    errors::SchemaError,
    field::{Field, FieldMeta},
    record::Record,
    schema::RecordSchema,
};

/// Builds default metadata for fields of a convenience type that carry none.
pub type MetaFactory = Arc<dyn Fn() -> FieldMeta + Send + Sync>;

/// Static declaration of a record type.
#[derive(Clone)]
pub struct RecordDef {
    pub name: String,
    pub fields: Vec<Field>,
    pub factories: BTreeMap<String, MetaFactory>,
    pub byte_order: Option<ByteOrder>,
}

impl RecordDef {
    pub fn new(name: impl Into<String>) -> Self {
        RecordDef {
            name: name.into(),
            fields: Vec::new(),
            factories: BTreeMap::new(),
            byte_order: None,
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Metadata used for fields of type `type_name` declared without any.
    pub fn factory<F>(mut self, type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> FieldMeta + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Arc::new(factory));
        self
    }

    /// Byte order used when a record of this type is packed on its own.
    pub fn byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = Some(byte_order);
        self
    }
}

/// Compiled record schemas, indexed by name.
#[derive(Debug, Default)]
pub struct Registry {
    schemas: Vec<Arc<RecordSchema>>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles `def` and stores the result. Every schema error surfaces here,
    /// never while packing or unpacking.
    pub fn register(&mut self, def: RecordDef) -> Result<Arc<RecordSchema>, SchemaError> {
        if self.index.contains_key(&def.name) {
            return Err(SchemaError::DuplicateRecord(def.name));
        }

        let records = |name: &str| self.get(name);
        let ctx = CompileContext {
            record: &def.name,
            factories: &def.factories,
            records: &records,
        };
        let fields = def
            .fields
            .iter()
            .map(|field| FieldSchema::compile(field, &ctx))
            .collect::<Result<Vec<_>, _>>()?;

        let schema = Arc::new(RecordSchema::new(def.name, fields, def.byte_order)?);
        debug!(
            record = schema.name(),
            fields = schema.fields().len(),
            format = %schema.full_format(),
            "compiled record schema"
        );

        self.index.insert(schema.name().to_string(), self.schemas.len());
        self.schemas.push(Arc::clone(&schema));
        Ok(schema)
    }

    pub fn get(&self, name: &str) -> Option<Arc<RecordSchema>> {
        self.index.get(name).map(|&i| Arc::clone(&self.schemas[i]))
    }

    /// Empty record of type `name`.
    pub fn new_record(&self, name: &str) -> Option<Record> {
        self.get(name).map(|schema| Record::new(&schema))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.iter().map(|schema| schema.name())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        field::{FieldType, Primitive},
        value::Value,
    };

    use super::*;

    #[test]
    fn test_duplicate_record() {
        let mut registry = Registry::new();
        registry
            .register(RecordDef::new("A").field(Field::new("x", Primitive::U8)))
            .unwrap();
        let err = registry
            .register(RecordDef::new("A").field(Field::new("x", Primitive::U8)))
            .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateRecord("A".into()));
    }

    #[test]
    fn test_empty_and_duplicate_fields() {
        let mut registry = Registry::new();
        assert_eq!(
            registry.register(RecordDef::new("E")).unwrap_err(),
            SchemaError::EmptyRecord("E".into())
        );
        assert!(matches!(
            registry.register(
                RecordDef::new("D")
                    .field(Field::new("x", Primitive::U8))
                    .field(Field::new("x", Primitive::U16))
            ),
            Err(SchemaError::DuplicateField { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_nested_record_is_byte_span() {
        let mut registry = Registry::new();
        registry
            .register(
                RecordDef::new("Point")
                    .field(Field::new("x", Primitive::I16))
                    .field(Field::new("y", Primitive::I16)),
            )
            .unwrap();
        let line = registry
            .register(
                RecordDef::new("Line")
                    .field(Field::new("start", FieldType::record("Point")))
                    .field(Field::new("end", FieldType::record("Point"))),
            )
            .unwrap();

        assert_eq!(line.full_format().to_string(), "4s4s");
        assert_eq!(registry.names().collect::<Vec<_>>(), ["Point", "Line"]);
    }

    #[test]
    fn test_nested_must_be_registered_first() {
        let mut registry = Registry::new();
        let err = registry
            .register(RecordDef::new("Line").field(Field::new("start", FieldType::record("Point"))))
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownRecord { .. }));
    }

    #[test]
    fn test_nested_varints_rejected() {
        let mut registry = Registry::new();
        registry
            .register(RecordDef::new("Var").field(Field::new("n", Primitive::VarInt)))
            .unwrap();
        let err = registry
            .register(RecordDef::new("Outer").field(Field::new("inner", FieldType::record("Var"))))
            .unwrap_err();
        assert!(matches!(err, SchemaError::NestedVarint { .. }));
    }

    #[test]
    fn test_factory_applies_to_custom_type() {
        let mut registry = Registry::new();
        let schema = registry
            .register(
                RecordDef::new("Body")
                    .factory("Vector3", || FieldMeta::array(3).element(Primitive::F32))
                    .field(Field::new("position", FieldType::custom("Vector3")))
                    .field(Field::new("velocity", FieldType::custom("Vector3"))),
            )
            .unwrap();
        assert_eq!(schema.full_format().to_string(), "3f3f");

        let record = registry.new_record("Body").unwrap();
        assert_eq!(record.get("position"), None::<&Value>);
    }
}
