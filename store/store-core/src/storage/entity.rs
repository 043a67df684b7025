//! Entity - Records managed by the storage
//!
//! TigerStyle: Explicit types, static descriptors, validation.
//!
//! An entity type describes itself with a static [`EntityDescriptor`]; the
//! storage maps each descriptor to one table and each [`FieldDescriptor`] to
//! one column.

use bytes::Bytes;

use crate::constants::{ENTITY_FIELDS_COUNT_MAX, ENTITY_NAME_BYTES_MAX, ENTITY_PAYLOAD_BYTES_MAX};

use super::error::{StorageError, StorageResult};

// =============================================================================
// Field Metadata
// =============================================================================

/// Column type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// 64-bit signed integer (`BIGINT`)
    BigInt,
    /// Opaque byte sequence (`BYTEA`)
    Bytea,
    /// UTF-8 text (`TEXT`)
    Text,
}

impl FieldKind {
    /// SQL type name.
    #[must_use]
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::BigInt => "BIGINT",
            Self::Bytea => "BYTEA",
            Self::Text => "TEXT",
        }
    }
}

/// Static metadata for one entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    /// Field (and column) name
    pub name: &'static str,
    /// Column type
    pub kind: FieldKind,
    /// Whether this field is the identifier
    pub id: bool,
    /// Transient fields are never persisted
    pub transient: bool,
}

impl FieldDescriptor {
    /// Identifier field.
    #[must_use]
    pub const fn id(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::BigInt,
            id: true,
            transient: false,
        }
    }

    /// Persisted non-identifier field.
    #[must_use]
    pub const fn column(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            id: false,
            transient: false,
        }
    }

    /// Field that exists on the type but is not persisted.
    #[must_use]
    pub const fn transient(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            id: false,
            transient: true,
        }
    }
}

/// Static metadata for an entity type.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct EntityDescriptor {
    /// Entity (and table) name
    pub name: &'static str,
    /// Declared fields, in declaration order
    pub fields: &'static [FieldDescriptor],
}

impl EntityDescriptor {
    /// Check that the descriptor can be mapped to a table.
    ///
    /// # Errors
    /// Returns `StorageError::Validation` if names are empty or too long,
    /// there is not exactly one `BIGINT` id field, or names collide.
    pub fn validate(&self) -> StorageResult<()> {
        validate_identifier(self.name)?;
        if self.fields.len() > ENTITY_FIELDS_COUNT_MAX {
            return Err(StorageError::validation(format!(
                "entity {} has {} fields, max is {ENTITY_FIELDS_COUNT_MAX}",
                self.name,
                self.fields.len()
            )));
        }

        let ids: Vec<&FieldDescriptor> = self.fields.iter().filter(|f| f.id).collect();
        match ids.as_slice() {
            [id] if id.kind == FieldKind::BigInt && !id.transient => {}
            [_] => {
                return Err(StorageError::validation(format!(
                    "id field of entity {} must be a persisted BIGINT",
                    self.name
                )))
            }
            _ => {
                return Err(StorageError::validation(format!(
                    "entity {} must declare exactly one id field, found {}",
                    self.name,
                    ids.len()
                )))
            }
        }

        for (i, field) in self.fields.iter().enumerate() {
            validate_identifier(field.name)?;
            if self.fields[..i].iter().any(|other| other.name == field.name) {
                return Err(StorageError::validation(format!(
                    "entity {} declares field {} twice",
                    self.name, field.name
                )));
            }
        }

        Ok(())
    }

    /// Table name for this entity.
    #[must_use]
    pub fn table_name(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Names end up unquoted-safe in SQL: ASCII letters, digits and underscores.
fn validate_identifier(name: &str) -> StorageResult<()> {
    let valid = !name.is_empty()
        && name.len() <= ENTITY_NAME_BYTES_MAX
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(StorageError::validation(format!(
            "invalid identifier {name:?}: use 1..={ENTITY_NAME_BYTES_MAX} ASCII letters, digits or '_'"
        )))
    }
}

// =============================================================================
// Field Values
// =============================================================================

/// A single field value moving between an entity and the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// 64-bit integer
    BigInt(i64),
    /// Byte payload (cheap to clone)
    Bytea(Bytes),
    /// Text
    Text(String),
}

impl FieldValue {
    /// Kind of this value.
    #[must_use]
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::BigInt(_) => FieldKind::BigInt,
            Self::Bytea(_) => FieldKind::Bytea,
            Self::Text(_) => FieldKind::Text,
        }
    }
}

/// Named field values, in field retriever order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldValues {
    values: Vec<(&'static str, FieldValue)>,
}

impl FieldValues {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value.
    pub fn push(&mut self, name: &'static str, value: FieldValue) {
        self.values.push((name, value));
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no values are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.values.iter().map(|(name, value)| (*name, value))
    }

    /// Remove and return the value for a field.
    ///
    /// # Errors
    /// Returns `StorageError::Validation` if the field is missing.
    pub fn take(&mut self, name: &str) -> StorageResult<FieldValue> {
        let index = self
            .values
            .iter()
            .position(|(n, _)| *n == name)
            .ok_or_else(|| StorageError::validation(format!("missing field {name}")))?;
        Ok(self.values.swap_remove(index).1)
    }

    /// Remove and return an integer field.
    ///
    /// # Errors
    /// Returns `StorageError::Validation` if the field is missing or not an integer.
    pub fn take_big_int(&mut self, name: &str) -> StorageResult<i64> {
        match self.take(name)? {
            FieldValue::BigInt(value) => Ok(value),
            other => Err(StorageError::validation(format!(
                "field {name} is {:?}, expected BigInt",
                other.kind()
            ))),
        }
    }

    /// Remove and return a byte field.
    ///
    /// # Errors
    /// Returns `StorageError::Validation` if the field is missing or not bytes.
    pub fn take_bytea(&mut self, name: &str) -> StorageResult<Bytes> {
        match self.take(name)? {
            FieldValue::Bytea(value) => Ok(value),
            other => Err(StorageError::validation(format!(
                "field {name} is {:?}, expected Bytea",
                other.kind()
            ))),
        }
    }
}

// =============================================================================
// Entity Trait
// =============================================================================

/// A record type the storage can persist.
pub trait Entity: Send + Sync + Sized + 'static {
    /// Static type metadata.
    fn descriptor() -> &'static EntityDescriptor;

    /// Identifier, if assigned.
    fn id(&self) -> Option<i64>;

    /// Assign the identifier.
    fn set_id(&mut self, id: i64);

    /// Current value of a declared field.
    fn field_value(&self, field: &str) -> Option<FieldValue>;

    /// Rebuild an entity from persisted values.
    ///
    /// # Errors
    /// Returns `StorageError::Validation` if values are missing or mistyped.
    fn from_fields(fields: FieldValues) -> StorageResult<Self>;
}

// =============================================================================
// LargeBinaryEntity
// =============================================================================

const LARGE_BINARY_ENTITY_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::id("id"),
    FieldDescriptor::column("data", FieldKind::Bytea),
];

static LARGE_BINARY_ENTITY: EntityDescriptor = EntityDescriptor {
    name: "LargeBinaryEntity",
    fields: LARGE_BINARY_ENTITY_FIELDS,
};

/// An entity holding one opaque binary payload.
///
/// TigerStyle: Payload is `Bytes` so handing it to storage never copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargeBinaryEntity {
    id: Option<i64>,
    data: Bytes,
}

impl LargeBinaryEntity {
    /// Wrap a payload; the identifier is assigned later.
    ///
    /// # Panics
    /// Panics if the payload exceeds `ENTITY_PAYLOAD_BYTES_MAX`.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        // Precondition
        assert!(
            data.len() <= ENTITY_PAYLOAD_BYTES_MAX,
            "payload {} bytes exceeds max {}",
            data.len(),
            ENTITY_PAYLOAD_BYTES_MAX
        );

        Self { id: None, data }
    }

    /// The payload.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.data.len()
    }
}

impl Entity for LargeBinaryEntity {
    fn descriptor() -> &'static EntityDescriptor {
        &LARGE_BINARY_ENTITY
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn field_value(&self, field: &str) -> Option<FieldValue> {
        match field {
            "id" => self.id.map(FieldValue::BigInt),
            "data" => Some(FieldValue::Bytea(self.data.clone())),
            _ => None,
        }
    }

    fn from_fields(mut fields: FieldValues) -> StorageResult<Self> {
        let id = fields.take_big_int("id")?;
        let data = fields.take_bytea("data")?;
        Ok(Self { id: Some(id), data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_large_binary_descriptor_is_valid() {
        let descriptor = LargeBinaryEntity::descriptor();
        assert!(descriptor.validate().is_ok());
        assert_eq!(descriptor.table_name(), "largebinaryentity");
    }

    #[test]
    fn test_new_entity_has_no_id() {
        let entity = LargeBinaryEntity::new(vec![1u8, 2, 3]);
        assert_eq!(entity.id(), None);
        assert_eq!(entity.payload_len(), 3);
        assert!(entity.field_value("id").is_none());
    }

    #[test]
    fn test_zero_length_payload() {
        let mut entity = LargeBinaryEntity::new(Vec::new());
        entity.set_id(9);
        assert_eq!(entity.payload_len(), 0);
        assert_eq!(entity.field_value("data"), Some(FieldValue::Bytea(Bytes::new())));
    }

    #[test]
    fn test_from_fields() {
        let mut fields = FieldValues::new();
        fields.push("id", FieldValue::BigInt(7));
        fields.push("data", FieldValue::Bytea(Bytes::from_static(b"abc")));

        let entity = LargeBinaryEntity::from_fields(fields).unwrap();
        assert_eq!(entity.id(), Some(7));
        assert_eq!(entity.data().as_ref(), b"abc");
    }

    #[test]
    fn test_from_fields_wrong_kind() {
        let mut fields = FieldValues::new();
        fields.push("id", FieldValue::Text("seven".to_string()));
        fields.push("data", FieldValue::Bytea(Bytes::new()));

        let result = LargeBinaryEntity::from_fields(fields);
        assert!(matches!(result, Err(StorageError::Validation { .. })));
    }

    #[test]
    fn test_descriptor_without_id_rejected() {
        static NO_ID: EntityDescriptor = EntityDescriptor {
            name: "NoId",
            fields: &[FieldDescriptor::column("data", FieldKind::Bytea)],
        };
        assert!(NO_ID.validate().is_err());
    }

    #[test]
    fn test_descriptor_bad_identifier_rejected() {
        static BAD: EntityDescriptor = EntityDescriptor {
            name: "Robert'); DROP TABLE",
            fields: &[FieldDescriptor::id("id")],
        };
        assert!(BAD.validate().is_err());
    }

    #[test]
    fn test_descriptor_duplicate_field_rejected() {
        static DUP: EntityDescriptor = EntityDescriptor {
            name: "Dup",
            fields: &[
                FieldDescriptor::id("id"),
                FieldDescriptor::column("data", FieldKind::Bytea),
                FieldDescriptor::column("data", FieldKind::Text),
            ],
        };
        assert!(DUP.validate().is_err());
    }
}
