use crate::entity::Entity;
use chrono::{DateTime, Utc};
use cirrus_types::{Acl, FileRef, GeoPoint, Number, RelationRef};
use std::collections::BTreeMap;

/// An attribute value of an entity.
///
/// Equality is deep. Entities compare by class name and identifier when both
/// sides have been saved, and by instance identity otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer or floating point number.
    Number(Number),
    /// UTF-8 string.
    String(String),
    /// Instant in UTC, encoded with millisecond precision.
    Date(DateTime<Utc>),
    /// Raw bytes, base64 on the wire.
    Bytes(Vec<u8>),
    /// Latitude/longitude pair.
    GeoPoint(GeoPoint),
    /// Reference to a remotely hosted file.
    File(FileRef),
    /// Access control list.
    Acl(Acl),
    /// Relation stub naming its target class.
    Relation(RelationRef),
    /// Another entity, encoded as a pointer once saved.
    Entity(Entity),
    /// Ordered list.
    Array(Vec<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Short name of the variant, used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Bytes(_) => "bytes",
            Value::GeoPoint(_) => "geo point",
            Value::File(_) => "file",
            Value::Acl(_) => "acl",
            Value::Relation(_) => "relation",
            Value::Entity(_) => "entity",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// Collects every entity reachable from this value without descending
    /// into the entities themselves.
    pub(crate) fn collect_entities(&self, out: &mut Vec<Entity>) {
        match self {
            Value::Entity(entity) => out.push(entity.clone()),
            Value::Array(items) => items.iter().for_each(|v| v.collect_entities(out)),
            Value::Map(map) => map.values().for_each(|v| v.collect_entities(out)),
            _ => {}
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(Number::Int(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(Number::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(Number::Float(value))
    }
}

impl From<Number> for Value {
    fn from(value: Number) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

impl From<GeoPoint> for Value {
    fn from(value: GeoPoint) -> Self {
        Value::GeoPoint(value)
    }
}

impl From<FileRef> for Value {
    fn from(value: FileRef) -> Self {
        Value::File(value)
    }
}

impl From<Acl> for Value {
    fn from(value: Acl) -> Self {
        Value::Acl(value)
    }
}

impl From<Entity> for Value {
    fn from(value: Entity) -> Self {
        Value::Entity(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::Array(values.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Map(value)
    }
}
