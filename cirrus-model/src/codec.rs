//! Tagged wire encoding of attribute values.
//!
//! Values that JSON cannot carry natively travel as maps with a `__type`
//! discriminator:
//!
//! | type | wire form |
//! |---|---|
//! | date | `{"__type": "Date", "iso": "2015-03-01T10:20:30.123Z"}` |
//! | bytes | `{"__type": "Bytes", "base64": "..."}` |
//! | entity | `{"__type": "Pointer", "className": "...", "objectId": "..."}` |
//! | file | `{"__type": "File", "name": "...", "url": "..."}` |
//! | geo point | `{"__type": "GeoPoint", "latitude": 0.0, "longitude": 0.0}` |
//! | relation | `{"__type": "Relation", "className": "..."}` |
//!
//! The decoder also understands full `Object` values and, through
//! [`Decoder::decode_pending`], the `__op` encoding of field operations.

use crate::coder;
use crate::ops::{FieldOperation, OperationError};
use crate::registry::SubclassRegistry;
use crate::value::Value;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cirrus_types::{
    format_date, parse_date, Acl, FileRef, GeoPoint, JsonConvertible, JsonMap, Number,
    RelationRef, TypesError,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result type alias for codec errors.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Errors raised while encoding or decoding wire values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("cannot encode a reference to an unsaved {class_name}")]
    UnsavedEntity { class_name: String },

    #[error("cannot encode a non-finite number")]
    NonFiniteNumber,

    #[error("malformed {type_name}: {reason}")]
    Malformed {
        type_name: &'static str,
        reason: String,
    },

    #[error("unexpected field operation {0} in a value position")]
    UnexpectedOperation(String),

    #[error("unknown field operation {0}")]
    UnknownOperation(String),

    #[error(transparent)]
    InvalidOperation(#[from] OperationError),

    #[error(transparent)]
    Types(#[from] TypesError),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

fn malformed(type_name: &'static str, reason: impl Into<String>) -> CodecError {
    CodecError::Malformed {
        type_name,
        reason: reason.into(),
    }
}

/// Encodes a value, writing entities as pointers.
pub fn encode(value: &Value) -> CodecResult<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => n.to_json().ok_or(CodecError::NonFiniteNumber)?.into(),
        Value::String(s) => s.clone().into(),
        Value::Date(date) => json!({ "__type": "Date", "iso": format_date(date) }),
        Value::Bytes(bytes) => json!({ "__type": "Bytes", "base64": STANDARD.encode(bytes) }),
        Value::GeoPoint(point) => point.to_json(),
        Value::File(file) => file.to_json(),
        Value::Acl(acl) => acl.to_json(),
        Value::Relation(relation) => relation.to_json(),
        Value::Entity(entity) => {
            let object_id = entity.object_id().ok_or_else(|| CodecError::UnsavedEntity {
                class_name: entity.class_name().to_string(),
            })?;
            json!({
                "__type": "Pointer",
                "className": entity.class_name(),
                "objectId": object_id,
            })
        }
        Value::Array(items) => items
            .iter()
            .map(encode)
            .collect::<CodecResult<Vec<_>>>()?
            .into(),
        Value::Map(map) => encode_map(map)?.into(),
    })
}

/// Encodes every entry of an attribute map.
pub fn encode_map(map: &BTreeMap<String, Value>) -> CodecResult<JsonMap> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), encode(value)?)))
        .collect()
}

fn str_field<'a>(map: &'a JsonMap, key: &str, type_name: &'static str) -> CodecResult<&'a str> {
    map.get(key)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| malformed(type_name, format!("missing string field {key}")))
}

fn f64_field(map: &JsonMap, key: &str, type_name: &'static str) -> CodecResult<f64> {
    map.get(key)
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| malformed(type_name, format!("missing numeric field {key}")))
}

/// Decodes wire values, instantiating entities through a subclass registry.
#[derive(Debug, Clone)]
pub struct Decoder {
    registry: Arc<SubclassRegistry>,
}

impl Decoder {
    pub fn new(registry: Arc<SubclassRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SubclassRegistry> {
        &self.registry
    }

    /// Decodes a wire value.
    ///
    /// Maps carrying `__op` are rejected here; pending operations go through
    /// [`Decoder::decode_pending`]. Unknown `__type` tags decode as plain maps.
    pub fn decode(&self, json: &serde_json::Value) -> CodecResult<Value> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => Ok(Value::Number(Number::from_json(n))),
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| self.decode(item))
                .collect::<CodecResult<Vec<_>>>()
                .map(Value::Array),
            serde_json::Value::Object(map) => self.decode_object(map),
        }
    }

    fn decode_object(&self, map: &JsonMap) -> CodecResult<Value> {
        if let Some(op) = map.get("__op") {
            return Err(CodecError::UnexpectedOperation(
                op.as_str().unwrap_or_default().to_string(),
            ));
        }
        let Some(type_name) = map.get("__type").and_then(serde_json::Value::as_str) else {
            return self.decode_map(map).map(Value::Map);
        };

        match type_name {
            "Date" => Ok(Value::Date(parse_date(str_field(map, "iso", "Date")?)?)),
            "Bytes" => Ok(Value::Bytes(
                STANDARD.decode(str_field(map, "base64", "Bytes")?)?,
            )),
            "Pointer" => {
                let class_name = str_field(map, "className", "Pointer")?;
                let object_id = str_field(map, "objectId", "Pointer")?;
                Ok(Value::Entity(
                    self.registry.create_without_data(class_name, object_id),
                ))
            }
            "File" => Ok(Value::File(FileRef::new(
                str_field(map, "name", "File")?,
                str_field(map, "url", "File")?,
            ))),
            "GeoPoint" => Ok(Value::GeoPoint(GeoPoint::new(
                f64_field(map, "latitude", "GeoPoint")?,
                f64_field(map, "longitude", "GeoPoint")?,
            )?)),
            "Object" => {
                let class_name = str_field(map, "className", "Object")?;
                let state = coder::decode_state(map, class_name, self)?;
                Ok(Value::Entity(self.registry.from_state(state)))
            }
            "Relation" => Ok(Value::Relation(RelationRef {
                target_class: map
                    .get("className")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
            })),
            _ => self.decode_map(map).map(Value::Map),
        }
    }

    /// Decodes every entry of a JSON object.
    pub fn decode_map(&self, map: &JsonMap) -> CodecResult<BTreeMap<String, Value>> {
        map.iter()
            .map(|(key, value)| Ok((key.clone(), self.decode(value)?)))
            .collect()
    }

    /// Decodes an ACL map.
    pub fn decode_acl(&self, json: &serde_json::Value) -> CodecResult<Acl> {
        let map = json
            .as_object()
            .ok_or_else(|| malformed("ACL", "not an object"))?;
        Ok(Acl::from_json(map)?)
    }

    /// Decodes one locally serialized pending entry.
    ///
    /// `__op` maps become their field operation; anything else becomes a
    /// `Set` of the decoded value.
    pub fn decode_pending(&self, json: &serde_json::Value) -> CodecResult<FieldOperation> {
        match json.as_object() {
            Some(map) if map.contains_key("__op") => self.decode_operation(map),
            _ => Ok(FieldOperation::Set(self.decode(json)?)),
        }
    }

    fn decode_values(&self, map: &JsonMap, op: &'static str) -> CodecResult<Vec<Value>> {
        map.get("objects")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| malformed(op, "missing objects"))?
            .iter()
            .map(|item| self.decode(item))
            .collect()
    }

    fn decode_entities(&self, map: &JsonMap, op: &'static str) -> CodecResult<Vec<crate::Entity>> {
        self.decode_values(map, op)?
            .into_iter()
            .map(|value| match value {
                Value::Entity(entity) => Ok(entity),
                other => Err(malformed(op, format!("expected pointer, got {}", other.type_name()))),
            })
            .collect()
    }

    /// Decodes an `__op` map into a field operation.
    pub fn decode_operation(&self, map: &JsonMap) -> CodecResult<FieldOperation> {
        let op = map
            .get("__op")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        match op {
            "Delete" => Ok(FieldOperation::Delete),
            "Increment" => {
                match map.get("amount") {
                    Some(serde_json::Value::Number(amount)) => {
                        Ok(FieldOperation::Increment(Number::from_json(amount)))
                    }
                    _ => Err(malformed("Increment", "missing amount")),
                }
            }
            "Add" => Ok(FieldOperation::add(self.decode_values(map, "Add")?)),
            "AddUnique" => Ok(FieldOperation::add_unique(
                self.decode_values(map, "AddUnique")?,
            )),
            "Remove" => Ok(FieldOperation::remove(self.decode_values(map, "Remove")?)),
            "AddRelation" => Ok(FieldOperation::relation(
                &self.decode_entities(map, "AddRelation")?,
                &[],
            )?),
            "RemoveRelation" => Ok(FieldOperation::relation(
                &[],
                &self.decode_entities(map, "RemoveRelation")?,
            )?),
            "Batch" => {
                let ops = map
                    .get("ops")
                    .and_then(serde_json::Value::as_array)
                    .ok_or_else(|| malformed("Batch", "missing ops"))?;
                let mut merged: Option<FieldOperation> = None;
                for item in ops {
                    let item = item
                        .as_object()
                        .ok_or_else(|| malformed("Batch", "operation is not an object"))?;
                    let next = self.decode_operation(item)?;
                    merged = Some(next.merge_with_previous(merged.as_ref())?);
                }
                merged.ok_or_else(|| malformed("Batch", "no operations"))
            }
            other => Err(CodecError::UnknownOperation(other.to_string())),
        }
    }
}
