//! Whole-entity encoding: save bodies, server responses and persisted states.

use crate::codec::{self, CodecError, CodecResult, Decoder};
use crate::pending::OperationSet;
use crate::state::{MutableObjectState, ObjectState};
use crate::value::Value;
use chrono::{DateTime, Utc};
use cirrus_types::{format_date, parse_date, JsonMap};

const OBJECT_ID: &str = "objectId";
const CREATED_AT: &str = "createdAt";
const UPDATED_AT: &str = "updatedAt";
const SESSION_TOKEN: &str = "sessionToken";
const CLASS_NAME: &str = "className";
const ACL: &str = "ACL";
const TYPE: &str = "__type";

/// Encodes an operation set as the JSON body of a save request.
pub fn encode_operations(operations: &OperationSet) -> CodecResult<JsonMap> {
    operations
        .iter()
        .map(|(key, operation)| Ok((key.to_string(), operation.encode()?)))
        .collect()
}

fn decode_date(decoder: &Decoder, value: &serde_json::Value) -> CodecResult<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => Ok(parse_date(s)?),
        other => match decoder.decode(other)? {
            Value::Date(date) => Ok(date),
            decoded => Err(CodecError::Malformed {
                type_name: "Date",
                reason: format!("expected a date, got {}", decoded.type_name()),
            }),
        },
    }
}

/// Decodes a server response or persisted state for `class_name`.
///
/// Identity, timestamps, session token and ACL are lifted out of the
/// attribute map; `__type` is dropped; a missing `updatedAt` falls back to
/// `createdAt`. A `className` field overrides `class_name`.
pub fn decode_state(map: &JsonMap, class_name: &str, decoder: &Decoder) -> CodecResult<ObjectState> {
    let mut state = MutableObjectState {
        class_name: class_name.to_string(),
        ..Default::default()
    };

    for (key, value) in map {
        match key.as_str() {
            OBJECT_ID => state.object_id = value.as_str().map(str::to_string),
            CREATED_AT => state.created_at = Some(decode_date(decoder, value)?),
            UPDATED_AT => state.updated_at = Some(decode_date(decoder, value)?),
            SESSION_TOKEN => state.session_token = value.as_str().map(str::to_string),
            CLASS_NAME => {
                if let Some(name) = value.as_str() {
                    state.class_name = name.to_string();
                }
            }
            TYPE => {}
            ACL => {
                state
                    .server_data
                    .insert(ACL.to_string(), Value::Acl(decoder.decode_acl(value)?));
            }
            _ => {
                state.server_data.insert(key.clone(), decoder.decode(value)?);
            }
        }
    }

    if state.updated_at.is_none() {
        state.updated_at = state.created_at;
    }
    Ok(state.into())
}

/// Encodes a state in the form [`decode_state`] reads back.
pub fn encode_state(state: &ObjectState) -> CodecResult<JsonMap> {
    let mut map = codec::encode_map(state.server_data())?;
    map.insert(CLASS_NAME.into(), state.class_name().into());
    if let Some(id) = state.object_id() {
        map.insert(OBJECT_ID.into(), id.into());
    }
    if let Some(created_at) = state.created_at() {
        map.insert(CREATED_AT.into(), format_date(&created_at).into());
    }
    if let Some(updated_at) = state.updated_at() {
        map.insert(UPDATED_AT.into(), format_date(&updated_at).into());
    }
    if let Some(token) = state.session_token() {
        map.insert(SESSION_TOKEN.into(), token.into());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::FieldOperation;
    use crate::registry::SubclassRegistry;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn decoder() -> Decoder {
        Decoder::new(Arc::new(SubclassRegistry::new()))
    }

    #[test]
    fn updated_at_falls_back_to_created_at() {
        let wire = json!({
            "objectId": "abc",
            "createdAt": "2020-05-06T07:08:09.100Z",
            "__type": "Object",
            "title": "hello",
        });
        let state = decode_state(wire.as_object().unwrap(), "Note", &decoder()).unwrap();
        assert_eq!(state.object_id(), Some("abc"));
        assert_eq!(state.updated_at(), state.created_at());
        assert!(state.created_at().is_some());
        assert_eq!(state.get("title"), Some(&Value::from("hello")));
        assert_eq!(state.get("__type"), None);
        assert_eq!(state.server_data().len(), 1);
    }

    #[test]
    fn error_fields_are_kept_as_attributes() {
        let wire = json!({ "code": 101, "error": "not found" });
        let state = decode_state(wire.as_object().unwrap(), "Note", &decoder()).unwrap();
        assert_eq!(state.get("code"), Some(&Value::from(101)));
    }

    #[test]
    fn persisted_state_reads_back() {
        let wire = json!({
            "objectId": "u1",
            "createdAt": "2020-05-06T07:08:09.100Z",
            "updatedAt": "2020-05-07T07:08:09.100Z",
            "sessionToken": "r:abc",
            "ACL": { "u1": { "read": true, "write": true } },
            "username": "ada",
        });
        let d = decoder();
        let state = decode_state(wire.as_object().unwrap(), "_User", &d).unwrap();
        let encoded = encode_state(&state).unwrap();
        let again = decode_state(&encoded, "ignored", &d).unwrap();
        assert_eq!(again, state);
        assert_eq!(again.class_name(), "_User");
        assert_eq!(again.session_token(), Some("r:abc"));
    }

    #[test]
    fn operations_encode_per_key() {
        let mut ops = OperationSet::new();
        ops.insert("score", FieldOperation::increment(2));
        ops.insert("title", FieldOperation::set("x"));
        ops.insert("old", FieldOperation::Delete);
        let body = encode_operations(&ops).unwrap();
        assert_eq!(
            serde_json::Value::Object(body),
            json!({
                "score": { "__op": "Increment", "amount": 2 },
                "title": "x",
                "old": { "__op": "Delete" },
            })
        );
    }
}
