//! Relation stubs.

use crate::json::JsonConvertible;
use serde::{Deserialize, Serialize};

/// The client-side view of a relation attribute.
///
/// Relations are never materialized locally; the stub only remembers which
/// class the related entities belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationRef {
    pub target_class: Option<String>,
}

impl RelationRef {
    pub fn new(target_class: impl Into<String>) -> Self {
        Self {
            target_class: Some(target_class.into()),
        }
    }
}

impl JsonConvertible for RelationRef {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "__type": "Relation",
            "className": self.target_class,
        })
    }
}
