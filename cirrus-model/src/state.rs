//! Server-confirmed entity snapshots.

use crate::pending::OperationSet;
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// The editable form of an [`ObjectState`], used to build modified copies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutableObjectState {
    pub object_id: Option<String>,
    pub class_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub server_data: BTreeMap<String, Value>,
    pub is_new: bool,
    pub session_token: Option<String>,
}

impl MutableObjectState {
    /// Applies every operation of `operations` to the server data.
    ///
    /// An operation that cannot be applied is skipped with a warning; the
    /// remote store is the authority once a save has been acknowledged.
    pub fn apply(&mut self, operations: &OperationSet) {
        for (key, operation) in operations.iter() {
            match operation.apply(self.server_data.get(key), key) {
                Ok(Some(value)) => {
                    self.server_data.insert(key.to_string(), value);
                }
                Ok(None) => {
                    self.server_data.remove(key);
                }
                Err(e) => warn!(class = %self.class_name, key, "skipping operation: {e}"),
            }
        }
    }
}

/// An immutable snapshot of an entity as last confirmed by the server.
///
/// Cloning is cheap. Changes produce a new snapshot through [`ObjectState::mutated`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectState {
    inner: Arc<MutableObjectState>,
}

impl ObjectState {
    /// An empty state for a new entity of `class_name`.
    pub fn new(class_name: impl Into<String>) -> Self {
        MutableObjectState {
            class_name: class_name.into(),
            ..Default::default()
        }
        .into()
    }

    #[must_use]
    pub fn object_id(&self) -> Option<&str> {
        self.inner.object_id.as_deref()
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.inner.class_name
    }

    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.inner.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.inner.updated_at
    }

    #[must_use]
    pub fn server_data(&self) -> &BTreeMap<String, Value> {
        &self.inner.server_data
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.server_data.get(key)
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.inner.is_new
    }

    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.inner.session_token.as_deref()
    }

    /// Returns an editable copy of the snapshot.
    #[must_use]
    pub fn to_mutable(&self) -> MutableObjectState {
        (*self.inner).clone()
    }

    /// Returns a copy with `f` applied.
    #[must_use]
    pub fn mutated(&self, f: impl FnOnce(&mut MutableObjectState)) -> ObjectState {
        let mut state = self.to_mutable();
        f(&mut state);
        state.into()
    }

    /// Returns a copy with `operations` applied to the server data.
    #[must_use]
    pub fn with_operations(&self, operations: &OperationSet) -> ObjectState {
        if operations.is_empty() {
            return self.clone();
        }
        self.mutated(|s| s.apply(operations))
    }

    /// Overlays `other` onto this snapshot.
    ///
    /// Identity, timestamps and session token are taken from `other` when it
    /// carries them; server data keys present in `other` overwrite ours;
    /// `is_new` always follows `other`.
    #[must_use]
    pub fn merged_with(&self, other: &ObjectState) -> ObjectState {
        self.mutated(|s| {
            if let Some(id) = other.object_id() {
                s.object_id = Some(id.to_string());
            }
            if let Some(created_at) = other.created_at() {
                s.created_at = Some(created_at);
            }
            if let Some(updated_at) = other.updated_at() {
                s.updated_at = Some(updated_at);
            }
            if let Some(token) = other.session_token() {
                s.session_token = Some(token.to_string());
            }
            for (key, value) in other.server_data() {
                s.server_data.insert(key.clone(), value.clone());
            }
            s.is_new = other.is_new();
        })
    }
}

impl From<MutableObjectState> for ObjectState {
    fn from(state: MutableObjectState) -> Self {
        Self {
            inner: Arc::new(state),
        }
    }
}
