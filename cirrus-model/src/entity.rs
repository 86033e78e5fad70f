//! The in-memory entity.
//!
//! An [`Entity`] is a shared handle: clones refer to the same object. It owns
//! the last server-confirmed [`ObjectState`] and a queue of operation sets:
//! snapshots taken by in-flight saves first, the current set of unsaved
//! changes last. The estimated data visible through [`Entity::get`] is the
//! server data with every queued set applied in order.
//!
//! All data lives behind one private mutex. The object id is mirrored in a
//! separate identity lock so that entity equality can be evaluated while
//! another entity's data lock is held.

use crate::ops::{FieldOperation, OperationResult};
use crate::pending::OperationSet;
use crate::registry::{EntitySubclass, SubclassInfo};
use crate::state::ObjectState;
use crate::value::Value;
use chrono::{DateTime, Utc};
use cirrus_types::{Acl, Number};
use std::any::TypeId;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

const ACL_KEY: &str = "ACL";

/// Operations captured by [`Entity::start_save`].
#[derive(Debug, Clone, PartialEq)]
pub struct SaveSnapshot {
    pub token: u64,
    pub operations: OperationSet,
}

struct PendingSet {
    token: Option<u64>,
    operations: OperationSet,
}

impl PendingSet {
    fn current() -> Self {
        Self {
            token: None,
            operations: OperationSet::new(),
        }
    }
}

struct EntityData {
    state: ObjectState,
    operation_sets: VecDeque<PendingSet>,
    next_token: u64,
    estimated: BTreeMap<String, Value>,
    data_available: bool,
}

impl EntityData {
    fn current(&mut self) -> &mut OperationSet {
        if self.operation_sets.is_empty() {
            self.operation_sets.push_back(PendingSet::current());
        }
        let last = self.operation_sets.len() - 1;
        &mut self.operation_sets[last].operations
    }

    fn current_ref(&self) -> Option<&OperationSet> {
        self.operation_sets.back().map(|set| &set.operations)
    }

    fn rebuild_estimated(&mut self) {
        let mut estimated = self.state.server_data().clone();
        for set in &self.operation_sets {
            for (key, operation) in set.operations.iter() {
                match operation.apply(estimated.get(key), key) {
                    Ok(Some(value)) => {
                        estimated.insert(key.to_string(), value);
                    }
                    Ok(None) => {
                        estimated.remove(key);
                    }
                    Err(e) => warn!(class = %self.state.class_name(), key, "estimate skipped: {e}"),
                }
            }
        }
        self.estimated = estimated;
    }
}

struct EntityInner {
    instance_id: Uuid,
    class_name: String,
    subclass: Option<Arc<SubclassInfo>>,
    object_id: RwLock<Option<String>>,
    data: Mutex<EntityData>,
}

/// A shared handle to one remote-backed entity.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

impl Entity {
    /// Creates a new, unsaved entity with no registered subclass.
    pub fn new(class_name: impl Into<String>) -> Self {
        let class_name = class_name.into();
        Self::from_parts(None, ObjectState::new(class_name).mutated(|s| s.is_new = true), true)
    }

    pub(crate) fn from_parts(
        subclass: Option<Arc<SubclassInfo>>,
        state: ObjectState,
        data_available: bool,
    ) -> Self {
        let mut data = EntityData {
            state: state.clone(),
            operation_sets: VecDeque::from([PendingSet::current()]),
            next_token: 1,
            estimated: BTreeMap::new(),
            data_available,
        };
        data.rebuild_estimated();
        Self {
            inner: Arc::new(EntityInner {
                instance_id: Uuid::now_v7(),
                class_name: state.class_name().to_string(),
                subclass,
                object_id: RwLock::new(state.object_id().map(str::to_string)),
                data: Mutex::new(data),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EntityData> {
        self.inner.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sync_identity(&self, data: &EntityData) {
        let mut id = self
            .inner
            .object_id
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *id = data.state.object_id().map(str::to_string);
    }

    // ── Identity ─────────────────────────────────────────────────

    /// Process-unique id of this in-memory instance.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.inner.class_name
    }

    #[must_use]
    pub fn object_id(&self) -> Option<String> {
        self.inner
            .object_id
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Points this entity at an existing remote object, or detaches it.
    pub fn set_object_id(&self, object_id: Option<String>) {
        let mut data = self.lock();
        data.state = data.state.mutated(|s| s.object_id = object_id);
        self.sync_identity(&data);
    }

    /// Returns `true` when both handles refer to the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns `true` when both refer to the same remote object, or, for
    /// unsaved entities, to the same instance.
    #[must_use]
    pub fn same_reference(&self, other: &Entity) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self.object_id(), other.object_id()) {
            (Some(a), Some(b)) => a == b && self.class_name() == other.class_name(),
            _ => false,
        }
    }

    // ── Subclassing ──────────────────────────────────────────────

    /// Subclass this entity was instantiated as, if any.
    #[must_use]
    pub fn subclass(&self) -> Option<&SubclassInfo> {
        self.inner.subclass.as_deref()
    }

    /// Returns `true` when the entity was instantiated as `T` or a subclass of `T`.
    #[must_use]
    pub fn is<T: EntitySubclass>(&self) -> bool {
        self.inner
            .subclass
            .as_ref()
            .is_some_and(|info| info.is_a(TypeId::of::<T>()))
    }

    /// Wraps the entity in its typed form when it is a `T`.
    #[must_use]
    pub fn downcast<T: EntitySubclass>(&self) -> Option<T> {
        self.is::<T>().then(|| T::from_entity(self.clone()))
    }

    // ── State ────────────────────────────────────────────────────

    /// The last server-confirmed snapshot.
    #[must_use]
    pub fn state(&self) -> ObjectState {
        self.lock().state.clone()
    }

    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.lock().state.created_at()
    }

    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.lock().state.updated_at()
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.lock().state.is_new()
    }

    #[must_use]
    pub fn session_token(&self) -> Option<String> {
        self.lock().state.session_token().map(str::to_string)
    }

    /// Returns `false` for pointer stubs whose data has never been fetched.
    #[must_use]
    pub fn is_data_available(&self) -> bool {
        self.lock().data_available
    }

    // ── Reads ────────────────────────────────────────────────────

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().estimated.get(key).cloned()
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.lock().estimated.get(key).and_then(Value::as_str).map(str::to_string)
    }

    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.lock().estimated.get(key).and_then(Value::as_bool)
    }

    #[must_use]
    pub fn get_number(&self, key: &str) -> Option<Number> {
        self.lock().estimated.get(key).and_then(Value::as_number)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().estimated.contains_key(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lock().estimated.keys().cloned().collect()
    }

    /// The estimated attribute map.
    #[must_use]
    pub fn estimated_data(&self) -> BTreeMap<String, Value> {
        self.lock().estimated.clone()
    }

    #[must_use]
    pub fn acl(&self) -> Option<Acl> {
        match self.lock().estimated.get(ACL_KEY) {
            Some(Value::Acl(acl)) => Some(acl.clone()),
            _ => None,
        }
    }

    // ── Mutations ────────────────────────────────────────────────

    /// Applies `operation` to the estimated data and merges it into the
    /// current operation set. Nothing changes when either step fails.
    pub fn perform_operation(&self, key: &str, operation: FieldOperation) -> OperationResult<()> {
        let mut data = self.lock();
        let new_value = operation.apply(data.estimated.get(key), key)?;
        let merged = operation.merge_with_previous(data.current_ref().and_then(|set| set.get(key)))?;
        match new_value {
            Some(value) => {
                data.estimated.insert(key.to_string(), value);
            }
            None => {
                data.estimated.remove(key);
            }
        }
        data.current().insert(key, merged);
        Ok(())
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> OperationResult<()> {
        self.perform_operation(key, FieldOperation::set(value))
    }

    /// Deletes the attribute.
    pub fn remove(&self, key: &str) -> OperationResult<()> {
        self.perform_operation(key, FieldOperation::Delete)
    }

    pub fn increment(&self, key: &str, amount: impl Into<Number>) -> OperationResult<()> {
        self.perform_operation(key, FieldOperation::increment(amount))
    }

    pub fn add(&self, key: &str, values: Vec<Value>) -> OperationResult<()> {
        self.perform_operation(key, FieldOperation::add(values))
    }

    pub fn add_unique(&self, key: &str, values: Vec<Value>) -> OperationResult<()> {
        self.perform_operation(key, FieldOperation::add_unique(values))
    }

    /// Removes every occurrence of `values` from the list attribute.
    pub fn remove_all(&self, key: &str, values: Vec<Value>) -> OperationResult<()> {
        self.perform_operation(key, FieldOperation::remove(values))
    }

    pub fn add_relation(&self, key: &str, entities: &[Entity]) -> OperationResult<()> {
        self.perform_operation(key, FieldOperation::relation(entities, &[])?)
    }

    pub fn remove_relation(&self, key: &str, entities: &[Entity]) -> OperationResult<()> {
        self.perform_operation(key, FieldOperation::relation(&[], entities)?)
    }

    pub fn set_acl(&self, acl: Acl) -> OperationResult<()> {
        self.set(ACL_KEY, acl)
    }

    // ── Pending operations ───────────────────────────────────────

    /// A copy of the current (not yet snapshotted) operation set.
    #[must_use]
    pub fn current_operations(&self) -> OperationSet {
        self.lock().current_ref().cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn has_pending(&self, key: &str) -> bool {
        self.lock().current_ref().is_some_and(|set| set.contains_key(key))
    }

    /// Discards the current operation set.
    pub fn revert(&self) {
        let mut data = self.lock();
        data.current().clear();
        data.rebuild_estimated();
    }

    /// Returns `true` for never-saved entities, entities with unsaved
    /// operations, and entities with dirty children.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        let mut seen = HashSet::new();
        self.is_dirty_inner(&mut seen)
    }

    fn is_dirty_inner(&self, seen: &mut HashSet<Uuid>) -> bool {
        if !seen.insert(self.instance_id()) {
            return false;
        }
        if self.is_self_dirty() {
            return true;
        }
        self.children().iter().any(|child| child.is_dirty_inner(seen))
    }

    /// Dirty check ignoring children.
    #[must_use]
    pub fn is_self_dirty(&self) -> bool {
        let data = self.lock();
        data.state.object_id().is_none() || data.current_ref().is_some_and(|set| !set.is_empty())
    }

    /// Entities referenced directly from the estimated data.
    #[must_use]
    pub fn children(&self) -> Vec<Entity> {
        let values: Vec<Value> = self.lock().estimated.values().cloned().collect();
        let mut out = Vec::new();
        for value in &values {
            value.collect_entities(&mut out);
        }
        out
    }

    // ── Save / fetch lifecycle ───────────────────────────────────

    /// Snapshots the current operation set and opens a new one.
    ///
    /// Operations performed after this call are kept apart from the
    /// snapshot until the save completes.
    pub fn start_save(&self) -> SaveSnapshot {
        let mut data = self.lock();
        let token = data.next_token;
        data.next_token += 1;
        let operations = data.current().clone();
        if let Some(last) = data.operation_sets.back_mut() {
            last.token = Some(token);
        }
        data.operation_sets.push_back(PendingSet::current());
        debug!(class = %self.class_name(), token, pending = operations.len(), "save started");
        SaveSnapshot { token, operations }
    }

    fn take_snapshot(data: &mut EntityData, token: u64) -> Option<(usize, OperationSet)> {
        let index = data
            .operation_sets
            .iter()
            .position(|set| set.token == Some(token))?;
        data.operation_sets
            .remove(index)
            .map(|set| (index, set.operations))
    }

    /// Completes a successful save: the snapshot is folded into the server
    /// state and `server_state` is merged on top.
    pub fn handle_save(&self, token: u64, server_state: &ObjectState) {
        let mut data = self.lock();
        let operations = match Self::take_snapshot(&mut data, token) {
            Some((_, operations)) => operations,
            None => {
                warn!(class = %self.class_name(), token, "save completed for unknown snapshot");
                OperationSet::new()
            }
        };
        data.state = data
            .state
            .with_operations(&operations)
            .merged_with(server_state);
        data.data_available = true;
        data.rebuild_estimated();
        self.sync_identity(&data);
        debug!(class = %self.class_name(), token, object_id = ?data.state.object_id(), "save applied");
    }

    /// Returns a failed save's snapshot to the pending operations.
    ///
    /// Operations queued after the snapshot are merged on top of it. A key
    /// whose merge is undefined keeps the newer operation.
    pub fn handle_failed_save(&self, token: u64) {
        let mut data = self.lock();
        let Some((index, snapshot)) = Self::take_snapshot(&mut data, token) else {
            warn!(class = %self.class_name(), token, "failed save for unknown snapshot");
            return;
        };
        if index >= data.operation_sets.len() {
            data.operation_sets.push_back(PendingSet::current());
        }
        let next = &mut data.operation_sets[index].operations;
        for (key, previous) in snapshot {
            let merged = match next.get(&key) {
                None => previous,
                Some(newer) => match newer.merge_with_previous(Some(&previous)) {
                    Ok(merged) => merged,
                    Err(e) => {
                        warn!(key = %key, "keeping newer operation over failed save: {e}");
                        continue;
                    }
                },
            };
            next.insert(key, merged);
        }
        data.rebuild_estimated();
        debug!(class = %self.class_name(), token, "failed save re-merged");
    }

    /// Merges a fetched state into the entity.
    pub fn handle_fetch_result(&self, server_state: &ObjectState) {
        let mut data = self.lock();
        data.state = data.state.merged_with(server_state);
        data.data_available = true;
        data.rebuild_estimated();
        self.sync_identity(&data);
    }

    /// Merges server-provided data without touching pending operations.
    pub fn merge_from_server(&self, server_state: &ObjectState) {
        let mut data = self.lock();
        data.state = data.state.merged_with(server_state);
        data.rebuild_estimated();
        self.sync_identity(&data);
    }

    /// Drops `key` from the confirmed state. Pending operations on it stay.
    pub fn forget_server_value(&self, key: &str) {
        let mut data = self.lock();
        data.state = data.state.mutated(|s| {
            s.server_data.remove(key);
        });
        data.rebuild_estimated();
    }

    /// Replaces the confirmed state outright and drops every pending set.
    pub fn reset_state(&self, state: ObjectState) {
        let mut data = self.lock();
        data.state = state;
        data.operation_sets = VecDeque::from([PendingSet::current()]);
        data.data_available = true;
        data.rebuild_estimated();
        self.sync_identity(&data);
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.same_reference(other)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("class_name", &self.class_name())
            .field("object_id", &self.object_id())
            .field("instance_id", &self.inner.instance_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_entities_are_dirty() {
        let entity = Entity::new("Note");
        assert!(entity.is_new());
        assert!(entity.is_dirty());
    }

    #[test]
    fn failed_mutation_leaves_entity_unchanged() {
        let entity = Entity::new("Note");
        entity.set("title", "a").unwrap();
        assert!(entity.increment("title", 1).is_err());
        assert_eq!(entity.get("title"), Some(Value::from("a")));
        assert_eq!(
            entity.current_operations().get("title"),
            Some(&FieldOperation::set("a"))
        );
    }

    #[test]
    fn self_reference_does_not_deadlock() {
        let entity = Entity::new("Node");
        entity.set_object_id(Some("n1".into()));
        entity
            .add_unique("links", vec![Value::from(entity.clone())])
            .unwrap();
        entity
            .add_unique("links", vec![Value::from(entity.clone())])
            .unwrap();
        assert_eq!(entity.get("links").unwrap().as_array().unwrap().len(), 1);
        assert!(entity.is_dirty());
    }

    #[test]
    fn saved_entities_compare_by_identifier() {
        let a = Entity::new("Note");
        let b = Entity::new("Note");
        assert_ne!(a, b);
        a.set_object_id(Some("x".into()));
        b.set_object_id(Some("x".into()));
        assert_eq!(a, b);
        let c = Entity::new("Other");
        c.set_object_id(Some("x".into()));
        assert_ne!(a, c);
    }

    #[test]
    fn revert_discards_current_operations() {
        let entity = Entity::new("Note");
        entity.set("title", "a").unwrap();
        entity.revert();
        assert_eq!(entity.get("title"), None);
        assert!(entity.current_operations().is_empty());
    }

    #[test]
    fn forgotten_server_value_keeps_pending_operations() {
        let entity = Entity::new("_User");
        let snapshot = entity.start_save();
        entity.set("password", "secret").unwrap();
        entity.handle_save(
            snapshot.token,
            &ObjectState::new("_User").mutated(|s| {
                s.object_id = Some("u1".into());
                s.server_data.insert("password".into(), Value::from("old"));
            }),
        );

        entity.forget_server_value("password");
        assert_eq!(entity.get("password"), Some(Value::from("secret")));
        assert!(!entity.state().server_data().contains_key("password"));
    }
}
