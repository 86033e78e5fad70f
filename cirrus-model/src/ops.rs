//! Field operations and their merge algebra.
//!
//! A [`FieldOperation`] describes one pending mutation of a single attribute.
//! Each operation knows how to apply itself to the last known value of the
//! attribute, how to merge itself with the operation that previously
//! occupied the same key, and how to encode itself for the wire.

use crate::codec::{self, CodecResult};
use crate::entity::Entity;
use crate::value::Value;
use cirrus_types::{Number, RelationRef, TypesError};
use serde_json::json;

/// Result type alias for operation errors.
pub type OperationResult<T> = std::result::Result<T, OperationError>;

/// Errors raised while applying or merging field operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationError {
    #[error("{operation} cannot follow {previous}")]
    InvalidSequence {
        operation: &'static str,
        previous: &'static str,
    },

    #[error("attribute {key} is not a number")]
    NotNumeric { key: String },

    #[error("attribute {key} is not a list")]
    NotAList { key: String },

    #[error("attribute {key} is not a relation")]
    NotARelation { key: String },

    #[error("relation targets {expected} but got {actual}")]
    RelationClassMismatch { expected: String, actual: String },

    #[error("cannot relate to an unsaved {class_name}")]
    UnsavedRelationTarget { class_name: String },

    #[error(transparent)]
    Numeric(#[from] TypesError),
}

/// Relation changes: identifiers of saved entities of one target class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationOperation {
    pub target_class: Option<String>,
    pub adds: Vec<String>,
    pub removes: Vec<String>,
}

impl RelationOperation {
    fn merge(&self, previous: &RelationOperation) -> OperationResult<RelationOperation> {
        let target_class = match (&self.target_class, &previous.target_class) {
            (Some(mine), Some(theirs)) if mine != theirs => {
                return Err(OperationError::RelationClassMismatch {
                    expected: theirs.clone(),
                    actual: mine.clone(),
                });
            }
            (mine, theirs) => mine.clone().or_else(|| theirs.clone()),
        };

        let mut adds = self.adds.clone();
        for id in &previous.adds {
            if !self.removes.contains(id) && !adds.contains(id) {
                adds.push(id.clone());
            }
        }
        let mut removes = self.removes.clone();
        for id in &previous.removes {
            if !self.adds.contains(id) && !removes.contains(id) {
                removes.push(id.clone());
            }
        }
        Ok(RelationOperation {
            target_class,
            adds,
            removes,
        })
    }

    fn pointers(&self, ids: &[String]) -> serde_json::Value {
        ids.iter()
            .map(|id| {
                json!({
                    "__type": "Pointer",
                    "className": self.target_class,
                    "objectId": id,
                })
            })
            .collect()
    }

    fn encode(&self) -> serde_json::Value {
        let adds = (!self.adds.is_empty())
            .then(|| json!({ "__op": "AddRelation", "objects": self.pointers(&self.adds) }));
        let removes = (!self.removes.is_empty())
            .then(|| json!({ "__op": "RemoveRelation", "objects": self.pointers(&self.removes) }));
        match (adds, removes) {
            (Some(add), Some(remove)) => json!({ "__op": "Batch", "ops": [add, remove] }),
            (Some(add), None) => add,
            (None, Some(remove)) => remove,
            (None, None) => serde_json::Value::Null,
        }
    }
}

/// A pending mutation of a single attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOperation {
    /// Replace the value.
    Set(Value),
    /// Remove the attribute.
    Delete,
    /// Add to a numeric value, treating a missing value as zero.
    Increment(Number),
    /// Append to an array.
    Add(Vec<Value>),
    /// Append the values not already present in an array.
    AddUnique(Vec<Value>),
    /// Drop every occurrence of the values from an array.
    Remove(Vec<Value>),
    /// Add or remove members of a relation.
    Relation(RelationOperation),
}

fn distinct(values: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(values.len());
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

fn relation_ids(
    entities: &[Entity],
    target_class: &mut Option<String>,
) -> OperationResult<Vec<String>> {
    let mut ids = Vec::with_capacity(entities.len());
    for entity in entities {
        let class_name = entity.class_name().to_string();
        match target_class.as_deref() {
            Some(expected) if expected != class_name => {
                return Err(OperationError::RelationClassMismatch {
                    expected: expected.to_string(),
                    actual: class_name,
                });
            }
            Some(_) => {}
            None => *target_class = Some(class_name.clone()),
        }
        let id = entity
            .object_id()
            .ok_or(OperationError::UnsavedRelationTarget { class_name })?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

impl FieldOperation {
    pub fn set(value: impl Into<Value>) -> Self {
        FieldOperation::Set(value.into())
    }

    pub fn increment(amount: impl Into<Number>) -> Self {
        FieldOperation::Increment(amount.into())
    }

    pub fn add(values: Vec<Value>) -> Self {
        FieldOperation::Add(values)
    }

    /// Builds an `AddUnique`, dropping duplicates from the payload.
    pub fn add_unique(values: Vec<Value>) -> Self {
        FieldOperation::AddUnique(distinct(values))
    }

    /// Builds a `Remove`, dropping duplicates from the payload.
    pub fn remove(values: Vec<Value>) -> Self {
        FieldOperation::Remove(distinct(values))
    }

    /// Builds a relation change. Every entity must be saved and share a class.
    pub fn relation(adds: &[Entity], removes: &[Entity]) -> OperationResult<Self> {
        let mut target_class = None;
        let adds = relation_ids(adds, &mut target_class)?;
        let removes = relation_ids(removes, &mut target_class)?;
        Ok(FieldOperation::Relation(RelationOperation {
            target_class,
            adds,
            removes,
        }))
    }

    /// Wire name of the operation.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            FieldOperation::Set(_) => "Set",
            FieldOperation::Delete => "Delete",
            FieldOperation::Increment(_) => "Increment",
            FieldOperation::Add(_) => "Add",
            FieldOperation::AddUnique(_) => "AddUnique",
            FieldOperation::Remove(_) => "Remove",
            FieldOperation::Relation(_) => "Relation",
        }
    }

    /// Encodes the operation into its wire form.
    pub fn encode(&self) -> CodecResult<serde_json::Value> {
        let encode_all = |values: &[Value]| -> CodecResult<serde_json::Value> {
            values.iter().map(codec::encode).collect::<CodecResult<Vec<_>>>().map(Into::into)
        };
        Ok(match self {
            FieldOperation::Set(value) => codec::encode(value)?,
            FieldOperation::Delete => json!({ "__op": "Delete" }),
            FieldOperation::Increment(amount) => {
                let amount = amount.to_json().ok_or(codec::CodecError::NonFiniteNumber)?;
                json!({ "__op": "Increment", "amount": amount })
            }
            FieldOperation::Add(values) => json!({ "__op": "Add", "objects": encode_all(values)? }),
            FieldOperation::AddUnique(values) => {
                json!({ "__op": "AddUnique", "objects": encode_all(values)? })
            }
            FieldOperation::Remove(values) => {
                json!({ "__op": "Remove", "objects": encode_all(values)? })
            }
            FieldOperation::Relation(relation) => relation.encode(),
        })
    }

    /// Applies the operation to the previously known value of `key`.
    ///
    /// Returns `None` when the attribute ends up deleted. A `Null` previous
    /// value is treated as absent by the numeric and list operations.
    pub fn apply(&self, old: Option<&Value>, key: &str) -> OperationResult<Option<Value>> {
        let old = old.filter(|v| !v.is_null());
        match self {
            FieldOperation::Set(value) => Ok(Some(value.clone())),
            FieldOperation::Delete => Ok(None),
            FieldOperation::Increment(amount) => match old {
                None => Ok(Some(Value::Number(*amount))),
                Some(Value::Number(n)) => Ok(Some(Value::Number(n.checked_add(*amount)?))),
                Some(_) => Err(OperationError::NotNumeric { key: key.into() }),
            },
            FieldOperation::Add(values) => {
                let mut list = list_of(old, key)?;
                list.extend(values.iter().cloned());
                Ok(Some(Value::Array(list)))
            }
            FieldOperation::AddUnique(values) => {
                let mut list = list_of(old, key)?;
                for value in values {
                    match list.iter().position(|existing| existing == value) {
                        Some(index) if matches!(value, Value::Entity(_)) => {
                            list[index] = value.clone();
                        }
                        Some(_) => {}
                        None => list.push(value.clone()),
                    }
                }
                Ok(Some(Value::Array(list)))
            }
            FieldOperation::Remove(values) => {
                let list = list_of(old, key)?;
                let mut remaining: Vec<Value> = Vec::with_capacity(list.len());
                for value in list {
                    if !values.contains(&value) && !remaining.contains(&value) {
                        remaining.push(value);
                    }
                }
                Ok(Some(Value::Array(remaining)))
            }
            FieldOperation::Relation(relation) => {
                if relation.adds.is_empty() && relation.removes.is_empty() {
                    return Ok(Some(Value::Null));
                }
                match old {
                    None => Ok(Some(Value::Relation(RelationRef {
                        target_class: relation.target_class.clone(),
                    }))),
                    Some(Value::Relation(existing)) => {
                        match (&existing.target_class, &relation.target_class) {
                            (Some(current), Some(target)) if current != target => {
                                Err(OperationError::RelationClassMismatch {
                                    expected: current.clone(),
                                    actual: target.clone(),
                                })
                            }
                            _ => Ok(Some(Value::Relation(RelationRef {
                                target_class: relation
                                    .target_class
                                    .clone()
                                    .or_else(|| existing.target_class.clone()),
                            }))),
                        }
                    }
                    Some(_) => Err(OperationError::NotARelation { key: key.into() }),
                }
            }
        }
    }

    /// Merges this operation with the one that previously occupied its key.
    pub fn merge_with_previous(
        &self,
        previous: Option<&FieldOperation>,
    ) -> OperationResult<FieldOperation> {
        use FieldOperation as Op;

        let Some(previous) = previous else {
            return Ok(self.clone());
        };
        let invalid = || OperationError::InvalidSequence {
            operation: self.name(),
            previous: previous.name(),
        };

        match (self, previous) {
            (Op::Set(_), _) | (Op::Delete, _) => Ok(self.clone()),

            (Op::Increment(amount), Op::Set(Value::Number(n))) => {
                Ok(Op::Set(Value::Number(n.checked_add(*amount)?)))
            }
            (Op::Increment(amount), Op::Delete) => Ok(Op::Set(Value::Number(*amount))),
            (Op::Increment(amount), Op::Increment(earlier)) => {
                Ok(Op::Increment(earlier.checked_add(*amount)?))
            }
            (Op::Increment(_), _) => Err(invalid()),

            (Op::Add(values), Op::Set(old)) => Ok(Op::Set(
                self.apply(Some(old), "")
                    .map_err(|_| invalid())?
                    .unwrap_or_else(|| Value::Array(values.clone())),
            )),
            (Op::Add(values), Op::Delete) => Ok(Op::Set(Value::Array(values.clone()))),
            (Op::Add(values), Op::Add(earlier)) => {
                let mut merged = earlier.clone();
                merged.extend(values.iter().cloned());
                Ok(Op::Add(merged))
            }
            (Op::Add(_), _) => Err(invalid()),

            (Op::AddUnique(values), Op::Set(old)) => Ok(Op::Set(
                self.apply(Some(old), "")
                    .map_err(|_| invalid())?
                    .unwrap_or_else(|| Value::Array(values.clone())),
            )),
            (Op::AddUnique(values), Op::Delete) => Ok(Op::Set(Value::Array(values.clone()))),
            (Op::AddUnique(_), Op::AddUnique(earlier)) => {
                match self.apply(Some(&Value::Array(earlier.clone())), "")? {
                    Some(Value::Array(merged)) => Ok(Op::AddUnique(merged)),
                    _ => Err(invalid()),
                }
            }
            (Op::AddUnique(_), _) => Err(invalid()),

            (Op::Remove(_), Op::Set(old)) => Ok(Op::Set(
                self.apply(Some(old), "")
                    .map_err(|_| invalid())?
                    .unwrap_or_else(|| Value::Array(Vec::new())),
            )),
            // Delete stays in place even though the removal came later.
            (Op::Remove(_), Op::Delete) => Ok(Op::Delete),
            (Op::Remove(values), Op::Remove(earlier)) => {
                let mut merged = earlier.clone();
                merged.extend(values.iter().cloned());
                Ok(Op::Remove(distinct(merged)))
            }
            (Op::Remove(_), _) => Err(invalid()),

            (Op::Relation(relation), Op::Relation(earlier)) => {
                Ok(Op::Relation(relation.merge(earlier)?))
            }
            (Op::Relation(_), _) => Err(invalid()),
        }
    }
}

fn list_of(old: Option<&Value>, key: &str) -> OperationResult<Vec<Value>> {
    match old {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(OperationError::NotAList { key: key.into() }),
    }
}
