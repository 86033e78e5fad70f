use crate::ops::{FieldOperation, OperationResult};
use std::collections::BTreeMap;

/// The merged, unsaved operations of one entity, keyed by attribute name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationSet {
    operations: BTreeMap<String, FieldOperation>,
}

impl OperationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FieldOperation> {
        self.operations.get(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.operations.contains_key(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldOperation)> {
        self.operations.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// Replaces whatever occupies `key` without merging.
    pub fn insert(&mut self, key: impl Into<String>, operation: FieldOperation) {
        self.operations.insert(key.into(), operation);
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldOperation> {
        self.operations.remove(key)
    }

    pub fn clear(&mut self) {
        self.operations.clear();
    }

    /// Merges `operation` with the operation currently stored under `key`.
    ///
    /// The set is left untouched when the merge is undefined.
    pub fn merge(&mut self, key: &str, operation: &FieldOperation) -> OperationResult<()> {
        let merged = operation.merge_with_previous(self.operations.get(key))?;
        self.operations.insert(key.to_string(), merged);
        Ok(())
    }
}

impl FromIterator<(String, FieldOperation)> for OperationSet {
    fn from_iter<I: IntoIterator<Item = (String, FieldOperation)>>(iter: I) -> Self {
        Self {
            operations: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for OperationSet {
    type Item = (String, FieldOperation);
    type IntoIter = std::collections::btree_map::IntoIter<String, FieldOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.into_iter()
    }
}
