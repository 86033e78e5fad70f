//! Remote file references.

use crate::json::JsonConvertible;
use serde::{Deserialize, Serialize};

/// A file that has been uploaded to the remote store.
///
/// Only the name and URL travel with an entity; file contents are handled
/// by a separate upload collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub url: String,
}

impl FileRef {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

impl JsonConvertible for FileRef {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "__type": "File",
            "name": self.name,
            "url": self.url,
        })
    }
}
