//! Access control lists.
//!
//! An ACL maps a grantee to read/write permissions. Grantees are user ids,
//! the public key `*`, or role names prefixed with `role:`.

use crate::json::{JsonConvertible, JsonMap};
use crate::{TypesError, TypesResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grantee key for public access.
pub const PUBLIC_KEY: &str = "*";

const ROLE_PREFIX: &str = "role:";

/// Permissions granted to one grantee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclEntry {
    pub read: bool,
    pub write: bool,
}

/// An access control list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    entries: BTreeMap<String, AclEntry>,
}

impl Acl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an ACL granting read and write to a single user.
    #[must_use]
    pub fn for_user(user_id: &str) -> Self {
        let mut acl = Self::new();
        acl.set_read_access(user_id, true);
        acl.set_write_access(user_id, true);
        acl
    }

    /// Parses the wire form `{ "<grantee>": { "read": bool, "write": bool } }`.
    pub fn from_json(map: &JsonMap) -> TypesResult<Self> {
        let mut acl = Self::new();
        for (grantee, permissions) in map {
            let permissions = permissions.as_object().ok_or_else(|| {
                TypesError::InvalidAcl(format!("permissions for {grantee} are not an object"))
            })?;
            let mut entry = AclEntry::default();
            for (name, granted) in permissions {
                let granted = granted.as_bool().ok_or_else(|| {
                    TypesError::InvalidAcl(format!("{grantee}.{name} is not a boolean"))
                })?;
                match name.as_str() {
                    "read" => entry.read = granted,
                    "write" => entry.write = granted,
                    other => {
                        return Err(TypesError::InvalidAcl(format!(
                            "unknown permission {other} for {grantee}"
                        )));
                    }
                }
            }
            acl.entries.insert(grantee.clone(), entry);
        }
        Ok(acl)
    }

    fn set(&mut self, grantee: &str, update: impl FnOnce(&mut AclEntry)) {
        let entry = self.entries.entry(grantee.to_string()).or_default();
        update(entry);
        if !entry.read && !entry.write {
            self.entries.remove(grantee);
        }
    }

    pub fn set_read_access(&mut self, grantee: &str, allowed: bool) {
        self.set(grantee, |e| e.read = allowed);
    }

    pub fn set_write_access(&mut self, grantee: &str, allowed: bool) {
        self.set(grantee, |e| e.write = allowed);
    }

    pub fn set_public_read_access(&mut self, allowed: bool) {
        self.set_read_access(PUBLIC_KEY, allowed);
    }

    pub fn set_public_write_access(&mut self, allowed: bool) {
        self.set_write_access(PUBLIC_KEY, allowed);
    }

    pub fn set_role_read_access(&mut self, role: &str, allowed: bool) {
        self.set_read_access(&format!("{ROLE_PREFIX}{role}"), allowed);
    }

    pub fn set_role_write_access(&mut self, role: &str, allowed: bool) {
        self.set_write_access(&format!("{ROLE_PREFIX}{role}"), allowed);
    }

    #[must_use]
    pub fn read_access(&self, grantee: &str) -> bool {
        self.entries.get(grantee).is_some_and(|e| e.read)
    }

    #[must_use]
    pub fn write_access(&self, grantee: &str) -> bool {
        self.entries.get(grantee).is_some_and(|e| e.write)
    }

    #[must_use]
    pub fn public_read_access(&self) -> bool {
        self.read_access(PUBLIC_KEY)
    }

    #[must_use]
    pub fn public_write_access(&self) -> bool {
        self.write_access(PUBLIC_KEY)
    }

    #[must_use]
    pub fn role_read_access(&self, role: &str) -> bool {
        self.read_access(&format!("{ROLE_PREFIX}{role}"))
    }

    #[must_use]
    pub fn role_write_access(&self, role: &str) -> bool {
        self.write_access(&format!("{ROLE_PREFIX}{role}"))
    }

    /// Iterates grantees with at least one permission.
    pub fn entries(&self) -> impl Iterator<Item = (&str, AclEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl JsonConvertible for Acl {
    fn to_json(&self) -> serde_json::Value {
        let mut map = JsonMap::new();
        for (grantee, entry) in &self.entries {
            let mut permissions = JsonMap::new();
            if entry.read {
                permissions.insert("read".into(), true.into());
            }
            if entry.write {
                permissions.insert("write".into(), true.into());
            }
            map.insert(grantee.clone(), permissions.into());
        }
        serde_json::Value::Object(map)
    }
}
