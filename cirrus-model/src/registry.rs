//! Class name → typed subclass registry.
//!
//! The decoder consults the registry whenever it materializes an entity from
//! wire data, so that a `Pointer` or `Object` of a registered class comes
//! back as an entity that can be downcast to its typed wrapper.

use crate::entity::Entity;
use crate::state::ObjectState;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Result type alias for registry errors.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Errors raised by the subclass registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("class {class_name} is already registered to {existing}, which is unrelated to {attempted}")]
    AmbiguousSubclass {
        class_name: String,
        existing: &'static str,
        attempted: &'static str,
    },

    #[error("invalid class name: {0:?}")]
    InvalidClassName(String),

    #[error("{type_name} is not registered for class {class_name}")]
    NotRegistered {
        class_name: String,
        type_name: &'static str,
    },
}

/// A typed wrapper around an [`Entity`].
///
/// Subclass hierarchies are declared explicitly: a type lists the
/// [`TypeId`]s of every wrapper it specializes in [`ancestors`](Self::ancestors).
pub trait EntitySubclass: Sized + Send + Sync + 'static {
    /// Remote class name this type represents.
    const CLASS_NAME: &'static str;

    /// Types this one specializes, nearest first.
    fn ancestors() -> Vec<TypeId> {
        Vec::new()
    }

    fn from_entity(entity: Entity) -> Self;

    fn entity(&self) -> &Entity;

    /// Called on freshly created instances before they are handed out.
    fn set_default_values(_entity: &Entity) {}
}

/// Registration record for one subclass.
pub struct SubclassInfo {
    type_id: TypeId,
    type_name: &'static str,
    class_name: String,
    ancestors: Vec<TypeId>,
    set_defaults: fn(&Entity),
}

impl SubclassInfo {
    fn of<T: EntitySubclass>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            class_name: T::CLASS_NAME.to_string(),
            ancestors: T::ancestors(),
            set_defaults: T::set_default_values,
        }
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns `true` when this subclass is `type_id` or specializes it.
    #[must_use]
    pub fn is_a(&self, type_id: TypeId) -> bool {
        self.type_id == type_id || self.ancestors.contains(&type_id)
    }
}

impl std::fmt::Debug for SubclassInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubclassInfo")
            .field("type_name", &self.type_name)
            .field("class_name", &self.class_name)
            .finish()
    }
}

type RegisterHook = Arc<dyn Fn() + Send + Sync>;

/// Concurrent, read-mostly map from class name to registered subclass.
#[derive(Default)]
pub struct SubclassRegistry {
    subclasses: RwLock<HashMap<String, Arc<SubclassInfo>>>,
    hooks: RwLock<HashMap<String, Vec<RegisterHook>>>,
}

impl SubclassRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in user, installation, session and role types.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        // Built-in class names are distinct, so registration cannot conflict.
        let _ = registry.register::<crate::builtin::User>();
        let _ = registry.register::<crate::builtin::Installation>();
        let _ = registry.register::<crate::builtin::Session>();
        let _ = registry.register::<crate::builtin::Role>();
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<SubclassInfo>>> {
        self.subclasses.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<SubclassInfo>>> {
        self.subclasses.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `T` for its class name.
    ///
    /// Registering a type that is the same as, or an ancestor of, the one
    /// already registered is a no-op. A more specific type replaces the
    /// existing one. An unrelated type is rejected.
    pub fn register<T: EntitySubclass>(&self) -> RegistryResult<()> {
        let info = SubclassInfo::of::<T>();
        if info.class_name.is_empty() {
            return Err(RegistryError::InvalidClassName(info.class_name));
        }
        let class_name = info.class_name.clone();

        {
            let mut subclasses = self.write();
            if let Some(existing) = subclasses.get(&class_name) {
                if existing.is_a(info.type_id) {
                    debug!(class = %class_name, kept = existing.type_name, "subclass already registered");
                    return Ok(());
                }
                if !info.is_a(existing.type_id) {
                    return Err(RegistryError::AmbiguousSubclass {
                        class_name,
                        existing: existing.type_name,
                        attempted: info.type_name,
                    });
                }
            }
            info!(class = %class_name, subclass = info.type_name, "registered subclass");
            subclasses.insert(class_name.clone(), Arc::new(info));
        }

        self.run_hooks(&class_name);
        Ok(())
    }

    /// Removes `T` if it is the type registered for its class name.
    pub fn unregister<T: EntitySubclass>(&self) {
        let mut subclasses = self.write();
        if subclasses
            .get(T::CLASS_NAME)
            .is_some_and(|info| info.type_id == TypeId::of::<T>())
        {
            subclasses.remove(T::CLASS_NAME);
        }
    }

    /// Removes whatever type is registered for `class_name`.
    pub fn unregister_class(&self, class_name: &str) {
        self.write().remove(class_name);
    }

    /// Adds a hook run after a subclass is registered for `class_name`.
    pub fn add_register_hook(&self, class_name: &str, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(class_name.to_string())
            .or_default()
            .push(Arc::new(hook));
    }

    fn run_hooks(&self, class_name: &str) {
        let hooks: Vec<RegisterHook> = self
            .hooks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(class_name)
            .cloned()
            .unwrap_or_default();
        for hook in hooks {
            hook();
        }
    }

    #[must_use]
    pub fn subclass_for(&self, class_name: &str) -> Option<Arc<SubclassInfo>> {
        self.read().get(class_name).cloned()
    }

    #[must_use]
    pub fn is_registered<T: EntitySubclass>(&self) -> bool {
        self.subclass_for(T::CLASS_NAME)
            .is_some_and(|info| info.is_a(TypeId::of::<T>()))
    }

    /// A new entity of `class_name`, typed when a subclass is registered.
    #[must_use]
    pub fn instantiate(&self, class_name: &str) -> Entity {
        let subclass = self.subclass_for(class_name);
        let state = ObjectState::new(class_name).mutated(|s| s.is_new = true);
        let entity = Entity::from_parts(subclass.clone(), state, true);
        if let Some(info) = subclass {
            (info.set_defaults)(&entity);
        }
        entity
    }

    /// A new `T`. Fails when `T` is not registered.
    pub fn create<T: EntitySubclass>(&self) -> RegistryResult<T> {
        if !self.is_registered::<T>() {
            return Err(RegistryError::NotRegistered {
                class_name: T::CLASS_NAME.to_string(),
                type_name: std::any::type_name::<T>(),
            });
        }
        Ok(T::from_entity(self.instantiate(T::CLASS_NAME)))
    }

    /// A reference to an existing remote object whose data has not been fetched.
    #[must_use]
    pub fn create_without_data(&self, class_name: &str, object_id: &str) -> Entity {
        let state = ObjectState::new(class_name).mutated(|s| s.object_id = Some(object_id.to_string()));
        Entity::from_parts(self.subclass_for(class_name), state, false)
    }

    /// An entity holding `state` as its confirmed data.
    #[must_use]
    pub fn from_state(&self, state: ObjectState) -> Entity {
        Entity::from_parts(self.subclass_for(state.class_name()), state, true)
    }
}

impl std::fmt::Debug for SubclassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut classes: Vec<String> = self.read().keys().cloned().collect();
        classes.sort();
        f.debug_struct("SubclassRegistry").field("classes", &classes).finish()
    }
}
