//! Typed wrappers for the classes the remote store defines itself.

use crate::entity::Entity;
use crate::ops::OperationResult;
use crate::registry::EntitySubclass;
use std::ops::Deref;

macro_rules! builtin_subclass {
    ($(#[$meta:meta])* $name:ident, $class:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name(Entity);

        impl EntitySubclass for $name {
            const CLASS_NAME: &'static str = $class;

            fn from_entity(entity: Entity) -> Self {
                Self(entity)
            }

            fn entity(&self) -> &Entity {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = Entity;

            fn deref(&self) -> &Entity {
                &self.0
            }
        }

        impl From<$name> for Entity {
            fn from(value: $name) -> Entity {
                value.0
            }
        }
    };
}

builtin_subclass!(
    /// An application user (`_User`).
    User,
    "_User"
);
builtin_subclass!(
    /// A device installation (`_Installation`).
    Installation,
    "_Installation"
);
builtin_subclass!(
    /// A login session (`_Session`).
    Session,
    "_Session"
);
builtin_subclass!(
    /// A named group of users (`_Role`).
    Role,
    "_Role"
);

impl User {
    #[must_use]
    pub fn username(&self) -> Option<String> {
        self.get_str("username")
    }

    pub fn set_username(&self, username: &str) -> OperationResult<()> {
        self.set("username", username)
    }

    #[must_use]
    pub fn email(&self) -> Option<String> {
        self.get_str("email")
    }

    pub fn set_email(&self, email: &str) -> OperationResult<()> {
        self.set("email", email)
    }

    pub fn set_password(&self, password: &str) -> OperationResult<()> {
        self.set("password", password)
    }

    /// Returns `true` once the server has issued a session token.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session_token().is_some()
    }
}

impl Installation {
    #[must_use]
    pub fn installation_id(&self) -> Option<String> {
        self.get_str("installationId")
    }

    pub fn set_installation_id(&self, id: &str) -> OperationResult<()> {
        self.set("installationId", id)
    }

    #[must_use]
    pub fn device_type(&self) -> Option<String> {
        self.get_str("deviceType")
    }

    pub fn set_device_type(&self, device_type: &str) -> OperationResult<()> {
        self.set("deviceType", device_type)
    }
}

impl Role {
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.get_str("name")
    }

    pub fn set_name(&self, name: &str) -> OperationResult<()> {
        self.set("name", name)
    }
}
