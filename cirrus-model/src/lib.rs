//! Entity model for cirrus.
//!
//! Defines everything an application touches while mutating remote-backed
//! entities locally, before any network I/O:
//! - [`Value`] — the attribute value model (scalars, dates, bytes, geo points,
//!   files, ACLs, relations, nested entities, arrays, maps)
//! - [`FieldOperation`] — pending mutations of one attribute and their merge algebra
//! - [`OperationSet`] — the merged pending operations of one entity
//! - [`ObjectState`] — the last server-confirmed snapshot of an entity
//! - [`Entity`] — the shared in-memory entity: state, queued operation sets and
//!   the estimated data derived from them
//! - [`SubclassRegistry`] — class name → typed subclass mapping used when decoding
//! - [`codec`] / [`coder`] — the tagged wire encoding of values, operations and states
//!
//! Nothing in this crate performs I/O; `cirrus-sync` drives saves and fetches.

pub mod builtin;
pub mod codec;
pub mod coder;
mod entity;
mod ops;
mod pending;
mod registry;
mod state;
mod value;

pub use builtin::{Installation, Role, Session, User};
pub use codec::{encode, CodecError, CodecResult, Decoder};
pub use entity::{Entity, SaveSnapshot};
pub use ops::{FieldOperation, OperationError, OperationResult, RelationOperation};
pub use pending::OperationSet;
pub use registry::{EntitySubclass, RegistryError, RegistryResult, SubclassInfo, SubclassRegistry};
pub use state::{MutableObjectState, ObjectState};
pub use value::Value;

pub use cirrus_types::{Acl, FileRef, GeoDistance, GeoPoint, JsonMap, Number, RelationRef};
