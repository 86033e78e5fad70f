//! Leaf value types for the cirrus object engine.
//!
//! This crate defines the attribute value types that carry no knowledge of
//! entities, operations or the network:
//! - [`Number`] — integer-or-float attribute values with checked addition
//! - [`GeoPoint`] / [`GeoDistance`] — validated coordinates and great-circle distances
//! - [`FileRef`] — a reference to a remotely hosted file
//! - [`Acl`] — per-user, per-role and public read/write grants
//! - [`RelationRef`] — a relation stub pointing at a target class
//! - wire date formatting and parsing ([`format_date`], [`parse_date`])
//!
//! Types that know their own wire shape implement [`JsonConvertible`].

mod acl;
mod date;
mod file;
mod geo;
mod json;
mod number;
mod relation;

pub use acl::{Acl, AclEntry, PUBLIC_KEY};
pub use date::{format_date, parse_date, DATE_FORMAT};
pub use file::FileRef;
pub use geo::{GeoDistance, GeoPoint, EARTH_RADIUS_KILOMETERS, EARTH_RADIUS_MILES};
pub use json::{JsonConvertible, JsonMap};
pub use number::Number;
pub use relation::RelationRef;

/// Result type alias using the crate's error type.
pub type TypesResult<T> = std::result::Result<T, TypesError>;

/// Errors that can occur while constructing or parsing leaf values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypesError {
    #[error("latitude must be within [-90, 90], got {0}")]
    InvalidLatitude(f64),

    #[error("longitude must be within [-180, 180], got {0}")]
    InvalidLongitude(f64),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid ACL: {0}")]
    InvalidAcl(String),

    #[error("numeric overflow adding {left} and {right}")]
    Overflow { left: Number, right: Number },
}
