//! Numeric attribute values.
//!
//! Remote attributes are JSON numbers, but increments must keep integers
//! integral. `Number` tracks which of the two the value is and widens to a
//! float only when one side already is one.

use crate::{TypesError, TypesResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An integer or floating point attribute value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    /// Adds two numbers. Integer addition that overflows is an error.
    pub fn checked_add(self, other: Number) -> TypesResult<Number> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_add(b)
                .map(Number::Int)
                .ok_or(TypesError::Overflow {
                    left: self,
                    right: other,
                }),
            (a, b) => Ok(Number::Float(a.as_f64() + b.as_f64())),
        }
    }

    /// Returns the value as a float.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Returns the value as an integer if it is one.
    #[must_use]
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Number::Int(i) => Some(i),
            Number::Float(_) => None,
        }
    }

    /// Returns `true` unless this is a NaN or infinite float.
    #[must_use]
    pub fn is_finite(self) -> bool {
        match self {
            Number::Int(_) => true,
            Number::Float(f) => f.is_finite(),
        }
    }

    /// Converts a JSON number, preferring the integer representation.
    #[must_use]
    pub fn from_json(number: &serde_json::Number) -> Number {
        match number.as_i64() {
            Some(i) => Number::Int(i),
            None => Number::Float(number.as_f64().unwrap_or(f64::NAN)),
        }
    }

    /// Converts to a JSON number. Returns `None` for non-finite floats.
    #[must_use]
    pub fn to_json(self) -> Option<serde_json::Number> {
        match self {
            Number::Int(i) => Some(i.into()),
            Number::Float(f) => serde_json::Number::from_f64(f),
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            (a, b) => a.as_f64() == b.as_f64(),
        }
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Number::Int(i64::from(value))
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number::Float(value)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(x) => write!(f, "{x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_plus_int_stays_int() {
        let sum = Number::Int(2).checked_add(Number::Int(3)).unwrap();
        assert_eq!(sum.as_i64(), Some(5));
    }

    #[test]
    fn int_plus_float_widens() {
        let sum = Number::Int(2).checked_add(Number::Float(0.5)).unwrap();
        assert_eq!(sum, Number::Float(2.5));
        assert_eq!(sum.as_i64(), None);
    }

    #[test]
    fn overflow_is_an_error() {
        let err = Number::Int(i64::MAX).checked_add(Number::Int(1)).unwrap_err();
        assert!(matches!(err, TypesError::Overflow { .. }));
    }

    #[test]
    fn int_and_float_compare_by_value() {
        assert_eq!(Number::Int(3), Number::Float(3.0));
        assert_ne!(Number::Int(3), Number::Float(3.1));
    }

    #[test]
    fn json_round_trip_prefers_int() {
        let n = serde_json::Number::from(42);
        assert_eq!(Number::from_json(&n).as_i64(), Some(42));
        let f = serde_json::Number::from_f64(1.25).unwrap();
        assert_eq!(Number::from_json(&f), Number::Float(1.25));
    }

    #[test]
    fn non_finite_has_no_json_form() {
        assert!(Number::Float(f64::NAN).to_json().is_none());
        assert!(!Number::Float(f64::INFINITY).is_finite());
    }
}
