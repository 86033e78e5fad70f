//! Self-describing wire conversion.

/// A JSON object, the shape of every request and response body.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Implemented by values that know their own tagged wire representation.
///
/// The encoder delegates to this instead of inspecting the value.
pub trait JsonConvertible {
    /// Returns the tagged JSON form of this value.
    fn to_json(&self) -> serde_json::Value;
}
