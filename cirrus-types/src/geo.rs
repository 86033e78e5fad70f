//! Geographic points and distances.

use crate::json::JsonConvertible;
use crate::{TypesError, TypesResult};
use serde::{Deserialize, Serialize};

/// Mean earth radius in kilometers.
pub const EARTH_RADIUS_KILOMETERS: f64 = 6371.0;

/// Mean earth radius in miles.
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

/// A validated latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl GeoPoint {
    /// Creates a point, rejecting out-of-range coordinates.
    pub fn new(latitude: f64, longitude: f64) -> TypesResult<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(TypesError::InvalidLatitude(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(TypesError::InvalidLongitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    #[must_use]
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    #[must_use]
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Great-circle distance to another point (haversine).
    #[must_use]
    pub fn distance_to(&self, other: &GeoPoint) -> GeoDistance {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let a = a.clamp(0.0, 1.0);
        GeoDistance::from_radians(2.0 * a.sqrt().asin())
    }
}

impl JsonConvertible for GeoPoint {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "__type": "GeoPoint",
            "latitude": self.latitude,
            "longitude": self.longitude,
        })
    }
}

/// A distance along the earth's surface.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct GeoDistance {
    radians: f64,
}

impl GeoDistance {
    #[must_use]
    pub const fn from_radians(radians: f64) -> Self {
        Self { radians }
    }

    #[must_use]
    pub fn from_kilometers(kilometers: f64) -> Self {
        Self::from_radians(kilometers / EARTH_RADIUS_KILOMETERS)
    }

    #[must_use]
    pub fn from_miles(miles: f64) -> Self {
        Self::from_radians(miles / EARTH_RADIUS_MILES)
    }

    #[must_use]
    pub const fn radians(&self) -> f64 {
        self.radians
    }

    #[must_use]
    pub fn kilometers(&self) -> f64 {
        self.radians * EARTH_RADIUS_KILOMETERS
    }

    #[must_use]
    pub fn miles(&self) -> f64 {
        self.radians * EARTH_RADIUS_MILES
    }
}
