use cirrus_types::{GeoDistance, GeoPoint, JsonConvertible, TypesError};
use proptest::prelude::*;

// ── GeoPoint construction ─────────────────────────────────────────

#[test]
fn geo_point_accepts_bounds() {
    assert!(GeoPoint::new(90.0, 180.0).is_ok());
    assert!(GeoPoint::new(-90.0, -180.0).is_ok());
}

#[test]
fn geo_point_rejects_latitude_out_of_range() {
    assert_eq!(
        GeoPoint::new(90.5, 0.0).unwrap_err(),
        TypesError::InvalidLatitude(90.5)
    );
}

#[test]
fn geo_point_rejects_longitude_out_of_range() {
    assert_eq!(
        GeoPoint::new(0.0, -180.5).unwrap_err(),
        TypesError::InvalidLongitude(-180.5)
    );
}

#[test]
fn geo_point_json_is_tagged() {
    let point = GeoPoint::new(40.0, -30.0).unwrap();
    assert_eq!(
        point.to_json(),
        serde_json::json!({ "__type": "GeoPoint", "latitude": 40.0, "longitude": -30.0 })
    );
}

// ── Distances ─────────────────────────────────────────────────────

#[test]
fn distance_to_self_is_zero() {
    let point = GeoPoint::new(37.77, -122.42).unwrap();
    assert_eq!(point.distance_to(&point).radians(), 0.0);
}

#[test]
fn distance_between_known_cities() {
    // San Francisco to Vancouver is roughly 1,280 km.
    let sf = GeoPoint::new(37.7749, -122.4194).unwrap();
    let vancouver = GeoPoint::new(49.2827, -123.1207).unwrap();
    let km = sf.distance_to(&vancouver).kilometers();
    assert!((1270.0..1290.0).contains(&km), "got {km}");
}

#[test]
fn distance_unit_conversions_agree() {
    let d = GeoDistance::from_kilometers(100.0);
    assert!((d.kilometers() - 100.0).abs() < 1e-9);
    let m = GeoDistance::from_miles(d.miles());
    assert!((m.radians() - d.radians()).abs() < 1e-12);
}

proptest! {
    #[test]
    fn distance_is_symmetric(
        lat1 in -90.0f64..=90.0,
        lon1 in -180.0f64..=180.0,
        lat2 in -90.0f64..=90.0,
        lon2 in -180.0f64..=180.0,
    ) {
        let a = GeoPoint::new(lat1, lon1).unwrap();
        let b = GeoPoint::new(lat2, lon2).unwrap();
        let ab = a.distance_to(&b).radians();
        let ba = b.distance_to(&a).radians();
        prop_assert!((ab - ba).abs() < 1e-9);
        prop_assert!(ab <= std::f64::consts::PI + 1e-9);
    }
}
