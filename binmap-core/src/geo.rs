//! Great-circle distances and proximity queries.

use crate::model::{CollectionCenter, Located, UserLocation};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Number of centers returned by [`nearest_centers`] when no limit is given.
pub const DEFAULT_NEAREST: usize = 5;

/// Haversine distance in kilometers between two coordinates in degrees.
#[must_use]
pub fn distance_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = from;
    let (lat2, lon2) = to;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let half_chord = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let angle = 2.0 * half_chord.sqrt().atan2((1.0 - half_chord).sqrt());
    EARTH_RADIUS_KM * angle
}

/// A center together with its distance from the user.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyCenter {
    /// The center.
    pub center: CollectionCenter,
    /// Distance from the user in kilometers.
    pub distance_km: f64,
}

/// The `limit` centers closest to `location`, nearest first.
#[must_use]
pub fn nearest_centers(
    centers: &[CollectionCenter],
    location: UserLocation,
    limit: usize,
) -> Vec<NearbyCenter> {
    let mut nearby: Vec<NearbyCenter> = centers
        .iter()
        .map(|center| NearbyCenter {
            distance_km: distance_km(
                (location.lat, location.lng),
                (center.point().latitude, center.point().longitude),
            ),
            center: center.clone(),
        })
        .collect();
    nearby.sort_by(|left, right| left.distance_km.total_cmp(&right.distance_km));
    nearby.truncate(limit);
    nearby
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityId, GeoPoint};

    fn center(id: &str, latitude: f64, longitude: f64) -> CollectionCenter {
        CollectionCenter {
            point: GeoPoint {
                id: EntityId::from(id),
                latitude,
                longitude,
            },
            name: id.to_owned(),
            address: String::new(),
            community: String::new(),
            accepted_waste: Vec::new(),
            website: None,
        }
    }

    #[test]
    fn paris_to_london_is_about_344_km() {
        let distance = distance_km((48.8566, 2.3522), (51.5074, -0.1278));
        assert!((distance - 343.5).abs() < 1.0, "got {distance}");
        assert!(distance_km((10.0, 10.0), (10.0, 10.0)).abs() < 1e-9);
    }

    #[test]
    fn nearest_centers_are_sorted_and_truncated() {
        let centers = vec![
            center("far", 51.5, -0.12),
            center("near", 48.86, 2.35),
            center("mid", 50.85, 4.35),
        ];
        let here = UserLocation {
            lat: 48.85,
            lng: 2.35,
            accuracy: None,
        };

        let nearby = nearest_centers(&centers, here, 2);
        let ids: Vec<&str> = nearby.iter().map(|entry| entry.center.point.id.0.as_str()).collect();
        assert_eq!(ids, ["near", "mid"]);
        assert!(nearby[0].distance_km < nearby[1].distance_km);
    }
}
