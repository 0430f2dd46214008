//! Configured no-fly zones
//!
//! Preprocessing turns a GPS fix into the normalized distance the
//! `no_fly_zone` rule compares against `no_fly_margin`.

use crate::error::ConfigError;
use crate::types::GpsFix;
use serde::{Deserialize, Serialize};

/// Ground length of one degree of latitude
const METERS_PER_DEGREE: f64 = 111_320.0;

/// A circular no-fly zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoFlyZone {
    /// Latitude of the zone centre, in degrees
    pub latitude: f64,
    /// Longitude of the zone centre, in degrees
    pub longitude: f64,
    /// Zone radius, in meters
    pub radius_m: f64,
}

impl NoFlyZone {
    /// Zone centred on (`latitude`, `longitude`)
    pub fn new(latitude: f64, longitude: f64, radius_m: f64) -> Self {
        Self {
            latitude,
            longitude,
            radius_m,
        }
    }

    /// Ground distance from `fix` to the zone boundary; 0 inside the zone
    ///
    /// Equirectangular approximation, good to well under a meter at the
    /// distances the rule cares about.
    pub fn boundary_distance_m(&self, fix: &GpsFix) -> f64 {
        let mean_latitude = ((self.latitude + fix.latitude) / 2.0).to_radians();
        let north = (fix.latitude - self.latitude) * METERS_PER_DEGREE;
        let east = (fix.longitude - self.longitude) * METERS_PER_DEGREE * mean_latitude.cos();
        (north.hypot(east) - self.radius_m).max(0.0)
    }

    /// Coordinates on the globe and a positive radius
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ConfigError::OutOfRange {
                field: "no_fly_zones.latitude",
                value: self.latitude,
                min: -90.0,
                max: 90.0,
            });
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ConfigError::OutOfRange {
                field: "no_fly_zones.longitude",
                value: self.longitude,
                min: -180.0,
                max: 180.0,
            });
        }
        if !(self.radius_m.is_finite() && self.radius_m > 0.0) {
            return Err(ConfigError::MustBePositive {
                field: "no_fly_zones.radius_m",
            });
        }
        Ok(())
    }
}

/// The zones of one session and the range that normalizes distances to them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geofence {
    zones: Vec<NoFlyZone>,
    range_m: f64,
}

impl Geofence {
    /// `range_m` is the boundary distance that maps to 1.0
    pub fn new(zones: Vec<NoFlyZone>, range_m: f64) -> Self {
        Self { zones, range_m }
    }

    /// The configured zones
    pub fn zones(&self) -> &[NoFlyZone] {
        &self.zones
    }

    /// Normalized distance from `fix` to the nearest zone boundary, in [0, 1]
    ///
    /// `None` when no zone is configured. A fix with non-finite coordinates
    /// reads as inside a zone.
    pub fn distance(&self, fix: &GpsFix) -> Option<f64> {
        if self.zones.is_empty() {
            return None;
        }
        if !(fix.latitude.is_finite() && fix.longitude.is_finite()) {
            return Some(0.0);
        }
        let nearest = self
            .zones
            .iter()
            .map(|zone| zone.boundary_distance_m(fix))
            .fold(f64::INFINITY, f64::min);
        Some((nearest / self.range_m).min(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(latitude: f64, longitude: f64) -> GpsFix {
        GpsFix {
            latitude,
            longitude,
            altitude_m: 50.0,
        }
    }

    #[test]
    fn test_no_zones_no_distance() {
        assert_eq!(Geofence::default().distance(&fix(45.0, 7.0)), None);
    }

    #[test]
    fn test_inside_zone_is_zero() {
        let fence = Geofence::new(vec![NoFlyZone::new(45.0, 7.0, 200.0)], 500.0);
        assert_eq!(fence.distance(&fix(45.0, 7.0)), Some(0.0));
        assert_eq!(fence.distance(&fix(45.001, 7.0)), Some(0.0));
    }

    #[test]
    fn test_distance_is_normalized_to_nearest_boundary() {
        let fence = Geofence::new(
            vec![
                NoFlyZone::new(45.0, 7.0, 100.0),
                NoFlyZone::new(46.0, 7.0, 100.0),
            ],
            500.0,
        );
        // 0.003 degrees north is about 334 m from the centre.
        let d = fence.distance(&fix(45.003, 7.0)).unwrap();
        assert!((d - (3.0 * 111.32 - 100.0) / 500.0).abs() < 1e-6);

        // Far from both: saturates.
        assert_eq!(fence.distance(&fix(50.0, 7.0)), Some(1.0));
    }

    #[test]
    fn test_unusable_fix_counts_as_inside() {
        let fence = Geofence::new(vec![NoFlyZone::new(45.0, 7.0, 100.0)], 500.0);
        assert_eq!(fence.distance(&fix(f64::NAN, 7.0)), Some(0.0));
    }

    #[test]
    fn test_zone_validation() {
        assert!(NoFlyZone::new(45.0, 7.0, 100.0).validate().is_ok());
        assert!(NoFlyZone::new(95.0, 7.0, 100.0).validate().is_err());
        assert!(NoFlyZone::new(45.0, 181.0, 100.0).validate().is_err());
        assert_eq!(
            NoFlyZone::new(45.0, 7.0, 0.0).validate(),
            Err(ConfigError::MustBePositive {
                field: "no_fly_zones.radius_m"
            })
        );
    }
}
