//! Feature extraction
//!
//! Turns one sensor sample into a normalized [`FeatureVector`]. The function
//! is pure: the same sample and limits always give the same vector.

use crate::config::PreprocessLimits;
use crate::error::StageError;
use crate::types::{FeatureVector, SensorSample, Timestamp};
use std::f64::consts::TAU;
use std::time::Duration;

/// Deterministic sample -> features transform
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    limits: PreprocessLimits,
    staleness_threshold: Duration,
}

impl FeatureExtractor {
    /// Extractor for `limits`, rejecting samples older than `staleness_threshold`
    pub fn new(limits: PreprocessLimits, staleness_threshold: Duration) -> Self {
        Self {
            limits,
            staleness_threshold,
        }
    }

    /// The normalization limits
    pub fn limits(&self) -> &PreprocessLimits {
        &self.limits
    }

    /// Reject samples older than the staleness threshold at `now`
    pub fn check_fresh(&self, sample: &SensorSample, now: Timestamp) -> Result<(), StageError> {
        let age_ms = sample.age_ms(now);
        let threshold_ms = self.staleness_threshold.as_millis() as u64;
        if age_ms > threshold_ms as i64 {
            return Err(StageError::StaleFeature {
                sequence: sample.sequence,
                age_ms,
                threshold_ms,
            });
        }
        Ok(())
    }

    /// Freshness check followed by [`extract`](Self::extract)
    pub fn transform(
        &self,
        sample: &SensorSample,
        now: Timestamp,
    ) -> Result<FeatureVector, StageError> {
        self.check_fresh(sample, now)?;
        self.extract(sample)
    }

    /// Compute the feature vector
    ///
    /// Only proximity saturates (obstacles beyond sensor range read as 1.0);
    /// any other component outside [0, 1] rejects the sample.
    pub fn extract(&self, sample: &SensorSample) -> Result<FeatureVector, StageError> {
        let frame = &sample.frame;
        let limits = &self.limits;

        let energy = in_unit("energy", frame.battery_pct / 100.0)?;

        let tilt = frame.imu.roll_rad.abs() + frame.imu.pitch_rad.abs();
        let stability = in_unit("stability", limits.max_tilt_rad / (limits.max_tilt_rad + tilt))?;

        let orientation = finite("orientation", frame.imu.yaw_rad)?.rem_euclid(TAU) / TAU;
        let orientation = in_unit("orientation", orientation)?;

        let fused_altitude = limits.barometer_weight * frame.barometer.altitude_m
            + (1.0 - limits.barometer_weight) * frame.gps.altitude_m;
        let altitude_ratio = in_unit("altitude_ratio", fused_altitude / limits.max_altitude_m)?;

        let distance = finite("proximity", frame.obstacle_distance_m)?;
        if distance < 0.0 {
            return Err(StageError::OutOfRangeFeature {
                feature: "proximity",
                value: distance,
            });
        }
        let proximity = (distance / limits.sensor_range_m).min(1.0);

        Ok(FeatureVector::new([
            energy,
            stability,
            orientation,
            altitude_ratio,
            proximity,
        ]))
    }
}

fn finite(feature: &'static str, value: f64) -> Result<f64, StageError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(StageError::OutOfRangeFeature { feature, value })
    }
}

fn in_unit(feature: &'static str, value: f64) -> Result<f64, StageError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(StageError::OutOfRangeFeature { feature, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now, BarometerReading, GpsFix, ImuReading, RawFrame};
    use chrono::Duration as ChronoDuration;
    use proptest::prelude::*;

    fn sample(battery_pct: f64, altitude_m: f64, distance_m: f64, roll: f64, yaw: f64) -> SensorSample {
        let captured_at = now();
        SensorSample {
            sequence: 1,
            received_at: captured_at,
            frame: RawFrame {
                captured_at,
                camera: Vec::new(),
                gps: GpsFix {
                    latitude: 45.0,
                    longitude: 7.0,
                    altitude_m,
                },
                imu: ImuReading {
                    roll_rad: roll,
                    pitch_rad: 0.0,
                    yaw_rad: yaw,
                },
                barometer: BarometerReading { altitude_m },
                battery_pct,
                obstacle_distance_m: distance_m,
            },
        }
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(PreprocessLimits::default(), Duration::from_millis(250))
    }

    #[test]
    fn test_nominal_frame() {
        let features = extractor()
            .extract(&sample(80.0, 60.0, 25.0, 0.0, std::f64::consts::PI))
            .unwrap();
        assert!((features.energy() - 0.8).abs() < 1e-12);
        assert_eq!(features.stability(), 1.0);
        assert!((features.orientation() - 0.5).abs() < 1e-12);
        assert!((features.altitude_ratio() - 0.5).abs() < 1e-12);
        assert!((features.proximity() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_proximity_saturates_beyond_range() {
        let features = extractor().extract(&sample(50.0, 10.0, 500.0, 0.0, 0.0)).unwrap();
        assert_eq!(features.proximity(), 1.0);
    }

    #[test]
    fn test_negative_yaw_wraps() {
        let features = extractor()
            .extract(&sample(50.0, 10.0, 5.0, 0.0, -std::f64::consts::FRAC_PI_2))
            .unwrap();
        assert!((features.orientation() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = extractor().extract(&sample(150.0, 10.0, 5.0, 0.0, 0.0)).unwrap_err();
        assert_eq!(
            err,
            StageError::OutOfRangeFeature {
                feature: "energy",
                value: 1.5
            }
        );

        let err = extractor().extract(&sample(50.0, 500.0, 5.0, 0.0, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            StageError::OutOfRangeFeature {
                feature: "altitude_ratio",
                ..
            }
        ));

        assert!(extractor().extract(&sample(50.0, 10.0, -1.0, 0.0, 0.0)).is_err());
        assert!(extractor().extract(&sample(f64::NAN, 10.0, 5.0, 0.0, 0.0)).is_err());
        assert!(extractor().extract(&sample(50.0, 10.0, 5.0, 0.0, f64::INFINITY)).is_err());
    }

    #[test]
    fn test_stale_sample_rejected() {
        let s = sample(50.0, 10.0, 5.0, 0.0, 0.0);
        let later = s.frame.captured_at + ChronoDuration::milliseconds(400);
        let err = extractor().transform(&s, later).unwrap_err();
        assert!(matches!(err, StageError::StaleFeature { sequence: 1, age_ms: 400, threshold_ms: 250 }));

        let soon = s.frame.captured_at + ChronoDuration::milliseconds(100);
        assert!(extractor().transform(&s, soon).is_ok());
    }

    proptest! {
        #[test]
        fn prop_accepted_features_are_normalized(
            battery in -20.0f64..120.0,
            altitude in -10.0f64..200.0,
            distance in -5.0f64..200.0,
            roll in -3.2f64..3.2,
            yaw in -20.0f64..20.0,
        ) {
            if let Ok(features) = extractor().extract(&sample(battery, altitude, distance, roll, yaw)) {
                prop_assert!(features.is_normalized());
            }
        }
    }
}
