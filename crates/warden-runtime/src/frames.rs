//! Raw frame construction for simulators and tests

use warden_core::types::{now, BarometerReading, GpsFix, ImuReading, RawFrame, Timestamp};

/// Builder for [`RawFrame`]
///
/// Starts from a level, mid-altitude, fully charged drone in open space.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    frame: RawFrame,
}

impl FrameBuilder {
    pub fn nominal() -> Self {
        Self {
            frame: RawFrame {
                captured_at: now(),
                camera: Vec::new(),
                gps: GpsFix {
                    latitude: 45.07,
                    longitude: 7.69,
                    altitude_m: 60.0,
                },
                imu: ImuReading {
                    roll_rad: 0.0,
                    pitch_rad: 0.0,
                    yaw_rad: 0.0,
                },
                barometer: BarometerReading { altitude_m: 60.0 },
                battery_pct: 100.0,
                obstacle_distance_m: 50.0,
            },
        }
    }

    pub fn captured_at(mut self, at: Timestamp) -> Self {
        self.frame.captured_at = at;
        self
    }

    pub fn camera(mut self, payload: Vec<u8>) -> Self {
        self.frame.camera = payload;
        self
    }

    /// Same altitude on GPS and barometer
    pub fn altitude_m(mut self, altitude_m: f64) -> Self {
        self.frame.gps.altitude_m = altitude_m;
        self.frame.barometer.altitude_m = altitude_m;
        self
    }

    pub fn position(mut self, latitude: f64, longitude: f64) -> Self {
        self.frame.gps.latitude = latitude;
        self.frame.gps.longitude = longitude;
        self
    }

    pub fn attitude(mut self, roll_rad: f64, pitch_rad: f64, yaw_rad: f64) -> Self {
        self.frame.imu = ImuReading {
            roll_rad,
            pitch_rad,
            yaw_rad,
        };
        self
    }

    pub fn battery_pct(mut self, battery_pct: f64) -> Self {
        self.frame.battery_pct = battery_pct;
        self
    }

    pub fn obstacle_m(mut self, distance_m: f64) -> Self {
        self.frame.obstacle_distance_m = distance_m;
        self
    }

    pub fn build(self) -> RawFrame {
        self.frame
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::nominal()
    }
}
