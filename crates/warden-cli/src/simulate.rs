//! Deterministic synthetic flight for the `run` command

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use warden_core::types::RawFrame;
use warden_runtime::{FrameBuilder, ScriptedSource};

/// Random-walk flight profile; the same seed always yields the same frames
#[derive(Debug)]
pub struct Flight {
    rng: StdRng,
    altitude_m: f64,
    battery_pct: f64,
    obstacle_m: f64,
    yaw_rad: f64,
    glitch_rate: f64,
}

impl Flight {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            altitude_m: 40.0,
            battery_pct: 100.0,
            obstacle_m: 60.0,
            yaw_rad: 0.0,
            glitch_rate: 0.0,
        }
    }

    /// Probability that a frame carries an impossible battery reading
    pub fn with_glitch_rate(mut self, rate: f64) -> Self {
        self.glitch_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn next_frame(&mut self) -> RawFrame {
        self.altitude_m = (self.altitude_m + self.rng.gen_range(-4.0..4.0)).clamp(2.0, 118.0);
        self.battery_pct = (self.battery_pct - self.rng.gen_range(0.0..0.6)).max(0.0);
        self.obstacle_m = (self.obstacle_m + self.rng.gen_range(-8.0..8.0)).clamp(0.5, 80.0);
        self.yaw_rad += self.rng.gen_range(-0.2..0.2);
        let roll = self.rng.gen_range(-0.15..0.15);
        let pitch = self.rng.gen_range(-0.15..0.15);

        let battery = if self.rng.gen_bool(self.glitch_rate) {
            -5.0
        } else {
            self.battery_pct
        };

        FrameBuilder::nominal()
            .altitude_m(self.altitude_m)
            .battery_pct(battery)
            .obstacle_m(self.obstacle_m)
            .attitude(roll, pitch, self.yaw_rad)
            .build()
    }

    /// Script `steps` frames spaced by `interval`
    pub fn script(mut self, steps: usize, interval: Duration) -> ScriptedSource {
        let frames: Vec<RawFrame> = (0..steps).map(|_| self.next_frame()).collect();
        ScriptedSource::new(frames).with_interval(interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_flight() {
        let mut a = Flight::new(7);
        let mut b = Flight::new(7);
        for _ in 0..50 {
            let (fa, fb) = (a.next_frame(), b.next_frame());
            assert_eq!(fa.gps.altitude_m, fb.gps.altitude_m);
            assert_eq!(fa.battery_pct, fb.battery_pct);
            assert_eq!(fa.obstacle_distance_m, fb.obstacle_distance_m);
        }
    }

    #[test]
    fn test_readings_stay_physical_without_glitches() {
        let mut flight = Flight::new(11);
        for _ in 0..500 {
            let frame = flight.next_frame();
            assert!((2.0..=118.0).contains(&frame.gps.altitude_m));
            assert!((0.0..=100.0).contains(&frame.battery_pct));
            assert!(frame.obstacle_distance_m >= 0.5);
        }
    }

    #[test]
    fn test_glitches_produce_impossible_battery() {
        let mut flight = Flight::new(3).with_glitch_rate(1.0);
        assert!(flight.next_frame().battery_pct < 0.0);
    }
}
