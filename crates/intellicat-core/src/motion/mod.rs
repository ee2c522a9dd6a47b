//! Actuated joints, speed control and movement sequences.
//!
//! The orchestrator never talks to the actuator directly; it asks the
//! [`MovementSequencer`] for named sequences (start, stop, reward) and the sequencer turns
//! them into clamped, speed-scaled channel targets issued one step at a time.

mod actuator;
mod sequencer;

pub use actuator::{Actuator, ActuatorCall, ActuatorError, RecordingActuator};
pub use sequencer::{MovementSequencer, Step};

use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::config::{secs, MotionConfig};

/// The four actuated joints of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Joint {
    /// Reward dispenser arm
    Reward,
    /// In-out slide
    Reach,
    /// Play wand: deploy and side-to-side sweep
    Wand,
    /// Access door
    Door,
}

impl Joint {
    pub const ALL: [Joint; 4] = [Joint::Reward, Joint::Reach, Joint::Wand, Joint::Door];

    pub fn as_str(&self) -> &'static str {
        match self {
            Joint::Reward => "reward",
            Joint::Reach => "reach",
            Joint::Wand => "wand",
            Joint::Door => "door",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Joint::Reward => 0,
            Joint::Reach => 1,
            Joint::Wand => 2,
            Joint::Door => 3,
        }
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speed errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpeedError {
    #[error("speed must be a positive number, got {0}")]
    NotPositive(f64),
}

/// Global motion speed. Travel times are divided by it, so 2.0 moves twice as fast.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedMultiplier {
    value: f64,
    floor: f64,
    ceiling: f64,
    step: f64,
}

impl SpeedMultiplier {
    pub fn from_config(config: &MotionConfig) -> Self {
        Self {
            value: config.default_speed.clamp(config.speed_floor, config.speed_ceiling),
            floor: config.speed_floor,
            ceiling: config.speed_ceiling,
            step: config.speed_step,
        }
    }

    pub fn get(&self) -> f64 {
        self.value
    }

    /// Set an explicit value, clamped into the configured bounds.
    pub fn set(&mut self, value: f64) -> Result<f64, SpeedError> {
        if !(value.is_finite() && value > 0.0) {
            return Err(SpeedError::NotPositive(value));
        }
        self.update(value);
        Ok(self.value)
    }

    pub fn faster(&mut self) -> f64 {
        self.update(self.value * self.step);
        self.value
    }

    pub fn slower(&mut self) -> f64 {
        self.update(self.value / self.step);
        self.value
    }

    /// Scale a base travel time by the current speed.
    pub fn scale(&self, base: Duration) -> Duration {
        secs(base.as_secs_f64() / self.value)
    }

    fn update(&mut self, value: f64) {
        let previous = self.value;
        self.value = value.clamp(self.floor, self.ceiling);
        info!(from = previous, to = self.value, "Speed changed");
    }
}

impl Default for SpeedMultiplier {
    fn default() -> Self {
        Self::from_config(&MotionConfig::default())
    }
}

impl fmt::Display for SpeedMultiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}x", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_defaults_and_steps() {
        let mut speed = SpeedMultiplier::default();
        assert_eq!(speed.get(), 1.0);

        assert!((speed.faster() - 1.25).abs() < 1e-9);
        speed.slower();
        speed.slower();
        assert!((speed.get() - 0.8).abs() < 1e-9);
        assert_eq!(speed.to_string(), "0.80x");
    }

    #[test]
    fn test_speed_bounds() {
        let mut speed = SpeedMultiplier::default();
        for _ in 0..100 {
            speed.slower();
        }
        assert_eq!(speed.get(), 0.05);

        for _ in 0..100 {
            speed.faster();
        }
        assert_eq!(speed.get(), 25.0);

        assert_eq!(speed.set(1000.0), Ok(25.0));
        assert_eq!(speed.set(0.0), Err(SpeedError::NotPositive(0.0)));
        assert!(speed.set(f64::NAN).is_err());
        assert_eq!(speed.get(), 25.0);
    }

    #[test]
    fn test_speed_scales_travel_time() {
        let mut speed = SpeedMultiplier::default();
        assert_eq!(speed.scale(Duration::from_secs(3)), Duration::from_secs(3));
        speed.set(2.0).unwrap();
        assert_eq!(speed.scale(Duration::from_secs(3)), Duration::from_millis(1500));
        speed.set(0.5).unwrap();
        assert_eq!(speed.scale(Duration::from_secs(3)), Duration::from_secs(6));
    }

    #[test]
    fn test_joint_order() {
        let names: Vec<&str> = Joint::ALL.iter().map(Joint::as_str).collect();
        assert_eq!(names, ["reward", "reach", "wand", "door"]);
        for (i, joint) in Joint::ALL.iter().enumerate() {
            assert_eq!(joint.index(), i);
        }
    }
}
