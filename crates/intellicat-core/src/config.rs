//! Node configuration.
//!
//! Every tunable of a node lives here, grouped by the component that reads it. The binary
//! loads this from TOML and applies CLI overrides; [`NodeConfig::validate`] must pass before
//! the control loop starts. Validation is the only place a node is allowed to refuse to run.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::motion::Joint;
use crate::types::NodeRole;

/// Highest channel index on the servo controller.
pub const MAX_CHANNEL: u8 = 15;

/// Physical travel limit of every joint, in degrees.
pub const MAX_ANGLE: f64 = 180.0;

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("node role is required (main or secondary)")]
    MissingRole,

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Convert fractional seconds from the config file into a `Duration`.
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node role; must be set by the file or on the command line
    #[serde(default)]
    pub role: Option<NodeRole>,

    /// Control loop tick in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Back-off after a collaborator failure before the node retries, in seconds
    #[serde(default = "default_fault_retry_secs")]
    pub fault_retry_secs: u64,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub proximity: ProximityConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub motion: MotionConfig,

    #[serde(default)]
    pub joints: JointsConfig,

    #[serde(default)]
    pub poses: PoseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Detector label that counts as a target
    pub target_label: String,

    /// Minimum detector confidence for a box to be considered
    pub min_confidence: f32,

    /// Seconds between inference runs while engaging
    pub inference_interval_secs: f64,

    /// Frame resolution requested from the source, e.g. "640x480"
    pub resolution: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Area ratio at or below which the score is 1
    pub lower_ratio: f64,

    /// Area ratio at or above which the score is 10
    pub upper_ratio: f64,

    /// Score that must be exceeded to count as close
    pub threshold: u8,

    /// Seconds the score must stay above the threshold
    pub sustain_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Seconds without any detection before an engagement is abandoned
    pub no_detection_secs: u64,

    /// Seconds before an engagement without proximity success is abandoned
    pub engagement_secs: u64,

    /// Seconds MAIN waits for the peer's completion message
    pub peer_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// First hour of the day with automatic triggers
    pub trigger_hour: u32,

    /// Last hour of the day with automatic triggers
    pub last_hour: u32,

    /// Successful cycles allowed per hour bucket
    pub max_cycles_per_hour: u32,

    /// Re-arm the trigger right after a success (back-to-back cycles until the cap)
    pub rearm_on_success: bool,

    /// Whether an operator reward request consumes a cycle slot
    pub manual_reward_counts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Speed multiplier at startup
    pub default_speed: f64,
    pub speed_floor: f64,
    pub speed_ceiling: f64,
    /// Factor applied by `faster` / `slower`
    pub speed_step: f64,

    /// Travel time of one random move at speed 1.0
    pub random_move_secs: f64,
    pub random_wait_min_secs: f64,
    pub random_wait_max_secs: f64,

    // Start / stop sequence travel times at speed 1.0
    pub door_open_secs: f64,
    pub wand_deploy_secs: f64,
    pub reach_home_secs: f64,
    pub wand_home_secs: f64,
    pub door_close_secs: f64,

    // Reward sequence travel times at speed 1.0
    pub reward_door_open_secs: f64,
    pub reward_out_secs: f64,
    pub reward_back_secs: f64,
    pub reward_door_close_secs: f64,
}

/// Calibration of one joint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointConfig {
    /// Output channel on the servo controller
    pub channel: u8,
    /// Lowest safe angle
    pub min: f64,
    /// Highest safe angle
    pub max: f64,
    /// Angle the joint returns to at rest
    pub rest: f64,
}

impl JointConfig {
    /// Clamp an angle into this joint's safe range.
    pub fn clamp(&self, angle: f64) -> f64 {
        angle.clamp(self.min, self.max)
    }

    pub fn contains(&self, angle: f64) -> bool {
        angle >= self.min && angle <= self.max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JointsConfig {
    pub reward: JointConfig,
    pub reach: JointConfig,
    pub wand: JointConfig,
    pub door: JointConfig,
}

impl JointsConfig {
    pub fn get(&self, joint: Joint) -> &JointConfig {
        match joint {
            Joint::Reward => &self.reward,
            Joint::Reach => &self.reach,
            Joint::Wand => &self.wand,
            Joint::Door => &self.door,
        }
    }
}

/// Named target angles used by the movement sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    pub door_open: f64,
    pub wand_deployed: f64,
    pub wand_sweep_min: f64,
    pub wand_sweep_max: f64,
    pub reach_min: f64,
    pub reach_max: f64,
    /// Dispenser angle at the far end of its travel
    pub reward_travel: f64,
}

// Default value functions
fn default_tick_ms() -> u64 {
    100
}

/// Longest fault back-off accepted by [`NodeConfig::validate`].
pub const MAX_FAULT_RETRY_SECS: u64 = 3600;

fn default_fault_retry_secs() -> u64 {
    5
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: None,
            tick_ms: default_tick_ms(),
            fault_retry_secs: default_fault_retry_secs(),
            detection: DetectionConfig::default(),
            proximity: ProximityConfig::default(),
            timeouts: TimeoutConfig::default(),
            schedule: ScheduleConfig::default(),
            motion: MotionConfig::default(),
            joints: JointsConfig::default(),
            poses: PoseConfig::default(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            target_label: "cat".to_string(),
            min_confidence: 0.5,
            inference_interval_secs: 5.0,
            resolution: "640x480".to_string(),
        }
    }
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            lower_ratio: 0.01,
            upper_ratio: 0.25,
            threshold: 8,
            sustain_secs: 10.0,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            no_detection_secs: 30,
            engagement_secs: 120,
            peer_secs: 180,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            trigger_hour: 9,
            last_hour: 23,
            max_cycles_per_hour: 4,
            rearm_on_success: false,
            manual_reward_counts: false,
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            default_speed: 1.0,
            speed_floor: 0.05,
            speed_ceiling: 25.0,
            speed_step: 1.25,
            random_move_secs: 2.0,
            random_wait_min_secs: 1.5,
            random_wait_max_secs: 2.8,
            door_open_secs: 3.0,
            wand_deploy_secs: 2.0,
            reach_home_secs: 2.5,
            wand_home_secs: 2.0,
            door_close_secs: 3.0,
            reward_door_open_secs: 3.0,
            reward_out_secs: 3.0,
            reward_back_secs: 2.5,
            reward_door_close_secs: 3.0,
        }
    }
}

impl Default for JointsConfig {
    fn default() -> Self {
        Self {
            reward: JointConfig {
                channel: 0,
                min: 0.0,
                max: 180.0,
                rest: 0.0,
            },
            reach: JointConfig {
                channel: 1,
                min: 45.0,
                max: 160.0,
                rest: 45.0,
            },
            wand: JointConfig {
                channel: 2,
                min: 75.0,
                max: 130.0,
                rest: 130.0,
            },
            door: JointConfig {
                channel: 3,
                min: 50.0,
                max: 130.0,
                rest: 50.0,
            },
        }
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            door_open: 130.0,
            wand_deployed: 100.0,
            wand_sweep_min: 75.0,
            wand_sweep_max: 100.0,
            reach_min: 45.0,
            reach_max: 160.0,
            reward_travel: 180.0,
        }
    }
}

impl TimeoutConfig {
    pub fn no_detection(&self) -> Duration {
        Duration::from_secs(self.no_detection_secs)
    }

    pub fn engagement(&self) -> Duration {
        Duration::from_secs(self.engagement_secs)
    }

    pub fn peer(&self) -> Duration {
        Duration::from_secs(self.peer_secs)
    }
}

impl DetectionConfig {
    pub fn inference_interval(&self) -> Duration {
        secs(self.inference_interval_secs)
    }

    /// Parse the `WxH` resolution string.
    pub fn frame_size(&self) -> Result<(u32, u32), ConfigError> {
        let invalid = || ConfigError::invalid("detection.resolution", "expected WIDTHxHEIGHT, e.g. 640x480");
        let (w, h) = self.resolution.split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok((width, height))
    }
}

impl NodeConfig {
    /// Create a config for the given role with default values
    pub fn for_role(role: NodeRole) -> Self {
        Self {
            role: Some(role),
            ..Default::default()
        }
    }

    /// The configured role, or an error if none was given.
    pub fn role(&self) -> Result<NodeRole, ConfigError> {
        self.role.ok_or(ConfigError::MissingRole)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn fault_retry(&self) -> Duration {
        Duration::from_secs(self.fault_retry_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.role()?;

        if self.tick_ms == 0 {
            return Err(ConfigError::invalid("tick_ms", "must be greater than 0"));
        }
        if self.fault_retry_secs > MAX_FAULT_RETRY_SECS {
            return Err(ConfigError::invalid(
                "fault_retry_secs",
                format!("must be at most {MAX_FAULT_RETRY_SECS}"),
            ));
        }

        self.validate_detection()?;
        self.validate_proximity()?;
        self.validate_timeouts()?;
        self.validate_schedule()?;
        self.validate_motion()?;
        self.validate_joints()?;
        self.validate_poses()?;

        Ok(())
    }

    fn validate_detection(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        if d.target_label.trim().is_empty() {
            return Err(ConfigError::invalid("detection.target_label", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&d.min_confidence) {
            return Err(ConfigError::invalid("detection.min_confidence", "must be between 0 and 1"));
        }
        positive("detection.inference_interval_secs", d.inference_interval_secs)?;
        d.frame_size()?;
        Ok(())
    }

    fn validate_proximity(&self) -> Result<(), ConfigError> {
        let p = &self.proximity;
        if !(0.0..1.0).contains(&p.lower_ratio) {
            return Err(ConfigError::invalid("proximity.lower_ratio", "must be in [0, 1)"));
        }
        if !(p.upper_ratio > p.lower_ratio && p.upper_ratio <= 1.0) {
            return Err(ConfigError::invalid(
                "proximity.upper_ratio",
                "must be greater than lower_ratio and at most 1",
            ));
        }
        if !(1..10).contains(&p.threshold) {
            return Err(ConfigError::invalid("proximity.threshold", "must be between 1 and 9"));
        }
        positive("proximity.sustain_secs", p.sustain_secs)?;
        Ok(())
    }

    fn validate_timeouts(&self) -> Result<(), ConfigError> {
        let t = &self.timeouts;
        for (field, value) in [
            ("timeouts.no_detection_secs", t.no_detection_secs),
            ("timeouts.engagement_secs", t.engagement_secs),
            ("timeouts.peer_secs", t.peer_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than 0"));
            }
        }
        Ok(())
    }

    fn validate_schedule(&self) -> Result<(), ConfigError> {
        let s = &self.schedule;
        if s.trigger_hour > 23 {
            return Err(ConfigError::invalid("schedule.trigger_hour", "must be between 0 and 23"));
        }
        if s.last_hour > 23 {
            return Err(ConfigError::invalid("schedule.last_hour", "must be between 0 and 23"));
        }
        if s.max_cycles_per_hour == 0 {
            return Err(ConfigError::invalid(
                "schedule.max_cycles_per_hour",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    fn validate_motion(&self) -> Result<(), ConfigError> {
        let m = &self.motion;
        positive("motion.speed_floor", m.speed_floor)?;
        if !(m.speed_ceiling.is_finite() && m.speed_ceiling > m.speed_floor) {
            return Err(ConfigError::invalid(
                "motion.speed_ceiling",
                "must be greater than speed_floor",
            ));
        }
        if !(m.default_speed >= m.speed_floor && m.default_speed <= m.speed_ceiling) {
            return Err(ConfigError::invalid(
                "motion.default_speed",
                "must be between speed_floor and speed_ceiling",
            ));
        }
        if !(m.speed_step.is_finite() && m.speed_step > 1.0) {
            return Err(ConfigError::invalid("motion.speed_step", "must be greater than 1"));
        }
        if m.random_wait_max_secs < m.random_wait_min_secs {
            return Err(ConfigError::invalid(
                "motion.random_wait_max_secs",
                "must not be less than random_wait_min_secs",
            ));
        }
        for (field, value) in [
            ("motion.random_move_secs", m.random_move_secs),
            ("motion.random_wait_min_secs", m.random_wait_min_secs),
            ("motion.door_open_secs", m.door_open_secs),
            ("motion.wand_deploy_secs", m.wand_deploy_secs),
            ("motion.reach_home_secs", m.reach_home_secs),
            ("motion.wand_home_secs", m.wand_home_secs),
            ("motion.door_close_secs", m.door_close_secs),
            ("motion.reward_door_open_secs", m.reward_door_open_secs),
            ("motion.reward_out_secs", m.reward_out_secs),
            ("motion.reward_back_secs", m.reward_back_secs),
            ("motion.reward_door_close_secs", m.reward_door_close_secs),
        ] {
            non_negative(field, value)?;
        }
        Ok(())
    }

    fn validate_joints(&self) -> Result<(), ConfigError> {
        let mut channels = HashSet::new();
        for joint in Joint::ALL {
            let cfg = self.joints.get(joint);
            let field = format!("joints.{}", joint.as_str());
            if cfg.channel > MAX_CHANNEL {
                return Err(ConfigError::invalid(
                    format!("{field}.channel"),
                    format!("must be between 0 and {MAX_CHANNEL}"),
                ));
            }
            if !channels.insert(cfg.channel) {
                return Err(ConfigError::invalid(
                    format!("{field}.channel"),
                    format!("channel {} is assigned to more than one joint", cfg.channel),
                ));
            }
            if !(cfg.min.is_finite() && cfg.max.is_finite()) || cfg.min < 0.0 || cfg.max > MAX_ANGLE {
                return Err(ConfigError::invalid(
                    field,
                    format!("angle bounds must lie within 0..={MAX_ANGLE}"),
                ));
            }
            if cfg.min >= cfg.max {
                return Err(ConfigError::invalid(field, "min must be less than max"));
            }
            if !cfg.contains(cfg.rest) {
                return Err(ConfigError::invalid(
                    format!("{field}.rest"),
                    "must lie within the joint's min/max",
                ));
            }
        }
        Ok(())
    }

    fn validate_poses(&self) -> Result<(), ConfigError> {
        let p = &self.poses;
        let j = &self.joints;
        for (field, joint, angle) in [
            ("poses.door_open", &j.door, p.door_open),
            ("poses.wand_deployed", &j.wand, p.wand_deployed),
            ("poses.wand_sweep_min", &j.wand, p.wand_sweep_min),
            ("poses.wand_sweep_max", &j.wand, p.wand_sweep_max),
            ("poses.reach_min", &j.reach, p.reach_min),
            ("poses.reach_max", &j.reach, p.reach_max),
            ("poses.reward_travel", &j.reward, p.reward_travel),
        ] {
            if !joint.contains(angle) {
                return Err(ConfigError::invalid(
                    field,
                    format!("{angle} is outside the joint's safe range {}..={}", joint.min, joint.max),
                ));
            }
        }
        if p.wand_sweep_min > p.wand_sweep_max {
            return Err(ConfigError::invalid("poses.wand_sweep_min", "must not exceed wand_sweep_max"));
        }
        if p.reach_min > p.reach_max {
            return Err(ConfigError::invalid("poses.reach_min", "must not exceed reach_max"));
        }
        Ok(())
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be greater than 0"))
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must not be negative"))
    }
}
