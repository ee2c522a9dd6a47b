//! Non-blocking movement sequencer.
//!
//! Sequences are queued as [`Step`]s and issued one per tick once the previous step's
//! scaled travel time has elapsed:
//!
//! ```text
//! start:   door → open, wand → deployed, then random reach/wand sweeps until stopped
//! stop:    reach → rest, wand → rest, door → rest
//! reward:  door → open, dispenser → full travel, dispenser → rest, door → rest
//! ```
//!
//! Every angle is clamped to the joint's calibrated bounds before it reaches the actuator.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Actuator, ActuatorError, Joint, SpeedMultiplier};
use crate::config::{secs, JointsConfig, MotionConfig, NodeConfig, PoseConfig};

/// One queued movement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Drive a joint to an angle over `travel` (at speed 1.0).
    Move {
        joint: Joint,
        angle: f64,
        travel: Duration,
    },
    /// Hold still for `duration` (at speed 1.0).
    Pause(Duration),
}

pub struct MovementSequencer<A: Actuator> {
    actuator: A,
    joints: JointsConfig,
    poses: PoseConfig,
    timing: MotionConfig,
    speed: SpeedMultiplier,
    positions: [f64; 4],
    queue: VecDeque<Step>,
    busy_until: Option<Instant>,
    pausing: bool,
    random_motion: bool,
    rng: StdRng,
}

impl<A: Actuator> MovementSequencer<A> {
    pub fn new(config: &NodeConfig, actuator: A) -> Self {
        Self::with_rng(config, actuator, StdRng::from_entropy())
    }

    /// Deterministic random motion, for tests and simulations.
    pub fn with_seed(config: &NodeConfig, actuator: A, seed: u64) -> Self {
        Self::with_rng(config, actuator, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &NodeConfig, actuator: A, rng: StdRng) -> Self {
        let joints = config.joints.clone();
        let positions = Joint::ALL.map(|joint| joints.get(joint).rest);
        Self {
            actuator,
            joints,
            poses: config.poses.clone(),
            timing: config.motion.clone(),
            speed: SpeedMultiplier::from_config(&config.motion),
            positions,
            queue: VecDeque::new(),
            busy_until: None,
            pausing: false,
            random_motion: false,
            rng,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sequences
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue the start sequence; random motion follows once it completes.
    pub fn begin_engagement(&mut self) {
        self.queue.clear();
        self.cancel_pause();
        let t = &self.timing;
        let steps = [
            self.step(Joint::Door, self.poses.door_open, t.door_open_secs),
            self.step(Joint::Wand, self.poses.wand_deployed, t.wand_deploy_secs),
        ];
        self.queue.extend(steps);
        self.random_motion = true;
        debug!(steps = self.queue.len(), "Start sequence queued");
    }

    /// Halt random motion and queue the return to rest.
    ///
    /// A move already in flight finishes first; a pause is cut short and everything queued
    /// is dropped.
    pub fn end_engagement(&mut self) {
        self.random_motion = false;
        self.queue.clear();
        self.cancel_pause();
        let t = &self.timing;
        let steps = [
            self.step(Joint::Reach, self.joints.reach.rest, t.reach_home_secs),
            self.step(Joint::Wand, self.joints.wand.rest, t.wand_home_secs),
            self.step(Joint::Door, self.joints.door.rest, t.door_close_secs),
        ];
        self.queue.extend(steps);
        debug!("Stop sequence queued");
    }

    /// Queue the reward sequence.
    pub fn run_reward(&mut self) {
        self.random_motion = false;
        self.cancel_pause();
        let t = &self.timing;
        let steps = [
            self.step(Joint::Door, self.poses.door_open, t.reward_door_open_secs),
            self.step(Joint::Reward, self.poses.reward_travel, t.reward_out_secs),
            self.step(Joint::Reward, self.joints.reward.rest, t.reward_back_secs),
            self.step(Joint::Door, self.joints.door.rest, t.reward_door_close_secs),
        ];
        self.queue.extend(steps);
        debug!("Reward sequence queued");
    }

    /// Queue every joint back to rest, dispenser included.
    pub fn park(&mut self) {
        self.random_motion = false;
        self.cancel_pause();
        let t = &self.timing;
        let steps = [
            self.step(Joint::Reach, self.joints.reach.rest, t.reach_home_secs),
            self.step(Joint::Wand, self.joints.wand.rest, t.wand_home_secs),
            self.step(Joint::Reward, self.joints.reward.rest, t.reward_back_secs),
            self.step(Joint::Door, self.joints.door.rest, t.door_close_secs),
        ];
        self.queue.extend(steps);
        debug!("Park sequence queued");
    }

    /// Drop everything queued and stop random motion without moving.
    pub fn abort(&mut self) {
        if !self.queue.is_empty() || self.random_motion {
            warn!(dropped = self.queue.len(), "Movement aborted");
        }
        self.queue.clear();
        self.random_motion = false;
        self.busy_until = None;
        self.pausing = false;
    }

    /// Command every joint to its rest angle immediately.
    pub fn rest_all(&mut self, now: Instant) -> Result<(), ActuatorError> {
        self.abort();
        let t = &self.timing;
        let order = [
            (Joint::Reach, t.reach_home_secs),
            (Joint::Wand, t.wand_home_secs),
            (Joint::Reward, t.reward_back_secs),
            (Joint::Door, t.door_close_secs),
        ];
        for (joint, travel) in order {
            let rest = self.joints.get(joint).rest;
            self.execute(joint, rest, secs(travel), now)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Driving
    // ─────────────────────────────────────────────────────────────────────────

    /// Issue the next step if the previous one has had time to complete.
    pub fn tick(&mut self, now: Instant) -> Result<(), ActuatorError> {
        if self.busy_until.is_some_and(|until| now < until) {
            return Ok(());
        }
        self.busy_until = None;

        if self.queue.is_empty() && self.random_motion {
            self.queue_random_sweep();
        }

        match self.queue.pop_front() {
            Some(Step::Move {
                joint,
                angle,
                travel,
            }) => self.execute(joint, angle, travel, now),
            Some(Step::Pause(duration)) => {
                self.busy_until = Some(now + self.speed.scale(duration));
                self.pausing = true;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// True when nothing is queued, nothing is moving and random motion is off.
    pub fn is_idle(&self, now: Instant) -> bool {
        self.queue.is_empty()
            && !self.random_motion
            && self.busy_until.is_none_or(|until| now >= until)
    }

    pub fn is_random_motion_active(&self) -> bool {
        self.random_motion
    }

    /// Last commanded angle of a joint.
    pub fn position(&self, joint: Joint) -> f64 {
        self.positions[joint.index()]
    }

    /// Last commanded angle of every joint, in [`Joint::ALL`] order.
    pub fn positions(&self) -> [f64; 4] {
        self.positions
    }

    /// Whether every joint was last commanded to its rest angle.
    pub fn at_rest(&self) -> bool {
        Joint::ALL
            .iter()
            .all(|joint| self.position(*joint) == self.joints.get(*joint).rest)
    }

    pub fn speed(&self) -> &SpeedMultiplier {
        &self.speed
    }

    pub fn speed_mut(&mut self) -> &mut SpeedMultiplier {
        &mut self.speed
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    fn step(&self, joint: Joint, angle: f64, travel_secs: f64) -> Step {
        Step::Move {
            joint,
            angle,
            travel: secs(travel_secs),
        }
    }

    fn cancel_pause(&mut self) {
        if self.pausing {
            self.busy_until = None;
            self.pausing = false;
        }
    }

    fn queue_random_sweep(&mut self) {
        let p = &self.poses;
        let t = &self.timing;
        let reach = self.rng.gen_range(p.reach_min..=p.reach_max);
        let wand = self.rng.gen_range(p.wand_sweep_min..=p.wand_sweep_max);
        let wait = self.rng.gen_range(t.random_wait_min_secs..=t.random_wait_max_secs);

        let steps = [
            self.step(Joint::Reach, reach, t.random_move_secs),
            self.step(Joint::Wand, wand, t.random_move_secs),
            Step::Pause(secs(wait)),
        ];
        self.queue.extend(steps);
    }

    fn execute(
        &mut self,
        joint: Joint,
        angle: f64,
        travel: Duration,
        now: Instant,
    ) -> Result<(), ActuatorError> {
        let calibration = *self.joints.get(joint);
        let target = calibration.clamp(angle);
        if target != angle {
            warn!(joint = %joint, requested = angle, clamped = target, "Angle clamped to joint bounds");
        }

        let travel = self.speed.scale(travel);
        self.actuator
            .set_channel_target(calibration.channel, target, travel)?;

        debug!(
            joint = %joint,
            channel = calibration.channel,
            from = self.position(joint),
            to = target,
            travel_ms = travel.as_millis() as u64,
            "Joint moving"
        );
        self.positions[joint.index()] = target;
        self.busy_until = Some(now + travel);
        self.pausing = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::RecordingActuator;
    use crate::types::NodeRole;

    fn sequencer() -> (MovementSequencer<RecordingActuator>, RecordingActuator) {
        let actuator = RecordingActuator::new();
        let config = NodeConfig::for_role(NodeRole::Main);
        (MovementSequencer::with_seed(&config, actuator.clone(), 42), actuator)
    }

    /// Tick every 100ms until idle or `limit` elapses; returns the time reached.
    fn run_until_idle(
        seq: &mut MovementSequencer<RecordingActuator>,
        mut now: Instant,
        limit: Duration,
    ) -> Instant {
        let end = now + limit;
        while now < end {
            seq.tick(now).unwrap();
            if seq.is_idle(now) {
                break;
            }
            now += Duration::from_millis(100);
        }
        now
    }

    #[test]
    fn test_starts_at_rest() {
        let (seq, actuator) = sequencer();
        assert!(seq.at_rest());
        assert_eq!(seq.positions(), [0.0, 45.0, 130.0, 50.0]);
        assert!(actuator.calls().is_empty());
    }

    #[test]
    fn test_start_sequence_order_then_random() {
        let (mut seq, actuator) = sequencer();
        let t0 = Instant::now();
        seq.begin_engagement();

        seq.tick(t0).unwrap();
        assert_eq!(actuator.calls().len(), 1);
        assert_eq!(actuator.calls()[0].channel, 3);
        assert_eq!(actuator.calls()[0].angle, 130.0);

        // Door travel is 3s; nothing else is issued before it completes.
        seq.tick(t0 + Duration::from_millis(2900)).unwrap();
        assert_eq!(actuator.calls().len(), 1);

        seq.tick(t0 + Duration::from_secs(3)).unwrap();
        assert_eq!(actuator.calls()[1].channel, 2);
        assert_eq!(actuator.calls()[1].angle, 100.0);

        // Random sweeps stay inside their ranges.
        let mut now = t0 + Duration::from_secs(5);
        for _ in 0..300 {
            seq.tick(now).unwrap();
            now += Duration::from_millis(100);
        }
        let calls = actuator.calls();
        assert!(calls.len() > 4);
        for call in &calls[2..] {
            match call.channel {
                1 => assert!((45.0..=160.0).contains(&call.angle)),
                2 => assert!((75.0..=100.0).contains(&call.angle)),
                other => panic!("unexpected channel {other} during random motion"),
            }
        }
        assert!(!seq.is_idle(now));
    }

    #[test]
    fn test_stop_returns_to_rest_from_any_point() {
        for stop_after_ms in [0u64, 1_000, 4_000, 9_000, 20_000] {
            let (mut seq, _) = sequencer();
            let t0 = Instant::now();
            seq.begin_engagement();
            let mut now = t0;
            while now < t0 + Duration::from_millis(stop_after_ms) {
                seq.tick(now).unwrap();
                now += Duration::from_millis(100);
            }

            seq.end_engagement();
            let done = run_until_idle(&mut seq, now, Duration::from_secs(30));
            assert!(seq.is_idle(done), "not idle after stop at {stop_after_ms}ms");
            assert!(seq.at_rest(), "not at rest after stop at {stop_after_ms}ms");
            assert_eq!(seq.positions(), [0.0, 45.0, 130.0, 50.0]);
        }
    }

    #[test]
    fn test_reward_sequence_duration_scales_with_speed() {
        let (mut seq, actuator) = sequencer();
        let t0 = Instant::now();
        seq.run_reward();
        let done = run_until_idle(&mut seq, t0, Duration::from_secs(30));
        // 3 + 3 + 2.5 + 3 seconds at speed 1.0
        assert_eq!(done.duration_since(t0), Duration::from_millis(11_500));

        let angles: Vec<(u8, f64)> = actuator.calls().iter().map(|c| (c.channel, c.angle)).collect();
        assert_eq!(angles, vec![(3, 130.0), (0, 180.0), (0, 0.0), (3, 50.0)]);

        let (mut fast, _) = sequencer();
        fast.speed_mut().set(2.0).unwrap();
        fast.run_reward();
        let done = run_until_idle(&mut fast, t0, Duration::from_secs(30));
        assert_eq!(done.duration_since(t0), Duration::from_millis(5_800));
    }

    #[test]
    fn test_angles_clamped_to_joint_bounds() {
        let actuator = RecordingActuator::new();
        let mut config = NodeConfig::for_role(NodeRole::Main);
        config.poses.door_open = 170.0;
        let mut seq = MovementSequencer::with_seed(&config, actuator.clone(), 1);

        seq.begin_engagement();
        seq.tick(Instant::now()).unwrap();
        assert_eq!(actuator.last_angle(3), Some(130.0));
        assert_eq!(seq.position(Joint::Door), 130.0);
    }

    #[test]
    fn test_actuator_failure_surfaces_and_abort_clears() {
        let (mut seq, actuator) = sequencer();
        let t0 = Instant::now();
        actuator.set_failing(true);
        seq.begin_engagement();
        assert!(seq.tick(t0).is_err());

        seq.abort();
        assert!(seq.is_idle(t0));
        assert!(seq.tick(t0).is_ok());
    }

    #[test]
    fn test_park_after_interrupted_reward() {
        let (mut seq, _) = sequencer();
        let t0 = Instant::now();
        seq.run_reward();
        let mut now = t0;
        while now < t0 + Duration::from_secs(4) {
            seq.tick(now).unwrap();
            now += Duration::from_millis(100);
        }
        assert_eq!(seq.position(Joint::Reward), 180.0);

        seq.abort();
        seq.park();
        let done = run_until_idle(&mut seq, now, Duration::from_secs(30));
        assert!(seq.is_idle(done));
        assert!(seq.at_rest());
    }

    #[test]
    fn test_rest_all_commands_every_joint() {
        let (mut seq, actuator) = sequencer();
        seq.begin_engagement();
        seq.tick(Instant::now()).unwrap();
        actuator.clear();

        seq.rest_all(Instant::now()).unwrap();
        let channels: Vec<u8> = actuator.calls().iter().map(|c| c.channel).collect();
        assert_eq!(channels, vec![1, 2, 0, 3]);
        assert!(seq.at_rest());
        assert!(!seq.is_random_motion_active());
    }
}
