//! Per-node session state machine.
//!
//! The orchestrator is synchronous and owns every piece of mutable node state. The runtime
//! calls [`SessionOrchestrator::tick`] on a fixed interval with the current [`Timestamp`]
//! and whatever the detector produced; each tick runs, in order:
//!
//! 1. operator commands
//! 2. peer link messages
//! 3. state evaluation (triggers, timeouts, proximity, peer wait, reward completion)
//! 4. the movement sequencer

use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::state::{EngagementOutcome, SessionState, StatusSnapshot};
use crate::command::{CommandChannel, OperatorCommand, HELP};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::link::{LinkError, LinkTransport, MessageKind, PeerLink, PeerMessage};
use crate::motion::{Actuator, MovementSequencer};
use crate::proximity::ProximityScorer;
use crate::schedule::CycleScheduler;
use crate::types::{NodeRole, Timestamp};
use crate::vision::Observation;

/// Why an engagement started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartReason {
    Schedule,
    Manual,
    Peer,
}

impl StartReason {
    fn as_str(&self) -> &'static str {
        match self {
            StartReason::Schedule => "schedule",
            StartReason::Manual => "manual",
            StartReason::Peer => "peer",
        }
    }
}

/// Bookkeeping for the engagement in progress.
#[derive(Debug, Clone, Copy)]
struct Engagement {
    id: Uuid,
    started: Instant,
    target_seen: bool,
}

/// Whether a running reward counts toward the hourly cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RewardKind {
    Cycle,
    Manual { counts: bool },
}

pub struct SessionOrchestrator<A: Actuator, T: LinkTransport> {
    role: NodeRole,
    config: NodeConfig,
    state: SessionState,
    link: PeerLink<T>,
    link_up: bool,
    motion: MovementSequencer<A>,
    scorer: ProximityScorer,
    scheduler: CycleScheduler,
    commands: CommandChannel,
    engagement: Option<Engagement>,
    last_session_id: Option<Uuid>,
    peer_wait_started: Option<Instant>,
    last_inference: Option<Instant>,
    fault_until: Option<Instant>,
    park_pending: bool,
    reward: Option<RewardKind>,
    start_requested: Option<StartReason>,
    last_outcome: Option<EngagementOutcome>,
}

impl<A: Actuator, T: LinkTransport> SessionOrchestrator<A, T> {
    /// Validate the configuration and build a node at rest.
    pub fn new(
        config: NodeConfig,
        actuator: A,
        transport: T,
        commands: CommandChannel,
        now: Timestamp,
    ) -> Result<Self> {
        let motion = MovementSequencer::new(&config, actuator);
        Self::with_motion(config, motion, transport, commands, now)
    }

    /// Like [`new`](Self::new) but with a caller-built sequencer (e.g. a seeded one).
    pub fn with_motion(
        config: NodeConfig,
        motion: MovementSequencer<A>,
        transport: T,
        commands: CommandChannel,
        now: Timestamp,
    ) -> Result<Self> {
        config.validate()?;
        let role = config.role()?;

        info!(
            role = %role,
            trigger_hour = config.schedule.trigger_hour,
            cap = config.schedule.max_cycles_per_hour,
            "Session orchestrator ready"
        );

        Ok(Self {
            role,
            state: SessionState::Idle,
            link: PeerLink::new(role, transport),
            link_up: false,
            motion,
            scorer: ProximityScorer::from_config(&config.proximity),
            scheduler: CycleScheduler::new(&config.schedule, now.wall),
            commands,
            engagement: None,
            last_session_id: None,
            peer_wait_started: None,
            last_inference: None,
            fault_until: None,
            park_pending: false,
            reward: None,
            start_requested: None,
            last_outcome: None,
            config,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Control loop entry points
    // ─────────────────────────────────────────────────────────────────────────

    /// Advance the node by one tick. Never fails; collaborator errors are handled inside.
    pub fn tick(&mut self, now: Timestamp, observation: Observation) -> SessionState {
        self.process_commands(now);
        self.process_link(now);
        self.evaluate(now, observation);

        if let Err(err) = self.motion.tick(now.instant) {
            self.handle_motion_error(now, err.into());
        }

        self.state
    }

    /// Whether the runtime should run detection now. True at most once per inference
    /// interval and only while engaging.
    pub fn claim_inference_slot(&mut self, now: Timestamp) -> bool {
        if self.state != SessionState::Engaging {
            return false;
        }
        let due = self
            .last_inference
            .is_none_or(|last| now.since(last) >= self.config.detection.inference_interval());
        if due {
            self.last_inference = Some(now.instant);
        }
        due
    }

    /// Drive every joint to rest before the process exits.
    pub fn shutdown(&mut self, now: Timestamp) -> Result<()> {
        info!(role = %self.role, state = %self.state, "Shutting down, parking joints");
        self.engagement = None;
        self.reward = None;
        self.transition(SessionState::Idle, "shutdown");
        self.motion.rest_all(now.instant)?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_outcome(&self) -> Option<EngagementOutcome> {
        self.last_outcome
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up
    }

    /// Id of the current engagement, or of the last one if none is running.
    pub fn session_id(&self) -> Option<Uuid> {
        self.engagement.map(|e| e.id).or(self.last_session_id)
    }

    pub fn scheduler(&self) -> &CycleScheduler {
        &self.scheduler
    }

    pub fn motion(&self) -> &MovementSequencer<A> {
        &self.motion
    }

    pub fn scorer(&self) -> &ProximityScorer {
        &self.scorer
    }

    pub fn link(&self) -> &PeerLink<T> {
        &self.link
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            role: self.role,
            state: self.state,
            bucket: self.scheduler.bucket(),
            successes: self.scheduler.successes(),
            cap: self.scheduler.cap(),
            speed: self.motion.speed().get(),
            link_up: self.link_up,
            last_score: self.scorer.last_score().map(|s| s.value()),
            last_outcome: self.last_outcome,
            session_id: self.session_id(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operator commands
    // ─────────────────────────────────────────────────────────────────────────

    fn process_commands(&mut self, now: Timestamp) {
        for command in self.commands.drain() {
            debug!(role = %self.role, command = %command, "Operator command");
            self.apply_command(command, now);
        }
    }

    fn apply_command(&mut self, command: OperatorCommand, now: Timestamp) {
        match command {
            OperatorCommand::Start => self.request_manual_start(now),
            OperatorCommand::Dispense => self.request_manual_reward(now),
            OperatorCommand::SetSpeed(value) => match self.motion.speed_mut().set(value) {
                Ok(speed) => info!(speed, "Speed set"),
                Err(err) => warn!(error = %Error::from(err), "Speed not changed"),
            },
            OperatorCommand::Faster => {
                let speed = self.motion.speed_mut().faster();
                info!(speed, "Speed increased");
            }
            OperatorCommand::Slower => {
                let speed = self.motion.speed_mut().slower();
                info!(speed, "Speed decreased");
            }
            OperatorCommand::QuerySpeed => {
                info!(speed = %self.motion.speed(), "Current speed");
            }
            OperatorCommand::Status => {
                info!(status = %self.status(), "Node status");
            }
            OperatorCommand::Help => {
                info!("\n{HELP}");
            }
        }
    }

    fn request_manual_start(&mut self, now: Timestamp) {
        if !self.state.is_rest() {
            info!(state = %self.state, "Manual start ignored, session in progress");
            return;
        }
        match self.role {
            NodeRole::Main => {
                if self.scheduler.request_manual_start(now.wall) {
                    info!("Manual start accepted");
                }
            }
            NodeRole::Secondary => {
                self.start_requested = Some(StartReason::Manual);
                info!("Manual start accepted");
            }
        }
    }

    fn request_manual_reward(&mut self, now: Timestamp) {
        if !self.role.is_main() {
            warn!("Reward ignored, only MAIN dispenses rewards");
            return;
        }
        if !self.state.is_rest() {
            warn!(state = %self.state, "Reward ignored, session in progress");
            return;
        }

        let counts = self.config.schedule.manual_reward_counts;
        if counts && self.scheduler.cap_reached(now.wall) {
            warn!(
                successes = self.scheduler.successes(),
                cap = self.scheduler.cap(),
                "Reward refused, cycle cap reached"
            );
            return;
        }

        info!(counts, "Manual reward");
        self.begin_reward(RewardKind::Manual { counts });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Peer link
    // ─────────────────────────────────────────────────────────────────────────

    fn process_link(&mut self, now: Timestamp) {
        match self.link.poll() {
            Ok(messages) => {
                self.set_link_up(true, None);
                for message in messages {
                    self.handle_message(message, now);
                }
            }
            Err(err) => {
                self.set_link_up(false, Some(&err));
                if self.state == SessionState::AwaitingPeer {
                    self.fault(now, err.into());
                }
            }
        }
    }

    fn set_link_up(&mut self, up: bool, error: Option<&LinkError>) {
        if up == self.link_up {
            return;
        }
        self.link_up = up;
        match error {
            None => info!(role = %self.role, "Peer link up"),
            Some(err) => warn!(role = %self.role, error = %err, "Peer link down"),
        }
    }

    fn handle_message(&mut self, message: PeerMessage, now: Timestamp) {
        match (self.role, message.kind) {
            (NodeRole::Main, MessageKind::Done) if self.state == SessionState::AwaitingPeer => {
                let waited = self.peer_wait_started.map(|start| now.since(start));
                info!(
                    message = %message,
                    waited_ms = waited.map(|w| w.as_millis() as u64),
                    "Peer finished its engagement"
                );
                self.peer_wait_started = None;
                self.begin_reward(RewardKind::Cycle);
            }
            (NodeRole::Main, MessageKind::Ack) if self.state == SessionState::AwaitingPeer => {
                info!(message = %message, "Peer acknowledged start");
            }
            (NodeRole::Secondary, MessageKind::Done) if self.state.is_rest() => {
                info!(message = %message, "Start signal from MAIN");
                self.start_requested = Some(StartReason::Peer);
                if let Err(err) = self.link.send(MessageKind::Ack) {
                    self.set_link_up(false, Some(&err));
                }
            }
            _ => {
                debug!(
                    role = %self.role,
                    state = %self.state,
                    message = %message,
                    "Discarding peer message outside expected state"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State evaluation
    // ─────────────────────────────────────────────────────────────────────────

    fn evaluate(&mut self, now: Timestamp, observation: Observation) {
        match self.state {
            SessionState::Idle | SessionState::AwaitingTrigger => self.evaluate_rest(now),
            SessionState::Engaging => self.evaluate_engaging(now, observation),
            SessionState::CloseAchieved => self.finish_close(now),
            SessionState::TimedOut => self.transition(SessionState::Idle, "timed out"),
            SessionState::AwaitingPeer => self.evaluate_peer_wait(now),
            SessionState::Rewarding => self.evaluate_reward(now),
        }
    }

    fn evaluate_rest(&mut self, now: Timestamp) {
        if self.park_pending && !self.in_backoff(now) {
            info!(role = %self.role, "Retrying park");
            self.park_pending = false;
            self.motion.park();
        }

        let eligible = self.is_eligible(now);
        let next = if eligible {
            SessionState::AwaitingTrigger
        } else {
            SessionState::Idle
        };
        self.transition(next, "rest re-evaluated");
        if !eligible {
            return;
        }

        let reason = match self.role {
            NodeRole::Main => self
                .scheduler
                .should_trigger(now.wall)
                .then_some(StartReason::Schedule),
            NodeRole::Secondary => self.start_requested.take(),
        };
        if let Some(reason) = reason {
            self.begin_engagement(now, reason);
        }
    }

    /// At rest, joints parked and settled, out of fault back-off, and (MAIN) link up with cap room.
    fn is_eligible(&self, now: Timestamp) -> bool {
        if self.in_backoff(now) || self.park_pending {
            return false;
        }
        if !self.motion.is_idle(now.instant) || !self.motion.at_rest() {
            return false;
        }
        match self.role {
            NodeRole::Main => self.link_up && !self.scheduler.cap_reached(now.wall),
            NodeRole::Secondary => true,
        }
    }

    fn begin_engagement(&mut self, now: Timestamp, reason: StartReason) {
        let engagement = Engagement {
            id: Uuid::new_v4(),
            started: now.instant,
            target_seen: false,
        };
        info!(
            role = %self.role,
            session_id = %engagement.id,
            trigger = reason.as_str(),
            hour = %self.scheduler.bucket(),
            successes = self.scheduler.successes(),
            "Engagement started"
        );

        self.engagement = Some(engagement);
        self.last_session_id = Some(engagement.id);
        self.last_inference = None;
        self.scorer.reset();
        self.motion.begin_engagement();
        self.transition(SessionState::Engaging, reason.as_str());
    }

    fn evaluate_engaging(&mut self, now: Timestamp, observation: Observation) {
        let Some(mut engagement) = self.engagement else {
            warn!("Engaging without an engagement record, returning to rest");
            self.transition(SessionState::Idle, "missing engagement");
            return;
        };

        match observation {
            Observation::NotSampled => {}
            Observation::NoTarget => {
                self.scorer.score(None, now.instant);
                debug!(session_id = %engagement.id, "No target in frame");
            }
            Observation::Target(sample) => {
                let score = self.scorer.score(Some(&sample), now.instant);
                engagement.target_seen = true;
                info!(
                    session_id = %engagement.id,
                    score = score.value(),
                    ratio = sample.area_ratio,
                    "Target detected"
                );
            }
        }
        self.engagement = Some(engagement);

        let elapsed = now.since(engagement.started);
        let timeouts = &self.config.timeouts;

        // Success wins a same-tick tie with either timeout.
        let outcome = if self.scorer.is_close(now.instant) {
            Some(EngagementOutcome::Close)
        } else if !engagement.target_seen && elapsed >= timeouts.no_detection() {
            Some(EngagementOutcome::NoDetectionTimeout)
        } else if elapsed >= timeouts.engagement() {
            Some(EngagementOutcome::EngagementTimeout)
        } else {
            None
        };

        if let Some(outcome) = outcome {
            self.end_engagement(now, outcome);
        }
    }

    fn end_engagement(&mut self, now: Timestamp, outcome: EngagementOutcome) {
        let Some(engagement) = self.engagement.take() else {
            return;
        };
        info!(
            role = %self.role,
            session_id = %engagement.id,
            outcome = %outcome,
            elapsed_ms = now.since(engagement.started).as_millis() as u64,
            "Engagement ended"
        );

        self.last_outcome = Some(outcome);
        self.motion.end_engagement();

        match outcome {
            EngagementOutcome::Close => {
                self.transition(SessionState::CloseAchieved, outcome.as_str());
                self.finish_close(now);
            }
            EngagementOutcome::NoDetectionTimeout | EngagementOutcome::EngagementTimeout => {
                self.transition(SessionState::TimedOut, outcome.as_str());
                self.transition(SessionState::Idle, "timed out");
            }
            EngagementOutcome::Fault => self.transition(SessionState::Idle, "fault"),
        }
    }

    /// CloseAchieved: MAIN authorises the peer and waits; SECONDARY reports and rests.
    fn finish_close(&mut self, now: Timestamp) {
        match self.link.send(MessageKind::Done) {
            Ok(message) => {
                self.set_link_up(true, None);
                match self.role {
                    NodeRole::Main => {
                        info!(message = %message, "Peer authorised, waiting for completion");
                        self.peer_wait_started = Some(now.instant);
                        self.transition(SessionState::AwaitingPeer, "peer authorised");
                    }
                    NodeRole::Secondary => {
                        info!(message = %message, "Completion reported to MAIN");
                        self.transition(SessionState::Idle, "completion reported");
                    }
                }
            }
            Err(err) => {
                self.set_link_up(false, Some(&err));
                self.fault(now, err.into());
            }
        }
    }

    fn evaluate_peer_wait(&mut self, now: Timestamp) {
        let Some(started) = self.peer_wait_started else {
            self.transition(SessionState::Idle, "missing peer wait");
            return;
        };
        let waited = now.since(started);
        if waited > self.config.timeouts.peer() {
            warn!(
                waited_secs = waited.as_secs(),
                successes = self.scheduler.successes(),
                "Peer did not finish in time, cycle not counted"
            );
            self.peer_wait_started = None;
            self.transition(SessionState::Idle, "peer timeout");
        }
    }

    fn begin_reward(&mut self, kind: RewardKind) {
        self.reward = Some(kind);
        self.motion.run_reward();
        self.transition(SessionState::Rewarding, "reward");
    }

    fn evaluate_reward(&mut self, now: Timestamp) {
        if !self.motion.is_idle(now.instant) {
            return;
        }
        let counts = match self.reward.take() {
            Some(RewardKind::Cycle) | Some(RewardKind::Manual { counts: true }) => true,
            Some(RewardKind::Manual { counts: false }) | None => false,
        };
        if counts {
            self.scheduler.record_success(now.wall);
        }
        info!(
            successes = self.scheduler.successes(),
            cap = self.scheduler.cap(),
            counted = counts,
            "Reward complete"
        );
        self.transition(SessionState::Idle, "reward complete");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Failures
    // ─────────────────────────────────────────────────────────────────────────

    fn handle_motion_error(&mut self, now: Timestamp, error: Error) {
        if self.state.is_rest() {
            warn!(role = %self.role, error = %error, "Actuator failure while parking");
            self.motion.abort();
            self.fault_until = Some(self.backoff_deadline(now));
            self.park_pending = true;
            return;
        }
        self.fault(now, error);
    }

    /// Abandon whatever is in progress, park, back off, and re-arm the trigger.
    fn fault(&mut self, now: Timestamp, error: Error) {
        warn!(
            role = %self.role,
            state = %self.state,
            error = %error,
            retry_secs = self.config.fault_retry_secs,
            "Collaborator failure, returning to rest"
        );

        if self.engagement.is_some() {
            self.end_engagement(now, EngagementOutcome::Fault);
        }
        self.peer_wait_started = None;
        self.reward = None;

        self.motion.abort();
        self.motion.park();
        self.park_pending = false;
        self.fault_until = Some(self.backoff_deadline(now));
        if self.role.is_main() {
            self.scheduler.rearm();
        }
        self.transition(SessionState::Idle, "fault");
    }

    fn in_backoff(&self, now: Timestamp) -> bool {
        self.fault_until.is_some_and(|until| now.instant < until)
    }

    fn backoff_deadline(&self, now: Timestamp) -> Instant {
        now.instant
            .checked_add(self.config.fault_retry())
            .unwrap_or(now.instant)
    }

    fn transition(&mut self, next: SessionState, reason: &str) {
        if next == self.state {
            return;
        }
        info!(
            role = %self.role,
            from = %self.state,
            to = %next,
            reason,
            "State transition"
        );
        self.state = next;
    }
}
