//! Session states, outcomes and the status snapshot.

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::schedule::HourBucket;
use crate::types::NodeRole;

/// Where a node is in its session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// At rest and not eligible to start (cap reached, link down, fault back-off, settling).
    Idle,
    /// At rest and eligible to start.
    AwaitingTrigger,
    Engaging,
    CloseAchieved,
    TimedOut,
    /// MAIN only: waiting for the peer's completion message.
    AwaitingPeer,
    /// MAIN only: reward sequence running.
    Rewarding,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingTrigger => "awaiting_trigger",
            SessionState::Engaging => "engaging",
            SessionState::CloseAchieved => "close_achieved",
            SessionState::TimedOut => "timed_out",
            SessionState::AwaitingPeer => "awaiting_peer",
            SessionState::Rewarding => "rewarding",
        }
    }

    /// Rest states: no session in progress, joints parked.
    pub fn is_rest(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::AwaitingTrigger)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the most recent engagement ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementOutcome {
    Close,
    NoDetectionTimeout,
    EngagementTimeout,
    Fault,
}

impl EngagementOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementOutcome::Close => "close",
            EngagementOutcome::NoDetectionTimeout => "no_detection_timeout",
            EngagementOutcome::EngagementTimeout => "engagement_timeout",
            EngagementOutcome::Fault => "fault",
        }
    }
}

impl fmt::Display for EngagementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a node, for `status` and the console status line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub role: NodeRole,
    pub state: SessionState,
    pub bucket: HourBucket,
    pub successes: u32,
    pub cap: u32,
    pub speed: f64,
    pub link_up: bool,
    pub last_score: Option<u8>,
    pub last_outcome: Option<EngagementOutcome>,
    pub session_id: Option<Uuid>,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} state={} hour={} cycles={}/{} speed={:.2} link={}",
            self.role,
            self.state,
            self.bucket,
            self.successes,
            self.cap,
            self.speed,
            if self.link_up { "up" } else { "down" },
        )?;
        if let Some(score) = self.last_score {
            write!(f, " score={score}/10")?;
        }
        if let Some(outcome) = self.last_outcome {
            write!(f, " last={outcome}")?;
        }
        Ok(())
    }
}
