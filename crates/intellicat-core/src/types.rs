//! Shared types for intellicat-core.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

// ─────────────────────────────────────────────────────────────────────────────
// Node Role
// ─────────────────────────────────────────────────────────────────────────────

/// Which half of the pair this node plays.
///
/// MAIN owns the hourly schedule, cycle counting and reward dispensing.
/// SECONDARY runs a single engagement when MAIN authorises it and reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Main,
    Secondary,
}

impl NodeRole {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Main => "main",
            NodeRole::Secondary => "secondary",
        }
    }

    /// The role on the other end of the link.
    pub fn peer(&self) -> NodeRole {
        match self {
            NodeRole::Main => NodeRole::Secondary,
            NodeRole::Secondary => NodeRole::Main,
        }
    }

    pub fn is_main(&self) -> bool {
        matches!(self, NodeRole::Main)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

impl std::str::FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "main" => Ok(NodeRole::Main),
            "secondary" => Ok(NodeRole::Secondary),
            other => Err(format!("unknown node role '{}' (expected main or secondary)", other)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Clock Readings
// ─────────────────────────────────────────────────────────────────────────────

/// A single reading of both clocks the orchestrator cares about.
///
/// Timeouts are measured on the monotonic `instant`; hour buckets are derived from the
/// local `wall` clock. Every time-dependent operation takes a `Timestamp` so the state
/// machine can be driven by a synthetic clock in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub instant: Instant,
    pub wall: NaiveDateTime,
}

impl Timestamp {
    /// Read both clocks now.
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Local::now().naive_local(),
        }
    }

    /// Build a timestamp from explicit parts.
    pub fn from_parts(instant: Instant, wall: NaiveDateTime) -> Self {
        Self { instant, wall }
    }

    /// The same reading moved forward by `by` on both clocks.
    pub fn advance(self, by: Duration) -> Self {
        let wall = chrono::Duration::from_std(by)
            .ok()
            .and_then(|delta| self.wall.checked_add_signed(delta))
            .unwrap_or(self.wall);
        Self {
            instant: self.instant + by,
            wall,
        }
    }

    /// Monotonic time elapsed since `earlier`.
    pub fn since(&self, earlier: Instant) -> Duration {
        self.instant.saturating_duration_since(earlier)
    }
}
