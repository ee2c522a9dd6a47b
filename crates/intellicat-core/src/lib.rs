//! intellicat-core - Core library for Intellicat
//!
//! This crate provides everything a node needs to take part in a two-node play session,
//! independent of the hardware and transports it runs on:
//!
//! - **proximity**: Closeness scoring and the sustained-proximity debounce
//! - **link**: Peer message framing over a raw byte stream
//! - **schedule**: Hour buckets, cycle caps and the hourly trigger
//! - **command**: Operator command vocabulary and the non-blocking command channel
//! - **motion**: Actuator boundary, speed multiplier and movement sequences
//! - **vision**: Detector/frame source boundary and target selection
//! - **session**: The per-node session orchestrator state machine
//! - **config**: Node configuration with startup validation

pub mod command;
pub mod config;
pub mod error;
pub mod link;
pub mod motion;
pub mod proximity;
pub mod schedule;
pub mod session;
pub mod types;
pub mod vision;

// Re-export commonly used types
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use session::{SessionOrchestrator, SessionState};
pub use types::{NodeRole, Timestamp};
