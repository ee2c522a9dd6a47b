//! Actuator driver boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Actuator driver errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActuatorError {
    #[error("actuator unavailable: {0}")]
    Unavailable(String),

    #[error("channel {channel} rejected target: {message}")]
    Rejected { channel: u8, message: String },

    #[error("actuator I/O error: {0}")]
    Io(String),
}

/// Drives one output channel towards a target angle.
///
/// Calls are fire-and-forget: the driver starts the move and returns. `speed_hint` is the
/// time the move should take; drivers that cannot time moves may ignore it.
pub trait Actuator: Send {
    fn set_channel_target(
        &mut self,
        channel: u8,
        angle: f64,
        speed_hint: Duration,
    ) -> Result<(), ActuatorError>;
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn set_channel_target(
        &mut self,
        channel: u8,
        angle: f64,
        speed_hint: Duration,
    ) -> Result<(), ActuatorError> {
        (**self).set_channel_target(channel, angle, speed_hint)
    }
}

/// One call received by a [`RecordingActuator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorCall {
    pub channel: u8,
    pub angle: f64,
    pub speed_hint: Duration,
}

/// Actuator that records every call and can be switched into a failing mode.
///
/// Clones share the same log, so a test can keep a handle after moving one into the
/// orchestrator.
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    calls: Arc<Mutex<Vec<ActuatorCall>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// The last angle sent to `channel`, if any.
    pub fn last_angle(&self, channel: u8) -> Option<f64> {
        self.calls()
            .iter()
            .rev()
            .find(|call| call.channel == channel)
            .map(|call| call.angle)
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }
}

impl Actuator for RecordingActuator {
    fn set_channel_target(
        &mut self,
        channel: u8,
        angle: f64,
        speed_hint: Duration,
    ) -> Result<(), ActuatorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ActuatorError::Unavailable("recording actuator set to fail".into()));
        }
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| ActuatorError::Io("call log poisoned".into()))?;
        calls.push(ActuatorCall {
            channel,
            angle,
            speed_hint,
        });
        Ok(())
    }
}
