//! Servo controller drivers.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use intellicat_core::config::MAX_ANGLE;
use intellicat_core::motion::{Actuator, ActuatorError};

use crate::config::ActuatorConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Dry run
// ─────────────────────────────────────────────────────────────────────────────

/// Logs every command and drives nothing.
#[derive(Debug, Default)]
pub struct DryRunActuator {
    commands: u64,
}

impl Actuator for DryRunActuator {
    fn set_channel_target(
        &mut self,
        channel: u8,
        angle: f64,
        speed_hint: Duration,
    ) -> Result<(), ActuatorError> {
        self.commands += 1;
        info!(
            channel,
            angle = format!("{:.1}", angle),
            travel_ms = speed_hint.as_millis() as u64,
            n = self.commands,
            "[dry-run] servo move"
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SSC-32
// ─────────────────────────────────────────────────────────────────────────────

/// Maps an angle in `[0, 180]` degrees linearly onto the pulse range.
pub fn angle_to_pulse(angle: f64, pulse_min_us: u32, pulse_max_us: u32) -> u32 {
    let fraction = (angle / MAX_ANGLE).clamp(0.0, 1.0);
    let span = f64::from(pulse_max_us.saturating_sub(pulse_min_us));
    pulse_min_us + (fraction * span).round() as u32
}

/// One group-move command: `#<channel>P<pulse>T<millis>\r`.
pub fn encode_move(channel: u8, pulse_us: u32, travel: Duration) -> String {
    let millis = travel.as_millis();
    if millis == 0 {
        format!("#{}P{}\r", channel, pulse_us)
    } else {
        format!("#{}P{}T{}\r", channel, pulse_us, millis)
    }
}

/// Drives an SSC-32 compatible controller over a serial device.
///
/// Commands are handed to a background writer task so `set_channel_target` never blocks the
/// control loop. A write failure is reported on the next call.
pub struct Ssc32Actuator {
    device: PathBuf,
    pulse_min_us: u32,
    pulse_max_us: u32,
    tx: mpsc::UnboundedSender<String>,
    failure: Arc<Mutex<Option<String>>>,
}

impl Ssc32Actuator {
    /// Open the device and start the writer task.
    pub async fn open(config: &ActuatorConfig) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&config.device)
            .await
            .with_context(|| format!("Failed to open servo controller {}", config.device.display()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let failure = Arc::new(Mutex::new(None));
        tokio::spawn(write_commands(file, rx, config.device.clone(), Arc::clone(&failure)));

        info!(device = %config.device.display(), "Servo controller opened");
        Ok(Self {
            device: config.device.clone(),
            pulse_min_us: config.pulse_min_us,
            pulse_max_us: config.pulse_max_us,
            tx,
            failure,
        })
    }

    pub fn device(&self) -> &Path {
        &self.device
    }
}

impl Actuator for Ssc32Actuator {
    fn set_channel_target(
        &mut self,
        channel: u8,
        angle: f64,
        speed_hint: Duration,
    ) -> Result<(), ActuatorError> {
        if let Ok(failure) = self.failure.lock() {
            if let Some(message) = failure.as_ref() {
                return Err(ActuatorError::Io(message.clone()));
            }
        }

        let pulse = angle_to_pulse(angle, self.pulse_min_us, self.pulse_max_us);
        self.tx
            .send(encode_move(channel, pulse, speed_hint))
            .map_err(|_| ActuatorError::Unavailable(format!("{} writer stopped", self.device.display())))
    }
}

async fn write_commands(
    mut file: tokio::fs::File,
    mut rx: mpsc::UnboundedReceiver<String>,
    device: PathBuf,
    failure: Arc<Mutex<Option<String>>>,
) {
    while let Some(command) = rx.recv().await {
        debug!(command = command.trim_end(), "Servo command");
        let result = match file.write_all(command.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(device = %device.display(), error = %e, "Servo controller write failed");
            if let Ok(mut slot) = failure.lock() {
                *slot = Some(e.to_string());
            }
            return;
        }
    }
}
