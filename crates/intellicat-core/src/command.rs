//! Operator commands.
//!
//! Commands arrive as text lines (console, hotkeys) and are parsed into [`OperatorCommand`]
//! before being queued on a [`CommandChannel`]. The control loop drains the channel once per
//! tick without blocking.

use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Text printed for `help`.
pub const HELP: &str = "\
Commands:
  start | manual | manual start hour | a   start a session now (cap still applies)
  dispense | treat | candy | b             dispense a reward (MAIN only, at rest)
  speed <x>                                set the speed multiplier
  faster | slower                          scale the speed multiplier by one step
  speed | speed?                           show the current speed
  status                                   show node status
  help | ?                                 show this help";

/// A parsed operator request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorCommand {
    /// Start a session outside the hourly gate.
    Start,
    /// Run the reward sequence.
    Dispense,
    SetSpeed(f64),
    Faster,
    Slower,
    QuerySpeed,
    Status,
    Help,
}

impl OperatorCommand {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorCommand::Start => "start",
            OperatorCommand::Dispense => "dispense",
            OperatorCommand::SetSpeed(_) => "speed",
            OperatorCommand::Faster => "faster",
            OperatorCommand::Slower => "slower",
            OperatorCommand::QuerySpeed => "speed?",
            OperatorCommand::Status => "status",
            OperatorCommand::Help => "help",
        }
    }
}

impl fmt::Display for OperatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorCommand::SetSpeed(value) => write!(f, "speed {value}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Command parsing errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}' (type 'help' for a list)")]
    Unknown(String),

    #[error("invalid speed '{0}': expected a positive number")]
    InvalidSpeed(String),
}

impl FromStr for OperatorCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let normalized = line.trim().to_lowercase();
        let words: Vec<&str> = normalized.split_whitespace().collect();

        match words.as_slice() {
            [] => Err(CommandParseError::Empty),
            ["start"] | ["manual"] | ["manual", "start", "hour"] | ["a"] => Ok(OperatorCommand::Start),
            ["dispense"] | ["treat"] | ["candy"] | ["b"] => Ok(OperatorCommand::Dispense),
            ["faster"] => Ok(OperatorCommand::Faster),
            ["slower"] => Ok(OperatorCommand::Slower),
            ["speed"] | ["speed?"] => Ok(OperatorCommand::QuerySpeed),
            ["status"] => Ok(OperatorCommand::Status),
            ["help"] | ["?"] => Ok(OperatorCommand::Help),
            ["speed", value] => parse_speed(value),
            _ => Err(CommandParseError::Unknown(line.trim().to_string())),
        }
    }
}

fn parse_speed(value: &str) -> Result<OperatorCommand, CommandParseError> {
    match value.parse::<f64>() {
        Ok(speed) if speed.is_finite() && speed > 0.0 => Ok(OperatorCommand::SetSpeed(speed)),
        _ => Err(CommandParseError::InvalidSpeed(value.to_string())),
    }
}

/// Producer side of the command queue; cheap to clone into input tasks.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: UnboundedSender<OperatorCommand>,
}

impl CommandSender {
    /// Queue a command. Returns false if the control loop is gone.
    pub fn send(&self, command: OperatorCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    /// Parse a text line and queue the result.
    pub fn send_line(&self, line: &str) -> Result<OperatorCommand, CommandParseError> {
        let command: OperatorCommand = line.parse()?;
        if !self.send(command) {
            debug!(command = %command, "Command dropped, control loop stopped");
        }
        Ok(command)
    }

    /// True once the control loop has dropped its end of the queue.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the command queue, owned by the control loop.
#[derive(Debug)]
pub struct CommandChannel {
    rx: UnboundedReceiver<OperatorCommand>,
}

impl CommandChannel {
    pub fn new() -> (CommandSender, CommandChannel) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CommandSender { tx }, CommandChannel { rx })
    }

    /// Take every command queued so far without waiting.
    pub fn drain(&mut self) -> Vec<OperatorCommand> {
        let mut commands = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(command) => commands.push(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        commands
    }
}
