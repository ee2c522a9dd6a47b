//! Operator input: text commands on stdin and USB keyboard hotkeys.
//!
//! Every source reads on its own thread. These reads block, and a plain thread parked on an
//! idle terminal never holds up runtime shutdown.

use std::io::{self, BufRead};
use std::path::PathBuf;

use colored::Colorize;
use tracing::{debug, warn};

use intellicat_core::command::CommandSender;

use crate::config::InputConfig;
use crate::hotkeys;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    /// A/B hotkeys; `None` discovers the keyboard.
    Keyboard(Option<PathBuf>),
}

/// The sources to start. Display mode plays no part: a headless node still takes commands.
pub fn input_sources(config: &InputConfig) -> Vec<InputSource> {
    let mut sources = Vec::new();
    if config.stdin {
        sources.push(InputSource::Stdin);
    }
    if config.hotkeys {
        sources.push(InputSource::Keyboard(config.keyboard_device.clone()));
    }
    sources
}

pub fn spawn_inputs(sources: Vec<InputSource>, sender: &CommandSender) -> io::Result<()> {
    for source in sources {
        let sender = sender.clone();
        match source {
            InputSource::Stdin => {
                std::thread::Builder::new()
                    .name("console".into())
                    .spawn(move || match read_commands(io::stdin().lock(), &sender) {
                        Ok(queued) => debug!(queued, "Console input closed"),
                        Err(e) => warn!(error = %e, "Console input failed"),
                    })?;
            }
            InputSource::Keyboard(device) => {
                std::thread::Builder::new()
                    .name("hotkeys".into())
                    .spawn(move || hotkeys::listen(device, &sender))?;
            }
        }
    }
    Ok(())
}

/// Read lines until EOF, queueing every command that parses.
///
/// Returns the number of commands queued.
pub fn read_commands<R: BufRead>(reader: R, sender: &CommandSender) -> io::Result<usize> {
    let mut queued = 0;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match sender.send_line(&line) {
            Ok(command) => {
                debug!(command = %command, "Console command queued");
                queued += 1;
            }
            Err(e) => {
                eprintln!("{} {} (type {} for a list)", "✗".red(), e, "help".bold());
            }
        }
    }

    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use intellicat_core::command::{CommandChannel, OperatorCommand};

    #[test]
    fn test_lines_become_commands() {
        let (sender, mut channel) = CommandChannel::new();
        let input: &[u8] = b"start\n\nbogus\nspeed 2\nB\n";

        let queued = read_commands(input, &sender).unwrap();
        assert_eq!(queued, 3);
        assert_eq!(
            channel.drain(),
            vec![
                OperatorCommand::Start,
                OperatorCommand::SetSpeed(2.0),
                OperatorCommand::Dispense,
            ]
        );
    }

    #[test]
    fn test_console_eof_without_input() {
        let (sender, mut channel) = CommandChannel::new();
        let input: &[u8] = b"";
        assert_eq!(read_commands(input, &sender).unwrap(), 0);
        assert!(channel.drain().is_empty());
    }

    #[test]
    fn test_headless_defaults_still_take_input() {
        let config = InputConfig::default();
        assert_eq!(
            input_sources(&config),
            vec![InputSource::Stdin, InputSource::Keyboard(None)]
        );

        let config = InputConfig {
            stdin: false,
            hotkeys: true,
            keyboard_device: Some(PathBuf::from("/dev/input/event4")),
        };
        assert_eq!(
            input_sources(&config),
            vec![InputSource::Keyboard(Some(PathBuf::from("/dev/input/event4")))]
        );

        let config = InputConfig {
            stdin: false,
            hotkeys: false,
            keyboard_device: None,
        };
        assert!(input_sources(&config).is_empty());
    }
}
