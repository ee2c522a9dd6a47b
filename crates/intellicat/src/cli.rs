//! CLI argument definitions using clap derive macros.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use intellicat_core::NodeRole;

/// Intellicat node daemon
///
/// Runs one half (MAIN or SECONDARY) of a two-node play session.
#[derive(Parser, Debug)]
#[command(name = "intellicat")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to $INTELLICAT_CONFIG or the platform config dir)
    #[arg(short, long, global = true, env = "INTELLICAT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the node control loop
    Run(RunArgs),

    /// Load and validate the configuration, then exit
    CheckConfig {
        /// Print the resolved configuration as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Write a default configuration file
    InitConfig {
        /// Where to write it (defaults to the config path)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show version
    Version,
}

// ─────────────────────────────────────────────────────────────────────────────
// Run
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Node role
    #[arg(short, long, value_parser = parse_role)]
    pub role: Option<NodeRole>,

    /// No console input or status line
    #[arg(long, conflicts_with = "interactive")]
    pub headless: bool,

    /// Read operator commands from stdin and print a status line
    #[arg(short, long)]
    pub interactive: bool,

    /// First hour of the day with automatic sessions (0-23)
    #[arg(long)]
    pub trigger_hour: Option<u32>,

    /// Successful cycles allowed per hour
    #[arg(long)]
    pub max_cycles_per_hour: Option<u32>,

    /// Seconds MAIN waits for the peer to finish
    #[arg(long)]
    pub peer_timeout: Option<u64>,

    /// Serial device carrying the peer link
    #[arg(long)]
    pub link_device: Option<PathBuf>,

    /// Log actuator commands instead of driving hardware
    #[arg(long)]
    pub dry_run: bool,
}

fn parse_role(value: &str) -> Result<NodeRole, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "intellicat",
            "run",
            "--role",
            "secondary",
            "--trigger-hour",
            "7",
            "--peer-timeout",
            "60",
            "--link-device",
            "/dev/ttyUSB1",
            "--dry-run",
            "--interactive",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.role, Some(NodeRole::Secondary));
        assert_eq!(args.trigger_hour, Some(7));
        assert_eq!(args.peer_timeout, Some(60));
        assert_eq!(args.link_device, Some(PathBuf::from("/dev/ttyUSB1")));
        assert!(args.dry_run);
        assert!(args.interactive);
        assert!(!args.headless);
    }

    #[test]
    fn test_headless_conflicts_with_interactive() {
        let result = Cli::try_parse_from(["intellicat", "run", "--headless", "--interactive"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_role_rejected() {
        let result = Cli::try_parse_from(["intellicat", "run", "--role", "both"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["intellicat", "check-config", "--config", "/tmp/x.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));
        assert!(matches!(cli.command, Commands::CheckConfig { json: false }));
    }
}
