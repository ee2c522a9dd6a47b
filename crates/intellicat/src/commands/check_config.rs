//! `intellicat check-config`: load and validate the configuration.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::config::AppConfig;

pub async fn execute(config_path: Option<&Path>, json: bool) -> Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::config_path);
    let config = AppConfig::load(config_path)?;
    let result = config.validate();

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        result?;
        return Ok(());
    }

    println!("{}", "Intellicat Config".cyan().bold());
    println!("{}", "─".repeat(50));
    println!();

    print!("  File: {} ", path.display());
    if path.exists() {
        println!("{}", "✓ found".green());
    } else {
        println!("{}", "○ not found (using defaults)".yellow());
    }

    match config.node.role {
        Some(role) => println!("  Role: {}", role.to_string().bold()),
        None => println!("  Role: {}", "○ not set (pass --role to run)".yellow()),
    }

    let schedule = &config.node.schedule;
    println!(
        "  Schedule: {:02}:00-{:02}:59, {} cycle(s) per hour",
        schedule.trigger_hour, schedule.last_hour, schedule.max_cycles_per_hour
    );
    println!(
        "  Timeouts: no detection {}s, engagement {}s, peer {}s",
        config.node.timeouts.no_detection_secs,
        config.node.timeouts.engagement_secs,
        config.node.timeouts.peer_secs
    );
    println!("  Link: {}", config.link.device.display());
    println!("  Actuator: {:?} ({})", config.actuator.kind, config.actuator.device.display());
    println!("  Camera: {}", config.vision.source_url);
    println!("  Detector: {}", config.vision.detector_url);
    let keyboard = match (config.input.hotkeys, &config.input.keyboard_device) {
        (false, _) => "off".to_string(),
        (true, Some(device)) => device.display().to_string(),
        (true, None) => "auto".to_string(),
    };
    println!(
        "  Input: stdin {}, hotkeys {}",
        if config.input.stdin { "on" } else { "off" },
        keyboard
    );
    println!();

    match result {
        Ok(()) => {
            println!("{}", "✓ Configuration is valid".green());
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            Err(e.into())
        }
    }
}
