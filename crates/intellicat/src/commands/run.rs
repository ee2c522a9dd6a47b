//! `intellicat run`: start the node control loop.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::{info, warn};

use intellicat_core::command::{CommandChannel, HELP};
use intellicat_core::motion::Actuator;
use intellicat_core::vision::TargetSelector;
use intellicat_core::{SessionOrchestrator, Timestamp};

use crate::actuator::{DryRunActuator, Ssc32Actuator};
use crate::cli::RunArgs;
use crate::config::{ActuatorKind, AppConfig, DisplayMode};
use crate::console;
use crate::link::DeviceLink;
use crate::runtime::{Runtime, VisionPipeline};
use crate::vision::{HttpDetector, HttpFrameSource};

pub async fn execute(args: RunArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = AppConfig::load(config_path)?;
    config.apply_overrides(&args);
    config.validate()?;

    let role = config.node.role()?;
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    info!(
        role = %role,
        host = %host,
        version = env!("CARGO_PKG_VERSION"),
        link = %config.link.device.display(),
        actuator = ?config.actuator.kind,
        "Starting intellicat node"
    );

    let frame_size = config.node.detection.frame_size()?;
    let vision = VisionPipeline {
        source: Arc::new(
            HttpFrameSource::new(&config.vision, &config.node.detection.resolution, frame_size)
                .context("Failed to create camera client")?,
        ),
        detector: Arc::new(HttpDetector::new(&config.vision).context("Failed to create detector client")?),
        selector: TargetSelector::from_config(&config.node.detection),
        timeout: config.vision.request_timeout(),
    };

    let actuator: Box<dyn Actuator> = match config.actuator.kind {
        ActuatorKind::DryRun => Box::new(DryRunActuator::default()),
        ActuatorKind::Ssc32 => {
            let driver = Ssc32Actuator::open(&config.actuator).await?;
            info!(device = %driver.device().display(), "Driving servos");
            Box::new(driver)
        }
    };

    let link = DeviceLink::spawn(&config.link);
    let (sender, commands) = CommandChannel::new();

    let interactive = config.display.mode == DisplayMode::Interactive;
    if interactive {
        println!("{} {}", "Intellicat".cyan().bold(), role.to_string().bold());
        println!("{}", "─".repeat(50));
        println!("{}", HELP);
        if config.input.hotkeys {
            println!("Hotkeys: {} start, {} dispense", "A".bold(), "B".bold());
        }
        println!();
    }
    console::spawn_inputs(console::input_sources(&config.input), &sender)
        .context("Failed to start operator input")?;

    let orchestrator = SessionOrchestrator::new(config.node, actuator, link, commands, Timestamp::now())?;
    Runtime::new(orchestrator, vision, interactive)
        .run(shutdown_signal())
        .await
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown requested");
}
