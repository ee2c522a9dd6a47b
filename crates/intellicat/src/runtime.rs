//! The node control loop.
//!
//! Ticks the orchestrator on a fixed interval. Detection runs as a separate task so a slow
//! camera or detector never stalls motion; its result is fed into the first tick after it
//! completes. A failed or timed-out detection counts as no sample.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use colored::{ColoredString, Colorize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use intellicat_core::link::LinkTransport;
use intellicat_core::motion::Actuator;
use intellicat_core::proximity::DetectionSample;
use intellicat_core::session::{Observation, StatusSnapshot};
use intellicat_core::vision::{Detector, FrameSource, TargetSelector, VisionError, sample_once};
use intellicat_core::{SessionOrchestrator, SessionState, Timestamp};

/// Time allowed for the last rest commands to reach the controller on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

type DetectionTask = JoinHandle<Result<Option<DetectionSample>, VisionError>>;

/// Camera, detector and the rules for picking a target out of their output.
#[derive(Clone)]
pub struct VisionPipeline {
    pub source: Arc<dyn FrameSource>,
    pub detector: Arc<dyn Detector>,
    pub selector: TargetSelector,
    pub timeout: Duration,
}

impl VisionPipeline {
    fn spawn(&self) -> DetectionTask {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let timeout_ms = pipeline.timeout.as_millis() as u64;
            tokio::time::timeout(
                pipeline.timeout,
                sample_once(pipeline.source.as_ref(), pipeline.detector.as_ref(), &pipeline.selector),
            )
            .await
            .unwrap_or(Err(VisionError::Timeout(timeout_ms)))
        })
    }
}

pub struct Runtime<A: Actuator, T: LinkTransport> {
    orchestrator: SessionOrchestrator<A, T>,
    vision: VisionPipeline,
    show_status: bool,
    detection: Option<DetectionTask>,
    last_status: Option<StatusSnapshot>,
}

impl<A: Actuator, T: LinkTransport> Runtime<A, T> {
    pub fn new(orchestrator: SessionOrchestrator<A, T>, vision: VisionPipeline, show_status: bool) -> Self {
        Self {
            orchestrator,
            vision,
            show_status,
            detection: None,
            last_status: None,
        }
    }

    /// Run until `shutdown` resolves, then park every joint.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let tick = self.orchestrator.config().tick();
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            role = %self.orchestrator.role(),
            tick_ms = tick.as_millis() as u64,
            "Control loop started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {}
            }
            self.step(Timestamp::now()).await;
        }

        if let Some(task) = self.detection.take() {
            task.abort();
        }
        self.orchestrator.shutdown(Timestamp::now())?;
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        info!("Control loop stopped");
        Ok(())
    }

    /// One control loop iteration.
    async fn step(&mut self, now: Timestamp) -> SessionState {
        let observation = self.collect_detection().await;
        let state = self.orchestrator.tick(now, observation);

        if state != SessionState::Engaging {
            if let Some(task) = self.detection.take() {
                debug!("Engagement over, dropping in-flight detection");
                task.abort();
            }
        } else if self.detection.is_none() && self.orchestrator.claim_inference_slot(now) {
            self.detection = Some(self.vision.spawn());
        }

        if self.show_status {
            self.print_status();
        }
        state
    }

    /// Turn a finished detection task into an observation.
    async fn collect_detection(&mut self) -> Observation {
        let Some(task) = self.detection.take_if(|task| task.is_finished()) else {
            return Observation::NotSampled;
        };

        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(VisionError::Inference(format!("detection task failed: {}", e))),
        };

        match result {
            Ok(sample) => Observation::from_sample(sample),
            Err(e) => {
                warn!(error = %e, "Detection failed, treating as no sample");
                Observation::NotSampled
            }
        }
    }

    fn print_status(&mut self) {
        let status = self.orchestrator.status();
        if self.last_status.as_ref() == Some(&status) {
            return;
        }
        println!("{}", render_status(&status));
        self.last_status = Some(status);
    }
}

fn state_label(state: SessionState) -> ColoredString {
    match state {
        SessionState::Idle => state.as_str().dimmed(),
        SessionState::AwaitingTrigger => state.as_str().yellow(),
        SessionState::Engaging => state.as_str().cyan().bold(),
        SessionState::CloseAchieved | SessionState::Rewarding => state.as_str().green().bold(),
        SessionState::TimedOut => state.as_str().red(),
        SessionState::AwaitingPeer => state.as_str().magenta(),
    }
}

/// One-line colored status for interactive mode.
pub fn render_status(status: &StatusSnapshot) -> String {
    let link = if status.link_up {
        "● link".green()
    } else {
        "○ link".red()
    };
    let mut line = format!(
        "{} {} {} {} {}/{} {} {:.2}x",
        status.role.to_string().bold(),
        state_label(status.state),
        link,
        status.bucket.to_string().dimmed(),
        status.successes,
        status.cap,
        "speed".dimmed(),
        status.speed,
    );
    if let Some(score) = status.last_score {
        line.push_str(&format!(" {} {}/10", "score".dimmed(), score));
    }
    if let Some(outcome) = status.last_outcome {
        line.push_str(&format!(" {} {}", "last".dimmed(), outcome));
    }
    line
}
