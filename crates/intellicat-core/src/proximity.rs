//! Closeness scoring and sustained-proximity detection.
//!
//! A detection's bounding-box area ratio is mapped onto a 1–10 closeness score. The score
//! itself is a pure function of the current sample; the only memory is the sustain window,
//! which tracks how long the score has continuously stayed above the threshold.
//!
//! ```text
//! score     9    9    7    9    9    9
//! window    ├────┤    ×    ├─────────┤► close once held for `required`
//! ```

use std::time::{Duration, Instant};

use crate::config::{secs, ProximityConfig};

/// Lowest possible closeness score (no target or far away).
pub const MIN_SCORE: u8 = 1;

/// Highest possible closeness score.
pub const MAX_SCORE: u8 = 10;

/// One detector result handed to the scorer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionSample {
    /// Target bounding-box area divided by frame area, in [0, 1].
    pub area_ratio: f64,
    /// When the frame was captured.
    pub at: Instant,
}

impl DetectionSample {
    /// Create a sample, clamping the ratio into [0, 1].
    pub fn new(area_ratio: f64, at: Instant) -> Self {
        let area_ratio = if area_ratio.is_nan() {
            0.0
        } else {
            area_ratio.clamp(0.0, 1.0)
        };
        Self { area_ratio, at }
    }
}

/// Integer closeness in [1, 10].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClosenessScore(u8);

impl ClosenessScore {
    pub const LOWEST: ClosenessScore = ClosenessScore(MIN_SCORE);

    /// Create a score, clamping into [1, 10].
    pub fn new(value: u8) -> Self {
        Self(value.clamp(MIN_SCORE, MAX_SCORE))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for ClosenessScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/10", self.0)
    }
}

/// Area-ratio to score calibration curve.
///
/// Linear between the two bounds, saturating outside them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreCalibration {
    pub lower_ratio: f64,
    pub upper_ratio: f64,
}

impl ScoreCalibration {
    pub fn new(lower_ratio: f64, upper_ratio: f64) -> Self {
        Self {
            lower_ratio,
            upper_ratio,
        }
    }

    /// Map an area ratio onto the 1–10 scale.
    pub fn score(&self, ratio: f64) -> ClosenessScore {
        if ratio.is_nan() || ratio <= self.lower_ratio {
            return ClosenessScore::LOWEST;
        }
        if ratio >= self.upper_ratio {
            return ClosenessScore::new(MAX_SCORE);
        }
        let span = f64::from(MAX_SCORE - MIN_SCORE);
        let position = (ratio - self.lower_ratio) / (self.upper_ratio - self.lower_ratio);
        let raw = (f64::from(MIN_SCORE) + position * span).round();
        ClosenessScore::new(raw as u8)
    }
}

impl Default for ScoreCalibration {
    fn default() -> Self {
        let config = ProximityConfig::default();
        Self::new(config.lower_ratio, config.upper_ratio)
    }
}

/// Tracks how long the score has continuously exceeded the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct SustainWindow {
    threshold: ClosenessScore,
    required: Duration,
    started: Option<Instant>,
}

impl SustainWindow {
    pub fn new(threshold: ClosenessScore, required: Duration) -> Self {
        Self {
            threshold,
            required,
            started: None,
        }
    }

    /// Feed the latest score. Anything at or below the threshold restarts from zero.
    pub fn observe(&mut self, score: ClosenessScore, now: Instant) {
        if score > self.threshold {
            self.started.get_or_insert(now);
        } else {
            self.started = None;
        }
    }

    pub fn reset(&mut self) {
        self.started = None;
    }

    pub fn started(&self) -> Option<Instant> {
        self.started
    }

    /// How long the score has been above the threshold, if it is.
    pub fn held_for(&self, now: Instant) -> Option<Duration> {
        self.started.map(|start| now.saturating_duration_since(start))
    }

    pub fn is_satisfied(&self, now: Instant) -> bool {
        self.held_for(now).is_some_and(|held| held >= self.required)
    }
}

/// Converts detections into closeness scores and answers "is the target close?".
#[derive(Debug, Clone)]
pub struct ProximityScorer {
    calibration: ScoreCalibration,
    window: SustainWindow,
    last_score: Option<ClosenessScore>,
}

impl ProximityScorer {
    pub fn new(calibration: ScoreCalibration, threshold: ClosenessScore, required: Duration) -> Self {
        Self {
            calibration,
            window: SustainWindow::new(threshold, required),
            last_score: None,
        }
    }

    /// Build a scorer from the node's proximity configuration.
    pub fn from_config(config: &ProximityConfig) -> Self {
        Self::new(
            ScoreCalibration::new(config.lower_ratio, config.upper_ratio),
            ClosenessScore::new(config.threshold),
            secs(config.sustain_secs),
        )
    }

    /// Score the current poll. `None` means no target was found and maps to the lowest score.
    pub fn score(&mut self, sample: Option<&DetectionSample>, now: Instant) -> ClosenessScore {
        let score = match sample {
            Some(sample) => self.calibration.score(sample.area_ratio),
            None => ClosenessScore::LOWEST,
        };
        self.window.observe(score, now);
        self.last_score = Some(score);
        score
    }

    /// True iff the score has stayed above the threshold for the full sustain duration.
    pub fn is_close(&self, now: Instant) -> bool {
        self.window.is_satisfied(now)
    }

    pub fn last_score(&self) -> Option<ClosenessScore> {
        self.last_score
    }

    pub fn window(&self) -> &SustainWindow {
        &self.window
    }

    /// Forget everything; called on entry into an engagement.
    pub fn reset(&mut self) {
        self.window.reset();
        self.last_score = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> ProximityScorer {
        ProximityScorer::from_config(&ProximityConfig::default())
    }

    fn sample(ratio: f64, at: Instant) -> DetectionSample {
        DetectionSample::new(ratio, at)
    }

    #[test]
    fn test_calibration_saturates() {
        let cal = ScoreCalibration::default();
        assert_eq!(cal.score(0.0).value(), 1);
        assert_eq!(cal.score(0.01).value(), 1);
        assert_eq!(cal.score(0.25).value(), 10);
        assert_eq!(cal.score(0.9).value(), 10);
        assert_eq!(cal.score(f64::NAN).value(), 1);
    }

    #[test]
    fn test_calibration_is_monotonic() {
        let cal = ScoreCalibration::default();
        let mut previous = 0;
        for step in 0..=1000 {
            let ratio = f64::from(step) / 1000.0;
            let score = cal.score(ratio).value();
            assert!(score >= previous, "score dropped at ratio {ratio}");
            assert!((MIN_SCORE..=MAX_SCORE).contains(&score));
            previous = score;
        }
    }

    #[test]
    fn test_calibration_midpoint() {
        let cal = ScoreCalibration::new(0.0, 0.9);
        // 1 + 0.5 * 9 = 5.5, rounds away from zero
        assert_eq!(cal.score(0.45).value(), 6);
        assert_eq!(cal.score(0.1).value(), 2);
    }

    #[test]
    fn test_sample_ratio_clamped() {
        let now = Instant::now();
        assert_eq!(sample(1.7, now).area_ratio, 1.0);
        assert_eq!(sample(-0.2, now).area_ratio, 0.0);
        assert_eq!(sample(f64::NAN, now).area_ratio, 0.0);
    }

    #[test]
    fn test_no_detection_scores_lowest_and_resets() {
        let mut s = scorer();
        let t0 = Instant::now();
        s.score(Some(&sample(0.3, t0)), t0);
        assert!(s.window().started().is_some());

        let score = s.score(None, t0 + Duration::from_secs(5));
        assert_eq!(score, ClosenessScore::LOWEST);
        assert!(s.window().started().is_none());
    }

    #[test]
    fn test_close_after_sustained_duration() {
        let mut s = scorer();
        let t0 = Instant::now();

        s.score(Some(&sample(0.3, t0)), t0);
        assert!(!s.is_close(t0));
        assert!(!s.is_close(t0 + Duration::from_millis(9_999)));
        assert!(s.is_close(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_single_dip_restarts_timer() {
        let mut s = scorer();
        let t0 = Instant::now();

        s.score(Some(&sample(0.3, t0)), t0);
        s.score(Some(&sample(0.3, t0)), t0 + Duration::from_secs(8));
        // A ratio of 0.19 scores exactly 8, which is not above the threshold.
        assert_eq!(ScoreCalibration::default().score(0.19).value(), 8);
        s.score(Some(&sample(0.19, t0)), t0 + Duration::from_secs(9));
        s.score(Some(&sample(0.3, t0)), t0 + Duration::from_secs(10));

        assert!(!s.is_close(t0 + Duration::from_secs(19)));
        assert!(s.is_close(t0 + Duration::from_secs(20)));
    }

    #[test]
    fn test_synthetic_sequences() {
        // Each sequence is (seconds, score-producing ratio); a poll every 5s.
        // Property: close at time t iff every score since the last dip was > 8 and the
        // first of them is at least 10s before t.
        let cal = ScoreCalibration::default();
        let sequences: Vec<Vec<f64>> = vec![
            vec![0.3, 0.3, 0.3, 0.3],
            vec![0.3, 0.05, 0.3, 0.3, 0.3],
            vec![0.0, 0.0, 0.3, 0.3, 0.2, 0.3],
            vec![0.24, 0.22, 0.25, 0.3, 0.3, 0.01, 0.3],
            vec![0.2, 0.21, 0.2, 0.22],
        ];

        for seq in sequences {
            let mut s = scorer();
            let t0 = Instant::now();
            let mut run_start: Option<u64> = None;
            for (i, ratio) in seq.iter().enumerate() {
                let secs = i as u64 * 5;
                let now = t0 + Duration::from_secs(secs);
                s.score(Some(&sample(*ratio, now)), now);

                if cal.score(*ratio).value() > 8 {
                    run_start.get_or_insert(secs);
                } else {
                    run_start = None;
                }
                let expected = run_start.is_some_and(|start| secs - start >= 10);
                assert_eq!(s.is_close(now), expected, "sequence {seq:?} at {secs}s");
            }
        }
    }

    #[test]
    fn test_reset_clears_state() {
        let mut s = scorer();
        let t0 = Instant::now();
        s.score(Some(&sample(0.3, t0)), t0);
        s.reset();
        assert!(s.last_score().is_none());
        assert!(!s.is_close(t0 + Duration::from_secs(60)));
    }
}
