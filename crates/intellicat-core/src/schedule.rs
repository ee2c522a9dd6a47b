//! Hourly scheduling and per-hour cycle counting.
//!
//! Wall-clock time is divided into hour buckets. Entering a new bucket resets the success
//! counter and, if the hour is inside the active window, arms one automatic trigger. The
//! bucket the scheduler starts in is never a transition, so a node booted at 10:20 runs its
//! first automatic session at 11:00.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::ScheduleConfig;

/// One local wall-clock hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HourBucket {
    pub date: NaiveDate,
    pub hour: u32,
}

impl HourBucket {
    pub fn of(wall: NaiveDateTime) -> Self {
        Self {
            date: wall.date(),
            hour: wall.hour(),
        }
    }
}

impl fmt::Display for HourBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:00", self.date, self.hour)
    }
}

/// Decides when sessions may start and counts successful cycles per hour.
#[derive(Debug, Clone)]
pub struct CycleScheduler {
    trigger_hour: u32,
    last_hour: u32,
    cap: u32,
    rearm_on_success: bool,
    bucket: HourBucket,
    successes: u32,
    armed: bool,
    manual_pending: bool,
}

impl CycleScheduler {
    pub fn new(config: &ScheduleConfig, now: NaiveDateTime) -> Self {
        Self {
            trigger_hour: config.trigger_hour,
            last_hour: config.last_hour,
            cap: config.max_cycles_per_hour,
            rearm_on_success: config.rearm_on_success,
            bucket: HourBucket::of(now),
            successes: 0,
            armed: false,
            manual_pending: false,
        }
    }

    /// Whether automatic triggers are allowed during `hour`.
    pub fn in_active_window(&self, hour: u32) -> bool {
        if self.trigger_hour <= self.last_hour {
            (self.trigger_hour..=self.last_hour).contains(&hour)
        } else {
            // Window wraps past midnight, e.g. 20..=3
            hour >= self.trigger_hour || hour <= self.last_hour
        }
    }

    /// Consume a pending trigger. True at most once per bucket transition into an active
    /// hour, or once per accepted manual start, and never while the cap is reached.
    pub fn should_trigger(&mut self, now: NaiveDateTime) -> bool {
        self.roll(now);

        if self.successes >= self.cap {
            return false;
        }
        if self.manual_pending {
            self.manual_pending = false;
            self.armed = false;
            debug!(bucket = %self.bucket, "Manual start consumed");
            return true;
        }
        if self.armed {
            self.armed = false;
            debug!(bucket = %self.bucket, "Scheduled trigger consumed");
            return true;
        }
        false
    }

    /// Count one successful cycle. Refused (and logged) if the cap is already reached.
    pub fn record_success(&mut self, now: NaiveDateTime) -> bool {
        self.roll(now);

        if self.successes >= self.cap {
            warn!(
                bucket = %self.bucket,
                successes = self.successes,
                cap = self.cap,
                "Cycle cap already reached, success not recorded"
            );
            return false;
        }

        self.successes += 1;
        info!(
            bucket = %self.bucket,
            successes = self.successes,
            cap = self.cap,
            "Cycle recorded"
        );

        if self.successes >= self.cap {
            info!(bucket = %self.bucket, "Cycle cap reached, sessions suppressed until next hour");
        } else if self.rearm_on_success {
            self.armed = true;
        }
        true
    }

    /// Whether the cap is reached for the bucket containing `now`.
    pub fn cap_reached(&self, now: NaiveDateTime) -> bool {
        if HourBucket::of(now) > self.bucket {
            return false;
        }
        self.successes >= self.cap
    }

    /// Request a session outside the hourly gate. Refused when the cap is reached.
    pub fn request_manual_start(&mut self, now: NaiveDateTime) -> bool {
        self.roll(now);

        if self.successes >= self.cap {
            warn!(
                successes = self.successes,
                cap = self.cap,
                "Manual start refused, cycle cap reached"
            );
            return false;
        }
        self.manual_pending = true;
        true
    }

    /// Arm the trigger again so the node retries at its next opportunity.
    pub fn rearm(&mut self) {
        self.armed = true;
    }

    pub fn successes(&self) -> u32 {
        self.successes
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    pub fn bucket(&self) -> HourBucket {
        self.bucket
    }

    /// Move to the bucket containing `now`. A wall clock that steps backwards keeps the
    /// current bucket so it can never fire twice.
    fn roll(&mut self, now: NaiveDateTime) {
        let bucket = HourBucket::of(now);
        if bucket == self.bucket {
            return;
        }
        if bucket < self.bucket {
            debug!(current = %self.bucket, seen = %bucket, "Wall clock moved backwards, keeping bucket");
            return;
        }

        let active = self.in_active_window(bucket.hour);
        info!(
            from = %self.bucket,
            to = %bucket,
            active,
            "Entered new hour, cycle counter reset"
        );
        self.bucket = bucket;
        self.successes = 0;
        self.armed = active;
    }
}
