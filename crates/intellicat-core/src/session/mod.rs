//! Session orchestration.
//!
//! ```text
//!            ┌──────────── trigger / PI1_DONE / manual ───────────┐
//!            │                                                    ▼
//!  Idle ⇄ AwaitingTrigger                                     Engaging
//!   ▲                                                  close │        │ timeout
//!   │                                                        ▼        ▼
//!   │  SECONDARY: send PI2_DONE ◄──────────────── CloseAchieved    TimedOut ──► Idle
//!   │                                                        │
//!   │                                     MAIN: send PI1_DONE▼
//!   ├──────────── peer timeout ─────────────────────── AwaitingPeer
//!   │                                                        │ PI2_DONE
//!   └──────────── reward complete, count cycle ─────── Rewarding
//! ```

mod orchestrator;
mod state;

pub use orchestrator::SessionOrchestrator;
pub use state::{EngagementOutcome, SessionState, StatusSnapshot};
pub use crate::vision::Observation;
