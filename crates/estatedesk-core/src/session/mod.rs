//! Idle-session tracking.
//!
//! This module provides:
//! - `ActivityHub`: where the UI reports pointer, keyboard, scroll and touch input
//! - `SessionMonitor`: warns before and ends the session after a period of inactivity
//!
//! The monitor only runs while a token exists. When it fires, the session
//! is torn down through `TokenLifecycle::end_session`, which also empties
//! the cache.

pub mod activity;
pub mod monitor;

pub use activity::{ActivityHub, ActivityKind, ListenerId, TRACKED_ACTIVITY};
pub use monitor::{MonitorSettings, SessionMonitor, SessionPhase, SessionState};
