//! Alert debouncing.
//!
//! `should_alert` is a pure function over a detection result and the current
//! `AlertState`. It never fires twice within `cooldown` of the last alert,
//! and a frame with several qualifying detections still yields one alert.

use std::time::{Duration, Instant};

use crate::detect::InferenceResult;

/// Timing state of the debouncer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlertState {
    /// Instant of the most recent fired alert; `None` means never.
    pub last_alert: Option<Instant>,
    pub cooldown: Duration,
}

impl AlertState {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_alert: None,
            cooldown,
        }
    }

    /// True while an alert fired less than `cooldown` ago.
    pub fn in_cooldown(&self, now: Instant) -> bool {
        !self.cooldown_remaining(now).is_zero()
    }

    /// Time left before the next alert may fire; zero when none is pending.
    pub fn cooldown_remaining(&self, now: Instant) -> Duration {
        match self.last_alert {
            Some(last) => self
                .cooldown
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

/// Outcome of one debounce evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlertDecision {
    pub fire: bool,
    pub state: AlertState,
}

/// Decide whether an alert fires for `detections` at `now`.
///
/// Fires iff some detection has `label == target_label` and
/// `confidence >= confidence_threshold`, and the cooldown has elapsed (or no
/// alert has fired yet). On fire the returned state records `now`; otherwise
/// it is `state` unchanged.
pub fn should_alert(
    detections: &InferenceResult,
    target_label: &str,
    confidence_threshold: f32,
    now: Instant,
    state: AlertState,
) -> AlertDecision {
    let qualifying = detections.contains_label(target_label, confidence_threshold);
    if !qualifying || state.in_cooldown(now) {
        return AlertDecision { fire: false, state };
    }
    AlertDecision {
        fire: true,
        state: AlertState {
            last_alert: Some(now),
            ..state
        },
    }
}
