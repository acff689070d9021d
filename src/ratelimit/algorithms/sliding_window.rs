//! Sliding window log.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use super::Algorithm;
use crate::config::AlgorithmKind;
use crate::ratelimit::clock::{add_duration, duration_between, sub_duration};
use crate::ratelimit::decision::Decision;
use crate::ratelimit::state::{LoggedRequest, WindowState};

/// Logs admitted units by timestamp and admits while fewer than `rate` fall
/// inside `(now - window, now]`.
///
/// The log is pruned on every access and units admitted at the same instant
/// share an entry, so its size is bounded by the number of calls in one
/// window regardless of how many units each call asks for.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    rate: u64,
    window: Duration,
}

impl SlidingWindow {
    pub fn new(rate: u64, window: Duration) -> Self {
        Self { rate, window }
    }

    fn in_window(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        at > sub_duration(now, self.window) && at <= now
    }

    /// Oldest surviving timestamp and the units logged inside the window.
    fn live(&self, state: &WindowState, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, u64) {
        state
            .requests
            .iter()
            .filter(|entry| self.in_window(entry.at, now))
            .fold((None, 0u64), |(oldest, units), entry| {
                let oldest = match oldest {
                    Some(oldest) if oldest <= entry.at => oldest,
                    _ => entry.at,
                };
                (Some(oldest), units.saturating_add(entry.units))
            })
    }
}

impl Algorithm for SlidingWindow {
    type State = WindowState;

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::SlidingWindow
    }

    fn consume(&self, state: &mut WindowState, n: u64, now: DateTime<Utc>) -> bool {
        state.requests.retain(|entry| self.in_window(entry.at, now));
        let (_, logged) = self.live(state, now);

        let admitted = match logged.checked_add(n) {
            Some(total) if total <= self.rate => {
                if n > 0 {
                    match state.requests.last_mut() {
                        Some(last) if last.at == now => last.units += n,
                        _ => state.requests.push(LoggedRequest { at: now, units: n }),
                    }
                }
                true
            }
            _ => false,
        };

        state.count = if admitted { logged + n } else { logged };
        state.window_start = Some(sub_duration(now, self.window));
        admitted
    }

    fn peek(&self, state: &WindowState, now: DateTime<Utc>) -> Decision {
        let (oldest, valid) = self.live(state, now);

        let remaining = self.rate.saturating_sub(valid);
        let (reset_time, retry_after) = match oldest {
            Some(oldest) => {
                let exits_at = add_duration(oldest, self.window);
                let retry_after = if remaining == 0 {
                    duration_between(now, exits_at)
                } else {
                    Duration::ZERO
                };
                (exits_at, retry_after)
            }
            None => (now, Duration::ZERO),
        };

        let mut metadata = Decision::metadata_for(self.kind());
        metadata.insert("valid_requests".to_string(), Value::from(valid));
        metadata.insert(
            "window_start".to_string(),
            Value::from(sub_duration(now, self.window).to_rfc3339()),
        );

        Decision {
            allowed: remaining > 0,
            remaining,
            reset_time,
            retry_after,
            metadata,
        }
    }
}
