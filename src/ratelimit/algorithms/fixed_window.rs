//! Fixed window counter.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::time::Duration;

use super::Algorithm;
use crate::config::AlgorithmKind;
use crate::ratelimit::clock::{add_duration, duration_between};
use crate::ratelimit::decision::Decision;
use crate::ratelimit::state::WindowState;

/// Counts admitted units in non-overlapping windows aligned to the Unix
/// epoch, admitting at most `rate` per window.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    rate: u64,
    window: Duration,
}

impl FixedWindow {
    pub fn new(rate: u64, window: Duration) -> Self {
        Self { rate, window }
    }

    /// Start of the aligned window containing `now`, to the nanosecond.
    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        const NANOS_PER_SEC: i128 = 1_000_000_000;

        let window_ns = i128::try_from(self.window.as_nanos())
            .unwrap_or(i128::MAX)
            .max(1);
        let now_ns = i128::from(now.timestamp()) * NANOS_PER_SEC
            + i128::from(now.timestamp_subsec_nanos());
        let start_ns = now_ns.div_euclid(window_ns) * window_ns;

        let nanos = start_ns.rem_euclid(NANOS_PER_SEC) as u32;
        i64::try_from(start_ns.div_euclid(NANOS_PER_SEC))
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, nanos).single())
            .unwrap_or(now)
    }

    /// The (count, window start) in effect at `now`, rolling over if the
    /// stored window has ended or was never opened.
    fn current(&self, state: &WindowState, now: DateTime<Utc>) -> (u64, DateTime<Utc>) {
        match state.window_start {
            Some(start) if duration_between(start, now) < self.window => (state.count, start),
            _ => (0, self.window_start(now)),
        }
    }
}

impl Algorithm for FixedWindow {
    type State = WindowState;

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::FixedWindow
    }

    fn consume(&self, state: &mut WindowState, n: u64, now: DateTime<Utc>) -> bool {
        let (count, start) = self.current(state, now);
        state.count = count;
        state.window_start = Some(start);

        match count.checked_add(n) {
            Some(total) if total <= self.rate => {
                state.count = total;
                true
            }
            _ => false,
        }
    }

    fn peek(&self, state: &WindowState, now: DateTime<Utc>) -> Decision {
        let (count, start) = self.current(state, now);
        let remaining = self.rate.saturating_sub(count);
        let reset_time = add_duration(start, self.window);

        let retry_after = if remaining == 0 {
            duration_between(now, reset_time)
        } else {
            Duration::ZERO
        };

        let mut metadata = Decision::metadata_for(self.kind());
        metadata.insert("window_start".to_string(), Value::from(start.to_rfc3339()));
        metadata.insert("current_count".to_string(), Value::from(count));

        Decision {
            allowed: remaining > 0,
            remaining,
            reset_time,
            retry_after,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::{Clock, ManualClock};

    /// A minute boundary: 28_333_333 * 60.
    const ALIGNED: i64 = 1_699_999_980;

    #[test]
    fn test_rate_per_window_then_rollover() {
        let window = FixedWindow::new(3, Duration::from_secs(60));
        let clock = ManualClock::at_unix_secs(ALIGNED);
        let mut state = WindowState::default();

        for _ in 0..3 {
            assert!(window.consume(&mut state, 1, clock.now()));
        }
        assert!(!window.consume(&mut state, 1, clock.now()));
        assert_eq!(state.count, 3);

        clock.advance(Duration::from_secs(60));
        for _ in 0..3 {
            assert!(window.consume(&mut state, 1, clock.now()));
        }
        assert!(!window.consume(&mut state, 1, clock.now()));
    }

    #[test]
    fn test_window_start_is_aligned() {
        let window = FixedWindow::new(3, Duration::from_secs(60));
        let clock = ManualClock::at_unix_secs(ALIGNED + 25);
        let mut state = WindowState::default();

        window.consume(&mut state, 1, clock.now());
        assert_eq!(state.window_start.map(|s| s.timestamp()), Some(ALIGNED));

        // The window closes on the boundary, not 60s after the first request
        clock.advance(Duration::from_secs(35));
        let decision = window.peek(&state, clock.now());
        assert_eq!(decision.remaining, 3);
    }

    #[test]
    fn test_count_never_exceeds_rate() {
        let window = FixedWindow::new(5, Duration::from_secs(60));
        let clock = ManualClock::at_unix_secs(ALIGNED);
        let mut state = WindowState::default();

        assert!(window.consume(&mut state, 4, clock.now()));
        assert!(!window.consume(&mut state, 2, clock.now()));
        assert_eq!(state.count, 4);
        assert!(window.consume(&mut state, 1, clock.now()));
        assert_eq!(state.count, 5);
        assert!(!window.consume(&mut state, u64::MAX, clock.now()));
        assert_eq!(state.count, 5);
    }

    #[test]
    fn test_denial_persists_rollover() {
        let window = FixedWindow::new(2, Duration::from_secs(60));
        let clock = ManualClock::at_unix_secs(ALIGNED);
        let mut state = WindowState::default();
        window.consume(&mut state, 2, clock.now());

        clock.advance(Duration::from_secs(90));
        assert!(!window.consume(&mut state, 3, clock.now()));
        assert_eq!(state.count, 0);
        assert_eq!(state.window_start.map(|s| s.timestamp()), Some(ALIGNED + 60));
    }

    #[test]
    fn test_peek_when_exhausted() {
        let window = FixedWindow::new(2, Duration::from_secs(60));
        let clock = ManualClock::at_unix_secs(ALIGNED);
        let mut state = WindowState::default();
        window.consume(&mut state, 2, clock.now());

        clock.advance(Duration::from_secs(45));
        let decision = window.peek(&state, clock.now());
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_time.timestamp(), ALIGNED + 60);
        assert_eq!(decision.retry_after, Duration::from_secs(15));
        assert_eq!(decision.metadata["current_count"], Value::from(2));
    }

    #[test]
    fn test_sub_millisecond_window() {
        let window = FixedWindow::new(2, Duration::from_micros(1500));
        let clock = ManualClock::at_unix_secs(ALIGNED);
        let mut state = WindowState::default();

        clock.advance(Duration::from_millis(2));
        assert!(window.consume(&mut state, 2, clock.now()));
        assert!(!window.consume(&mut state, 1, clock.now()));
        let start = state.window_start.unwrap();
        assert_eq!(start.timestamp(), ALIGNED);
        assert_eq!(start.timestamp_subsec_nanos(), 1_500_000);

        // Next boundary is at +3ms, not +2ms or +4ms
        clock.advance(Duration::from_micros(999));
        assert!(!window.consume(&mut state, 1, clock.now()));
        clock.advance(Duration::from_micros(1));
        assert!(window.consume(&mut state, 1, clock.now()));
    }

    #[test]
    fn test_peek_fresh_key() {
        let window = FixedWindow::new(10, Duration::from_secs(60));
        let clock = ManualClock::at_unix_secs(ALIGNED + 10);

        let state = WindowState::default();
        let decision = window.peek(&state, clock.now());
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 10);
        assert_eq!(decision.retry_after, Duration::ZERO);
        assert_eq!(decision.reset_time.timestamp(), ALIGNED + 60);
        assert_eq!(state, WindowState::default());
    }
}
