//! Token bucket.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use super::{per_second, whole_units, Algorithm};
use crate::config::AlgorithmKind;
use crate::ratelimit::clock::{add_duration, elapsed_secs, secs_to_duration};
use crate::ratelimit::decision::Decision;
use crate::ratelimit::state::BucketState;

/// Permits accumulate at `rate` per `window`, up to `burst_size`, and each
/// admitted unit spends one.
///
/// A key seen for the first time starts with a full bucket, so it gets an
/// immediate burst allowance. `tokens` stays within `0..=burst_size`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: u64,
    window_secs: f64,
    burst_size: u64,
}

impl TokenBucket {
    pub fn new(rate: u64, window: Duration, burst_size: u64) -> Self {
        Self {
            rate,
            window_secs: window.as_secs_f64(),
            burst_size,
        }
    }

    pub fn burst_size(&self) -> u64 {
        self.burst_size
    }

    /// Tokens available at `now`, refilled since the last update.
    fn available(&self, state: &BucketState, now: DateTime<Utc>) -> f64 {
        let capacity = self.burst_size as f64;
        match state.last_update {
            None => capacity,
            Some(last) => {
                let refill = elapsed_secs(last, now) * self.rate as f64 / self.window_secs;
                (state.tokens + refill).clamp(0.0, capacity)
            }
        }
    }

    /// Seconds needed to accumulate `tokens` more tokens.
    fn secs_to_refill(&self, tokens: f64) -> f64 {
        tokens * self.window_secs / self.rate as f64
    }
}

impl Algorithm for TokenBucket {
    type State = BucketState;

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::TokenBucket
    }

    fn consume(&self, state: &mut BucketState, n: u64, now: DateTime<Utc>) -> bool {
        state.tokens = self.available(state, now);
        state.last_update = Some(now);

        let requested = n as f64;
        if state.tokens >= requested {
            state.tokens -= requested;
            true
        } else {
            false
        }
    }

    fn peek(&self, state: &BucketState, now: DateTime<Utc>) -> Decision {
        let tokens = self.available(state, now);
        let capacity = self.burst_size as f64;

        let retry_after = if tokens < 1.0 {
            secs_to_duration(self.secs_to_refill(1.0 - tokens))
        } else {
            Duration::ZERO
        };

        let mut metadata = Decision::metadata_for(self.kind());
        metadata.insert("current_tokens".to_string(), Value::from(tokens));
        metadata.insert("burst_size".to_string(), Value::from(self.burst_size));
        metadata.insert(
            "refill_rate".to_string(),
            Value::from(per_second(self.rate, self.window_secs)),
        );

        Decision {
            allowed: tokens >= 1.0,
            remaining: whole_units(tokens),
            reset_time: add_duration(now, secs_to_duration(self.secs_to_refill(capacity - tokens))),
            retry_after,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::{Clock, ManualClock};

    const MINUTE: Duration = Duration::from_secs(60);

    fn ten_per_minute_burst_five() -> TokenBucket {
        TokenBucket::new(10, MINUTE, 5)
    }

    #[test]
    fn test_fresh_key_starts_full() {
        let bucket = ten_per_minute_burst_five();
        let clock = ManualClock::at_unix_secs(1_700_000_000);

        let decision = bucket.peek(&BucketState::default(), clock.now());
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 5);
        assert_eq!(decision.retry_after, Duration::ZERO);
        assert_eq!(decision.reset_time, clock.now());
    }

    #[test]
    fn test_burst_then_deny() {
        let bucket = ten_per_minute_burst_five();
        let clock = ManualClock::at_unix_secs(1_700_000_000);
        let mut state = BucketState::default();

        for i in 1..=5 {
            assert!(bucket.consume(&mut state, 1, clock.now()), "call {} should be allowed", i);
        }

        let decision = bucket.peek(&state, clock.now());
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after, Duration::from_secs(6));

        assert!(!bucket.consume(&mut state, 1, clock.now()));
        assert_eq!(state.tokens, 0.0);
    }

    #[test]
    fn test_refill_after_denial() {
        let bucket = ten_per_minute_burst_five();
        let clock = ManualClock::at_unix_secs(1_700_000_000);
        let mut state = BucketState::default();

        assert!(bucket.consume(&mut state, 5, clock.now()));
        assert!(!bucket.consume(&mut state, 1, clock.now()));

        // 6s at 10 per minute refills exactly one token
        clock.advance(Duration::from_secs(6));
        assert!(bucket.consume(&mut state, 1, clock.now()));
        assert!(!bucket.consume(&mut state, 1, clock.now()));
    }

    #[test]
    fn test_denial_keeps_partial_refill() {
        let bucket = ten_per_minute_burst_five();
        let clock = ManualClock::at_unix_secs(1_700_000_000);
        let mut state = BucketState::default();
        bucket.consume(&mut state, 5, clock.now());

        clock.advance(Duration::from_secs(3));
        assert!(!bucket.consume(&mut state, 1, clock.now()));
        assert!((state.tokens - 0.5).abs() < 1e-9);
        assert_eq!(state.last_update, Some(clock.now()));

        clock.advance(Duration::from_secs(3));
        assert!(bucket.consume(&mut state, 1, clock.now()));
    }

    #[test]
    fn test_tokens_capped_at_burst_size() {
        let bucket = ten_per_minute_burst_five();
        let clock = ManualClock::at_unix_secs(1_700_000_000);
        let mut state = BucketState::default();
        bucket.consume(&mut state, 1, clock.now());

        clock.advance(Duration::from_secs(3_600));
        let decision = bucket.peek(&state, clock.now());
        assert_eq!(decision.remaining, 5);

        bucket.consume(&mut state, 1, clock.now());
        assert_eq!(state.tokens, 4.0);
    }

    #[test]
    fn test_multi_unit_request_larger_than_burst() {
        let bucket = ten_per_minute_burst_five();
        let clock = ManualClock::at_unix_secs(1_700_000_000);
        let mut state = BucketState::default();

        assert!(!bucket.consume(&mut state, 6, clock.now()));
        assert_eq!(state.tokens, 5.0);
        assert!(bucket.consume(&mut state, 5, clock.now()));
    }

    #[test]
    fn test_clock_moving_backwards_does_not_drain() {
        let bucket = ten_per_minute_burst_five();
        let clock = ManualClock::at_unix_secs(1_700_000_000);
        let mut state = BucketState::default();
        bucket.consume(&mut state, 2, clock.now());

        clock.set(chrono::TimeZone::timestamp_opt(&Utc, 1_699_999_000, 0).unwrap());
        assert!(bucket.consume(&mut state, 1, clock.now()));
        assert_eq!(state.tokens, 2.0);
    }

    #[test]
    fn test_peek_does_not_mutate_and_reports_metadata() {
        let bucket = ten_per_minute_burst_five();
        let clock = ManualClock::at_unix_secs(1_700_000_000);
        let mut state = BucketState::default();
        bucket.consume(&mut state, 2, clock.now());
        let before = state.clone();

        let decision = bucket.peek(&state, clock.now());
        assert_eq!(state, before);
        assert_eq!(decision.remaining, 3);
        assert_eq!(decision.algorithm(), Some("token_bucket"));
        assert_eq!(decision.metadata["current_tokens"], Value::from(3.0));
        // Two missing tokens take 12s to come back
        assert_eq!(decision.reset_time, add_duration(clock.now(), Duration::from_secs(12)));
    }
}
