//! Decision results reported to callers.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::AlgorithmKind;

/// Outcome of inspecting a key's quota.
///
/// `metadata` carries algorithm-specific diagnostics (current level, window
/// bounds, leak rate) for observability only.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether at least one more unit would be admitted
    pub allowed: bool,
    /// Whole units left before the limit is hit
    pub remaining: u64,
    /// When quota is expected to replenish or roll over
    pub reset_time: DateTime<Utc>,
    /// Time until at least one unit is available; zero when allowed
    pub retry_after: Duration,
    /// Diagnostic fields keyed by name
    pub metadata: BTreeMap<String, Value>,
}

impl Decision {
    /// The denial reported by a closed limiter.
    pub fn closed(now: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_time: now,
            retry_after: Duration::ZERO,
            metadata: BTreeMap::new(),
        }
    }

    /// Start the metadata map with the algorithm name.
    pub(crate) fn metadata_for(kind: AlgorithmKind) -> BTreeMap<String, Value> {
        let mut metadata = BTreeMap::new();
        metadata.insert("algorithm".to_string(), Value::from(kind.as_str()));
        metadata
    }

    /// The algorithm that produced this decision, if recorded.
    pub fn algorithm(&self) -> Option<&str> {
        self.metadata.get("algorithm").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_decision_is_denied() {
        let now = Utc::now();
        let decision = Decision::closed(now);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_time, now);
        assert_eq!(decision.algorithm(), None);
    }

    #[test]
    fn test_metadata_carries_algorithm() {
        let metadata = Decision::metadata_for(AlgorithmKind::LeakyBucket);
        assert_eq!(metadata.get("algorithm"), Some(&Value::from("leaky_bucket")));
    }
}
