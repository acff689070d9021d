//! Key normalization applied before a key reaches the algorithms.

use std::sync::Arc;

/// Maps a caller-supplied identifier to the key state is stored under.
pub type KeyExtractor = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Use the identifier as-is.
pub fn identity() -> KeyExtractor {
    Arc::new(|key: &str| key.to_string())
}

/// Namespace identifiers, e.g. `prefixed("ip:")` or `prefixed("user:")`.
pub fn prefixed(prefix: impl Into<String>) -> KeyExtractor {
    let prefix = prefix.into();
    Arc::new(move |key: &str| format!("{}{}", prefix, key))
}

/// Trim surrounding whitespace and lowercase, so `" Alice@Example.com"` and
/// `"alice@example.com"` share a quota.
pub fn normalized() -> KeyExtractor {
    Arc::new(|key: &str| key.trim().to_lowercase())
}

/// Apply `first`, then `second`.
pub fn chain(first: KeyExtractor, second: KeyExtractor) -> KeyExtractor {
    Arc::new(move |key: &str| second(&first(key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        assert_eq!(identity()("192.168.0.1"), "192.168.0.1");
    }

    #[test]
    fn test_prefixed() {
        let extractor = prefixed("ip:");
        assert_eq!(extractor("10.0.0.1"), "ip:10.0.0.1");
    }

    #[test]
    fn test_chain_normalizes_then_prefixes() {
        let extractor = chain(normalized(), prefixed("user:"));
        assert_eq!(extractor("  Alice "), "user:alice");
    }
}
